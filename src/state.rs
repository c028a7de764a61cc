//! JSON state files persisted across daemon invocations.

use std::path::Path;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Loads persisted state, falling back to the default when the file does
/// not exist yet. A present-but-unreadable file is an error: silently
/// starting fresh would discard undelivered data.
pub fn load_json<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    match std::fs::read(path) {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .with_context(|| format!("parsing state file {}", path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(e) => Err(e).with_context(|| format!("reading state file {}", path.display())),
    }
}

/// Atomically rewrites a state file: write to a sibling temp file, then
/// rename over the target so a crash never leaves a half-written file.
pub fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value).context("serializing state")?;

    let tmp = path.with_extension("tmp");
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating state directory {}", parent.display()))?;
        }
    }

    std::fs::write(&tmp, &bytes)
        .with_context(|| format!("writing state file {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("replacing state file {}", path.display()))?;

    Ok(())
}
