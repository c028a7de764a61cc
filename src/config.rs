use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Top-level configuration for the batchflux daemon.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Logging verbosity (debug, info, warn, error). Default: "info".
    /// Overridden by the --log-level flag when given.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Scheduler query configuration.
    pub source: SourceConfig,

    /// Aggregation time bin configuration.
    #[serde(default)]
    pub resolution: ResolutionConfig,

    /// InfluxDB connection configuration.
    pub influx: InfluxConfig,

    /// Persistent state file locations.
    #[serde(default)]
    pub state: StateConfig,

    /// Ordered hostname rename rules for deriving job sites.
    #[serde(default)]
    pub site_renames: Vec<RenameRule>,

    /// Names of metrics to collect, resolved against the compiled-in
    /// registry.
    #[serde(default = "default_metrics")]
    pub metrics: Vec<String>,
}

/// Scheduler query configuration.
#[derive(Debug, Default, Deserialize)]
pub struct SourceConfig {
    /// Scheduler REST bridge endpoint (e.g., "http://localhost:9618").
    pub endpoint: String,

    /// Request timeout. Default: 30s.
    #[serde(default = "default_source_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// Constraint expression selecting which active jobs to collect.
    /// Empty means all jobs.
    #[serde(default)]
    pub constraint: String,

    /// Submit site recorded for jobs whose classads lack one.
    #[serde(default)]
    pub submit_site: String,
}

/// Aggregation time bin configuration.
#[derive(Debug, Deserialize)]
pub struct ResolutionConfig {
    /// Bin width. Default: 5m.
    #[serde(default = "default_bin_width", with = "humantime_serde")]
    pub bin_width: Duration,
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            bin_width: default_bin_width(),
        }
    }
}

/// InfluxDB connection configuration.
#[derive(Debug, Default, Deserialize)]
pub struct InfluxConfig {
    /// InfluxDB HTTP endpoint (e.g., "http://localhost:8086").
    pub endpoint: String,

    /// Request timeout. Default: 30s.
    #[serde(default = "default_influx_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// Lines per write request, respecting transport payload limits.
    /// Default: 500.
    #[serde(default = "default_chunk_lines")]
    pub chunk_lines: usize,

    /// Cap on retained undelivered bytes per database; 0 means unlimited.
    #[serde(default)]
    pub max_pending_bytes: usize,
}

/// Persistent state file locations.
#[derive(Debug, Deserialize)]
pub struct StateConfig {
    /// Counter checkpoint file.
    #[serde(default = "default_checkpoint_path")]
    pub checkpoint_path: PathBuf,

    /// Undelivered payload outbox file.
    #[serde(default = "default_outbox_path")]
    pub outbox_path: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            checkpoint_path: default_checkpoint_path(),
            outbox_path: default_outbox_path(),
        }
    }
}

/// One hostname rename rule: hosts matching `pattern` report as `site`.
#[derive(Debug, Clone, Deserialize)]
pub struct RenameRule {
    pub pattern: String,
    pub site: String,
}

impl Config {
    /// Loads and validates configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        let cfg: Config = serde_yaml::from_str(&text)
            .with_context(|| format!("parsing config file {}", path.display()))?;

        cfg.validate()?;
        Ok(cfg)
    }

    /// Validates cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.source.endpoint.is_empty() {
            bail!("source.endpoint is required");
        }

        if self.influx.endpoint.is_empty() {
            bail!("influx.endpoint is required");
        }

        if self.resolution.bin_width < Duration::from_secs(1) {
            bail!(
                "resolution.bin_width must be at least 1s, got {:?}",
                self.resolution.bin_width
            );
        }

        if self.metrics.is_empty() {
            bail!("at least one metric must be configured");
        }

        if self.influx.chunk_lines == 0 {
            bail!("influx.chunk_lines must be > 0");
        }

        Ok(())
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_source_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_bin_width() -> Duration {
    Duration::from_secs(300)
}

fn default_influx_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_chunk_lines() -> usize {
    500
}

fn default_checkpoint_path() -> PathBuf {
    PathBuf::from("batchflux-checkpoint.json")
}

fn default_outbox_path() -> PathBuf {
    PathBuf::from("batchflux-outbox.json")
}

fn default_metrics() -> Vec<String> {
    vec![
        "idle_jobs".to_string(),
        "running_jobs".to_string(),
        "cpu_usage".to_string(),
        "cpu_efficiency".to_string(),
    ]
}
