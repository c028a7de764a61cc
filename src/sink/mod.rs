pub mod line;

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::{debug, warn};

use crate::bins::Point;
use crate::config::InfluxConfig;

/// Time-series database write API.
pub trait TimeSeriesWrite: Send + Sync {
    /// Idempotently create the database if it does not exist.
    fn ensure_database(&self, db: &str) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Write a line-protocol payload into the database.
    fn write(&self, db: &str, body: &str) -> impl std::future::Future<Output = Result<()>> + Send;
}

/// HTTP client for the InfluxDB v1 write API.
pub struct InfluxClient {
    http: reqwest::Client,
    endpoint: String,
}

impl InfluxClient {
    pub fn new(cfg: &InfluxConfig) -> Result<Self> {
        let timeout = if cfg.timeout.is_zero() {
            Duration::from_secs(30)
        } else {
            cfg.timeout
        };

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building InfluxDB HTTP client")?;

        Ok(Self {
            http,
            endpoint: cfg.endpoint.trim_end_matches('/').to_string(),
        })
    }
}

impl TimeSeriesWrite for InfluxClient {
    async fn ensure_database(&self, db: &str) -> Result<()> {
        let url = format!("{}/query", self.endpoint);
        let query = format!("CREATE DATABASE \"{db}\"");

        let response = self
            .http
            .post(&url)
            .query(&[("q", query.as_str())])
            .send()
            .await
            .with_context(|| format!("creating database {db}"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("unexpected status {status} creating database {db}: {body}");
        }

        Ok(())
    }

    async fn write(&self, db: &str, body: &str) -> Result<()> {
        let url = format!("{}/write", self.endpoint);

        let response = self
            .http
            .post(&url)
            .query(&[("db", db), ("precision", "s")])
            .body(body.to_string())
            .send()
            .await
            .with_context(|| format!("writing to database {db}"))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("unexpected status {status} writing to database {db}: {text}");
        }

        Ok(())
    }
}

/// Persisted outbox state: per-database pending line-protocol text.
pub type OutboxState = BTreeMap<String, String>;

/// Durable per-database buffer of formatted records awaiting delivery.
///
/// Delivery is best-effort, at-least-once: chunks that fail are retained
/// verbatim and retried on the next invocation, successes are dropped.
pub struct Outbox {
    pending: OutboxState,
    /// Per-database cap on retained bytes; 0 disables the cap. The
    /// original behavior never expires pending fragments.
    max_pending_bytes: usize,
}

impl Outbox {
    pub fn new(state: OutboxState, max_pending_bytes: usize) -> Self {
        Self {
            pending: state,
            max_pending_bytes,
        }
    }

    /// Formats reduced points into lines appended to the database's
    /// pending payload. Zero points leave the outbox untouched.
    pub fn enqueue(&mut self, db: &str, measurement: &str, points: &[Point], bin_time: i64) {
        if points.is_empty() {
            return;
        }

        let payload = self.pending.entry(db.to_string()).or_default();
        for point in points {
            payload.push_str(&line::format_line(measurement, point, bin_time));
        }

        if self.max_pending_bytes > 0 && payload.len() > self.max_pending_bytes {
            let over = payload.len() - self.max_pending_bytes;
            // Drop whole lines from the front until back under the cap.
            let cut = payload[over..]
                .find('\n')
                .map(|i| over + i + 1)
                .unwrap_or(payload.len());
            warn!(
                db,
                dropped_bytes = cut,
                "pending payload over cap, dropping oldest records"
            );
            payload.drain(..cut);
        }
    }

    /// Attempts delivery of every database's pending payload in chunks of
    /// `chunk_lines` lines. Failed chunks are kept for the next flush;
    /// failures are logged, never escalated.
    pub async fn flush<C: TimeSeriesWrite>(&mut self, client: &C, chunk_lines: usize) {
        let databases: Vec<String> = self.pending.keys().cloned().collect();

        for db in databases {
            let payload = self.pending.remove(&db).unwrap_or_default();
            if payload.is_empty() {
                continue;
            }

            // Existence is checked idempotently each flush; a failure here
            // is logged and the write still attempted, since the database
            // may already exist.
            if let Err(e) = client.ensure_database(&db).await {
                warn!(db, error = %e, "ensuring database failed");
            }

            let lines: Vec<&str> = payload.lines().collect();
            let mut retained = String::new();
            let mut delivered = 0usize;

            for chunk in lines.chunks(chunk_lines.max(1)) {
                let mut body = chunk.join("\n");
                body.push('\n');

                match client.write(&db, &body).await {
                    Ok(()) => delivered += chunk.len(),
                    Err(e) => {
                        warn!(db, lines = chunk.len(), error = %e, "write failed, retaining chunk");
                        retained.push_str(&body);
                    }
                }
            }

            debug!(
                db,
                delivered,
                retained = retained.lines().count(),
                "flush complete"
            );

            if !retained.is_empty() {
                self.pending.insert(db, retained);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pending.values().all(String::is_empty)
    }

    /// State to persist for the next invocation.
    pub fn into_state(mut self) -> OutboxState {
        self.pending.retain(|_, payload| !payload.is_empty());
        self.pending
    }
}
