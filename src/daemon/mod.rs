use std::collections::BTreeSet;

use anyhow::{Context, Result};
use tracing::{debug, error, info};

use crate::bins::{elapsed_bins, TimeBin};
use crate::config::Config;
use crate::counter::{CheckpointCache, CheckpointState, PolicyTable};
use crate::job::{ad, JobSnapshot};
use crate::metrics::{self, Metric, MetricJob};
use crate::sink::{Outbox, OutboxState, TimeSeriesWrite};
use crate::source::{snapshot_from_ad, JobSource, RawBatch, SiteResolver};
use crate::state;

/// Fields every snapshot needs regardless of the configured metrics.
const BASE_PROJECTION: &[&str] = &[
    ad::ID,
    ad::STATUS,
    ad::PREV_STATUS,
    ad::QUEUE_TIME,
    ad::ENTERED_STATUS_TIME,
    ad::FIRST_RUN_START,
    ad::LAST_RUN_START,
    ad::LAST_EVICT,
    ad::LAST_SUSPEND,
    ad::COMPLETION,
    ad::SUBMIT_SITE,
];

/// One-shot collection pass: snapshot the job population, aggregate the
/// elapsed bins, deliver, checkpoint.
pub struct Collector<S, W> {
    cfg: Config,
    source: S,
    sink: W,
}

impl<S: JobSource, W: TimeSeriesWrite> Collector<S, W> {
    pub fn new(cfg: Config, source: S, sink: W) -> Self {
        Self { cfg, source, sink }
    }

    /// Runs one full invocation against the given wall-clock time.
    ///
    /// State files are rewritten only on a successful pass, so a crash
    /// mid-run reprocesses the same bins next time rather than losing them.
    pub async fn run_once(&self, now: i64) -> Result<()> {
        let metrics = metrics::build(&self.cfg.metrics)?;

        let checkpoint: CheckpointState = state::load_json(&self.cfg.state.checkpoint_path)
            .context("loading counter checkpoint")?;

        // First ever invocation: nothing to interpolate against yet, so
        // record the baseline boundary and wait for time to pass.
        if checkpoint.next_bin_start == 0 {
            info!(next_bin_start = now, "no checkpoint found, establishing baseline");
            let baseline = CheckpointState {
                next_bin_start: now,
                ..Default::default()
            };
            state::save_json(&self.cfg.state.checkpoint_path, &baseline)
                .context("saving baseline checkpoint")?;
            return Ok(());
        }

        let cache = CheckpointCache::new(checkpoint, PolicyTable::with_defaults());

        let width = self.cfg.resolution.bin_width.as_secs() as i64;
        let bins = elapsed_bins(cache.next_bin_start(), width, now);
        if bins.len() < 2 {
            info!(
                since = cache.next_bin_start(),
                bin_width = width,
                "not enough elapsed bins, nothing to collect"
            );
            return Ok(());
        }

        let projection = projection_for(&metrics);
        let resolver = SiteResolver::new(&self.cfg.site_renames)?;

        let active = self
            .source
            .query_active(&projection)
            .await
            .context("querying active jobs")?;
        let finished = self
            .source
            .query_finished_since(cache.next_bin_start(), &projection)
            .await
            .context("querying recently finished jobs")?;

        let jobs = self.build_snapshots(&[active, finished], &resolver);
        info!(jobs = jobs.len(), bins = bins.len(), "collected job snapshots");

        let outbox_state: OutboxState = state::load_json(&self.cfg.state.outbox_path)
            .context("loading delivery outbox")?;
        let mut outbox = Outbox::new(outbox_state, self.cfg.influx.max_pending_bytes);

        let views: Vec<MetricJob<'_>> = jobs.iter().map(|j| MetricJob::new(j, &cache)).collect();

        for metric in &metrics {
            for &(start, end) in &bins {
                let mut bin = TimeBin::new(start, end);
                let points = metric
                    .calculate(&mut bin, &views)
                    .with_context(|| format!("calculating {}", metric.measurement()))?;

                debug!(
                    metric = metric.measurement(),
                    bin_start = start,
                    points = points.len(),
                    "bin reduced"
                );
                outbox.enqueue(metric.database(), metric.measurement(), &points, start);
            }
        }

        outbox.flush(&self.sink, self.cfg.influx.chunk_lines).await;

        state::save_json(&self.cfg.state.outbox_path, &outbox.into_state())
            .context("saving delivery outbox")?;

        let cached_fields = cached_fields_for(&metrics);
        let last_bin_end = bins[bins.len() - 1].1;
        let next = cache
            .save_checkpoint(last_bin_end, &jobs, &cached_fields)
            .context("building next checkpoint")?;
        state::save_json(&self.cfg.state.checkpoint_path, &next)
            .context("saving counter checkpoint")?;

        info!(next_bin_start = last_bin_end, "invocation complete");
        Ok(())
    }

    /// Builds snapshots from the raw batches, deduplicated by job id.
    /// Malformed or state-inconsistent ads are logged and dropped; one bad
    /// job must not sink the whole population.
    fn build_snapshots(&self, batches: &[RawBatch], resolver: &SiteResolver) -> Vec<JobSnapshot> {
        let mut seen = BTreeSet::new();
        let mut jobs = Vec::new();

        for batch in batches {
            for raw in &batch.ads {
                let job = match snapshot_from_ad(
                    raw,
                    batch.server_time,
                    &self.cfg.source.submit_site,
                    resolver,
                ) {
                    Ok(job) => job,
                    Err(e) => {
                        error!(error = %e, "dropping malformed classad");
                        continue;
                    }
                };

                if !seen.insert(job.id.clone()) {
                    continue;
                }

                // Probe span reconstruction up front so metrics never trip
                // over an inconsistent status/timestamp tuple mid-bin.
                if let Err(e) = job.running_span() {
                    error!(error = %e, "dropping job with unresolvable state");
                    seen.remove(&job.id);
                    continue;
                }

                jobs.push(job);
            }
        }

        jobs
    }
}

/// Union of every metric's field needs plus the base snapshot fields, with
/// synthetic tags expanded to the classads that back them.
fn projection_for(metrics: &[Box<dyn Metric>]) -> Vec<String> {
    let mut fields: BTreeSet<&str> = BASE_PROJECTION.iter().copied().collect();

    for metric in metrics {
        for field in metric.required_fields() {
            match field {
                ad::SUBMIT_SITE_TAG => {
                    fields.insert(ad::SUBMIT_SITE);
                }
                ad::JOB_SITE_TAG => {
                    fields.insert(ad::JOB_SITE);
                    fields.insert(ad::LAST_REMOTE_HOST);
                }
                name => {
                    fields.insert(name);
                }
            }
        }
    }

    fields.into_iter().map(str::to_string).collect()
}

/// Union of every metric's checkpointed counter fields.
fn cached_fields_for(metrics: &[Box<dyn Metric>]) -> Vec<&'static str> {
    let mut fields = BTreeSet::new();
    for metric in metrics {
        fields.extend(metric.cached_fields().iter().copied());
    }
    fields.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_projection_expands_synthetic_tags() {
        let metrics = metrics::build(&[
            "running_jobs".to_string(),
            "cpu_efficiency".to_string(),
        ])
        .expect("known metrics");

        let projection = projection_for(&metrics);

        assert!(projection.contains(&ad::OWNER.to_string()));
        assert!(projection.contains(&ad::JOB_SITE.to_string()));
        assert!(projection.contains(&ad::LAST_REMOTE_HOST.to_string()));
        assert!(projection.contains(&ad::CPU_TIME.to_string()));
        assert!(projection.contains(&ad::WALL_TIME.to_string()));
        // Synthetic names never leak into the projection.
        assert!(!projection.contains(&ad::JOB_SITE_TAG.to_string()));
        // Base fields always ride along.
        assert!(projection.contains(&ad::STATUS.to_string()));
        assert!(projection.contains(&ad::QUEUE_TIME.to_string()));
    }

    #[test]
    fn test_cached_fields_deduplicated() {
        let metrics = metrics::build(&[
            "cpu_usage".to_string(),
            "cpu_efficiency".to_string(),
        ])
        .expect("known metrics");

        let fields = cached_fields_for(&metrics);
        assert_eq!(fields, vec![ad::CPU_TIME, ad::WALL_TIME]);
    }
}
