pub mod builtin;

use anyhow::{bail, Result};

use crate::bins::{Point, TimeBin};
use crate::counter::CheckpointCache;
use crate::job::JobSnapshot;

/// One job as seen by a metric: the snapshot plus access to the
/// cross-invocation counter cache for interpolated counter reads.
pub struct MetricJob<'a> {
    pub job: &'a JobSnapshot,
    counters: &'a CheckpointCache,
}

impl<'a> MetricJob<'a> {
    pub fn new(job: &'a JobSnapshot, counters: &'a CheckpointCache) -> Self {
        Self { job, counters }
    }

    /// Change of a run-time counter attributable to [t0, t1], derived from
    /// the cached previous point and the current observation.
    pub fn counter_change(&self, field: &str, t0: i64, t1: i64) -> Result<f64> {
        let series = self.counters.series(self.job, field)?;
        Ok(series.change_over_running_time(t0, t1)?)
    }
}

/// One configurable metric: declares the fields it needs and folds a job
/// population into reduced points for a single time bin.
pub trait Metric: Send + Sync {
    /// Registry name, also used as the line-protocol measurement.
    fn measurement(&self) -> &'static str;

    /// Destination database.
    fn database(&self) -> &'static str;

    /// Classad or synthetic fields the output is grouped by.
    fn tag_fields(&self) -> &'static [&'static str];

    /// Further classad fields read directly from the snapshot.
    fn extra_fields(&self) -> &'static [&'static str] {
        &[]
    }

    /// Counter fields that must be checkpointed across invocations.
    fn cached_fields(&self) -> &'static [&'static str] {
        &[]
    }

    /// Every field this metric needs present in the query projection.
    fn required_fields(&self) -> Vec<&'static str> {
        let mut fields = self.tag_fields().to_vec();
        fields.extend_from_slice(self.extra_fields());
        fields.extend_from_slice(self.cached_fields());
        fields
    }

    /// Folds the jobs into `bin` and reduces to output points.
    ///
    /// Jobs lacking a required field are silently excluded; that is the
    /// normal state of affairs for populations with heterogeneous ads.
    fn calculate(&self, bin: &mut TimeBin, jobs: &[MetricJob<'_>]) -> Result<Vec<Point>>;
}

/// Resolves configured metric names against the compiled-in registry.
pub fn build(names: &[String]) -> Result<Vec<Box<dyn Metric>>> {
    names
        .iter()
        .map(|name| -> Result<Box<dyn Metric>> {
            match name.as_str() {
                "idle_jobs" => Ok(Box::new(builtin::IdleJobs)),
                "running_jobs" => Ok(Box::new(builtin::RunningJobs)),
                "cpu_usage" => Ok(Box::new(builtin::CpuUsage)),
                "cpu_efficiency" => Ok(Box::new(builtin::CpuEfficiency)),
                "mean_disk_usage" => Ok(Box::new(builtin::MeanDiskUsage)),
                other => bail!("unknown metric {other:?} in configuration"),
            }
        })
        .collect()
}
