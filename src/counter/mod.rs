pub mod interp;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::job::{ad, JobSnapshot, JobStatus};

use self::interp::CounterSeries;

/// Errors raised by checkpoint lookup and interpolation setup.
#[derive(Debug, thiserror::Error)]
pub enum CounterError {
    /// The field has no registered change policy. Interpolation math is
    /// only defined for counters that advance while the job runs, so this
    /// is a contract violation, not a skippable condition.
    #[error("field {field} has no change policy; only run-time counters can be interpolated")]
    UnsupportedCounter { field: String },
}

/// Change policy for a tracked counter field.
///
/// The single supported mode: the field holds `initial` until the job first
/// enters the running state, then advances only while running.
#[derive(Debug, Clone, Copy)]
pub struct CounterPolicy {
    pub initial: f64,
}

impl CounterPolicy {
    /// Policy for a counter starting at zero when the job first runs.
    pub fn from_zero() -> Self {
        Self { initial: 0.0 }
    }
}

/// Registry mapping counter field names to their change policies.
pub struct PolicyTable {
    policies: HashMap<String, CounterPolicy>,
}

impl PolicyTable {
    /// Table covering the counters the stock metrics track.
    pub fn with_defaults() -> Self {
        let mut table = Self {
            policies: HashMap::new(),
        };
        table.register(ad::CPU_TIME, CounterPolicy::from_zero());
        table.register(ad::WALL_TIME, CounterPolicy::from_zero());
        table
    }

    pub fn register(&mut self, field: &str, policy: CounterPolicy) {
        self.policies.insert(field.to_string(), policy);
    }

    pub fn get(&self, field: &str) -> Result<CounterPolicy, CounterError> {
        self.policies
            .get(field)
            .copied()
            .ok_or_else(|| CounterError::UnsupportedCounter {
                field: field.to_string(),
            })
    }
}

/// The last known point of a counter: its value, the job's status at record
/// time, and the record time itself. `time == None` means the job had not
/// yet reached the state in which the counter starts changing; callers must
/// treat that as "no change yet" rather than interpolating.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrevPoint {
    pub value: f64,
    pub status: JobStatus,
    pub time: Option<i64>,
}

/// Checkpointed counter values for one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobCheckpoint {
    pub status: JobStatus,
    pub fields: HashMap<String, f64>,
}

/// Persisted checkpoint state: the next bin boundary plus every active
/// job's last recorded counter values. Rewritten from scratch each
/// invocation, so entries for departed jobs age out naturally.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckpointState {
    pub next_bin_start: i64,
    pub jobs: HashMap<String, JobCheckpoint>,
}

/// Cross-invocation memory of counter values, used as the "previous point"
/// for interpolation.
pub struct CheckpointCache {
    state: CheckpointState,
    policies: PolicyTable,
}

impl CheckpointCache {
    pub fn new(state: CheckpointState, policies: PolicyTable) -> Self {
        Self { state, policies }
    }

    /// The bin boundary the previous invocation checkpointed at, or zero
    /// for a fresh cache.
    pub fn next_bin_start(&self) -> i64 {
        self.state.next_bin_start
    }

    /// The previous known point of a job's counter field.
    ///
    /// A cached value is returned with the shared checkpoint time. Without
    /// one, the field's initial-value policy applies: the counter sat at
    /// its initial value until the job's first run (or indefinitely, if it
    /// has never run).
    pub fn previous_point(
        &self,
        job: &JobSnapshot,
        field: &str,
    ) -> Result<PrevPoint, CounterError> {
        if let Some(entry) = self.state.jobs.get(&job.id) {
            if let Some(value) = entry.fields.get(field) {
                return Ok(PrevPoint {
                    value: *value,
                    status: entry.status,
                    time: Some(self.state.next_bin_start),
                });
            }
        }

        let policy = self.policies.get(field)?;
        let time = if job.ever_ran() {
            job.first_run_start.or(job.last_run_start)
        } else {
            None
        };

        Ok(PrevPoint {
            value: policy.initial,
            status: JobStatus::Idle,
            time,
        })
    }

    /// Builds the interpolation series for one job's counter field.
    pub fn series<'a>(
        &self,
        job: &'a JobSnapshot,
        field: &str,
    ) -> Result<CounterSeries<'a>, CounterSetupError> {
        let prev = self.previous_point(job, field)?;
        let current = job.counter_value(field)?;
        Ok(CounterSeries::new(job, prev, current))
    }

    /// Produces the next invocation's checkpoint state: for every active
    /// job that has ever run, each tracked field interpolated at `as_of`,
    /// tagged with the job's current status.
    pub fn save_checkpoint(
        &self,
        as_of: i64,
        jobs: &[JobSnapshot],
        fields: &[&str],
    ) -> Result<CheckpointState, CounterError> {
        let mut next = CheckpointState {
            next_bin_start: as_of,
            jobs: HashMap::new(),
        };

        for job in jobs {
            if !job.is_active() || !job.ever_ran() {
                continue;
            }

            let mut values = HashMap::new();
            for field in fields {
                // Policy lookup failures are real contract violations and
                // propagate; a job simply lacking the field is skipped.
                let series = match self.series(job, field) {
                    Ok(series) => series,
                    Err(CounterSetupError::Counter(e)) => return Err(e),
                    Err(CounterSetupError::Job(_)) => continue,
                };

                match series.value_at(as_of) {
                    Ok(value) => {
                        values.insert(field.to_string(), value);
                    }
                    Err(e) => {
                        warn!(job = %job.id, field, error = %e, "skipping checkpoint value");
                    }
                }
            }

            if !values.is_empty() {
                next.jobs.insert(
                    job.id.clone(),
                    JobCheckpoint {
                        status: job.status,
                        fields: values,
                    },
                );
            }
        }

        Ok(next)
    }
}

/// Failure to set up an interpolation series, split by recoverability:
/// a missing field skips the job, a policy violation is fatal.
#[derive(Debug, thiserror::Error)]
pub enum CounterSetupError {
    #[error(transparent)]
    Counter(#[from] CounterError),
    #[error(transparent)]
    Job(#[from] crate::job::JobDataError),
}
