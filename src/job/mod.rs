pub mod ad;

use std::collections::HashMap;

use crate::bins::TagSet;

/// Job status as reported by the batch scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum JobStatus {
    Idle,
    Running,
    Removed,
    Completed,
    Held,
    TransferringOutput,
}

impl JobStatus {
    /// Maps the scheduler's numeric status code (1-6).
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Self::Idle),
            2 => Some(Self::Running),
            3 => Some(Self::Removed),
            4 => Some(Self::Completed),
            5 => Some(Self::Held),
            6 => Some(Self::TransferringOutput),
            _ => None,
        }
    }

    /// Whether the job may still change state in the future.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Idle | Self::Running | Self::Held | Self::TransferringOutput
        )
    }
}

/// A contiguous period a job spent in one state.
///
/// `end == None` means the period is still ongoing at observation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSpan {
    pub start: i64,
    pub end: Option<i64>,
}

impl TimeSpan {
    fn effective_end(&self, horizon: i64) -> i64 {
        self.end.unwrap_or(horizon)
    }

    /// Whether the span overlaps the query window [t0, t1].
    ///
    /// An ongoing span counts as extending to the query horizon t1.
    pub fn overlaps(&self, t0: i64, t1: i64) -> bool {
        !(self.start >= t1 || self.effective_end(t1) <= t0)
    }

    /// Seconds of the span falling inside [t0, t1], clamped to zero.
    ///
    /// The clamp is required: disjoint intervals make the raw subtraction
    /// negative.
    pub fn duration_in(&self, t0: i64, t1: i64) -> i64 {
        (t1.min(self.effective_end(t1)) - t0.max(self.start)).max(0)
    }
}

/// One named classad value carried in a snapshot's open field map.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Number(f64),
    Text(String),
}

impl AttrValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(s) => s.parse().ok(),
        }
    }

    pub fn to_tag_value(&self) -> String {
        match self {
            Self::Number(n) => {
                if n.fract() == 0.0 {
                    format!("{}", *n as i64)
                } else {
                    format!("{n}")
                }
            }
            Self::Text(s) => s.clone(),
        }
    }
}

/// Errors raised while reading or interpreting one job's classad data.
#[derive(Debug, thiserror::Error)]
pub enum JobDataError {
    /// The job lacks a field a metric declared. Recoverable: the job is
    /// excluded from that metric only.
    #[error("job {id}: classad field {field} not present")]
    MissingField { id: String, field: String },

    /// No reconstruction rule matches the job's status/timestamp tuple.
    /// Signals an upstream data-contract violation; never guessed around.
    #[error(
        "job {id}: no state rule for status={status:?} prev={prev_status:?} \
         queue={queue_time} entered={entered_status_time} \
         last_run_start={last_run_start:?} evict={last_evict:?} \
         suspend={last_suspend:?}"
    )]
    UnresolvableState {
        id: String,
        status: JobStatus,
        prev_status: Option<JobStatus>,
        queue_time: i64,
        entered_status_time: i64,
        last_run_start: Option<i64>,
        last_evict: Option<i64>,
        last_suspend: Option<i64>,
    },
}

/// Immutable, normalized view of one job at observation time.
///
/// Built once per invocation from a raw scheduler classad. The only fix-up
/// after field extraction is replacing an `"Unknown"` job site with the
/// submit site, applied during construction in the source layer.
#[derive(Debug, Clone)]
pub struct JobSnapshot {
    pub id: String,
    pub status: JobStatus,
    /// Absent for jobs that have never left their first status.
    pub prev_status: Option<JobStatus>,
    pub queue_time: i64,
    pub entered_status_time: i64,
    pub first_run_start: Option<i64>,
    pub last_run_start: Option<i64>,
    pub last_evict: Option<i64>,
    pub last_suspend: Option<i64>,
    pub completion_time: Option<i64>,
    /// "Now" as seen by the data source when the snapshot was taken.
    pub observed_at: i64,
    pub submit_site: String,
    pub job_site: Option<String>,
    /// Additional counter/tag fields requested by configured metrics.
    pub attrs: HashMap<String, AttrValue>,
}

impl JobSnapshot {
    pub fn is_idle(&self) -> bool {
        self.status == JobStatus::Idle
    }

    pub fn is_running(&self) -> bool {
        self.status == JobStatus::Running
    }

    pub fn is_completed(&self) -> bool {
        self.status == JobStatus::Completed
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    pub fn was_idle(&self) -> bool {
        self.prev_status == Some(JobStatus::Idle)
    }

    pub fn was_running(&self) -> bool {
        self.prev_status == Some(JobStatus::Running)
    }

    /// Whether the job has ever entered the running state.
    pub fn ever_ran(&self) -> bool {
        self.is_running()
            || self.was_running()
            || self.last_run_start.is_some()
            || self.first_run_start.is_some()
    }

    /// Latest plausible entry into the most recent idle period: the latest
    /// of queue, eviction, and suspension times (absent ones ignored).
    fn idle_entered_at(&self) -> i64 {
        let mut entered = self.queue_time;
        if let Some(t) = self.last_evict {
            entered = entered.max(t);
        }
        if let Some(t) = self.last_suspend {
            entered = entered.max(t);
        }
        entered
    }

    /// The job's most recent idle period.
    ///
    /// When the job has passed through two or more states since last being
    /// idle and the exit time cannot be recovered, the span collapses to a
    /// one-second placeholder. The upstream data genuinely loses that
    /// information; the placeholder is a documented approximation, not a
    /// correctness guarantee.
    pub fn idle_span(&self) -> TimeSpan {
        if self.is_idle() {
            return TimeSpan {
                start: self.entered_status_time,
                end: None,
            };
        }

        let entered = self.idle_entered_at();

        if self.was_idle() {
            return TimeSpan {
                start: entered,
                end: Some(self.entered_status_time),
            };
        }

        // Two or more states since idle: the idle period ended when the job
        // last started running, if that is known.
        if (self.is_running() || self.was_running()) && self.last_run_start.is_some() {
            return TimeSpan {
                start: entered,
                end: self.last_run_start,
            };
        }

        TimeSpan {
            start: entered,
            end: Some(entered + 1),
        }
    }

    /// The job's most recent running period, or `None` if it has never run.
    pub fn running_span(&self) -> Result<Option<TimeSpan>, JobDataError> {
        if self.is_running() {
            let start = self.last_run_start.ok_or_else(|| self.unresolvable())?;
            return Ok(Some(TimeSpan { start, end: None }));
        }

        let Some(start) = self.last_run_start else {
            if self.was_running() {
                // Previously running but no run start on record.
                return Err(self.unresolvable());
            }
            return Ok(None);
        };

        if self.is_completed() {
            let end = self.completion_time.unwrap_or(self.entered_status_time);
            return Ok(Some(TimeSpan {
                start,
                end: Some(end),
            }));
        }

        if self.was_running() {
            return Ok(Some(TimeSpan {
                start,
                end: Some(self.entered_status_time),
            }));
        }

        // The job moved through held/evicted/suspended states after running:
        // the run ended at the earliest eviction or suspension after it
        // started. A missing one falls back to the one-second placeholder.
        let end = [self.last_evict, self.last_suspend]
            .into_iter()
            .flatten()
            .filter(|t| *t > start)
            .min()
            .unwrap_or(start + 1);

        Ok(Some(TimeSpan {
            start,
            end: Some(end),
        }))
    }

    /// Whether the job's most recent idle period touches [t0, t1].
    pub fn is_idle_during(&self, t0: i64, t1: i64) -> bool {
        self.idle_span().overlaps(t0, t1)
    }

    /// Whether the job's most recent running period touches [t0, t1].
    pub fn is_running_during(&self, t0: i64, t1: i64) -> Result<bool, JobDataError> {
        Ok(self
            .running_span()?
            .map_or(false, |span| span.overlaps(t0, t1)))
    }

    /// Seconds spent idle inside [t0, t1], never negative.
    pub fn idle_duration_in(&self, t0: i64, t1: i64) -> i64 {
        self.idle_span().duration_in(t0, t1)
    }

    /// Seconds spent running inside [t0, t1], never negative.
    pub fn running_duration_in(&self, t0: i64, t1: i64) -> Result<i64, JobDataError> {
        Ok(self
            .running_span()?
            .map_or(0, |span| span.duration_in(t0, t1)))
    }

    /// Resolves the named tag fields (classad or synthetic) into an ordered
    /// tag set. Any missing field fails the whole lookup.
    pub fn get_values(&self, fields: &[&str]) -> Result<TagSet, JobDataError> {
        let mut tags = TagSet::with_capacity(fields.len());
        for field in fields {
            let value = match *field {
                ad::SUBMIT_SITE_TAG | ad::SUBMIT_SITE => self.submit_site.clone(),
                ad::JOB_SITE_TAG | ad::JOB_SITE => self
                    .job_site
                    .clone()
                    .ok_or_else(|| self.missing(field))?,
                ad::ID => self.id.clone(),
                name => self
                    .attrs
                    .get(name)
                    .map(AttrValue::to_tag_value)
                    .ok_or_else(|| self.missing(field))?,
            };
            tags.push((field.to_string(), value));
        }
        Ok(tags)
    }

    /// Numeric value of a counter field from the open attribute map.
    pub fn counter_value(&self, field: &str) -> Result<f64, JobDataError> {
        self.attrs
            .get(field)
            .and_then(AttrValue::as_number)
            .ok_or_else(|| self.missing(field))
    }

    /// Whether every listed field can be resolved on this job.
    pub fn has_fields(&self, fields: &[&str]) -> bool {
        fields.iter().all(|field| match *field {
            ad::SUBMIT_SITE_TAG | ad::SUBMIT_SITE | ad::ID => true,
            ad::JOB_SITE_TAG | ad::JOB_SITE => self.job_site.is_some(),
            name => self.attrs.contains_key(name),
        })
    }

    fn missing(&self, field: &str) -> JobDataError {
        JobDataError::MissingField {
            id: self.id.clone(),
            field: field.to_string(),
        }
    }

    fn unresolvable(&self) -> JobDataError {
        JobDataError::UnresolvableState {
            id: self.id.clone(),
            status: self.status,
            prev_status: self.prev_status,
            queue_time: self.queue_time,
            entered_status_time: self.entered_status_time,
            last_run_start: self.last_run_start,
            last_evict: self.last_evict,
            last_suspend: self.last_suspend,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn base_job() -> JobSnapshot {
        JobSnapshot {
            id: "test.example.net#1.0#100".to_string(),
            status: JobStatus::Idle,
            prev_status: None,
            queue_time: 5,
            entered_status_time: 5,
            first_run_start: None,
            last_run_start: None,
            last_evict: None,
            last_suspend: None,
            completion_time: None,
            observed_at: 15,
            submit_site: "UCSD".to_string(),
            job_site: None,
            attrs: HashMap::new(),
        }
    }

    #[test]
    fn test_status_from_code() {
        assert_eq!(JobStatus::from_code(1), Some(JobStatus::Idle));
        assert_eq!(JobStatus::from_code(2), Some(JobStatus::Running));
        assert_eq!(JobStatus::from_code(6), Some(JobStatus::TransferringOutput));
        assert_eq!(JobStatus::from_code(0), None);
        assert_eq!(JobStatus::from_code(7), None);
    }

    #[test]
    fn test_fresh_idle_job_span() {
        let job = base_job();
        assert_eq!(
            job.idle_span(),
            TimeSpan {
                start: 5,
                end: None
            }
        );
        // Still-idle span overlaps any window reaching past the queue time.
        assert!(job.is_idle_during(0, 100));
        assert!(job.is_idle_during(50, 60));
    }

    #[test]
    fn test_running_job_spans() {
        // Scenario: Running, previously Idle, queued at 5, started at 10,
        // observed at 15.
        let mut job = base_job();
        job.status = JobStatus::Running;
        job.prev_status = Some(JobStatus::Idle);
        job.entered_status_time = 10;
        job.first_run_start = Some(10);
        job.last_run_start = Some(10);

        let span = job.running_span().expect("resolvable").expect("ran");
        assert_eq!(
            span,
            TimeSpan {
                start: 10,
                end: None
            }
        );

        // Ongoing span extends to the query horizon:
        // min(20, 20) - max(0, 10) = 10.
        assert_eq!(job.running_duration_in(0, 20).expect("resolvable"), 10);

        // Idle span closed by the transition into running.
        assert_eq!(
            job.idle_span(),
            TimeSpan {
                start: 5,
                end: Some(10)
            }
        );
    }

    #[test]
    fn test_evicted_job_spans() {
        // Ran from 10, evicted at 20, idle again since.
        let mut job = base_job();
        job.status = JobStatus::Idle;
        job.prev_status = Some(JobStatus::Running);
        job.entered_status_time = 20;
        job.first_run_start = Some(10);
        job.last_run_start = Some(10);
        job.last_evict = Some(20);
        job.observed_at = 30;

        let span = job.running_span().expect("resolvable").expect("ran");
        assert_eq!(
            span,
            TimeSpan {
                start: 10,
                end: Some(20)
            }
        );

        // Currently idle: span from entering the current status, ongoing.
        assert_eq!(
            job.idle_span(),
            TimeSpan {
                start: 20,
                end: None
            }
        );
    }

    #[test]
    fn test_rerun_after_eviction_idle_span() {
        // Queued 5, ran 10-20 (evicted), idle, running again since 25.
        let mut job = base_job();
        job.status = JobStatus::Running;
        job.prev_status = Some(JobStatus::Idle);
        job.entered_status_time = 25;
        job.first_run_start = Some(10);
        job.last_run_start = Some(25);
        job.last_evict = Some(20);
        job.observed_at = 30;

        // Most recent idle period: eviction to re-entering running.
        assert_eq!(
            job.idle_span(),
            TimeSpan {
                start: 20,
                end: Some(25)
            }
        );
    }

    #[test]
    fn test_held_after_running_uses_earliest_exit() {
        // Ran from 10, suspended at 14, evicted at 18, now held with an
        // intermediate state in between (prev is not Running).
        let mut job = base_job();
        job.status = JobStatus::Held;
        job.prev_status = Some(JobStatus::Idle);
        job.entered_status_time = 22;
        job.last_run_start = Some(10);
        job.last_evict = Some(18);
        job.last_suspend = Some(14);
        job.observed_at = 30;

        let span = job.running_span().expect("resolvable").expect("ran");
        assert_eq!(span.end, Some(14));
    }

    #[test]
    fn test_placeholder_span_when_exit_unknown() {
        // Ran at some point but neither eviction nor suspension after the
        // run start is on record: collapse to the one-second placeholder.
        let mut job = base_job();
        job.status = JobStatus::Held;
        job.prev_status = Some(JobStatus::Idle);
        job.entered_status_time = 22;
        job.last_run_start = Some(10);
        job.last_evict = Some(8);
        job.observed_at = 30;

        let span = job.running_span().expect("resolvable").expect("ran");
        assert_eq!(
            span,
            TimeSpan {
                start: 10,
                end: Some(11)
            }
        );
    }

    #[test]
    fn test_idle_placeholder_when_exit_unknown() {
        // Held with no idle-exit evidence: placeholder idle span.
        let mut job = base_job();
        job.status = JobStatus::Held;
        job.prev_status = Some(JobStatus::Held);
        job.entered_status_time = 22;
        job.observed_at = 30;

        assert_eq!(
            job.idle_span(),
            TimeSpan {
                start: 5,
                end: Some(6)
            }
        );
    }

    #[test]
    fn test_completed_job_running_span() {
        let mut job = base_job();
        job.status = JobStatus::Completed;
        job.prev_status = Some(JobStatus::Running);
        job.entered_status_time = 40;
        job.last_run_start = Some(10);
        job.completion_time = Some(40);
        job.observed_at = 50;

        let span = job.running_span().expect("resolvable").expect("ran");
        assert_eq!(
            span,
            TimeSpan {
                start: 10,
                end: Some(40)
            }
        );
    }

    #[test]
    fn test_never_ran_has_no_running_span() {
        let job = base_job();
        assert_eq!(job.running_span().expect("resolvable"), None);
        assert!(!job.is_running_during(0, 100).expect("resolvable"));
        assert_eq!(job.running_duration_in(0, 100).expect("resolvable"), 0);
    }

    #[test]
    fn test_running_without_start_time_is_fatal() {
        let mut job = base_job();
        job.status = JobStatus::Running;
        job.prev_status = Some(JobStatus::Idle);

        let err = job.running_span().expect_err("contract violation");
        let msg = err.to_string();
        assert!(msg.contains(&job.id));
        assert!(msg.contains("Running"));
    }

    #[test]
    fn test_inverted_window_yields_zero_duration() {
        let mut job = base_job();
        job.status = JobStatus::Running;
        job.prev_status = Some(JobStatus::Idle);
        job.last_run_start = Some(10);

        assert_eq!(job.idle_duration_in(50, 40), 0);
        assert_eq!(job.running_duration_in(50, 40).expect("resolvable"), 0);
    }

    #[test]
    fn test_disjoint_window_yields_zero_duration() {
        let mut job = base_job();
        job.status = JobStatus::Idle;
        job.prev_status = Some(JobStatus::Running);
        job.entered_status_time = 20;
        job.last_run_start = Some(10);
        job.last_evict = Some(20);

        // Running span is [10, 20]; window [30, 40] is disjoint.
        assert_eq!(job.running_duration_in(30, 40).expect("resolvable"), 0);
    }

    #[test]
    fn test_get_values_resolves_sites_and_attrs() {
        let mut job = base_job();
        job.job_site = Some("MWT2".to_string());
        job.attrs
            .insert(ad::OWNER.to_string(), AttrValue::Text("alice".to_string()));

        let tags = job
            .get_values(&[ad::OWNER, ad::SUBMIT_SITE_TAG, ad::JOB_SITE_TAG])
            .expect("all fields present");
        assert_eq!(
            tags,
            vec![
                (ad::OWNER.to_string(), "alice".to_string()),
                (ad::SUBMIT_SITE_TAG.to_string(), "UCSD".to_string()),
                (ad::JOB_SITE_TAG.to_string(), "MWT2".to_string()),
            ]
        );
    }

    #[test]
    fn test_get_values_missing_field() {
        let job = base_job();
        let err = job.get_values(&[ad::OWNER]).expect_err("owner not present");
        assert!(matches!(err, JobDataError::MissingField { .. }));
    }

    #[test]
    fn test_has_fields() {
        let mut job = base_job();
        job.attrs
            .insert(ad::DISK_USAGE.to_string(), AttrValue::Number(125000.0));

        assert!(job.has_fields(&[ad::DISK_USAGE, ad::SUBMIT_SITE_TAG]));
        assert!(!job.has_fields(&[ad::JOB_SITE_TAG]));
        assert!(!job.has_fields(&[ad::OWNER]));
    }

    #[test]
    fn test_counter_value_parses_text_numbers() {
        let mut job = base_job();
        job.attrs
            .insert(ad::CPU_TIME.to_string(), AttrValue::Text("123.5".to_string()));
        assert_eq!(job.counter_value(ad::CPU_TIME).expect("numeric"), 123.5);
    }
}
