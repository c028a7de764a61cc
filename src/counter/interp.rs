//! Linear interpolation of run-time counters between the cached previous
//! point and the current observation.

use crate::job::{JobDataError, JobSnapshot};

use super::PrevPoint;

/// One counter field's known trajectory for a single job: the previous
/// point from the checkpoint cache (or initial-value policy) and the value
/// observed this invocation.
pub struct CounterSeries<'a> {
    job: &'a JobSnapshot,
    prev: PrevPoint,
    current: f64,
}

impl<'a> CounterSeries<'a> {
    pub fn new(job: &'a JobSnapshot, prev: PrevPoint, current: f64) -> Self {
        Self { job, prev, current }
    }

    /// The "next" known point: the current value at observation time for a
    /// running job, otherwise pinned to the end of the most recent running
    /// period (the counter stopped moving there).
    fn next_point(&self) -> Result<(f64, i64), JobDataError> {
        if self.job.is_running() {
            return Ok((self.current, self.job.observed_at));
        }

        let time = self
            .job
            .running_span()?
            .and_then(|span| span.end)
            .unwrap_or(self.job.observed_at);

        Ok((self.current, time))
    }

    /// The counter's value at instant `t`.
    ///
    /// Clamped outside the known interval: before the previous point the
    /// previous value, at or past the next point the next value, and linear
    /// in between. A zero time delta means there is no slope to apply and
    /// the previous value stands.
    pub fn value_at(&self, t: i64) -> Result<f64, JobDataError> {
        // No change yet: the job has not reached the state in which this
        // counter starts moving.
        let Some(prev_time) = self.prev.time else {
            return Ok(self.prev.value);
        };

        let (next_value, next_time) = self.next_point()?;

        if t >= next_time {
            return Ok(next_value);
        }
        if t <= prev_time {
            return Ok(self.prev.value);
        }

        let dt = next_time - prev_time;
        if dt == 0 {
            return Ok(self.prev.value);
        }

        let slope = (next_value - self.prev.value) / dt as f64;
        Ok(self.prev.value + slope * (t - prev_time) as f64)
    }

    /// The counter's change attributable to running time inside [t0, t1]:
    /// the average rate since the previous point, applied to the seconds
    /// the job actually ran within the window.
    ///
    /// Only valid for counters that advance strictly while running; the
    /// policy table enforces that before a series is ever built.
    pub fn change_over_running_time(&self, t0: i64, t1: i64) -> Result<f64, JobDataError> {
        let in_window = self.job.running_duration_in(t0, t1)?;
        if in_window == 0 {
            return Ok(0.0);
        }

        let Some(prev_time) = self.prev.time else {
            return Ok(0.0);
        };

        let since_prev = self.job.running_duration_in(prev_time, self.job.observed_at)?;
        if since_prev == 0 {
            // No running time since the previous point: no rate to derive.
            return Ok(0.0);
        }

        let rate = (self.current - self.prev.value) / since_prev as f64;
        Ok(rate * in_window as f64)
    }
}
