//! The stock metric set.

use anyhow::Result;

use crate::bins::{Point, TimeBin};
use crate::job::ad;

use super::{Metric, MetricJob};

const DATABASE: &str = "batch_jobs";

/// Count of jobs whose idle period touches the bin, grouped by owner and
/// submit site.
pub struct IdleJobs;

impl Metric for IdleJobs {
    fn measurement(&self) -> &'static str {
        "idle_jobs"
    }

    fn database(&self) -> &'static str {
        DATABASE
    }

    fn tag_fields(&self) -> &'static [&'static str] {
        &[ad::OWNER, ad::SUBMIT_SITE_TAG]
    }

    fn calculate(&self, bin: &mut TimeBin, jobs: &[MetricJob<'_>]) -> Result<Vec<Point>> {
        for entry in jobs {
            let job = entry.job;
            if !job.has_fields(self.tag_fields()) {
                continue;
            }
            if job.is_idle_during(bin.start, bin.end) {
                bin.add_to_sum(1.0, job.get_values(self.tag_fields())?);
            }
        }
        Ok(bin.reduce_sum())
    }
}

/// Count of jobs whose running period touches the bin, grouped by owner
/// and execution site.
pub struct RunningJobs;

impl Metric for RunningJobs {
    fn measurement(&self) -> &'static str {
        "running_jobs"
    }

    fn database(&self) -> &'static str {
        DATABASE
    }

    fn tag_fields(&self) -> &'static [&'static str] {
        &[ad::OWNER, ad::JOB_SITE_TAG]
    }

    fn calculate(&self, bin: &mut TimeBin, jobs: &[MetricJob<'_>]) -> Result<Vec<Point>> {
        for entry in jobs {
            let job = entry.job;
            if !job.has_fields(self.tag_fields()) {
                continue;
            }
            if job.is_running_during(bin.start, bin.end)? {
                bin.add_to_sum(1.0, job.get_values(self.tag_fields())?);
            }
        }
        Ok(bin.reduce_sum())
    }
}

/// Total CPU seconds consumed inside the bin, grouped by execution site.
pub struct CpuUsage;

impl Metric for CpuUsage {
    fn measurement(&self) -> &'static str {
        "cpu_usage"
    }

    fn database(&self) -> &'static str {
        DATABASE
    }

    fn tag_fields(&self) -> &'static [&'static str] {
        &[ad::JOB_SITE_TAG]
    }

    fn cached_fields(&self) -> &'static [&'static str] {
        &[ad::CPU_TIME]
    }

    fn calculate(&self, bin: &mut TimeBin, jobs: &[MetricJob<'_>]) -> Result<Vec<Point>> {
        for entry in jobs {
            let job = entry.job;
            if !job.has_fields(&self.required_fields()) {
                continue;
            }
            if !job.is_running_during(bin.start, bin.end)? {
                continue;
            }
            let used = entry.counter_change(ad::CPU_TIME, bin.start, bin.end)?;
            bin.add_to_sum(used, job.get_values(self.tag_fields())?);
        }
        Ok(bin.reduce_sum())
    }
}

/// Aggregate CPU efficiency inside the bin: total CPU seconds over total
/// wallclock seconds, grouped by execution site. Computed as a ratio of
/// sums so large jobs weigh in proportionally.
pub struct CpuEfficiency;

impl Metric for CpuEfficiency {
    fn measurement(&self) -> &'static str {
        "cpu_efficiency"
    }

    fn database(&self) -> &'static str {
        DATABASE
    }

    fn tag_fields(&self) -> &'static [&'static str] {
        &[ad::JOB_SITE_TAG]
    }

    fn cached_fields(&self) -> &'static [&'static str] {
        &[ad::CPU_TIME, ad::WALL_TIME]
    }

    fn calculate(&self, bin: &mut TimeBin, jobs: &[MetricJob<'_>]) -> Result<Vec<Point>> {
        for entry in jobs {
            let job = entry.job;
            if !job.has_fields(&self.required_fields()) {
                continue;
            }
            if !job.is_running_during(bin.start, bin.end)? {
                continue;
            }
            let cpu = entry.counter_change(ad::CPU_TIME, bin.start, bin.end)?;
            let wall = entry.counter_change(ad::WALL_TIME, bin.start, bin.end)?;
            bin.add_to_ratio_of_sums(cpu, wall, job.get_values(self.tag_fields())?);
        }
        Ok(bin.reduce_ratio_of_sums())
    }
}

/// Mean disk usage of running jobs, weighted by each job's running time
/// inside the bin and grouped by submit site.
pub struct MeanDiskUsage;

impl Metric for MeanDiskUsage {
    fn measurement(&self) -> &'static str {
        "mean_disk_usage"
    }

    fn database(&self) -> &'static str {
        DATABASE
    }

    fn tag_fields(&self) -> &'static [&'static str] {
        &[ad::SUBMIT_SITE_TAG]
    }

    fn extra_fields(&self) -> &'static [&'static str] {
        &[ad::DISK_USAGE]
    }

    fn calculate(&self, bin: &mut TimeBin, jobs: &[MetricJob<'_>]) -> Result<Vec<Point>> {
        for entry in jobs {
            let job = entry.job;
            if !job.has_fields(&self.required_fields()) {
                continue;
            }
            let seconds = job.running_duration_in(bin.start, bin.end)? as f64;
            if seconds == 0.0 {
                continue;
            }
            let usage = job.counter_value(ad::DISK_USAGE)?;
            bin.add_to_time_average(usage, job.get_values(self.tag_fields())?, seconds);
        }
        Ok(bin.reduce_time_average())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::counter::{CheckpointCache, CheckpointState, PolicyTable};
    use crate::job::{AttrValue, JobSnapshot, JobStatus};

    fn empty_cache() -> CheckpointCache {
        CheckpointCache::new(CheckpointState::default(), PolicyTable::with_defaults())
    }

    fn job(id: &str, owner: &str, status: JobStatus) -> JobSnapshot {
        let mut attrs = HashMap::new();
        attrs.insert(ad::OWNER.to_string(), AttrValue::Text(owner.to_string()));
        JobSnapshot {
            id: id.to_string(),
            status,
            prev_status: None,
            queue_time: 0,
            entered_status_time: 0,
            first_run_start: None,
            last_run_start: None,
            last_evict: None,
            last_suspend: None,
            completion_time: None,
            observed_at: 1000,
            submit_site: "UCSD".to_string(),
            job_site: None,
            attrs,
        }
    }

    fn running_job(id: &str, owner: &str, started: i64, cpu: f64, wall: f64) -> JobSnapshot {
        let mut j = job(id, owner, JobStatus::Running);
        j.prev_status = Some(JobStatus::Idle);
        j.entered_status_time = started;
        j.first_run_start = Some(started);
        j.last_run_start = Some(started);
        j.job_site = Some("MWT2".to_string());
        j.attrs
            .insert(ad::CPU_TIME.to_string(), AttrValue::Number(cpu));
        j.attrs
            .insert(ad::WALL_TIME.to_string(), AttrValue::Number(wall));
        j
    }

    fn calculate(metric: &dyn Metric, bin: (i64, i64), jobs: &[JobSnapshot]) -> Vec<Point> {
        let cache = empty_cache();
        let views: Vec<MetricJob<'_>> = jobs.iter().map(|j| MetricJob::new(j, &cache)).collect();
        let mut bin = TimeBin::new(bin.0, bin.1);
        metric.calculate(&mut bin, &views).expect("calculate")
    }

    fn find<'a>(points: &'a [Point], tag_value: &str) -> &'a Point {
        points
            .iter()
            .find(|p| p.tags.iter().any(|(_, v)| v == tag_value))
            .expect("point for tag value exists")
    }

    #[test]
    fn test_idle_jobs_counts_by_owner_and_submit_site() {
        let jobs = vec![
            job("j1", "alice", JobStatus::Idle),
            job("j2", "alice", JobStatus::Idle),
            job("j3", "bob", JobStatus::Idle),
        ];

        let points = calculate(&IdleJobs, (0, 300), &jobs);
        assert_eq!(points.len(), 2);
        assert_eq!(find(&points, "alice").value, 2.0);
        assert_eq!(find(&points, "bob").value, 1.0);
    }

    #[test]
    fn test_idle_jobs_excludes_jobs_outside_bin() {
        let mut late = job("j1", "alice", JobStatus::Idle);
        late.entered_status_time = 500;
        late.queue_time = 500;

        let points = calculate(&IdleJobs, (0, 300), &[late]);
        assert!(points.is_empty());
    }

    #[test]
    fn test_running_jobs_requires_job_site() {
        let mut siteless = running_job("j1", "alice", 100, 0.0, 0.0);
        siteless.job_site = None;

        let jobs = vec![siteless, running_job("j2", "alice", 100, 0.0, 0.0)];
        let points = calculate(&RunningJobs, (0, 300), &jobs);

        // Only the job with a resolvable site contributes.
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].value, 1.0);
    }

    #[test]
    fn test_cpu_usage_prorates_into_bin() {
        // Running since 0, observed at 1000 with 500 cpu-seconds: rate 0.5.
        let j = running_job("j1", "alice", 0, 500.0, 1000.0);

        let points = calculate(&CpuUsage, (200, 400), &[j]);
        assert_eq!(points.len(), 1);
        // 200 seconds in the bin at 0.5/s.
        assert_eq!(points[0].value, 100.0);
    }

    #[test]
    fn test_cpu_usage_sums_across_jobs_per_site() {
        let jobs = vec![
            running_job("j1", "alice", 0, 500.0, 1000.0),
            running_job("j2", "bob", 0, 250.0, 1000.0),
        ];

        let points = calculate(&CpuUsage, (0, 1000), &jobs);
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].value, 750.0);
    }

    #[test]
    fn test_cpu_efficiency_is_ratio_of_sums() {
        // 500 cpu over 1000 wall and 100 cpu over 1000 wall:
        // (500 + 100) / (1000 + 1000) = 0.3, not the mean of 0.5 and 0.1.
        let jobs = vec![
            running_job("j1", "alice", 0, 500.0, 1000.0),
            running_job("j2", "bob", 0, 100.0, 1000.0),
        ];

        let points = calculate(&CpuEfficiency, (0, 1000), &jobs);
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].value, 0.3);
    }

    #[test]
    fn test_cpu_efficiency_omits_zero_wall_time() {
        let mut j = running_job("j1", "alice", 1000, 0.0, 0.0);
        // Started at the observation instant: no wall time accrued.
        j.observed_at = 1000;

        let points = calculate(&CpuEfficiency, (0, 1000), &[j]);
        assert!(points.is_empty());
    }

    #[test]
    fn test_mean_disk_usage_weights_by_running_time() {
        // j1 runs the whole bin at 100 KB, j2 runs half the bin at 400 KB:
        // (100*300 + 400*150) / 450 = 200.
        let mut j1 = running_job("j1", "alice", 0, 0.0, 0.0);
        j1.attrs
            .insert(ad::DISK_USAGE.to_string(), AttrValue::Number(100.0));

        let mut j2 = running_job("j2", "bob", 150, 0.0, 0.0);
        j2.attrs
            .insert(ad::DISK_USAGE.to_string(), AttrValue::Number(400.0));

        let points = calculate(&MeanDiskUsage, (0, 300), &[j1, j2]);
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].value, 200.0);
    }

    #[test]
    fn test_mean_disk_usage_skips_jobs_without_field() {
        let j = running_job("j1", "alice", 0, 0.0, 0.0);
        let points = calculate(&MeanDiskUsage, (0, 300), &[j]);
        assert!(points.is_empty());
    }
}
