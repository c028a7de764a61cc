//! Classad field names the daemon reads from the scheduler.

/// Globally unique job identifier.
pub const ID: &str = "GlobalJobId";

/// Username of the job submitter.
pub const OWNER: &str = "Owner";

/// Numeric job status (1-6).
pub const STATUS: &str = "JobStatus";

/// Numeric status the job held immediately before the current one.
pub const PREV_STATUS: &str = "LastJobStatus";

/// Time the job entered the queue.
pub const QUEUE_TIME: &str = "QDate";

/// Time the job entered its current status.
pub const ENTERED_STATUS_TIME: &str = "EnteredCurrentStatus";

/// Start time of the job's first run.
pub const FIRST_RUN_START: &str = "JobStartDate";

/// Start time of the job's most recent (possibly current) run.
pub const LAST_RUN_START: &str = "JobCurrentStartExecutingDate";

/// Last time the job was evicted from a running state.
pub const LAST_EVICT: &str = "LastVacateTime";

/// Last time the job was suspended.
pub const LAST_SUSPEND: &str = "LastSuspensionTime";

/// Completion time of the job.
pub const COMPLETION: &str = "CompletionDate";

/// Accumulated CPU seconds. Advances only while the job runs.
pub const CPU_TIME: &str = "RemoteUserCpu";

/// Accumulated wall-clock seconds. Advances only while the job runs.
pub const WALL_TIME: &str = "RemoteWallClockTime";

/// Site the job was submitted from.
pub const SUBMIT_SITE: &str = "SUBMIT_SITE";

/// Site the job runs at, as reported by the negotiator.
pub const JOB_SITE: &str = "MATCH_EXP_JOB_SITE";

/// slot@hostname of the job's most recent execution machine.
pub const LAST_REMOTE_HOST: &str = "LastRemoteHost";

/// Disk usage of the job in KiB.
pub const DISK_USAGE: &str = "DiskUsage";

/// Synthetic tag: the submit site of the collecting schedd.
pub const SUBMIT_SITE_TAG: &str = "BATCH_SUBMIT_SITE";

/// Synthetic tag: execution site derived from [`LAST_REMOTE_HOST`]
/// via the configured rename table.
pub const JOB_SITE_TAG: &str = "BATCH_JOB_SITE";
