use std::collections::HashMap;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{RenameRule, SourceConfig};
use crate::job::{ad, AttrValue, JobSnapshot, JobStatus};

/// One raw classad as returned by the scheduler bridge.
pub type RawAd = HashMap<String, serde_json::Value>;

/// A query result: the scheduler's own clock plus the matching ads.
///
/// The scheduler's server time is used as the observation time; classad
/// `CurrentTime` is unreliable.
#[derive(Debug, Clone)]
pub struct RawBatch {
    pub server_time: i64,
    pub ads: Vec<RawAd>,
}

/// Job snapshot source.
pub trait JobSource: Send + Sync {
    /// Fetch currently active jobs matching the configured constraint,
    /// projected onto the named fields.
    fn query_active(
        &self,
        projection: &[String],
    ) -> impl std::future::Future<Output = Result<RawBatch>> + Send;

    /// Fetch recently finished jobs whose entered-current-status time is
    /// after `since`.
    fn query_finished_since(
        &self,
        since: i64,
        projection: &[String],
    ) -> impl std::future::Future<Output = Result<RawBatch>> + Send;
}

#[derive(Serialize)]
struct QueryRequest<'a> {
    constraint: &'a str,
    projection: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    entered_status_after: Option<i64>,
}

#[derive(Deserialize)]
struct QueryResponse {
    server_time: i64,
    jobs: Vec<RawAd>,
}

/// HTTP client for a scheduler REST bridge.
pub struct SchedulerClient {
    http: reqwest::Client,
    endpoint: String,
    constraint: String,
}

impl SchedulerClient {
    pub fn new(cfg: &SourceConfig) -> Result<Self> {
        let timeout = if cfg.timeout.is_zero() {
            Duration::from_secs(30)
        } else {
            cfg.timeout
        };

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building scheduler HTTP client")?;

        Ok(Self {
            http,
            endpoint: cfg.endpoint.trim_end_matches('/').to_string(),
            constraint: cfg.constraint.clone(),
        })
    }

    async fn post_query(&self, path: &str, request: &QueryRequest<'_>) -> Result<RawBatch> {
        let url = format!("{}{}", self.endpoint, path);

        let response = self
            .http
            .post(&url)
            .json(request)
            .send()
            .await
            .with_context(|| format!("querying {path}"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("unexpected status {status} from {path}: {body}");
        }

        let parsed: QueryResponse = response
            .json()
            .await
            .with_context(|| format!("decoding response from {path}"))?;

        debug!(path, jobs = parsed.jobs.len(), "scheduler query complete");

        Ok(RawBatch {
            server_time: parsed.server_time,
            ads: parsed.jobs,
        })
    }
}

impl JobSource for SchedulerClient {
    async fn query_active(&self, projection: &[String]) -> Result<RawBatch> {
        self.post_query(
            "/v1/jobs",
            &QueryRequest {
                constraint: &self.constraint,
                projection,
                entered_status_after: None,
            },
        )
        .await
    }

    async fn query_finished_since(&self, since: i64, projection: &[String]) -> Result<RawBatch> {
        self.post_query(
            "/v1/history",
            &QueryRequest {
                constraint: &self.constraint,
                projection,
                entered_status_after: Some(since),
            },
        )
        .await
    }
}

/// Maps execution hostnames to site names via an ordered rename table.
///
/// Patterns are compiled once at startup and tried in configuration
/// order; the first match wins. Unmatched hosts report as themselves.
pub struct SiteResolver {
    rules: Vec<(Regex, String)>,
}

impl SiteResolver {
    pub fn new(rules: &[RenameRule]) -> Result<Self> {
        let mut compiled = Vec::with_capacity(rules.len());
        for rule in rules {
            let re = Regex::new(&rule.pattern)
                .with_context(|| format!("compiling site rename pattern {:?}", rule.pattern))?;
            compiled.push((re, rule.site.clone()));
        }
        Ok(Self { rules: compiled })
    }

    /// Derives a site from a `slot@hostname` remote host value.
    pub fn site_from_host(&self, remote_host: &str) -> String {
        let host = remote_host
            .split_once('@')
            .map(|(_, host)| host)
            .unwrap_or(remote_host);

        for (re, site) in &self.rules {
            if re.is_match(host) {
                return site.clone();
            }
        }

        host.to_string()
    }
}

fn get_i64(ad: &RawAd, key: &str) -> Option<i64> {
    match ad.get(key)? {
        serde_json::Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn get_str(ad: &RawAd, key: &str) -> Option<String> {
    ad.get(key)?.as_str().map(str::to_string)
}

/// Builds a normalized snapshot from one raw classad.
///
/// The only post-extraction fix-up is the job-site default: a site the
/// scheduler reports as `"Unknown"` (job ran on the submit node) becomes
/// the submit site.
pub fn snapshot_from_ad(
    raw: &RawAd,
    observed_at: i64,
    default_submit_site: &str,
    resolver: &SiteResolver,
) -> Result<JobSnapshot> {
    let id = get_str(raw, ad::ID).context("classad missing GlobalJobId")?;

    let status_code =
        get_i64(raw, ad::STATUS).with_context(|| format!("job {id}: missing JobStatus"))?;
    let status = JobStatus::from_code(status_code)
        .with_context(|| format!("job {id}: unknown JobStatus code {status_code}"))?;

    // Brand-new jobs have no previous status; an unknown code there is as
    // fatal as one in the current status.
    let prev_status = match get_i64(raw, ad::PREV_STATUS) {
        Some(code) => Some(
            JobStatus::from_code(code)
                .with_context(|| format!("job {id}: unknown LastJobStatus code {code}"))?,
        ),
        None => None,
    };

    let queue_time =
        get_i64(raw, ad::QUEUE_TIME).with_context(|| format!("job {id}: missing QDate"))?;
    let entered_status_time = get_i64(raw, ad::ENTERED_STATUS_TIME).unwrap_or(queue_time);

    let submit_site =
        get_str(raw, ad::SUBMIT_SITE).unwrap_or_else(|| default_submit_site.to_string());

    let mut job_site = get_str(raw, ad::JOB_SITE).or_else(|| {
        get_str(raw, ad::LAST_REMOTE_HOST).map(|host| resolver.site_from_host(&host))
    });
    if job_site.as_deref() == Some("Unknown") {
        job_site = Some(submit_site.clone());
    }

    let mut attrs = HashMap::new();
    for (key, value) in raw {
        let attr = match value {
            serde_json::Value::Number(n) => n.as_f64().map(AttrValue::Number),
            serde_json::Value::String(s) => Some(AttrValue::Text(s.clone())),
            _ => None,
        };
        if let Some(attr) = attr {
            attrs.insert(key.clone(), attr);
        }
    }

    Ok(JobSnapshot {
        id,
        status,
        prev_status,
        queue_time,
        entered_status_time,
        first_run_start: get_i64(raw, ad::FIRST_RUN_START),
        last_run_start: get_i64(raw, ad::LAST_RUN_START),
        last_evict: get_i64(raw, ad::LAST_EVICT),
        last_suspend: get_i64(raw, ad::LAST_SUSPEND),
        completion_time: get_i64(raw, ad::COMPLETION),
        observed_at,
        submit_site,
        job_site,
        attrs,
    })
}
