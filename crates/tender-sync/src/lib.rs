//! Source registry, run orchestration, and the cron trigger.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tender_storage::{BackoffPolicy, HttpClientConfig};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};

mod orchestrator;
mod registry;

pub use orchestrator::{
    RunOptions, RunTotals, ScrapeOrchestrator, ScrapeSummary, SourceResult, SyncError,
};
pub use registry::{adapter_for_source, SourceConfig, SourceKind, SourceRegistry};

pub const CRATE_NAME: &str = "tender-sync";

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub database_url: String,
    pub sources_file: PathBuf,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub http_max_retries: usize,
    pub source_delay_ms: u64,
    pub scheduler_enabled: bool,
    pub scrape_cron: String,
    pub web_port: u16,
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://tenders.db".to_string()),
            sources_file: std::env::var("TENDER_SOURCES_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("sources.yaml")),
            user_agent: std::env::var("TENDER_USER_AGENT")
                .unwrap_or_else(|_| "TenderWatch/1.0".to_string()),
            http_timeout_secs: std::env::var("TENDER_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
            http_max_retries: std::env::var("TENDER_HTTP_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            source_delay_ms: std::env::var("TENDER_SOURCE_DELAY_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1000),
            scheduler_enabled: std::env::var("TENDER_SCHEDULER_ENABLED")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(true),
            scrape_cron: std::env::var("TENDER_SCRAPE_CRON")
                .unwrap_or_else(|_| "*/30 * * * *".to_string()),
            web_port: std::env::var("TENDER_WEB_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8080),
        }
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
            backoff: BackoffPolicy {
                max_retries: self.http_max_retries,
                ..BackoffPolicy::default()
            },
            ..Default::default()
        }
    }
}

/// The scheduler wants a seconds field; plain five-field expressions fire
/// at second zero.
pub fn cron_with_seconds(expr: &str) -> String {
    let expr = expr.trim();
    if expr.split_whitespace().count() == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    }
}

/// Builds the periodic scrape job, or `None` when scheduling is off. The
/// caller owns starting and shutting down the scheduler.
pub async fn maybe_build_scheduler(
    config: &SyncConfig,
    orchestrator: Arc<ScrapeOrchestrator>,
) -> Result<Option<JobScheduler>> {
    if !config.scheduler_enabled {
        return Ok(None);
    }

    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let cron = cron_with_seconds(&config.scrape_cron);
    let job = Job::new_async(cron.as_str(), move |_uuid, _l| {
        let orchestrator = Arc::clone(&orchestrator);
        Box::pin(async move {
            match orchestrator.run(RunOptions::default()).await {
                Ok(summary) => info!(
                    run_id = %summary.run_id,
                    failed = summary.totals.failed,
                    persisted = summary.totals.persisted,
                    "scheduled scrape finished"
                ),
                Err(SyncError::RunInProgress) => {
                    warn!("scheduled scrape skipped; a run is already in progress")
                }
                Err(err) => warn!(error = %err, "scheduled scrape failed to start"),
            }
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cron}"))?;
    sched.add(job).await.context("adding scheduler job")?;
    info!(cron = %cron, "scrape scheduler configured");
    Ok(Some(sched))
}
