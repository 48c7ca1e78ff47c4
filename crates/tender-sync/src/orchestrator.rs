use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tender_adapters::{AdapterContext, SourceAdapter, SourceStats};
use tender_storage::{HttpFetcher, HttpTransport, TenderStore};
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

use crate::registry::{adapter_for_source, SourceRegistry};
use crate::SyncConfig;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("a scrape run is already in progress")]
    RunInProgress,
    #[error("source registry unavailable: {0:#}")]
    Registry(anyhow::Error),
    #[error("unknown source `{0}`")]
    UnknownSource(String),
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub parallel: bool,
    /// Restricts the run to these ids. Named sources run even when disabled.
    pub only_sources: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceResult {
    pub source_id: String,
    pub success: bool,
    pub error: Option<String>,
    pub stats: SourceStats,
}

impl SourceResult {
    fn succeeded(source_id: String, stats: SourceStats) -> Self {
        Self {
            source_id,
            success: true,
            error: None,
            stats,
        }
    }

    fn failed(source_id: String, error: impl ToString) -> Self {
        Self {
            source_id,
            success: false,
            error: Some(error.to_string()),
            stats: SourceStats::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunTotals {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub persisted: usize,
    pub open: usize,
    pub awarded: usize,
}

impl RunTotals {
    fn from_results(results: &[SourceResult]) -> Self {
        results.iter().fold(Self::default(), |mut totals, result| {
            totals.attempted += 1;
            if result.success {
                totals.succeeded += 1;
            } else {
                totals.failed += 1;
            }
            totals.persisted += result.stats.persisted;
            totals.open += result.stats.open;
            totals.awarded += result.stats.awarded;
            totals
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScrapeSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub parallel: bool,
    pub results: Vec<SourceResult>,
    pub totals: RunTotals,
}

impl ScrapeSummary {
    pub fn any_failed(&self) -> bool {
        self.totals.failed > 0
    }

    pub fn result_for(&self, source_id: &str) -> Option<&SourceResult> {
        self.results.iter().find(|r| r.source_id == source_id)
    }
}

/// Either a ready adapter or the reason one could not be built.
enum PlannedSource {
    Ready(Arc<dyn SourceAdapter>),
    Invalid(SourceResult),
}

struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct ScrapeOrchestrator {
    config: SyncConfig,
    store: Arc<dyn TenderStore>,
    http: Arc<dyn HttpTransport>,
    source_delay: Duration,
    running: AtomicBool,
}

impl ScrapeOrchestrator {
    pub fn new(config: SyncConfig, store: Arc<dyn TenderStore>, http: Arc<dyn HttpTransport>) -> Self {
        let source_delay = Duration::from_millis(config.source_delay_ms);
        Self {
            config,
            store,
            http,
            source_delay,
            running: AtomicBool::new(false),
        }
    }

    /// Production wiring: a shared `HttpFetcher` built from the config.
    pub fn from_config(config: SyncConfig, store: Arc<dyn TenderStore>) -> anyhow::Result<Self> {
        let http = HttpFetcher::new(config.http_client_config())?;
        Ok(Self::new(config, store, Arc::new(http)))
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn TenderStore> {
        Arc::clone(&self.store)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn try_lock(&self) -> Result<RunGuard<'_>, SyncError> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| SyncError::RunInProgress)?;
        Ok(RunGuard(&self.running))
    }

    /// Runs the registry's enabled sources, or the named ones.
    pub async fn run(&self, options: RunOptions) -> Result<ScrapeSummary, SyncError> {
        let _guard = self.try_lock()?;
        let registry = SourceRegistry::load(&self.config.sources_file)
            .await
            .map_err(SyncError::Registry)?;

        let selected = if options.only_sources.is_empty() {
            registry.enabled_by_priority()
        } else {
            let mut picked = Vec::with_capacity(options.only_sources.len());
            let mut seen = HashSet::new();
            for id in &options.only_sources {
                if !seen.insert(id.as_str()) {
                    continue;
                }
                let source = registry
                    .get(id)
                    .ok_or_else(|| SyncError::UnknownSource(id.clone()))?;
                picked.push(source);
            }
            picked.sort_by_key(|s| s.priority);
            picked
        };

        let planned = selected
            .into_iter()
            .map(|source| match adapter_for_source(source, Arc::clone(&self.http)) {
                Ok(adapter) => PlannedSource::Ready(adapter),
                Err(err) => {
                    error!(source_id = %source.source_id, error = %err, "source misconfigured");
                    PlannedSource::Invalid(SourceResult::failed(source.source_id.clone(), err))
                }
            })
            .collect();
        Ok(self.execute(planned, options.parallel).await)
    }

    /// Runs the given adapters in order. Sequential unless `parallel`.
    pub async fn run_adapters(
        &self,
        adapters: Vec<Arc<dyn SourceAdapter>>,
        options: RunOptions,
    ) -> Result<ScrapeSummary, SyncError> {
        let _guard = self.try_lock()?;
        let planned = adapters.into_iter().map(PlannedSource::Ready).collect();
        Ok(self.execute(planned, options.parallel).await)
    }

    async fn execute(&self, planned: Vec<PlannedSource>, parallel: bool) -> ScrapeSummary {
        let ctx = AdapterContext::new();
        info!(
            run_id = %ctx.run_id,
            sources = planned.len(),
            parallel,
            "scrape run started"
        );

        let results = if parallel {
            self.execute_parallel(planned, &ctx).await
        } else {
            self.execute_sequential(planned, &ctx).await
        };

        let finished_at = Utc::now();
        let duration_ms = (finished_at - ctx.started_at).num_milliseconds().max(0) as u64;
        let totals = RunTotals::from_results(&results);
        info!(
            run_id = %ctx.run_id,
            attempted = totals.attempted,
            succeeded = totals.succeeded,
            failed = totals.failed,
            persisted = totals.persisted,
            open = totals.open,
            awarded = totals.awarded,
            duration_ms,
            "scrape run finished"
        );

        ScrapeSummary {
            run_id: ctx.run_id,
            started_at: ctx.started_at,
            finished_at,
            duration_ms,
            parallel,
            results,
            totals,
        }
    }

    async fn execute_sequential(
        &self,
        planned: Vec<PlannedSource>,
        ctx: &AdapterContext,
    ) -> Vec<SourceResult> {
        let mut results = Vec::with_capacity(planned.len());
        for (index, source) in planned.into_iter().enumerate() {
            match source {
                PlannedSource::Invalid(result) => results.push(result),
                PlannedSource::Ready(adapter) => {
                    if index > 0 && !self.source_delay.is_zero() {
                        tokio::time::sleep(self.source_delay).await;
                    }
                    results.push(run_source(adapter, ctx.clone(), Arc::clone(&self.store)).await);
                }
            }
        }
        results
    }

    async fn execute_parallel(
        &self,
        planned: Vec<PlannedSource>,
        ctx: &AdapterContext,
    ) -> Vec<SourceResult> {
        let mut slots: Vec<Option<SourceResult>> = Vec::with_capacity(planned.len());
        let mut ids = Vec::with_capacity(planned.len());
        let mut set = JoinSet::new();

        for (index, source) in planned.into_iter().enumerate() {
            match source {
                PlannedSource::Invalid(result) => {
                    ids.push(result.source_id.clone());
                    slots.push(Some(result));
                }
                PlannedSource::Ready(adapter) => {
                    ids.push(adapter.source_id().to_string());
                    slots.push(None);
                    let ctx = ctx.clone();
                    let store = Arc::clone(&self.store);
                    set.spawn(async move { (index, run_source(adapter, ctx, store).await) });
                }
            }
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, result)) => slots[index] = Some(result),
                Err(err) => error!(error = %err, "source task did not complete"),
            }
        }

        slots
            .into_iter()
            .zip(ids)
            .map(|(slot, source_id)| {
                slot.unwrap_or_else(|| {
                    SourceResult::failed(source_id, "source task panicked or was cancelled")
                })
            })
            .collect()
    }
}

async fn run_source(
    adapter: Arc<dyn SourceAdapter>,
    ctx: AdapterContext,
    store: Arc<dyn TenderStore>,
) -> SourceResult {
    let source_id = adapter.source_id().to_string();
    let span = info_span!(
        "source_run",
        source_id = %source_id,
        transport = ?adapter.transport(),
        run_id = %ctx.run_id
    );
    async move {
        match adapter.run(&ctx, store.as_ref()).await {
            Ok(stats) => SourceResult::succeeded(source_id, stats),
            Err(err) => {
                error!(error = %err, "source run failed");
                SourceResult::failed(source_id, err)
            }
        }
    }
    .instrument(span)
    .await
}
