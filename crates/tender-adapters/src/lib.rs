//! Source adapter contract, shared ingest step, and the concrete upstream adapters.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tender_core::{TenderDraft, TenderStatus};
use tender_storage::{FetchError, TenderStore};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

pub mod austender;
pub mod browser;
mod extract;
pub mod rss;

pub use austender::{
    chunk_windows, notice_window, ContractsAdapter, ContractsConfig, NoticesAdapter, NoticesConfig,
};
pub use browser::{
    crawl_portal, with_render_engine, BrowserPortalAdapter, ChromeLauncher, PortalConfig, PortalSelectors,
    RenderEngine, RenderEngineFactory,
};
pub use extract::{parse_amount_text, parse_upstream_date};
pub use rss::{parse_feed, RssConfig, RssFeedAdapter};

pub const CRATE_NAME: &str = "tender-adapters";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    JsonApi,
    Rss,
    Browser,
}

/// What happens to records the classifier does not flag as construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Retention {
    #[default]
    ConstructionOnly,
    TagAll,
}

/// Registry-facing identity shared by every adapter kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceIdentity {
    pub source_id: String,
    pub record_source: String,
    pub retention: Retention,
}

impl SourceIdentity {
    pub fn new(source_id: impl Into<String>, record_source: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            record_source: record_source.into(),
            retention: Retention::default(),
        }
    }

    pub fn with_retention(mut self, retention: Retention) -> Self {
        self.retention = retention;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterContext {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
}

impl AdapterContext {
    pub fn new() -> Self {
        Self::at(Utc::now())
    }

    /// Fixed clock, used for date-window computation.
    pub fn at(started_at: DateTime<Utc>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at,
        }
    }
}

impl Default for AdapterContext {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("unexpected response shape from {url}: {reason}")]
    Structural { url: String, reason: String },
    #[error("all {attempted} upstream requests failed; last error: {last}")]
    AllRequestsFailed {
        attempted: usize,
        last: Box<AdapterError>,
    },
    #[error("render engine failure: {0}")]
    Render(String),
    #[error("invalid adapter configuration: {0}")]
    Config(String),
    #[error("adapter task failed: {0}")]
    TaskFailed(String),
}

impl AdapterError {
    pub fn structural(url: impl Into<String>, reason: impl ToString) -> Self {
        AdapterError::Structural {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    /// A structural failure means the upstream answered in a shape we cannot
    /// use: an unparseable body or a 4xx status.
    pub fn is_structural(&self) -> bool {
        match self {
            AdapterError::Structural { .. } => true,
            AdapterError::Fetch(err) => !err.is_transient() && err.status().is_some(),
            _ => false,
        }
    }
}

/// Per-record extraction failure. Skipped and counted, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("field `{field}` has unparseable date `{value}`")]
    InvalidDate { field: &'static str, value: String },
    #[error("field `{field}` has unparseable value `{value}`")]
    InvalidValue { field: &'static str, value: String },
}

#[derive(Debug, Default)]
pub struct FetchBatch {
    pub records: Vec<Result<TenderDraft, RecordError>>,
    pub requests: usize,
    pub failed_requests: usize,
    pub used_fallback: bool,
}

impl FetchBatch {
    pub fn extend_records(&mut self, records: impl IntoIterator<Item = Result<TenderDraft, RecordError>>) {
        self.records.extend(records);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceStats {
    pub fetched: usize,
    pub construction_matched: usize,
    pub persisted: usize,
    pub open: usize,
    pub awarded: usize,
    pub skipped_malformed: usize,
    pub skipped_non_construction: usize,
    pub write_failures: usize,
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source_id(&self) -> &str;
    fn record_source(&self) -> &str;
    fn transport(&self) -> Transport;

    fn retention(&self) -> Retention {
        Retention::ConstructionOnly
    }

    async fn fetch(&self, ctx: &AdapterContext) -> Result<FetchBatch, AdapterError>;

    async fn run(
        &self,
        ctx: &AdapterContext,
        store: &dyn TenderStore,
    ) -> Result<SourceStats, AdapterError> {
        let batch = self.fetch(ctx).await?;
        Ok(ingest_batch(
            self.source_id(),
            self.record_source(),
            self.retention(),
            batch,
            store,
        )
        .await)
    }
}

/// Classify, filter or tag, and upsert every record in a batch. Malformed
/// records and failed writes are counted and the batch carries on.
pub async fn ingest_batch(
    source_id: &str,
    record_source: &str,
    retention: Retention,
    batch: FetchBatch,
    store: &dyn TenderStore,
) -> SourceStats {
    let mut stats = SourceStats::default();

    for (index, item) in batch.records.into_iter().enumerate() {
        stats.fetched += 1;
        let draft = match item {
            Ok(draft) => draft,
            Err(err) => {
                warn!(source_id, index, error = %err, "skipping malformed record");
                stats.skipped_malformed += 1;
                continue;
            }
        };

        let classification = draft.classify();
        if classification.is_construction {
            stats.construction_matched += 1;
        } else if retention == Retention::ConstructionOnly {
            stats.skipped_non_construction += 1;
            continue;
        }

        let status = draft.status;
        let record = draft.into_record(record_source, classification);
        match store.upsert(&record, status).await {
            Ok(()) => {
                stats.persisted += 1;
                match status {
                    TenderStatus::Open => stats.open += 1,
                    TenderStatus::Awarded => stats.awarded += 1,
                }
            }
            Err(err) => {
                warn!(source_id, tender_id = %record.id, error = %err, "tender write failed");
                stats.write_failures += 1;
            }
        }
    }

    info!(
        source_id,
        requests = batch.requests,
        failed_requests = batch.failed_requests,
        used_fallback = batch.used_fallback,
        fetched = stats.fetched,
        construction = stats.construction_matched,
        persisted = stats.persisted,
        skipped_malformed = stats.skipped_malformed,
        "source batch ingested"
    );
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use tender_storage::{SqliteTenderStore, StatusCode};

    fn draft(id: &str, title: &str, status: TenderStatus) -> Result<TenderDraft, RecordError> {
        let mut draft = TenderDraft::new(id, status);
        draft.title = title.to_string();
        Ok(draft)
    }

    fn mixed_batch() -> FetchBatch {
        FetchBatch {
            records: vec![
                draft("CN1", "Bridge deck replacement", TenderStatus::Awarded),
                Err(RecordError::MissingField("contracts[0]")),
                draft("CN2", "Payroll software licences", TenderStatus::Awarded),
                draft("CN3", "School hall renovation", TenderStatus::Open),
            ],
            requests: 1,
            ..FetchBatch::default()
        }
    }

    #[tokio::test]
    async fn construction_only_retention_drops_unmatched_records() {
        let store = SqliteTenderStore::connect("sqlite::memory:").await.unwrap();
        let stats = ingest_batch(
            "austender-contracts",
            "AusTender",
            Retention::ConstructionOnly,
            mixed_batch(),
            &store,
        )
        .await;

        assert_eq!(
            stats,
            SourceStats {
                fetched: 4,
                construction_matched: 2,
                persisted: 2,
                open: 1,
                awarded: 1,
                skipped_malformed: 1,
                skipped_non_construction: 1,
                write_failures: 0,
            }
        );
        assert!(store.get("CN2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn tag_all_retention_keeps_unmatched_records_with_flag() {
        let store = SqliteTenderStore::connect("sqlite::memory:").await.unwrap();
        let stats = ingest_batch("general", "General", Retention::TagAll, mixed_batch(), &store).await;

        assert_eq!(stats.persisted, 3);
        assert_eq!(stats.skipped_non_construction, 0);
        let tagged = store.get("CN2").await.unwrap().unwrap();
        assert!(!tagged.is_construction);
        // Reads only surface construction rows.
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[test]
    fn structural_classification_of_adapter_errors() {
        let not_found = AdapterError::Fetch(FetchError::HttpStatus {
            status: StatusCode::NOT_FOUND.as_u16(),
            url: "https://api.example/ocds/search".into(),
        });
        let unavailable = AdapterError::Fetch(FetchError::HttpStatus {
            status: StatusCode::BAD_GATEWAY.as_u16(),
            url: "https://api.example/ocds/search".into(),
        });

        assert!(not_found.is_structural());
        assert!(!unavailable.is_structural());
        assert!(AdapterError::structural("https://api.example", "expected JSON").is_structural());
        assert!(!AdapterError::Render("chrome exited".into()).is_structural());
    }
}
