//! JSON query API over the tender store, plus the manual scrape trigger.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path as AxumPath, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tender_core::{Category, TenderRecord, TenderStatus};
use tender_storage::TenderStore;
use tender_sync::{RunOptions, ScrapeOrchestrator, SyncError};
use tokio::net::TcpListener;
use tracing::{error, info};

pub const CRATE_NAME: &str = "tender-web";

const DEFAULT_LIMIT: u32 = 50;
const MAX_LIMIT: u32 = 500;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn TenderStore>,
    pub orchestrator: Arc<ScrapeOrchestrator>,
}

impl AppState {
    pub fn new(orchestrator: Arc<ScrapeOrchestrator>) -> Self {
        Self {
            store: orchestrator.store(),
            orchestrator,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TendersQuery {
    pub limit: Option<u32>,
    pub state: Option<String>,
    pub status: Option<String>,
    pub category: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScrapeQuery {
    #[serde(default)]
    pub parallel: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct TenderView {
    #[serde(flatten)]
    pub record: TenderRecord,
    pub is_open: bool,
    pub days_until_close: Option<i64>,
}

impl TenderView {
    pub fn at(record: TenderRecord, now: DateTime<Utc>) -> Self {
        let is_open = record.tender_status == TenderStatus::Open;
        let days_until_close = match record.tender_status {
            TenderStatus::Open => record.closing_date.map(|closing| days_until(closing, now)),
            TenderStatus::Awarded => None,
        };
        Self {
            record,
            is_open,
            days_until_close,
        }
    }
}

/// Whole days left, rounded up; negative once closed.
fn days_until(closing: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let seconds = (closing - now).num_seconds();
    if seconds > 0 {
        (seconds + 86_399) / 86_400
    } else {
        seconds / 86_400
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/api/tenders", get(tenders_handler))
        .route("/api/tenders/{id}", get(tender_detail_handler))
        .route("/api/stats", get(stats_handler))
        .route("/api/categories", get(categories_handler))
        .route("/api/scrape", post(scrape_handler))
        .with_state(Arc::new(state))
}

pub async fn serve(
    state: AppState,
    addr: SocketAddr,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "query api listening");
    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

fn failure(status: StatusCode, error: impl ToString) -> Response {
    (
        status,
        Json(json!({ "success": false, "error": error.to_string() })),
    )
        .into_response()
}

fn server_error(err: impl std::fmt::Display) -> Response {
    error!(error = %err, "api request failed");
    failure(StatusCode::INTERNAL_SERVER_ERROR, err)
}

async fn tenders_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TendersQuery>,
) -> Response {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);

    let status = match query.status.as_deref().filter(|s| !s.is_empty()) {
        None => None,
        Some(raw) => match raw.parse::<TenderStatus>() {
            Ok(status) => Some(status),
            Err(err) => return failure(StatusCode::BAD_REQUEST, err),
        },
    };
    let category = match query
        .category
        .as_deref()
        .filter(|c| !c.is_empty() && !c.eq_ignore_ascii_case("all"))
    {
        None => None,
        Some(raw) => match raw.parse::<Category>() {
            Ok(category) => Some(category),
            Err(err) => return failure(StatusCode::BAD_REQUEST, err),
        },
    };
    let region = query
        .state
        .as_deref()
        .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("all"));

    let rows = match (status, region) {
        (Some(TenderStatus::Open), _) => state.store.select_open(limit).await,
        (Some(TenderStatus::Awarded), _) => state.store.select_awarded(limit).await,
        (None, Some(region)) => state.store.select_by_region(region, limit).await,
        (None, None) => state.store.select_recent(limit).await,
    };

    match rows {
        Ok(rows) => {
            let now = Utc::now();
            let tenders: Vec<TenderView> = rows
                .into_iter()
                .filter(|r| category.is_none_or(|c| r.category == c))
                .map(|r| TenderView::at(r, now))
                .collect();
            Json(json!({ "success": true, "count": tenders.len(), "tenders": tenders }))
                .into_response()
        }
        Err(err) => server_error(err),
    }
}

async fn tender_detail_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<String>,
) -> Response {
    match state.store.get(&id).await {
        Ok(Some(record)) => {
            Json(json!({ "success": true, "tender": TenderView::at(record, Utc::now()) }))
                .into_response()
        }
        Ok(None) => failure(StatusCode::NOT_FOUND, format!("no tender with id `{id}`")),
        Err(err) => server_error(err),
    }
}

async fn stats_handler(State(state): State<Arc<AppState>>) -> Response {
    let counts = async {
        let total = state.store.count().await?;
        let open = state.store.count_open().await?;
        Ok::<_, tender_storage::StoreError>((total, open))
    };
    match counts.await {
        Ok((total, open)) => Json(json!({
            "success": true,
            "stats": { "total": total, "open": open, "awarded": total.saturating_sub(open) },
        }))
        .into_response(),
        Err(err) => server_error(err),
    }
}

async fn categories_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.store.category_counts().await {
        Ok(categories) => {
            Json(json!({ "success": true, "categories": categories })).into_response()
        }
        Err(err) => server_error(err),
    }
}

async fn scrape_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ScrapeQuery>,
) -> Response {
    let options = RunOptions {
        parallel: query.parallel,
        ..RunOptions::default()
    };
    match state.orchestrator.run(options).await {
        Ok(summary) => Json(json!({ "success": true, "summary": summary })).into_response(),
        Err(SyncError::RunInProgress) => {
            failure(StatusCode::CONFLICT, SyncError::RunInProgress)
        }
        Err(err) => server_error(err),
    }
}
