//! AusTender OCDS adapters: awarded contracts and open contract notices.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use tender_core::{TenderDraft, TenderStatus};
use tender_storage::{FetchError, FetchedResponse, HttpTransport};
use tracing::{debug, warn};

use crate::extract::{json_amount, json_at, json_date, json_text};
use crate::{
    AdapterContext, AdapterError, FetchBatch, RecordError, Retention, SourceAdapter,
    SourceIdentity, Transport,
};

const OCDS_TIMESTAMP: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Upper bounds for registry-supplied windows.
pub const MAX_LOOKBACK_MONTHS: u32 = 240;
pub const MAX_WINDOW_DAYS: i64 = 3_650;

fn default_base_url() -> String {
    "https://api.tenders.gov.au/ocds".to_string()
}

fn default_chunk_months() -> u32 {
    2
}

fn default_lookback_months() -> u32 {
    12
}

fn default_request_delay_ms() -> u64 {
    500
}

fn default_window_days() -> i64 {
    30
}

fn default_search_keyword() -> String {
    "construction OR building OR infrastructure".to_string()
}

fn default_notice_url_base() -> String {
    "https://www.tenders.gov.au/Cn/Show".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractsConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_chunk_months")]
    pub chunk_months: u32,
    #[serde(default = "default_lookback_months")]
    pub lookback_months: u32,
    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,
}

impl Default for ContractsConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            chunk_months: default_chunk_months(),
            lookback_months: default_lookback_months(),
            request_delay_ms: default_request_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoticesConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_search_keyword")]
    pub search_keyword: String,
    #[serde(default = "default_window_days")]
    pub window_days: i64,
    #[serde(default = "default_notice_url_base")]
    pub notice_url_base: String,
}

impl Default for NoticesConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            search_keyword: default_search_keyword(),
            window_days: default_window_days(),
            notice_url_base: default_notice_url_base(),
        }
    }
}

/// Consecutive `[start, end)` windows walking back from `now`, newest first.
pub fn chunk_windows(
    now: DateTime<Utc>,
    chunk_months: u32,
    lookback_months: u32,
) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    let chunk = chunk_months.clamp(1, MAX_LOOKBACK_MONTHS);
    let count = lookback_months.min(MAX_LOOKBACK_MONTHS).div_ceil(chunk);
    let mut windows = Vec::with_capacity(count as usize);
    for index in 0..count {
        let Some(end) = now.checked_sub_months(Months::new(index * chunk)) else {
            break;
        };
        let Some(start) = end.checked_sub_months(Months::new(chunk)) else {
            break;
        };
        windows.push((start, end));
    }
    windows
}

/// `[now - window_days, now]`, with the day count held to `1..=MAX_WINDOW_DAYS`.
pub fn notice_window(now: DateTime<Utc>, window_days: i64) -> (DateTime<Utc>, DateTime<Utc>) {
    let days = window_days.clamp(1, MAX_WINDOW_DAYS);
    (now - chrono::Duration::days(days), now)
}

fn ocds_timestamp(ts: DateTime<Utc>) -> String {
    ts.format(OCDS_TIMESTAMP).to_string()
}

/// `releases` from an OCDS release package. A missing array is an empty page;
/// anything that is not a JSON object is a structural failure.
pub fn parse_release_package(url: &str, body: &[u8]) -> Result<Vec<JsonValue>, AdapterError> {
    let package: JsonValue =
        serde_json::from_slice(body).map_err(|e| AdapterError::structural(url, e))?;
    if !package.is_object() {
        return Err(AdapterError::structural(url, "expected an OCDS release package object"));
    }
    match package.get("releases") {
        None | Some(JsonValue::Null) => Ok(Vec::new()),
        Some(JsonValue::Array(releases)) => Ok(releases.clone()),
        Some(_) => Err(AdapterError::structural(url, "`releases` is not an array")),
    }
}

fn party_with_role<'a>(release: &'a JsonValue, roles: &[&str]) -> Option<&'a JsonValue> {
    json_at(release, &["parties"])?
        .as_array()?
        .iter()
        .find(|party| {
            party
                .get("roles")
                .and_then(JsonValue::as_array)
                .is_some_and(|list| {
                    list.iter()
                        .filter_map(JsonValue::as_str)
                        .any(|role| roles.contains(&role))
                })
        })
}

fn party_text(party: Option<&JsonValue>, path: &[&str]) -> Option<String> {
    party.and_then(|p| json_text(p, path))
}

pub fn contract_release_to_draft(release: &JsonValue) -> Result<TenderDraft, RecordError> {
    let contract = json_at(release, &["contracts"])
        .and_then(|contracts| contracts.get(0))
        .ok_or(RecordError::MissingField("contracts[0]"))?;
    let id = json_text(contract, &["id"]).ok_or(RecordError::MissingField("contract.id"))?;

    let buyer = party_with_role(release, &["procuringEntity"]);
    let supplier = party_with_role(release, &["supplier"]);

    let mut draft = TenderDraft::new(id, TenderStatus::Awarded);
    draft.title = json_text(contract, &["title"]).unwrap_or_default();
    draft.description = json_text(contract, &["description"]).unwrap_or_default();
    draft.buyer_name = party_text(buyer, &["name"]);
    draft.supplier_name = party_text(supplier, &["name"]);
    draft.value_amount = json_amount(contract, &["value", "amount"], "value.amount")?;
    draft.value_currency = json_text(contract, &["value", "currency"]);
    draft.date_signed = json_date(contract, &["dateSigned"], "dateSigned")?;
    draft.period_start = json_date(contract, &["period", "startDate"], "period.startDate")?;
    draft.period_end = json_date(contract, &["period", "endDate"], "period.endDate")?;
    draft.state = party_text(buyer, &["address", "region"])
        .or_else(|| party_text(supplier, &["address", "region"]));
    draft.locality = party_text(buyer, &["address", "locality"])
        .or_else(|| party_text(supplier, &["address", "locality"]));
    draft.external_reference_id = json_text(release, &["ocid"]);
    Ok(draft)
}

pub fn notice_release_to_draft(
    release: &JsonValue,
    notice_url_base: &str,
) -> Result<TenderDraft, RecordError> {
    let tender = json_at(release, &["tender"]).ok_or(RecordError::MissingField("tender"))?;
    let notice_id = json_text(tender, &["id"]);
    let id = json_text(release, &["ocid"])
        .or_else(|| notice_id.clone())
        .ok_or(RecordError::MissingField("ocid"))?;
    let notice_id = notice_id.unwrap_or_else(|| id.clone());

    let buyer = party_with_role(release, &["procuringEntity", "buyer"]);

    let mut draft = TenderDraft::new(id, TenderStatus::Open);
    draft.title = json_text(tender, &["title"]).unwrap_or_default();
    draft.description = json_text(tender, &["description"]).unwrap_or_default();
    draft.buyer_name = party_text(buyer, &["name"]);
    draft.value_amount = json_amount(tender, &["value", "amount"], "tender.value.amount")?;
    draft.value_currency = json_text(tender, &["value", "currency"]);
    draft.closing_date = json_date(tender, &["tenderPeriod", "endDate"], "tenderPeriod.endDate")?;
    draft.state = party_text(buyer, &["address", "region"]);
    draft.locality = party_text(buyer, &["address", "locality"]);
    draft.external_url = Some(format!(
        "{}/{}",
        notice_url_base.trim_end_matches('/'),
        notice_id
    ));
    draft.external_reference_id = Some(notice_id);
    Ok(draft)
}

fn expect_release_package(
    response: Result<FetchedResponse, FetchError>,
    url: &str,
) -> Result<Vec<JsonValue>, AdapterError> {
    let response = response?;
    parse_release_package(url, &response.body)
}

/// Awarded contracts published over a chunked lookback window.
pub struct ContractsAdapter {
    identity: SourceIdentity,
    config: ContractsConfig,
    http: Arc<dyn HttpTransport>,
}

impl ContractsAdapter {
    pub fn new(identity: SourceIdentity, config: ContractsConfig, http: Arc<dyn HttpTransport>) -> Self {
        Self {
            identity,
            config,
            http,
        }
    }

    fn window_url(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> String {
        format!(
            "{}/findByDates/contractPublished/{}/{}",
            self.config.base_url.trim_end_matches('/'),
            ocds_timestamp(start),
            ocds_timestamp(end)
        )
    }
}

#[async_trait]
impl SourceAdapter for ContractsAdapter {
    fn source_id(&self) -> &str {
        &self.identity.source_id
    }

    fn record_source(&self) -> &str {
        &self.identity.record_source
    }

    fn transport(&self) -> Transport {
        Transport::JsonApi
    }

    fn retention(&self) -> Retention {
        self.identity.retention
    }

    async fn fetch(&self, ctx: &AdapterContext) -> Result<FetchBatch, AdapterError> {
        let windows = chunk_windows(
            ctx.started_at,
            self.config.chunk_months,
            self.config.lookback_months,
        );
        let delay = Duration::from_millis(self.config.request_delay_ms);
        let mut batch = FetchBatch::default();
        let mut last_error = None;

        for (index, (start, end)) in windows.into_iter().enumerate() {
            if index > 0 && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let url = self.window_url(start, end);
            batch.requests += 1;

            let response = self.http.get(self.source_id(), &url).await;
            match expect_release_package(response, &url) {
                Ok(releases) => {
                    debug!(
                        source_id = self.source_id(),
                        url = %url,
                        releases = releases.len(),
                        "contract chunk fetched"
                    );
                    batch.extend_records(releases.iter().map(contract_release_to_draft));
                }
                Err(err) => {
                    warn!(source_id = self.source_id(), url = %url, error = %err, "contract chunk failed");
                    batch.failed_requests += 1;
                    last_error = Some(err);
                }
            }
        }

        if let Some(last) = last_error {
            if batch.failed_requests == batch.requests {
                return Err(AdapterError::AllRequestsFailed {
                    attempted: batch.requests,
                    last: Box::new(last),
                });
            }
        }
        Ok(batch)
    }
}

/// Open contract notices. Tries the keyword search first and falls back to
/// the published-notice window when search is structurally unsupported.
pub struct NoticesAdapter {
    identity: SourceIdentity,
    config: NoticesConfig,
    http: Arc<dyn HttpTransport>,
}

impl NoticesAdapter {
    pub fn new(identity: SourceIdentity, config: NoticesConfig, http: Arc<dyn HttpTransport>) -> Self {
        Self {
            identity,
            config,
            http,
        }
    }

    fn window(&self, ctx: &AdapterContext) -> (DateTime<Utc>, DateTime<Utc>) {
        notice_window(ctx.started_at, self.config.window_days)
    }

    async fn search_active(&self, ctx: &AdapterContext) -> Result<Vec<JsonValue>, AdapterError> {
        let url = format!("{}/search", self.config.base_url.trim_end_matches('/'));
        let (start, end) = self.window(ctx);
        let body = json!({
            "status": "active",
            "publicationDateFrom": start.format("%Y-%m-%d").to_string(),
            "publicationDateTo": end.format("%Y-%m-%d").to_string(),
            "keyword": self.config.search_keyword,
        });
        let response = self.http.post_json(self.source_id(), &url, &body).await;
        expect_release_package(response, &url)
    }

    async fn published_notices(&self, ctx: &AdapterContext) -> Result<Vec<JsonValue>, AdapterError> {
        let (start, end) = self.window(ctx);
        let url = format!(
            "{}/findByDates/contractNoticePublished/{}/{}",
            self.config.base_url.trim_end_matches('/'),
            ocds_timestamp(start),
            ocds_timestamp(end)
        );
        let response = self.http.get(self.source_id(), &url).await;
        expect_release_package(response, &url)
    }
}

#[async_trait]
impl SourceAdapter for NoticesAdapter {
    fn source_id(&self) -> &str {
        &self.identity.source_id
    }

    fn record_source(&self) -> &str {
        &self.identity.record_source
    }

    fn transport(&self) -> Transport {
        Transport::JsonApi
    }

    fn retention(&self) -> Retention {
        self.identity.retention
    }

    async fn fetch(&self, ctx: &AdapterContext) -> Result<FetchBatch, AdapterError> {
        let mut batch = FetchBatch {
            requests: 1,
            ..FetchBatch::default()
        };

        let releases = match self.search_active(ctx).await {
            Ok(releases) => releases,
            Err(err) if err.is_structural() => {
                warn!(
                    source_id = self.source_id(),
                    error = %err,
                    "notice search unsupported; falling back to published notices"
                );
                batch.failed_requests += 1;
                batch.requests += 1;
                batch.used_fallback = true;
                self.published_notices(ctx).await?
            }
            Err(err) => return Err(err),
        };

        let base = self.config.notice_url_base.as_str();
        batch.extend_records(releases.iter().map(|release| notice_release_to_draft(release, base)));
        Ok(batch)
    }
}
