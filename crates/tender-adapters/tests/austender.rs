mod support;

use chrono::{TimeZone, Utc};
use tender_adapters::{
    AdapterContext, AdapterError, ContractsAdapter, ContractsConfig, NoticesAdapter,
    NoticesConfig, SourceAdapter, SourceIdentity, SourceStats,
};
use tender_core::{Category, TenderStatus};
use tender_storage::{SqliteTenderStore, TenderStore};

use support::{http_status, ok_body, read_fixture, ScriptedTransport};

const BASE: &str = "https://api.tenders.test/ocds";

fn ctx() -> AdapterContext {
    AdapterContext::at(Utc.with_ymd_and_hms(2026, 3, 31, 0, 0, 0).unwrap())
}

fn contracts_config(lookback_months: u32) -> ContractsConfig {
    ContractsConfig {
        base_url: BASE.to_string(),
        chunk_months: 2,
        lookback_months,
        request_delay_ms: 0,
    }
}

fn notices_config() -> NoticesConfig {
    NoticesConfig {
        base_url: BASE.to_string(),
        ..NoticesConfig::default()
    }
}

fn contracts_fixture() -> String {
    read_fixture("austender-contracts", "contract_published.json")
}

fn notices_fixture() -> String {
    read_fixture("austender-notices", "contract_notice_published.json")
}

#[tokio::test]
async fn harbour_bridge_contract_is_persisted_end_to_end() {
    let url = format!(
        "{BASE}/findByDates/contractPublished/2026-01-31T00:00:00Z/2026-03-31T00:00:00Z"
    );
    let http = ScriptedTransport::new(vec![ok_body(&url, contracts_fixture())]);
    let adapter = ContractsAdapter::new(
        SourceIdentity::new("austender-contracts", "AusTender"),
        contracts_config(2),
        http.clone(),
    );
    let store = SqliteTenderStore::connect("sqlite::memory:").await.unwrap();

    let stats = adapter.run(&ctx(), &store).await.unwrap();

    assert_eq!(http.calls().len(), 1);
    assert_eq!(http.calls()[0].url, url);
    assert_eq!(
        stats,
        SourceStats {
            fetched: 4,
            construction_matched: 2,
            persisted: 2,
            open: 0,
            awarded: 2,
            skipped_malformed: 1,
            skipped_non_construction: 1,
            write_failures: 0,
        }
    );

    let bridge = store.get("CN4012345").await.unwrap().expect("bridge contract stored");
    assert!(bridge.is_construction);
    assert_eq!(bridge.category, Category::BridgesTunnels);
    assert_eq!(bridge.tender_status, TenderStatus::Awarded);
    assert_eq!(bridge.value_amount, Some(2_400_000.0));
    assert_eq!(bridge.value_currency, "AUD");
    assert_eq!(bridge.buyer_name.as_deref(), Some("Transport for NSW"));
    assert_eq!(bridge.supplier_name.as_deref(), Some("Harbour Structures Pty Ltd"));
    assert_eq!(bridge.date_signed, Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).single());
    assert_eq!(bridge.state.as_deref(), Some("NSW"));
    assert_eq!(bridge.locality.as_deref(), Some("Sydney"));
    assert_eq!(bridge.source, "AusTender");

    let barracks = store.get("CN4012401").await.unwrap().unwrap();
    assert_eq!(barracks.category, Category::Defence);
    assert_eq!(barracks.state.as_deref(), Some("NT"));
    assert_eq!(barracks.value_amount, Some(1_875_500.5));

    assert!(store.get("CN4012399").await.unwrap().is_none());
}

#[tokio::test]
async fn rerunning_the_same_chunk_does_not_duplicate_rows() {
    let url = format!(
        "{BASE}/findByDates/contractPublished/2026-01-31T00:00:00Z/2026-03-31T00:00:00Z"
    );
    let http = ScriptedTransport::new(vec![
        ok_body(&url, contracts_fixture()),
        ok_body(&url, contracts_fixture()),
    ]);
    let adapter = ContractsAdapter::new(
        SourceIdentity::new("austender-contracts", "AusTender"),
        contracts_config(2),
        http,
    );
    let store = SqliteTenderStore::connect("sqlite::memory:").await.unwrap();

    adapter.run(&ctx(), &store).await.unwrap();
    let first = store.select_recent(50).await.unwrap();
    adapter.run(&ctx(), &store).await.unwrap();
    let second = store.select_recent(50).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(store.count().await.unwrap(), 2);
}

#[tokio::test]
async fn failed_chunks_are_skipped_while_others_succeed() {
    let http = ScriptedTransport::new(vec![
        http_status("chunk-1", 503),
        ok_body("chunk-2", contracts_fixture()),
        ok_body("chunk-3", "<html>gateway</html>"),
    ]);
    let adapter = ContractsAdapter::new(
        SourceIdentity::new("austender-contracts", "AusTender"),
        contracts_config(6),
        http.clone(),
    );

    let batch = adapter.fetch(&ctx()).await.unwrap();

    assert_eq!(batch.requests, 3);
    assert_eq!(batch.failed_requests, 2);
    assert_eq!(batch.records.len(), 4);
    let urls = http.calls().into_iter().map(|c| c.url).collect::<Vec<_>>();
    assert!(urls.iter().all(|u| u.contains("/findByDates/contractPublished/")));
    assert!(urls[2].ends_with("/2025-09-30T00:00:00Z/2025-11-30T00:00:00Z"));
}

#[tokio::test]
async fn source_fails_when_every_chunk_fails() {
    let http = ScriptedTransport::new(vec![
        http_status("chunk-1", 503),
        http_status("chunk-2", 502),
    ]);
    let adapter = ContractsAdapter::new(
        SourceIdentity::new("austender-contracts", "AusTender"),
        contracts_config(4),
        http,
    );

    let err = adapter.fetch(&ctx()).await.unwrap_err();
    assert!(matches!(err, AdapterError::AllRequestsFailed { attempted: 2, .. }));
}

#[tokio::test]
async fn notice_search_success_uses_no_fallback() {
    let http = ScriptedTransport::new(vec![ok_body("search", notices_fixture())]);
    let adapter = NoticesAdapter::new(
        SourceIdentity::new("austender-notices", "AusTender"),
        notices_config(),
        http.clone(),
    );

    let batch = adapter.fetch(&ctx()).await.unwrap();

    assert!(!batch.used_fallback);
    assert_eq!(batch.records.len(), 3);
    let calls = http.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].method, "POST");
    assert_eq!(calls[0].url, format!("{BASE}/search"));
}

#[tokio::test]
async fn unsupported_search_endpoint_falls_back_to_published_notices() {
    let http = ScriptedTransport::new(vec![
        http_status("search", 404),
        ok_body("published", notices_fixture()),
    ]);
    let adapter = NoticesAdapter::new(
        SourceIdentity::new("austender-notices", "AusTender"),
        notices_config(),
        http.clone(),
    );
    let store = SqliteTenderStore::connect("sqlite::memory:").await.unwrap();

    let stats = adapter.run(&ctx(), &store).await.unwrap();

    let calls = http.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].method, "GET");
    assert_eq!(
        calls[1].url,
        format!("{BASE}/findByDates/contractNoticePublished/2026-03-01T00:00:00Z/2026-03-31T00:00:00Z")
    );
    assert_eq!(stats.open, 1);
    assert_eq!(stats.skipped_malformed, 1);
    assert_eq!(stats.skipped_non_construction, 1);

    let runway = store.get("ocds-atm-ATM2026-0451").await.unwrap().unwrap();
    assert_eq!(runway.tender_status, TenderStatus::Open);
    assert_eq!(runway.category, Category::AirportsAviation);
    assert_eq!(
        runway.external_url.as_deref(),
        Some("https://www.tenders.gov.au/Cn/Show/ATM2026-0451")
    );
    assert_eq!(runway.closing_date, Utc.with_ymd_and_hms(2026, 11, 30, 3, 0, 0).single());
    assert_eq!(runway.supplier_name, None);
}

#[tokio::test]
async fn unparseable_search_body_falls_back() {
    let http = ScriptedTransport::new(vec![
        ok_body("search", "<html><body>Search is offline</body></html>"),
        ok_body("published", notices_fixture()),
    ]);
    let adapter = NoticesAdapter::new(
        SourceIdentity::new("austender-notices", "AusTender"),
        notices_config(),
        http.clone(),
    );

    let batch = adapter.fetch(&ctx()).await.unwrap();
    assert!(batch.used_fallback);
    assert_eq!(batch.requests, 2);
    assert_eq!(http.calls().len(), 2);
}

#[tokio::test]
async fn transient_search_failure_does_not_fall_back() {
    let http = ScriptedTransport::new(vec![http_status("search", 503)]);
    let adapter = NoticesAdapter::new(
        SourceIdentity::new("austender-notices", "AusTender"),
        notices_config(),
        http.clone(),
    );

    let err = adapter.fetch(&ctx()).await.unwrap_err();
    assert!(matches!(err, AdapterError::Fetch(_)));
    assert_eq!(http.calls().len(), 1);
}
