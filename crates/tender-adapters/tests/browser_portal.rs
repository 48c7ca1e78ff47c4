mod support;

use std::collections::HashMap;

use tender_adapters::{
    crawl_portal, with_render_engine, AdapterContext, AdapterError, BrowserPortalAdapter,
    PortalConfig, PortalSelectors, SourceAdapter, SourceIdentity,
};
use tender_core::{Category, TenderStatus};
use tender_storage::{SqliteTenderStore, TenderStore};

use support::{read_fixture, FakeEngines};

const SEARCH_URL: &str = "https://www.tenders.nsw.test/search?keyword=construction";

fn detail_url(id: &str) -> String {
    format!("https://www.tenders.nsw.test/tender/view?id=RFT-2026-{id}")
}

fn portal_config(max_detail_pages: usize) -> PortalConfig {
    PortalConfig {
        search_url: SEARCH_URL.to_string(),
        max_detail_pages,
        navigation_timeout_secs: 5,
        headless: true,
        sandbox: true,
        status: TenderStatus::Open,
        default_state: Some("NSW".to_string()),
        id_prefix: "NSW".to_string(),
        selectors: PortalSelectors {
            detail_link: "a.tender-link".to_string(),
            title: "h1".to_string(),
            description: Some(".description".to_string()),
            buyer: Some(".agency".to_string()),
            reference: Some(".rft-id".to_string()),
            closing_date: Some(".close-date".to_string()),
            value: Some(".estimate".to_string()),
            region: None,
            locality: Some(".location".to_string()),
        },
    }
}

fn all_pages() -> HashMap<String, String> {
    let mut pages = HashMap::new();
    pages.insert(SEARCH_URL.to_string(), read_fixture("nsw-etendering", "search.html"));
    for id in ["1001", "1002", "1003"] {
        pages.insert(
            detail_url(id),
            read_fixture("nsw-etendering", &format!("detail-{id}.html")),
        );
    }
    pages
}

fn portal_adapter(engines: std::sync::Arc<FakeEngines>, max_detail_pages: usize) -> BrowserPortalAdapter {
    BrowserPortalAdapter::new(
        SourceIdentity::new("nsw-etendering", "NSW eTendering"),
        portal_config(max_detail_pages),
        engines,
    )
    .unwrap()
}

#[tokio::test]
async fn crawl_persists_construction_detail_pages() {
    let engines = FakeEngines::new(all_pages());
    let store = SqliteTenderStore::connect("sqlite::memory:").await.unwrap();

    let stats = portal_adapter(engines.clone(), 10)
        .run(&AdapterContext::new(), &store)
        .await
        .unwrap();

    assert_eq!(stats.fetched, 3);
    assert_eq!(stats.persisted, 2);
    assert_eq!(stats.skipped_non_construction, 1);
    assert_eq!(engines.launched(), 1);
    assert_eq!(engines.released(), 1);

    let road = store.get("RFT-2026-1001").await.unwrap().unwrap();
    assert_eq!(road.category, Category::RoadsHighways);
    assert_eq!(road.buyer_name.as_deref(), Some("Transport for NSW"));
    assert_eq!(road.value_amount, Some(3_400_000.0));
    assert_eq!(road.state.as_deref(), Some("NSW"));
    assert_eq!(road.locality.as_deref(), Some("Granville"));
    assert_eq!(road.external_url.as_deref(), Some(detail_url("1001").as_str()));

    let hall = store.get("RFT-2026-1002").await.unwrap().unwrap();
    assert_eq!(hall.category, Category::SchoolsEducation);
    assert_eq!(hall.value_amount, None);
}

#[tokio::test]
async fn detail_page_limit_is_honoured() {
    let engines = FakeEngines::new(all_pages());
    let batch = portal_adapter(engines, 1)
        .fetch(&AdapterContext::new())
        .await
        .unwrap();
    assert_eq!(batch.requests, 2);
    assert_eq!(batch.records.len(), 1);
}

#[tokio::test]
async fn engine_is_released_when_search_page_fails() {
    let engines = FakeEngines::new(HashMap::new());

    let err = portal_adapter(engines.clone(), 10)
        .fetch(&AdapterContext::new())
        .await
        .unwrap_err();

    assert!(matches!(err, AdapterError::Render(_)));
    assert_eq!(engines.launched(), 1);
    assert_eq!(engines.released(), 1);
}

#[test]
fn failed_detail_pages_are_skipped_not_fatal() {
    let mut pages = all_pages();
    pages.remove(&detail_url("1002"));
    let engines = FakeEngines::new(pages);

    let batch = with_render_engine(engines.as_ref(), |engine| {
        crawl_portal("nsw-etendering", &portal_config(10), engine)
    })
    .unwrap();

    assert_eq!(batch.requests, 4);
    assert_eq!(batch.failed_requests, 1);
    assert_eq!(batch.records.len(), 2);
    assert_eq!(engines.released(), 1);
}

#[test]
fn engine_is_released_when_crawl_panics() {
    let engines = FakeEngines::new(all_pages());
    let factory = engines.clone();

    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        let _: Result<(), AdapterError> = with_render_engine(factory.as_ref(), |_engine| {
            panic!("extractor bug");
        });
    }));

    assert!(outcome.is_err());
    assert_eq!(engines.released(), 1);
}
