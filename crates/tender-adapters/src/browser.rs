//! Rendered-portal adapter. Search and detail pages are rendered by a
//! headless browser that lives for exactly one crawl.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use headless_chrome::browser::default_executable;
use headless_chrome::{Browser, LaunchOptions, Tab};
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use tender_core::{TenderDraft, TenderStatus};
use tender_storage::Url;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::extract::{parse_amount_text, parse_upstream_date, text_or_none};
use crate::{
    AdapterContext, AdapterError, FetchBatch, RecordError, Retention, SourceAdapter,
    SourceIdentity, Transport,
};

/// One rendered page at a time, blocking.
pub trait RenderEngine {
    fn render(&mut self, url: &str) -> Result<String, AdapterError>;
}

pub trait RenderEngineFactory: Send + Sync {
    fn launch(&self) -> Result<Box<dyn RenderEngine>, AdapterError>;
}

/// Launch an engine, hand it to `crawl`, and release it on every exit path.
/// Release happens in the engine's `Drop`, so a panic inside `crawl` also
/// tears the process down.
pub fn with_render_engine<T, F>(factory: &dyn RenderEngineFactory, crawl: F) -> Result<T, AdapterError>
where
    F: FnOnce(&mut dyn RenderEngine) -> Result<T, AdapterError>,
{
    let mut engine = factory.launch()?;
    let result = crawl(engine.as_mut());
    drop(engine);
    result
}

fn default_max_detail_pages() -> usize {
    10
}

fn default_navigation_timeout_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_status() -> TenderStatus {
    TenderStatus::Open
}

fn default_id_prefix() -> String {
    "PORTAL".to_string()
}

/// CSS selectors for the search and detail pages. Only the link and title
/// selectors are required.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortalSelectors {
    pub detail_link: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub buyer: Option<String>,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub closing_date: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub locality: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortalConfig {
    pub search_url: String,
    #[serde(default = "default_max_detail_pages")]
    pub max_detail_pages: usize,
    #[serde(default = "default_navigation_timeout_secs")]
    pub navigation_timeout_secs: u64,
    #[serde(default = "default_true")]
    pub headless: bool,
    #[serde(default = "default_true")]
    pub sandbox: bool,
    #[serde(default = "default_status")]
    pub status: TenderStatus,
    #[serde(default)]
    pub default_state: Option<String>,
    #[serde(default = "default_id_prefix")]
    pub id_prefix: String,
    pub selectors: PortalSelectors,
}

struct CompiledSelectors {
    detail_link: Selector,
    title: Selector,
    description: Option<Selector>,
    buyer: Option<Selector>,
    reference: Option<Selector>,
    closing_date: Option<Selector>,
    value: Option<Selector>,
    region: Option<Selector>,
    locality: Option<Selector>,
}

fn compile(selector: &str) -> Result<Selector, AdapterError> {
    Selector::parse(selector)
        .map_err(|e| AdapterError::Config(format!("bad selector `{selector}`: {e}")))
}

fn compile_opt(selector: &Option<String>) -> Result<Option<Selector>, AdapterError> {
    selector.as_deref().map(compile).transpose()
}

impl CompiledSelectors {
    fn compile(selectors: &PortalSelectors) -> Result<Self, AdapterError> {
        Ok(Self {
            detail_link: compile(&selectors.detail_link)?,
            title: compile(&selectors.title)?,
            description: compile_opt(&selectors.description)?,
            buyer: compile_opt(&selectors.buyer)?,
            reference: compile_opt(&selectors.reference)?,
            closing_date: compile_opt(&selectors.closing_date)?,
            value: compile_opt(&selectors.value)?,
            region: compile_opt(&selectors.region)?,
            locality: compile_opt(&selectors.locality)?,
        })
    }
}

fn element_text(element: ElementRef<'_>) -> Option<String> {
    let joined = element.text().collect::<Vec<_>>().join(" ");
    text_or_none(joined.split_whitespace().collect::<Vec<_>>().join(" "))
}

fn select_text(document: &Html, selector: Option<&Selector>) -> Option<String> {
    document.select(selector?).find_map(element_text)
}

/// Absolute, de-duplicated detail links in page order.
fn detail_links(document: &Html, base: &Url, selector: &Selector, limit: usize) -> Vec<String> {
    let mut links: Vec<String> = Vec::new();
    for href in document.select(selector).filter_map(|a| a.value().attr("href")) {
        if links.len() >= limit {
            break;
        }
        let Ok(resolved) = base.join(href.trim()) else {
            continue;
        };
        let resolved = resolved.to_string();
        if !links.contains(&resolved) {
            links.push(resolved);
        }
    }
    links
}

fn parse_detail_page(
    html: &str,
    page_url: &str,
    config: &PortalConfig,
    selectors: &CompiledSelectors,
) -> Result<TenderDraft, RecordError> {
    let document = Html::parse_document(html);
    let title = select_text(&document, Some(&selectors.title)).ok_or(RecordError::MissingField("title"))?;
    let reference = select_text(&document, selectors.reference.as_ref());
    let id = reference.clone().unwrap_or_else(|| {
        format!(
            "{}-{}",
            config.id_prefix,
            Uuid::new_v5(&Uuid::NAMESPACE_URL, page_url.as_bytes())
        )
    });

    let mut draft = TenderDraft::new(id, config.status);
    draft.title = title;
    draft.description = select_text(&document, selectors.description.as_ref()).unwrap_or_default();
    draft.buyer_name = select_text(&document, selectors.buyer.as_ref());
    if let Some(raw) = select_text(&document, selectors.closing_date.as_ref()) {
        draft.closing_date = parse_upstream_date("closing_date", &raw)?;
    }
    if let Some(raw) = select_text(&document, selectors.value.as_ref()) {
        draft.value_amount = parse_amount_text("value", &raw)?;
    }
    draft.state = select_text(&document, selectors.region.as_ref()).or_else(|| config.default_state.clone());
    draft.locality = select_text(&document, selectors.locality.as_ref());
    draft.external_reference_id = reference;
    draft.external_url = Some(page_url.to_string());
    Ok(draft)
}

/// Render the search page, then up to `max_detail_pages` detail pages. A
/// search-page failure fails the crawl; a detail-page failure is skipped.
pub fn crawl_portal(
    source_id: &str,
    config: &PortalConfig,
    engine: &mut dyn RenderEngine,
) -> Result<FetchBatch, AdapterError> {
    let selectors = CompiledSelectors::compile(&config.selectors)?;
    let base = Url::parse(&config.search_url)
        .map_err(|e| AdapterError::Config(format!("bad search_url `{}`: {e}", config.search_url)))?;

    let mut batch = FetchBatch {
        requests: 1,
        ..FetchBatch::default()
    };
    let search_html = engine.render(&config.search_url)?;
    let links = {
        let document = Html::parse_document(&search_html);
        detail_links(&document, &base, &selectors.detail_link, config.max_detail_pages)
    };
    debug!(source_id, links = links.len(), "portal search rendered");

    for link in links {
        batch.requests += 1;
        match engine.render(&link) {
            Ok(html) => batch.records.push(parse_detail_page(&html, &link, config, &selectors)),
            Err(err) => {
                warn!(source_id, url = %link, error = %err, "detail page render failed");
                batch.failed_requests += 1;
            }
        }
    }
    Ok(batch)
}

/// Launches a local Chrome/Chromium via `headless_chrome`.
#[derive(Debug, Clone)]
pub struct ChromeLauncher {
    pub headless: bool,
    pub sandbox: bool,
    pub navigation_timeout: Duration,
}

impl ChromeLauncher {
    pub fn from_config(config: &PortalConfig) -> Self {
        Self {
            headless: config.headless,
            sandbox: config.sandbox,
            navigation_timeout: Duration::from_secs(config.navigation_timeout_secs.max(1)),
        }
    }

    fn launch_chrome(&self) -> anyhow::Result<ChromeEngine> {
        let launch_options = LaunchOptions {
            headless: self.headless,
            sandbox: self.sandbox,
            path: default_executable().ok(),
            idle_browser_timeout: self.navigation_timeout * 4,
            ..Default::default()
        };
        let browser = Browser::new(launch_options)
            .context("failed to launch Chrome; is a Chrome or Chromium binary installed?")?;
        let tab = browser.new_tab().context("failed to open browser tab")?;
        tab.set_default_timeout(self.navigation_timeout);
        Ok(ChromeEngine {
            _browser: browser,
            tab,
        })
    }
}

impl RenderEngineFactory for ChromeLauncher {
    fn launch(&self) -> Result<Box<dyn RenderEngine>, AdapterError> {
        let engine = self
            .launch_chrome()
            .map_err(|e| AdapterError::Render(format!("{e:#}")))?;
        info!(headless = self.headless, "render engine launched");
        Ok(Box::new(engine))
    }
}

struct ChromeEngine {
    // Dropping the browser kills the process.
    _browser: Browser,
    tab: Arc<Tab>,
}

impl ChromeEngine {
    fn render_page(&self, url: &str) -> anyhow::Result<String> {
        self.tab
            .navigate_to(url)
            .with_context(|| format!("navigating to {url}"))?
            .wait_until_navigated()
            .with_context(|| format!("waiting for {url}"))?;
        self.tab.get_content().context("reading rendered page")
    }
}

impl RenderEngine for ChromeEngine {
    fn render(&mut self, url: &str) -> Result<String, AdapterError> {
        self.render_page(url)
            .map_err(|e| AdapterError::Render(format!("{e:#}")))
    }
}

impl Drop for ChromeEngine {
    fn drop(&mut self) {
        if let Err(err) = self.tab.close(false) {
            debug!(error = %err, "closing render tab failed");
        }
        debug!("render engine released");
    }
}

pub struct BrowserPortalAdapter {
    identity: SourceIdentity,
    config: Arc<PortalConfig>,
    engines: Arc<dyn RenderEngineFactory>,
}

impl BrowserPortalAdapter {
    /// Validates selectors and the search URL up front.
    pub fn new(
        identity: SourceIdentity,
        config: PortalConfig,
        engines: Arc<dyn RenderEngineFactory>,
    ) -> Result<Self, AdapterError> {
        CompiledSelectors::compile(&config.selectors)?;
        Url::parse(&config.search_url)
            .map_err(|e| AdapterError::Config(format!("bad search_url `{}`: {e}", config.search_url)))?;
        Ok(Self {
            identity,
            config: Arc::new(config),
            engines,
        })
    }
}

#[async_trait]
impl SourceAdapter for BrowserPortalAdapter {
    fn source_id(&self) -> &str {
        &self.identity.source_id
    }

    fn record_source(&self) -> &str {
        &self.identity.record_source
    }

    fn transport(&self) -> Transport {
        Transport::Browser
    }

    fn retention(&self) -> Retention {
        self.identity.retention
    }

    async fn fetch(&self, _ctx: &AdapterContext) -> Result<FetchBatch, AdapterError> {
        let source_id = self.identity.source_id.clone();
        let config = Arc::clone(&self.config);
        let engines = Arc::clone(&self.engines);

        tokio::task::spawn_blocking(move || {
            with_render_engine(engines.as_ref(), |engine| {
                crawl_portal(&source_id, &config, engine)
            })
        })
        .await
        .map_err(|e| AdapterError::TaskFailed(e.to_string()))?
    }
}
