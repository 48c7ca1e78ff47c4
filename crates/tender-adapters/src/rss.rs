//! Category RSS feed adapter. Items are pulled out with regexes rather than
//! a full XML parse; upstream feeds wrap text in CDATA and are not always
//! well-formed.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tender_core::{TenderDraft, TenderStatus};
use tender_storage::HttpTransport;
use uuid::Uuid;

use crate::extract::{parse_amount_text, parse_upstream_date, text_or_none};
use crate::{
    AdapterContext, AdapterError, FetchBatch, RecordError, Retention, SourceAdapter,
    SourceIdentity, Transport,
};

static ITEM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<item\b[^>]*>(.*?)</item>").expect("item pattern is valid"));
// Document element after the prolog, comments and doctype.
static FEED_ROOT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)^\s*(?:<\?xml[^>]*\?>\s*)?(?:(?:<!--.*?-->|<!DOCTYPE[^>]*>|<\?[^>]*\?>)\s*)*<(?:rss|rdf:RDF)\b")
        .expect("root pattern is valid")
});
static NUMERIC_ENTITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"&#(?:[xX]([0-9a-fA-F]{1,6})|([0-9]{1,7}));").expect("entity pattern is valid")
});
static NOTICE_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"CN\d+").expect("notice id pattern is valid"));
static CLOSING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)closing[:\s]+(\d{1,2}[/\-]\d{1,2}[/\-]\d{2,4})").expect("closing pattern is valid")
});
static VALUE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$([0-9][0-9,]*)").expect("value pattern is valid"));
static STATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(NSW|VIC|QLD|SA|WA|TAS|ACT|NT)\b").expect("state pattern is valid")
});

fn element_pattern(tag: &str) -> Regex {
    let pattern = format!(r"(?is)<{tag}\b[^>]*>\s*(?:<!\[CDATA\[(.*?)\]\]>|(.*?))\s*</{tag}>");
    Regex::new(&pattern).expect("element pattern is valid")
}

static TITLE: LazyLock<Regex> = LazyLock::new(|| element_pattern("title"));
static LINK: LazyLock<Regex> = LazyLock::new(|| element_pattern("link"));
static DESCRIPTION: LazyLock<Regex> = LazyLock::new(|| element_pattern("description"));
static PUB_DATE: LazyLock<Regex> = LazyLock::new(|| element_pattern("pubDate"));

fn default_buyer_name() -> Option<String> {
    Some("Australian Government".to_string())
}

fn default_status() -> TenderStatus {
    TenderStatus::Open
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RssConfig {
    pub feed_url: String,
    #[serde(default = "default_buyer_name")]
    pub buyer_name: Option<String>,
    #[serde(default = "default_status")]
    pub status: TenderStatus,
}

impl RssConfig {
    pub fn new(feed_url: impl Into<String>) -> Self {
        Self {
            feed_url: feed_url.into(),
            buyer_name: default_buyer_name(),
            status: default_status(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedItem {
    pub title: Option<String>,
    pub link: Option<String>,
    pub description: String,
    pub pub_date: Option<String>,
}

fn decode_entities(text: &str) -> String {
    let numeric = NUMERIC_ENTITY.replace_all(text, |caps: &regex::Captures<'_>| {
        let code = match (caps.get(1), caps.get(2)) {
            (Some(hex), _) => u32::from_str_radix(hex.as_str(), 16).ok(),
            (_, Some(dec)) => dec.as_str().parse::<u32>().ok(),
            _ => None,
        };
        code.and_then(char::from_u32)
            .map(String::from)
            .unwrap_or_else(|| caps[0].to_string())
    });
    numeric
        .replace("&nbsp;", "\u{a0}")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

fn element_text(pattern: &Regex, item: &str) -> Option<String> {
    let caps = pattern.captures(item)?;
    if let Some(cdata) = caps.get(1) {
        return text_or_none(cdata.as_str());
    }
    caps.get(2)
        .and_then(|plain| text_or_none(decode_entities(plain.as_str())))
}

/// Split a feed body into raw items. A body whose document element is not
/// `<rss>` or `<rdf:RDF>` is a structural failure; Atom is not supported.
pub fn parse_feed(url: &str, body: &str) -> Result<Vec<FeedItem>, AdapterError> {
    if !FEED_ROOT.is_match(body.trim_start_matches('\u{feff}')) {
        return Err(AdapterError::structural(url, "document element is not <rss> or <rdf:RDF>"));
    }
    Ok(ITEM
        .captures_iter(body)
        .filter_map(|caps| caps.get(1))
        .map(|inner| {
            let item = inner.as_str();
            FeedItem {
                title: element_text(&TITLE, item),
                link: element_text(&LINK, item),
                description: element_text(&DESCRIPTION, item).unwrap_or_default(),
                pub_date: element_text(&PUB_DATE, item),
            }
        })
        .collect())
}

pub fn feed_item_to_draft(item: &FeedItem, config: &RssConfig) -> Result<TenderDraft, RecordError> {
    let title = item.title.clone().ok_or(RecordError::MissingField("title"))?;
    let link = item.link.clone().ok_or(RecordError::MissingField("link"))?;

    let notice_id = NOTICE_ID.find(&link).map(|m| m.as_str().to_string());
    let id = notice_id.clone().unwrap_or_else(|| {
        format!("RSS-{}", Uuid::new_v5(&Uuid::NAMESPACE_URL, link.as_bytes()))
    });

    let mut draft = TenderDraft::new(id, config.status);
    draft.title = title;
    draft.description = item.description.clone();
    draft.buyer_name = config.buyer_name.clone();
    draft.value_currency = Some(tender_core::DEFAULT_CURRENCY.to_string());

    if let Some(caps) = CLOSING.captures(&item.description) {
        draft.closing_date = parse_upstream_date("closing_date", &caps[1])?;
    }
    if let Some(caps) = VALUE.captures(&item.description) {
        draft.value_amount = parse_amount_text("value", &caps[1])?;
    }
    draft.state = STATE
        .captures(&item.description)
        .map(|caps| caps[1].to_string());
    if config.status == TenderStatus::Awarded {
        if let Some(raw) = item.pub_date.as_deref() {
            draft.date_signed = parse_upstream_date("pubDate", raw)?;
        }
    }

    draft.external_reference_id = notice_id;
    draft.external_url = Some(link);
    Ok(draft)
}

pub struct RssFeedAdapter {
    identity: SourceIdentity,
    config: RssConfig,
    http: Arc<dyn HttpTransport>,
}

impl RssFeedAdapter {
    pub fn new(identity: SourceIdentity, config: RssConfig, http: Arc<dyn HttpTransport>) -> Self {
        Self {
            identity,
            config,
            http,
        }
    }
}

#[async_trait]
impl SourceAdapter for RssFeedAdapter {
    fn source_id(&self) -> &str {
        &self.identity.source_id
    }

    fn record_source(&self) -> &str {
        &self.identity.record_source
    }

    fn transport(&self) -> Transport {
        Transport::Rss
    }

    fn retention(&self) -> Retention {
        self.identity.retention
    }

    async fn fetch(&self, _ctx: &AdapterContext) -> Result<FetchBatch, AdapterError> {
        let response = self
            .http
            .get(self.source_id(), &self.config.feed_url)
            .await?;
        let items = parse_feed(&self.config.feed_url, &response.text())?;
        tracing::debug!(source_id = self.source_id(), items = items.len(), "feed parsed");

        let mut batch = FetchBatch {
            requests: 1,
            ..FetchBatch::default()
        };
        batch.extend_records(items.iter().map(|item| feed_item_to_draft(item, &self.config)));
        Ok(batch)
    }
}
