use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Deserialize;
use tender_adapters::{
    AdapterError, BrowserPortalAdapter, ChromeLauncher, ContractsAdapter, ContractsConfig,
    NoticesAdapter, NoticesConfig, PortalConfig, Retention, RssConfig, RssFeedAdapter,
    SourceAdapter, SourceIdentity, Transport,
};
use tender_storage::HttpTransport;
use tokio::fs;

fn default_true() -> bool {
    true
}

fn default_priority() -> u32 {
    100
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceRegistry {
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub source_id: String,
    /// Label written to each record's `source` column.
    pub record_source: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_priority")]
    pub priority: u32,
    #[serde(default)]
    pub retention: Retention,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(flatten)]
    pub kind: SourceKind,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceKind {
    AustenderContracts(ContractsConfig),
    AustenderNotices(NoticesConfig),
    RssFeed(RssConfig),
    BrowserPortal(PortalConfig),
}

impl SourceKind {
    pub fn transport(&self) -> Transport {
        match self {
            SourceKind::AustenderContracts(_) | SourceKind::AustenderNotices(_) => {
                Transport::JsonApi
            }
            SourceKind::RssFeed(_) => Transport::Rss,
            SourceKind::BrowserPortal(_) => Transport::Browser,
        }
    }
}

impl SourceConfig {
    pub fn identity(&self) -> SourceIdentity {
        SourceIdentity::new(&self.source_id, &self.record_source).with_retention(self.retention)
    }
}

impl SourceRegistry {
    pub async fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        let registry: SourceRegistry = serde_yaml::from_str(text)?;
        let mut seen = std::collections::HashSet::new();
        for source in &registry.sources {
            if !seen.insert(source.source_id.as_str()) {
                anyhow::bail!("duplicate source_id `{}`", source.source_id);
            }
        }
        Ok(registry)
    }

    pub fn get(&self, source_id: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.source_id == source_id)
    }

    /// Enabled sources in ascending priority; ties keep file order.
    pub fn enabled_by_priority(&self) -> Vec<&SourceConfig> {
        let mut enabled: Vec<_> = self.sources.iter().filter(|s| s.enabled).collect();
        enabled.sort_by_key(|s| s.priority);
        enabled
    }
}

pub fn adapter_for_source(
    source: &SourceConfig,
    http: Arc<dyn HttpTransport>,
) -> Result<Arc<dyn SourceAdapter>, AdapterError> {
    let identity = source.identity();
    let adapter: Arc<dyn SourceAdapter> = match &source.kind {
        SourceKind::AustenderContracts(config) => {
            Arc::new(ContractsAdapter::new(identity, config.clone(), http))
        }
        SourceKind::AustenderNotices(config) => {
            Arc::new(NoticesAdapter::new(identity, config.clone(), http))
        }
        SourceKind::RssFeed(config) => Arc::new(RssFeedAdapter::new(identity, config.clone(), http)),
        SourceKind::BrowserPortal(config) => {
            let engines = Arc::new(ChromeLauncher::from_config(config));
            Arc::new(BrowserPortalAdapter::new(identity, config.clone(), engines)?)
        }
    };
    Ok(adapter)
}
