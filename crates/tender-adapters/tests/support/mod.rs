#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tender_adapters::{AdapterError, RenderEngine, RenderEngineFactory};
use tender_storage::{FetchError, FetchedResponse, HttpTransport, StatusCode};

pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../..")
        .canonicalize()
        .expect("workspace root")
}

pub fn read_fixture(source_id: &str, file: &str) -> String {
    let path = workspace_root().join("fixtures").join(source_id).join(file);
    std::fs::read_to_string(&path).unwrap_or_else(|e| panic!("reading {}: {e}", path.display()))
}

pub fn ok_body(url: &str, body: impl Into<Vec<u8>>) -> Result<FetchedResponse, FetchError> {
    Ok(FetchedResponse {
        status: StatusCode::OK,
        final_url: url.to_string(),
        content_type: None,
        body: body.into(),
    })
}

pub fn http_status(url: &str, status: u16) -> Result<FetchedResponse, FetchError> {
    Err(FetchError::HttpStatus {
        status,
        url: url.to_string(),
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub method: &'static str,
    pub url: String,
}

/// Replays queued responses in order and records every request.
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<Result<FetchedResponse, FetchError>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedTransport {
    pub fn new(responses: Vec<Result<FetchedResponse, FetchError>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    fn next(&self, method: &'static str, url: &str) -> Result<FetchedResponse, FetchError> {
        self.calls.lock().unwrap().push(RecordedCall {
            method,
            url: url.to_string(),
        });
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| panic!("unexpected {method} {url}"))
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn get(&self, _source_id: &str, url: &str) -> Result<FetchedResponse, FetchError> {
        self.next("GET", url)
    }

    async fn post_json(
        &self,
        _source_id: &str,
        url: &str,
        _body: &serde_json::Value,
    ) -> Result<FetchedResponse, FetchError> {
        self.next("POST", url)
    }
}

/// Serves canned HTML per URL. Counts launches and releases.
pub struct FakeEngines {
    pages: HashMap<String, String>,
    pub launched: Arc<AtomicUsize>,
    pub released: Arc<AtomicUsize>,
}

impl FakeEngines {
    pub fn new(pages: HashMap<String, String>) -> Arc<Self> {
        Arc::new(Self {
            pages,
            launched: Arc::new(AtomicUsize::new(0)),
            released: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn launched(&self) -> usize {
        self.launched.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

struct FakeEngine {
    pages: HashMap<String, String>,
    released: Arc<AtomicUsize>,
}

impl RenderEngine for FakeEngine {
    fn render(&mut self, url: &str) -> Result<String, AdapterError> {
        self.pages
            .get(url)
            .cloned()
            .ok_or_else(|| AdapterError::Render(format!("navigation to {url} timed out")))
    }
}

impl Drop for FakeEngine {
    fn drop(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

impl RenderEngineFactory for FakeEngines {
    fn launch(&self) -> Result<Box<dyn RenderEngine>, AdapterError> {
        self.launched.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeEngine {
            pages: self.pages.clone(),
            released: Arc::clone(&self.released),
        }))
    }
}
