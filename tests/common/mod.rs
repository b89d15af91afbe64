// tests/common/mod.rs
//
// Scripted upstream sources and a recording broker shared by the run tests.
#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;

use movie_harvester::config::{RunConfig, SourceKind, SourceSpec};
use movie_harvester::error::{PublishError, UpstreamError};
use movie_harvester::extract::publisher::message_key;
use movie_harvester::extract::{
    Broker, BrokerMessage, Envelope, Publisher, RawPage, RawRecord, RunController, SourceClient,
    SourceClients,
};

/// Upstream that serves fixed pages and replays scripted failures.
pub struct ScriptedSource {
    name: String,
    pages: Vec<usize>,
    report_total: bool,
    failures: Mutex<HashMap<u32, VecDeque<UpstreamError>>>,
    delay: Duration,
    pub fetched: Mutex<Vec<u32>>,
}

impl ScriptedSource {
    /// `pages[i]` is the record count of page `i + 1`; the last entry is the last page.
    pub fn new(name: &str, pages: Vec<usize>) -> Self {
        Self {
            name: name.to_string(),
            pages,
            report_total: false,
            failures: Mutex::new(HashMap::new()),
            delay: Duration::ZERO,
            fetched: Mutex::new(Vec::new()),
        }
    }

    /// A source that never ends within the page quota.
    pub fn endless(name: &str, per_page: usize) -> Self {
        Self::new(name, vec![per_page; 10_000])
    }

    pub fn with_total(mut self) -> Self {
        self.report_total = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Queue errors returned by `page` before it succeeds.
    pub fn fail(self, page: u32, errors: Vec<UpstreamError>) -> Self {
        self.failures.lock().insert(page, errors.into());
        self
    }

    pub fn fetch_log(&self) -> Vec<u32> {
        self.fetched.lock().clone()
    }
}

pub fn record(source: &str, page: u32, index: usize) -> RawRecord {
    json!({ "title": format!("{source}-{page}-{index}"), "page": page, "index": index })
        .as_object()
        .cloned()
        .unwrap()
}

#[async_trait]
impl SourceClient for ScriptedSource {
    async fn fetch_page(&self, page_number: u32) -> Result<RawPage, UpstreamError> {
        self.fetched.lock().push(page_number);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(q) = self.failures.lock().get_mut(&page_number) {
            if let Some(e) = q.pop_front() {
                return Err(e);
            }
        }
        let total = self.pages.len() as u32;
        let count = self
            .pages
            .get(page_number as usize - 1)
            .copied()
            .unwrap_or(0);
        Ok(RawPage {
            source_name: self.name.clone(),
            page_number,
            records: (0..count).map(|i| record(&self.name, page_number, i)).collect(),
            is_last_page: page_number >= total,
            total_pages: self.report_total.then_some(total),
        })
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Broker that keeps every message it accepted and rejects chosen records.
#[derive(Default)]
pub struct RecordingBroker {
    pub sent: Mutex<Vec<BrokerMessage>>,
    rejected_keys: Mutex<HashSet<String>>,
}

impl RecordingBroker {
    /// Reject the record at `index` of `page` of `source`.
    pub fn reject(&self, source: &str, page: u32, index: usize) {
        self.rejected_keys
            .lock()
            .insert(message_key(source, page, index));
    }

    pub fn envelopes(&self) -> Vec<Envelope> {
        self.sent
            .lock()
            .iter()
            .map(|m| serde_json::from_slice(&m.payload).expect("envelope json"))
            .collect()
    }

    pub fn count_for(&self, source: &str) -> usize {
        self.envelopes()
            .iter()
            .filter(|e| e.source_name == source)
            .count()
    }
}

#[async_trait]
impl Broker for RecordingBroker {
    async fn send(&self, message: &BrokerMessage) -> Result<(), PublishError> {
        if self.rejected_keys.lock().contains(&message.key) {
            return Err(PublishError::Rejected("message too large".into()));
        }
        self.sent.lock().push(message.clone());
        Ok(())
    }

    async fn reconnect(&self) -> Result<(), PublishError> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

/// Upstream whose client crashes on every fetch.
pub struct PanickingSource(pub String);

#[async_trait]
impl SourceClient for PanickingSource {
    async fn fetch_page(&self, page_number: u32) -> Result<RawPage, UpstreamError> {
        panic!("client bug while fetching page {page_number}");
    }

    fn name(&self) -> &str {
        &self.0
    }
}

pub fn spec(name: &str) -> SourceSpec {
    SourceSpec {
        name: name.to_string(),
        kind: SourceKind::Tmdb,
        base_url: format!("http://localhost/{name}"),
        auth_headers: BTreeMap::new(),
        query: BTreeMap::new(),
        topic: None,
    }
}

/// Small config with fast retries.
pub fn config(names: &[&str], max_pages: u32, max_messages: u64, workers: u32) -> RunConfig {
    let mut cfg = RunConfig::with_sources(names.iter().map(|n| spec(n)).collect());
    cfg.max_pages_per_source = max_pages;
    cfg.max_messages = max_messages;
    cfg.worker_count = workers;
    cfg.page_per_scan = 1;
    cfg.retry_backoff_ms = 5;
    cfg.extract_interval_secs = 1;
    cfg
}

pub fn controller(
    cfg: RunConfig,
    sources: Vec<Arc<ScriptedSource>>,
) -> (Arc<RunController>, Arc<RecordingBroker>) {
    let broker = Arc::new(RecordingBroker::default());
    let clients = sources
        .into_iter()
        .map(|s| s as Arc<dyn SourceClient>)
        .collect();
    (controller_with(cfg, clients, broker.clone()), broker)
}

pub fn controller_with(
    cfg: RunConfig,
    clients: Vec<Arc<dyn SourceClient>>,
    broker: Arc<RecordingBroker>,
) -> Arc<RunController> {
    let publisher = Publisher::from_config(&cfg, broker);
    let mut map = SourceClients::new();
    for c in clients {
        map.insert(c.name().to_string(), c);
    }
    Arc::new(RunController::new(cfg, map, publisher).expect("controller"))
}
