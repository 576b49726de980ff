#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use bytes::Bytes;
use serde_json::Value;
use shelfcache::application::strategy::Served;
use shelfcache::application::upstream::{FetchError, ProxyRequest, Upstream};
use shelfcache::application::worker::{Worker, WorkerConfig};
use shelfcache::cache::{CacheConfig, CacheStore, CachedResponse, MemoryStore};
use tokio::sync::watch;

/// Scriptable in-process upstream.
///
/// Targets without a scripted response answer 404. While held, every fetch
/// blocks until [`FakeUpstream::release`].
pub struct FakeUpstream {
    online: AtomicBool,
    responses: Mutex<HashMap<String, CachedResponse>>,
    hits: Mutex<HashMap<String, usize>>,
    gate: watch::Sender<bool>,
}

impl FakeUpstream {
    pub fn new() -> Arc<Self> {
        let (gate, _) = watch::channel(true);
        Arc::new(Self {
            online: AtomicBool::new(true),
            responses: Mutex::new(HashMap::new()),
            hits: Mutex::new(HashMap::new()),
            gate,
        })
    }

    pub fn respond(&self, target: &str, status: StatusCode, content_type: &str, body: &str) {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_str(content_type).expect("valid content type"),
        );
        let response = CachedResponse::new(status, &headers, Bytes::from(body.to_string()));
        self.responses
            .lock()
            .expect("responses lock")
            .insert(target.to_string(), response);
    }

    pub fn respond_text(&self, target: &str, body: &str) {
        self.respond(target, StatusCode::OK, "text/plain", body);
    }

    pub fn respond_json(&self, target: &str, body: &Value) {
        self.respond(target, StatusCode::OK, "application/json", &body.to_string());
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn hold(&self) {
        self.gate.send_replace(false);
    }

    pub fn release(&self) {
        self.gate.send_replace(true);
    }

    pub fn hits(&self, target: &str) -> usize {
        self.hits
            .lock()
            .expect("hits lock")
            .get(target)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_hits(&self) -> usize {
        self.hits.lock().expect("hits lock").values().sum()
    }
}

#[async_trait]
impl Upstream for FakeUpstream {
    async fn fetch(&self, request: &ProxyRequest) -> Result<CachedResponse, FetchError> {
        let target = request.key().target().to_string();
        *self
            .hits
            .lock()
            .expect("hits lock")
            .entry(target.clone())
            .or_default() += 1;

        let mut gate = self.gate.subscribe();
        let _ = gate.wait_for(|open| *open).await;

        if !self.online.load(Ordering::SeqCst) {
            return Err(FetchError::Unreachable("fake upstream offline".to_string()));
        }

        let scripted = self
            .responses
            .lock()
            .expect("responses lock")
            .get(&target)
            .cloned();
        Ok(scripted.unwrap_or_else(|| {
            CachedResponse::new(
                StatusCode::NOT_FOUND,
                &HeaderMap::new(),
                Bytes::from_static(b"not found"),
            )
        }))
    }
}

/// Worker configuration with nothing to precache.
pub fn bare_config() -> WorkerConfig {
    WorkerConfig {
        cache: CacheConfig {
            precache: Vec::new(),
            ..CacheConfig::default()
        },
        ..WorkerConfig::default()
    }
}

pub async fn activated_worker_with(
    config: WorkerConfig,
    upstream: Arc<FakeUpstream>,
    store: Arc<dyn CacheStore>,
) -> Worker {
    let worker = Worker::new(config, store, upstream);
    worker.install().await.expect("install succeeds");
    worker.activate().await.expect("activate succeeds");
    worker
}

pub async fn activated_worker(upstream: Arc<FakeUpstream>) -> (Worker, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let worker = activated_worker_with(bare_config(), upstream, store.clone()).await;
    (worker, store)
}

pub fn get(target: &str) -> ProxyRequest {
    ProxyRequest::get(target).expect("valid target")
}

pub fn body_text(served: &Served) -> String {
    String::from_utf8(served.response.body.to_vec()).expect("utf-8 body")
}

pub fn body_json(served: &Served) -> Value {
    serde_json::from_slice(&served.response.body).expect("json body")
}
