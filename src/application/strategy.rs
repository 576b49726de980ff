//! The three caching algorithms and the synthesized offline response.
//!
//! - **cache first** (chapter content): serve the stored copy, refresh it in
//!   the background.
//! - **network first** (API): always ask upstream, fall back to any cached
//!   copy only when the network is gone.
//! - **stale while revalidate** (static assets): serve whatever is cached,
//!   refresh in the background, fetch inline only on a miss.
//!
//! Every function here yields a response. Store failures degrade to a miss or
//! a dropped write; transport failures degrade to a 503 envelope.

use std::sync::Arc;
use std::time::Instant;

use axum::http::StatusCode;
use bytes::Bytes;
use metrics::{counter, histogram};
use serde_json::Value;
use tracing::{debug, warn};

use crate::cache::{CacheStore, CachedResponse, NamespaceName, RequestKey};
use crate::domain::envelope::Envelope;

use super::background::Background;
use super::upstream::{ProxyRequest, Upstream};

pub const CHAPTER_OFFLINE_MESSAGE: &str = "chapter content unavailable offline";
pub const API_OFFLINE_MESSAGE: &str = "network unavailable";
pub const STATIC_OFFLINE_MESSAGE: &str = "offline";

/// Where a served response came from; surfaced as `x-shelfcache-source`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Cache,
    Network,
    Offline,
    Passthrough,
}

impl ResponseSource {
    pub fn as_str(self) -> &'static str {
        match self {
            ResponseSource::Cache => "cache",
            ResponseSource::Network => "network",
            ResponseSource::Offline => "offline",
            ResponseSource::Passthrough => "passthrough",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Served {
    pub response: CachedResponse,
    pub source: ResponseSource,
}

impl Served {
    fn cache(response: CachedResponse) -> Self {
        Self {
            response,
            source: ResponseSource::Cache,
        }
    }

    fn network(response: CachedResponse) -> Self {
        Self {
            response,
            source: ResponseSource::Network,
        }
    }
}

/// Shared collaborators of every strategy.
#[derive(Clone)]
pub struct StrategyContext {
    pub store: Arc<dyn CacheStore>,
    pub upstream: Arc<dyn Upstream>,
    pub background: Background,
    /// Bodies above this size are served but not stored.
    pub max_body_bytes: usize,
}

/// Cache-first with background revalidation.
pub async fn cache_first_revalidate(
    ctx: &StrategyContext,
    namespace: &NamespaceName,
    request: &ProxyRequest,
) -> Served {
    let key = request.key();

    if let Some(cached) = lookup(ctx, namespace, &key).await {
        record("cache_first", ResponseSource::Cache);
        spawn_revalidation(ctx, namespace, request, "chapter");
        return Served::cache(cached);
    }

    match ctx.upstream.fetch(request).await {
        Ok(fresh) => {
            if fresh.is_ok() {
                store_fresh(ctx, namespace, &key, fresh.clone()).await;
            } else {
                debug!(%key, status = %fresh.status, "Chapter response not ok; not cached");
            }
            record("cache_first", ResponseSource::Network);
            Served::network(fresh)
        }
        Err(err) => {
            debug!(%key, error = %err, "Chapter miss while offline");
            record("cache_first", ResponseSource::Offline);
            offline_response(CHAPTER_OFFLINE_MESSAGE)
        }
    }
}

/// Network-first with cache fallback. Upstream responses are never stored.
///
/// `fallback` is searched in order on transport failure.
pub async fn network_first(
    ctx: &StrategyContext,
    fallback: &[&NamespaceName],
    request: &ProxyRequest,
) -> Served {
    let err = match ctx.upstream.fetch(request).await {
        Ok(response) => {
            record("network_first", ResponseSource::Network);
            return Served::network(response);
        }
        Err(err) => err,
    };

    let key = request.key();
    for namespace in fallback {
        if let Some(cached) = lookup(ctx, namespace, &key).await {
            debug!(%key, namespace = %namespace, error = %err, "Network failed; served cached copy");
            record("network_first", ResponseSource::Cache);
            return Served::cache(cached);
        }
    }

    debug!(%key, error = %err, "Network failed and nothing cached");
    record("network_first", ResponseSource::Offline);
    offline_response(API_OFFLINE_MESSAGE)
}

/// Stale-while-revalidate.
pub async fn stale_while_revalidate(
    ctx: &StrategyContext,
    namespace: &NamespaceName,
    request: &ProxyRequest,
) -> Served {
    let key = request.key();

    if let Some(cached) = lookup(ctx, namespace, &key).await {
        record("stale_while_revalidate", ResponseSource::Cache);
        spawn_revalidation(ctx, namespace, request, "static");
        return Served::cache(cached);
    }

    match ctx.upstream.fetch(request).await {
        Ok(fresh) => {
            if fresh.is_ok() && key.is_cacheable() {
                let task_ctx = ctx.clone();
                let namespace = namespace.clone();
                let snapshot = fresh.clone();
                ctx.background.detach("static_write", async move {
                    store_fresh(&task_ctx, &namespace, &key, snapshot).await;
                });
            }
            record("stale_while_revalidate", ResponseSource::Network);
            Served::network(fresh)
        }
        Err(err) => {
            debug!(%key, error = %err, "Static miss while offline");
            record("stale_while_revalidate", ResponseSource::Offline);
            offline_response(STATIC_OFFLINE_MESSAGE)
        }
    }
}

/// Straight to the network, no cache involved. Used before clients are claimed.
pub async fn passthrough(
    ctx: &StrategyContext,
    request: &ProxyRequest,
    offline_message: &str,
) -> Served {
    match ctx.upstream.fetch(request).await {
        Ok(response) => {
            record("passthrough", ResponseSource::Passthrough);
            Served {
                response,
                source: ResponseSource::Passthrough,
            }
        }
        Err(err) => {
            debug!(key = %request.key(), error = %err, "Passthrough fetch failed");
            record("passthrough", ResponseSource::Offline);
            offline_response(offline_message)
        }
    }
}

/// 503 with a JSON failure envelope.
pub fn offline_response(message: &str) -> Served {
    let body = match Envelope::<Value>::failure(message).to_bytes() {
        Ok(body) => body,
        Err(err) => {
            warn!(error = %err, "Failed to encode offline envelope");
            Bytes::from_static(br#"{"isSuccess":false}"#)
        }
    };

    Served {
        response: CachedResponse::json(StatusCode::SERVICE_UNAVAILABLE, body),
        source: ResponseSource::Offline,
    }
}

async fn lookup(
    ctx: &StrategyContext,
    namespace: &NamespaceName,
    key: &RequestKey,
) -> Option<CachedResponse> {
    match ctx.store.lookup(namespace, key).await {
        Ok(found) => found,
        Err(err) => {
            warn!(%key, namespace = %namespace, error = %err, "Cache lookup failed; treating as miss");
            None
        }
    }
}

/// Write an ok response, skipping uncacheable methods and oversized bodies.
async fn store_fresh(
    ctx: &StrategyContext,
    namespace: &NamespaceName,
    key: &RequestKey,
    response: CachedResponse,
) {
    if !key.is_cacheable() || !response.is_ok() {
        return;
    }
    if response.body.len() > ctx.max_body_bytes {
        debug!(%key, size = response.body.len(), limit = ctx.max_body_bytes, "Response too large to cache");
        return;
    }
    if let Err(err) = ctx.store.put(namespace, key, response).await {
        warn!(%key, namespace = %namespace, error = %err, "Cache write dropped");
    }
}

fn spawn_revalidation(
    ctx: &StrategyContext,
    namespace: &NamespaceName,
    request: &ProxyRequest,
    label: &'static str,
) {
    if !request.key().is_cacheable() {
        return;
    }

    let task_ctx = ctx.clone();
    let namespace = namespace.clone();
    let request = request.clone();
    ctx.background.revalidate(label, async move {
        revalidate(&task_ctx, &namespace, &request, label).await;
    });
}

async fn revalidate(
    ctx: &StrategyContext,
    namespace: &NamespaceName,
    request: &ProxyRequest,
    label: &'static str,
) {
    let key = request.key();
    let started = Instant::now();
    let outcome = match ctx.upstream.fetch(request).await {
        Ok(fresh) if fresh.is_ok() => {
            store_fresh(ctx, namespace, &key, fresh).await;
            "refreshed"
        }
        Ok(fresh) => {
            debug!(%key, status = %fresh.status, "Revalidation returned non-ok; entry kept");
            "not_ok"
        }
        Err(err) => {
            debug!(%key, error = %err, "Revalidation failed; entry kept");
            "failed"
        }
    };

    counter!("shelfcache_revalidate_total", "task" => label, "outcome" => outcome).increment(1);
    histogram!("shelfcache_revalidate_ms", "task" => label)
        .record(started.elapsed().as_secs_f64() * 1000.0);
}

fn record(strategy: &'static str, source: ResponseSource) {
    counter!(
        "shelfcache_requests_total",
        "strategy" => strategy,
        "source" => source.as_str()
    )
    .increment(1);
}
