//! Event dispatch: the single entry point that ties classifier, strategies,
//! lifecycle and side channel together.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::debug;

use crate::cache::{CacheConfig, CacheStore, NamespaceName, Namespaces};
use crate::config::Settings;
use crate::domain::classify::{ClassifierRules, RequestClass};

use super::background::{Background, DEFAULT_MAX_IN_FLIGHT, DEFAULT_TASK_TIMEOUT};
use super::control::{ControlChannel, ControlOutcome};
use super::error::AppError;
use super::lifecycle::{InstallOutcome, Lifecycle, LifecycleError};
use super::strategy::{
    self, API_OFFLINE_MESSAGE, CHAPTER_OFFLINE_MESSAGE, STATIC_OFFLINE_MESSAGE, Served,
    StrategyContext,
};
use super::upstream::{ProxyRequest, Upstream};

#[derive(Debug)]
pub enum ProxyEvent {
    Install,
    Activate,
    Fetch(ProxyRequest),
    Message(Bytes),
}

#[derive(Debug)]
pub enum EventOutcome {
    Installed(InstallOutcome),
    Activated { pruned: Vec<NamespaceName> },
    Response(Served),
    Acknowledged(ControlOutcome),
    Failed(AppError),
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub rules: ClassifierRules,
    pub cache: CacheConfig,
    pub max_in_flight: usize,
    pub task_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            rules: ClassifierRules::default(),
            cache: CacheConfig::default(),
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            task_timeout: DEFAULT_TASK_TIMEOUT,
        }
    }
}

impl From<&Settings> for WorkerConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            rules: ClassifierRules {
                chapter_marker: settings.routing.chapter_marker.clone(),
                api_prefixes: settings.routing.api_prefixes.clone(),
            },
            cache: CacheConfig::from(&settings.cache),
            max_in_flight: settings.revalidation.max_in_flight.get(),
            task_timeout: settings.revalidation.timeout,
        }
    }
}

struct WorkerInner {
    rules: ClassifierRules,
    namespaces: Namespaces,
    strategies: StrategyContext,
    lifecycle: Lifecycle,
    control: ControlChannel,
}

/// Cheap to clone; every clone drives the same proxy.
#[derive(Clone)]
pub struct Worker {
    inner: Arc<WorkerInner>,
}

impl Worker {
    pub fn new(
        config: WorkerConfig,
        store: Arc<dyn CacheStore>,
        upstream: Arc<dyn Upstream>,
    ) -> Self {
        let namespaces = config.cache.namespaces.clone();
        let strategies = StrategyContext {
            store: Arc::clone(&store),
            upstream: Arc::clone(&upstream),
            background: Background::new(config.max_in_flight, config.task_timeout),
            max_body_bytes: config.cache.max_body_bytes,
        };
        let lifecycle = Lifecycle::new(
            Arc::clone(&store),
            upstream,
            namespaces.clone(),
            config.cache.precache.clone(),
        );
        let control = ControlChannel::new(store, namespaces.chapters().clone());

        Self {
            inner: Arc::new(WorkerInner {
                rules: config.rules,
                namespaces,
                strategies,
                lifecycle,
                control,
            }),
        }
    }

    pub async fn dispatch(&self, event: ProxyEvent) -> EventOutcome {
        match event {
            ProxyEvent::Install => match self.install().await {
                Ok(outcome) => EventOutcome::Installed(outcome),
                Err(err) => EventOutcome::Failed(err.into()),
            },
            ProxyEvent::Activate => match self.activate().await {
                Ok(pruned) => EventOutcome::Activated { pruned },
                Err(err) => EventOutcome::Failed(err.into()),
            },
            ProxyEvent::Fetch(request) => EventOutcome::Response(self.fetch(&request).await),
            ProxyEvent::Message(raw) => EventOutcome::Acknowledged(self.post_message(&raw).await),
        }
    }

    /// Serve one request. Never fails: transport errors become a 503 envelope.
    pub async fn fetch(&self, request: &ProxyRequest) -> Served {
        let inner = &self.inner;
        let class = inner.rules.classify(request.path());
        let ctx = &inner.strategies;

        let served = if !inner.lifecycle.is_controlling() {
            strategy::passthrough(ctx, request, offline_message(class)).await
        } else {
            match class {
                RequestClass::ChapterContent => {
                    strategy::cache_first_revalidate(ctx, inner.namespaces.chapters(), request)
                        .await
                }
                RequestClass::Api => {
                    strategy::network_first(ctx, &inner.namespaces.recognized(), request).await
                }
                RequestClass::Static => {
                    strategy::stale_while_revalidate(ctx, inner.namespaces.static_assets(), request)
                        .await
                }
            }
        };

        debug!(
            class = class.as_str(),
            key = %request.key(),
            source = served.source.as_str(),
            status = served.response.status.as_u16(),
            "Request served"
        );
        served
    }

    pub async fn post_message(&self, raw: &[u8]) -> ControlOutcome {
        self.inner.control.handle_message(raw).await
    }

    pub async fn install(&self) -> Result<InstallOutcome, LifecycleError> {
        self.inner.lifecycle.install().await
    }

    pub async fn activate(&self) -> Result<Vec<NamespaceName>, LifecycleError> {
        self.inner.lifecycle.activate().await
    }

    /// Stop controlling and wait up to `limit` for background work. Returns
    /// whether everything finished.
    pub async fn shutdown(&self, limit: Duration) -> bool {
        self.inner.lifecycle.retire();
        self.inner.strategies.background.settle_within(limit).await
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.inner.lifecycle
    }

    pub fn namespaces(&self) -> &Namespaces {
        &self.inner.namespaces
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.inner.strategies.store
    }

    pub fn background(&self) -> &Background {
        &self.inner.strategies.background
    }
}

fn offline_message(class: RequestClass) -> &'static str {
    match class {
        RequestClass::ChapterContent => CHAPTER_OFFLINE_MESSAGE,
        RequestClass::Api => API_OFFLINE_MESSAGE,
        RequestClass::Static => STATIC_OFFLINE_MESSAGE,
    }
}
