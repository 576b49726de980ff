//! Install / activate state machine of the proxy.
//!
//! Install precaches the application shell into the static namespace; activate
//! prunes namespaces left behind by older versions and starts controlling
//! requests. State changes are published on a `watch` channel.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::join_all;
use metrics::counter;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::cache::{CacheStore, NamespaceName, Namespaces, StoreError};

use super::upstream::{ProxyRequest, Upstream};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Parsed,
    Installing,
    Installed,
    Activating,
    Activated,
    Redundant,
}

impl LifecycleState {
    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleState::Parsed => "parsed",
            LifecycleState::Installing => "installing",
            LifecycleState::Installed => "installed",
            LifecycleState::Activating => "activating",
            LifecycleState::Activated => "activated",
            LifecycleState::Redundant => "redundant",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("failed to precache `{target}`: {reason}")]
    Precache { target: String, reason: String },
    #[error("cache store failed during {phase}: {source}")]
    Store {
        phase: &'static str,
        #[source]
        source: StoreError,
    },
    #[error("cannot {action} while {state}")]
    InvalidTransition {
        action: &'static str,
        state: LifecycleState,
    },
}

/// How install satisfied the precache list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    /// Every asset was fetched and written.
    Fetched(usize),
    /// The network failed but the static namespace already held every asset.
    Reused(usize),
}

pub struct Lifecycle {
    store: Arc<dyn CacheStore>,
    upstream: Arc<dyn Upstream>,
    namespaces: Namespaces,
    precache: Vec<String>,
    state: watch::Sender<LifecycleState>,
    controlling: AtomicBool,
}

impl Lifecycle {
    pub fn new(
        store: Arc<dyn CacheStore>,
        upstream: Arc<dyn Upstream>,
        namespaces: Namespaces,
        precache: Vec<String>,
    ) -> Self {
        let (state, _) = watch::channel(LifecycleState::Parsed);
        Self {
            store,
            upstream,
            namespaces,
            precache,
            state,
            controlling: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    /// Whether fetches go through the caching strategies.
    pub fn is_controlling(&self) -> bool {
        self.controlling.load(Ordering::Acquire)
    }

    pub fn namespaces(&self) -> &Namespaces {
        &self.namespaces
    }

    /// Precache the static namespace. All or nothing: nothing is written unless
    /// every asset fetched ok.
    pub async fn install(&self) -> Result<InstallOutcome, LifecycleError> {
        self.expect_state("install", LifecycleState::Parsed)?;
        self.transition(LifecycleState::Installing);

        match self.precache().await {
            Ok(outcome) => {
                self.transition(LifecycleState::Installed);
                Ok(outcome)
            }
            Err(err) => {
                self.transition(LifecycleState::Redundant);
                Err(err)
            }
        }
    }

    /// Prune unrecognized namespaces and start controlling requests. Returns
    /// the pruned names.
    pub async fn activate(&self) -> Result<Vec<NamespaceName>, LifecycleError> {
        self.expect_state("activate", LifecycleState::Installed)?;
        self.transition(LifecycleState::Activating);

        let pruned = match prune_unrecognized(self.store.as_ref(), &self.namespaces).await {
            Ok(pruned) => pruned,
            Err(source) => {
                self.transition(LifecycleState::Redundant);
                return Err(LifecycleError::Store {
                    phase: "activate",
                    source,
                });
            }
        };

        self.controlling.store(true, Ordering::Release);
        self.transition(LifecycleState::Activated);
        Ok(pruned)
    }

    /// Stop controlling requests.
    pub fn retire(&self) {
        self.controlling.store(false, Ordering::Release);
        self.transition(LifecycleState::Redundant);
    }

    async fn precache(&self) -> Result<InstallOutcome, LifecycleError> {
        let namespace = self.namespaces.static_assets();
        self.store
            .open(namespace)
            .await
            .map_err(|source| LifecycleError::Store {
                phase: "install",
                source,
            })?;

        let mut requests = Vec::with_capacity(self.precache.len());
        for target in &self.precache {
            let request = ProxyRequest::get(target).map_err(|err| LifecycleError::Precache {
                target: target.clone(),
                reason: err.to_string(),
            })?;
            requests.push(request);
        }

        let results = join_all(requests.iter().map(|request| self.upstream.fetch(request))).await;

        let mut fetched = Vec::with_capacity(results.len());
        let mut first_failure = None;
        for (request, result) in requests.iter().zip(results) {
            let reason = match result {
                Ok(response) if response.is_ok() => {
                    fetched.push((request.key(), response));
                    continue;
                }
                Ok(response) => format!("upstream answered {}", response.status),
                Err(err) => err.to_string(),
            };
            if first_failure.is_none() {
                first_failure = Some(LifecycleError::Precache {
                    target: request.uri.to_string(),
                    reason,
                });
            }
        }

        if let Some(failure) = first_failure {
            return self.reuse_existing(&requests, failure).await;
        }

        let count = fetched.len();
        for (key, response) in fetched {
            self.store
                .put(namespace, &key, response)
                .await
                .map_err(|source| LifecycleError::Store {
                    phase: "install",
                    source,
                })?;
        }

        counter!("shelfcache_precache_total", "outcome" => "fetched").increment(1);
        info!(namespace = %namespace, assets = count, "Precached application shell");
        Ok(InstallOutcome::Fetched(count))
    }

    /// A failed precache still installs when an earlier run of this version
    /// left every asset in the store.
    async fn reuse_existing(
        &self,
        requests: &[ProxyRequest],
        failure: LifecycleError,
    ) -> Result<InstallOutcome, LifecycleError> {
        let namespace = self.namespaces.static_assets();
        for request in requests {
            let present = self
                .store
                .lookup(namespace, &request.key())
                .await
                .map_err(|source| LifecycleError::Store {
                    phase: "install",
                    source,
                })?
                .is_some();
            if !present {
                counter!("shelfcache_precache_total", "outcome" => "failed").increment(1);
                warn!(namespace = %namespace, error = %failure, "Precache failed");
                return Err(failure);
            }
        }

        counter!("shelfcache_precache_total", "outcome" => "reused").increment(1);
        warn!(
            namespace = %namespace,
            error = %failure,
            "Precache failed; reusing assets already in the store"
        );
        Ok(InstallOutcome::Reused(requests.len()))
    }

    fn expect_state(
        &self,
        action: &'static str,
        expected: LifecycleState,
    ) -> Result<(), LifecycleError> {
        let state = self.state();
        if state == expected {
            Ok(())
        } else {
            Err(LifecycleError::InvalidTransition { action, state })
        }
    }

    fn transition(&self, next: LifecycleState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            info!(from = %previous, to = %next, "Lifecycle transition");
        }
    }
}

/// Delete every namespace that is neither the current static nor the chapter
/// namespace. Returns the deleted names.
pub async fn prune_unrecognized(
    store: &dyn CacheStore,
    namespaces: &Namespaces,
) -> Result<Vec<NamespaceName>, StoreError> {
    let mut pruned = Vec::new();
    for name in store.namespaces().await? {
        if namespaces.is_recognized(&name) {
            continue;
        }
        if store.delete_namespace(&name).await? {
            info!(namespace = %name, "Pruned stale namespace");
            counter!("shelfcache_namespaces_pruned_total").increment(1);
            pruned.push(name);
        }
    }
    Ok(pruned)
}
