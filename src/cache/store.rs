//! Response snapshots and the namespace-aware store contract.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::Response,
};
use bytes::Bytes;
use thiserror::Error;

use super::keys::RequestKey;
use super::lock::{rw_read, rw_write};
use super::namespace::NamespaceName;

const SOURCE: &str = "cache::store";

/// Headers that describe one hop of a connection and never belong to a snapshot.
const HOP_BY_HOP: [HeaderName; 9] = [
    header::CONNECTION,
    header::CONTENT_LENGTH,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
    HeaderName::from_static("keep-alive"),
];

pub fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(name)
}

/// Full response snapshot: status, end-to-end headers and the buffered body.
///
/// The body is `Bytes`, so handing one copy to the caller and another to the
/// store shares the allocation instead of re-reading a stream.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedResponse {
    pub status: StatusCode,
    pub headers: Vec<(HeaderName, HeaderValue)>,
    pub body: Bytes,
}

impl CachedResponse {
    pub fn new(status: StatusCode, headers: &HeaderMap, body: Bytes) -> Self {
        let headers = headers
            .iter()
            .filter(|(name, _)| !is_hop_by_hop(name))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();

        Self {
            status,
            headers,
            body,
        }
    }

    /// JSON response with the given status and serialized body.
    pub fn json(status: StatusCode, body: Bytes) -> Self {
        Self {
            status,
            headers: vec![(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            )],
            body,
        }
    }

    /// Mirrors `Response.ok`: any 2xx status.
    pub fn is_ok(&self) -> bool {
        self.status.is_success()
    }

    pub fn header(&self, name: &HeaderName) -> Option<&HeaderValue> {
        self.headers
            .iter()
            .find(|(candidate, _)| candidate == name)
            .map(|(_, value)| value)
    }

    pub fn into_response(self) -> Response<Body> {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;

        let headers = response.headers_mut();
        for (name, value) in self.headers {
            headers.append(name, value);
        }

        response
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode cache entry: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("corrupt cache entry `{path}`: {reason}")]
    Corrupt { path: String, reason: String },
    #[error("refusing to cache `{0}`: only GET responses are stored")]
    Uncacheable(String),
}

/// Opaque per-namespace key→response store.
///
/// Each call is atomic for its key. Lookups never create a namespace; a put
/// creates its namespace on first use.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Create the namespace if it does not exist yet.
    async fn open(&self, namespace: &NamespaceName) -> Result<(), StoreError>;

    async fn lookup(
        &self,
        namespace: &NamespaceName,
        key: &RequestKey,
    ) -> Result<Option<CachedResponse>, StoreError>;

    async fn put(
        &self,
        namespace: &NamespaceName,
        key: &RequestKey,
        response: CachedResponse,
    ) -> Result<(), StoreError>;

    /// Returns whether an entry was removed.
    async fn delete(&self, namespace: &NamespaceName, key: &RequestKey)
    -> Result<bool, StoreError>;

    async fn namespaces(&self) -> Result<Vec<NamespaceName>, StoreError>;

    /// Drop a namespace with all its entries. Returns whether it existed.
    async fn delete_namespace(&self, namespace: &NamespaceName) -> Result<bool, StoreError>;
}

type Entries = HashMap<RequestKey, CachedResponse>;

/// In-process store. Contents die with the process, so version pruning only
/// matters within one run.
#[derive(Default)]
pub struct MemoryStore {
    namespaces: RwLock<HashMap<NamespaceName, Entries>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries in a namespace, zero when it does not exist.
    pub fn entry_count(&self, namespace: &NamespaceName) -> usize {
        rw_read(&self.namespaces, SOURCE, "entry_count")
            .get(namespace)
            .map_or(0, HashMap::len)
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn open(&self, namespace: &NamespaceName) -> Result<(), StoreError> {
        rw_write(&self.namespaces, SOURCE, "open")
            .entry(namespace.clone())
            .or_default();
        Ok(())
    }

    async fn lookup(
        &self,
        namespace: &NamespaceName,
        key: &RequestKey,
    ) -> Result<Option<CachedResponse>, StoreError> {
        Ok(rw_read(&self.namespaces, SOURCE, "lookup")
            .get(namespace)
            .and_then(|entries| entries.get(key))
            .cloned())
    }

    async fn put(
        &self,
        namespace: &NamespaceName,
        key: &RequestKey,
        response: CachedResponse,
    ) -> Result<(), StoreError> {
        if !key.is_cacheable() {
            return Err(StoreError::Uncacheable(key.to_string()));
        }
        rw_write(&self.namespaces, SOURCE, "put")
            .entry(namespace.clone())
            .or_default()
            .insert(key.clone(), response);
        Ok(())
    }

    async fn delete(
        &self,
        namespace: &NamespaceName,
        key: &RequestKey,
    ) -> Result<bool, StoreError> {
        Ok(rw_write(&self.namespaces, SOURCE, "delete")
            .get_mut(namespace)
            .and_then(|entries| entries.remove(key))
            .is_some())
    }

    async fn namespaces(&self) -> Result<Vec<NamespaceName>, StoreError> {
        let mut names: Vec<_> = rw_read(&self.namespaces, SOURCE, "namespaces")
            .keys()
            .cloned()
            .collect();
        names.sort();
        Ok(names)
    }

    async fn delete_namespace(&self, namespace: &NamespaceName) -> Result<bool, StoreError> {
        Ok(rw_write(&self.namespaces, SOURCE, "delete_namespace")
            .remove(namespace)
            .is_some())
    }
}
