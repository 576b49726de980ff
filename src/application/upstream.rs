//! The network side of every strategy.

use std::time::Duration;

use async_trait::async_trait;
use axum::http::{HeaderMap, Method, Uri, uri::InvalidUri};
use bytes::Bytes;
use thiserror::Error;

use crate::cache::{CachedResponse, RequestKey};

/// An intercepted request, body already buffered.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    pub method: Method,
    /// Origin-form target: path and query only.
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ProxyRequest {
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn get(target: &str) -> Result<Self, InvalidUri> {
        Ok(Self::new(Method::GET, target.parse()?))
    }

    pub fn key(&self) -> RequestKey {
        RequestKey::from_uri(self.method.clone(), &self.uri)
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }
}

/// Transport-level failure: the upstream never produced a response.
///
/// An upstream answering 4xx/5xx is a successful fetch, not a `FetchError`.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("upstream unreachable: {0}")]
    Unreachable(String),
    #[error("upstream did not answer within {0:?}")]
    Timeout(Duration),
    #[error("failed to read upstream body: {0}")]
    Body(String),
    #[error("cannot build upstream url for `{target}`: {reason}")]
    Url { target: String, reason: String },
}

#[async_trait]
pub trait Upstream: Send + Sync {
    async fn fetch(&self, request: &ProxyRequest) -> Result<CachedResponse, FetchError>;
}
