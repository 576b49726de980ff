//! reqwest-backed [`Upstream`]: forwards intercepted requests to the reader
//! server behind the proxy.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::http::header;
use metrics::histogram;
use reqwest::{Client, redirect::Policy};
use tracing::debug;
use url::Url;

use crate::application::upstream::{FetchError, ProxyRequest, Upstream};
use crate::cache::{CachedResponse, is_hop_by_hop};
use crate::config::UpstreamSettings;

use super::error::InfraError;

pub struct HttpUpstream {
    client: Client,
    base: Url,
    request_timeout: Duration,
}

impl HttpUpstream {
    pub fn new(settings: &UpstreamSettings) -> Result<Self, InfraError> {
        let client = Client::builder()
            .user_agent(Self::user_agent())
            .redirect(Policy::none())
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .build()
            .map_err(|err| InfraError::upstream(err.to_string()))?;

        Ok(Self {
            client,
            base: settings.base_url.clone(),
            request_timeout: settings.request_timeout,
        })
    }

    pub fn user_agent() -> &'static str {
        concat!("shelfcache/", env!("CARGO_PKG_VERSION"))
    }

    /// Base URL with the request target appended; a path on the base is kept.
    fn url_for(&self, request: &ProxyRequest) -> Result<Url, FetchError> {
        let target = request
            .uri
            .path_and_query()
            .map_or("/", |pq| pq.as_str());
        let joined = format!("{}{}", self.base.as_str().trim_end_matches('/'), target);
        Url::parse(&joined).map_err(|err| FetchError::Url {
            target: target.to_string(),
            reason: err.to_string(),
        })
    }

    fn classify(&self, err: reqwest::Error) -> FetchError {
        if err.is_timeout() {
            FetchError::Timeout(self.request_timeout)
        } else {
            FetchError::Unreachable(err.to_string())
        }
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn fetch(&self, request: &ProxyRequest) -> Result<CachedResponse, FetchError> {
        let url = self.url_for(request)?;
        let started = Instant::now();

        let mut builder = self.client.request(request.method.clone(), url);
        for (name, value) in &request.headers {
            if is_hop_by_hop(name) || name == header::HOST {
                continue;
            }
            builder = builder.header(name, value);
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        let response = builder.send().await.map_err(|err| self.classify(err))?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|err| match self.classify(err) {
                FetchError::Unreachable(reason) => FetchError::Body(reason),
                other => other,
            })?;

        histogram!("shelfcache_upstream_ms", "status" => status.as_str().to_string())
            .record(started.elapsed().as_secs_f64() * 1000.0);
        debug!(
            method = %request.method,
            target = %request.uri,
            status = status.as_u16(),
            "Upstream answered"
        );

        Ok(CachedResponse::new(status, &headers, body))
    }
}
