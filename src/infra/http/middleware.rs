use std::time::Instant;

use axum::{
    body::Body,
    http::{HeaderName, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::Response,
};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::application::error::ErrorReport;

use super::proxy::SOURCE_HEADER;

pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// Per-request correlation id, visible to handlers and echoed to the reader.
#[derive(Clone)]
pub struct RequestContext {
    pub request_id: String,
}

pub async fn set_request_context(mut request: Request<Body>, next: Next) -> Response {
    let ctx = RequestContext {
        request_id: Uuid::new_v4().to_string(),
    };
    request.extensions_mut().insert(ctx.clone());

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&ctx.request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response.extensions_mut().insert(ctx);
    response
}

/// One log line per proxied request. Failures carry the attached diagnostic.
pub async fn log_responses(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = Instant::now();
    let request_id = request
        .extensions()
        .get::<RequestContext>()
        .map(|ctx| ctx.request_id.clone())
        .unwrap_or_default();

    let mut response = next.run(request).await;
    let status = response.status();
    let served_from = response
        .headers()
        .get(SOURCE_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("none")
        .to_string();
    let elapsed_ms = started.elapsed().as_millis() as u64;

    if !(status.is_client_error() || status.is_server_error()) {
        debug!(
            target = "shelfcache::http::response",
            status = status.as_u16(),
            %method,
            %path,
            %served_from,
            elapsed_ms,
            request_id,
            "request served",
        );
        return response;
    }

    let report = response.extensions_mut().remove::<ErrorReport>();
    let (origin, chain) = report
        .map(|report| (report.source, report.messages))
        .unwrap_or(("upstream", Vec::new()));
    let failure = Failure {
        status,
        origin,
        detail: chain
            .first()
            .map_or("no diagnostic available", String::as_str),
        chain: &chain,
    };
    failure.log(&method, &path, &served_from, elapsed_ms, &request_id);

    response
}

struct Failure<'a> {
    status: StatusCode,
    origin: &'static str,
    detail: &'a str,
    chain: &'a [String],
}

impl Failure<'_> {
    fn log(
        &self,
        method: &axum::http::Method,
        path: &str,
        served_from: &str,
        elapsed_ms: u64,
        request_id: &str,
    ) {
        // Offline fallbacks are expected while the reader has no network.
        if self.status.is_server_error() && served_from != "offline" {
            error!(
                target = "shelfcache::http::response",
                status = self.status.as_u16(),
                %method,
                path,
                served_from,
                origin = self.origin,
                detail = self.detail,
                chain = ?self.chain,
                elapsed_ms,
                request_id,
                "request failed",
            );
        } else {
            warn!(
                target = "shelfcache::http::response",
                status = self.status.as_u16(),
                %method,
                path,
                served_from,
                origin = self.origin,
                detail = self.detail,
                chain = ?self.chain,
                elapsed_ms,
                request_id,
                "request degraded",
            );
        }
    }
}
