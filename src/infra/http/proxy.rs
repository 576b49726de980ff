//! HTTP surface: control messages, health and the catch-all proxy.

use axum::{
    Json, Router,
    body::{Body, to_bytes},
    extract::State,
    http::{HeaderName, HeaderValue, Request, StatusCode, Uri},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use tracing::debug;

use crate::application::error::{ErrorReport, HttpError};
use crate::application::lifecycle::LifecycleState;
use crate::application::strategy::ResponseSource;
use crate::application::upstream::ProxyRequest;
use crate::application::worker::Worker;
use crate::config::RoutingSettings;

use super::middleware::{log_responses, set_request_context};

/// Response header naming where a proxied response came from.
pub const SOURCE_HEADER: HeaderName = HeaderName::from_static("x-shelfcache-source");

const SOURCE: &str = "infra::http::proxy";

#[derive(Clone)]
pub struct ProxyState {
    pub worker: Worker,
    pub max_request_bytes: usize,
}

pub fn build_router(state: ProxyState, routing: &RoutingSettings) -> Router {
    Router::new()
        .route(&routing.control_path, post(post_message))
        .route(&routing.health_path, get(health))
        .fallback(proxy)
        .with_state(state)
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}

async fn proxy(State(state): State<ProxyState>, request: Request<Body>) -> Response {
    let (parts, body) = request.into_parts();
    let body = match to_bytes(body, state.max_request_bytes).await {
        Ok(body) => body,
        Err(err) => {
            return HttpError::from_error(
                SOURCE,
                StatusCode::PAYLOAD_TOO_LARGE,
                "Request body rejected",
                &err,
            )
            .into_response();
        }
    };

    let request = ProxyRequest {
        method: parts.method,
        uri: origin_form(&parts.uri),
        headers: parts.headers,
        body,
    };

    let served = state.worker.fetch(&request).await;
    let source = served.source;
    let mut response = served.response.into_response();
    response
        .headers_mut()
        .insert(SOURCE_HEADER, HeaderValue::from_static(source.as_str()));

    if source == ResponseSource::Offline {
        ErrorReport::from_message(SOURCE, "upstream unreachable and no cached copy")
            .attach(&mut response);
    }

    response
}

/// Accepts every message; the outcome is never reported to the sender.
async fn post_message(State(state): State<ProxyState>, request: Request<Body>) -> StatusCode {
    match to_bytes(request.into_body(), state.max_request_bytes).await {
        Ok(raw) => {
            state.worker.post_message(&raw).await;
        }
        Err(err) => debug!(error = %err, "Control message body unreadable; dropped"),
    }
    StatusCode::ACCEPTED
}

#[derive(Serialize)]
struct HealthBody<'a> {
    state: LifecycleState,
    controlling: bool,
    static_namespace: &'a str,
    chapter_namespace: &'a str,
}

async fn health(State(state): State<ProxyState>) -> Response {
    let lifecycle = state.worker.lifecycle();
    let namespaces = state.worker.namespaces();
    let controlling = lifecycle.is_controlling();
    let status = if controlling {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let body = HealthBody {
        state: lifecycle.state(),
        controlling,
        static_namespace: namespaces.static_assets().as_str(),
        chapter_namespace: namespaces.chapters().as_str(),
    };
    (status, Json(body)).into_response()
}

/// Absolute-form targets collapse to path and query.
fn origin_form(uri: &Uri) -> Uri {
    match uri.path_and_query() {
        Some(path_and_query) if uri.scheme().is_some() => Uri::from(path_and_query.clone()),
        _ => uri.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_targets_become_origin_form() {
        let uri: Uri = "http://reader.local/api/books?page=2".parse().expect("uri");
        assert_eq!(origin_form(&uri), "/api/books?page=2");

        let uri: Uri = "/index.html".parse().expect("uri");
        assert_eq!(origin_form(&uri), "/index.html");
    }
}
