use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "shelfcache_requests_total",
            Unit::Count,
            "Requests served, by strategy and response source."
        );
        describe_counter!(
            "shelfcache_revalidate_total",
            Unit::Count,
            "Background revalidations, by outcome."
        );
        describe_counter!(
            "shelfcache_revalidate_skipped_total",
            Unit::Count,
            "Revalidations skipped because the background limiter was saturated."
        );
        describe_counter!(
            "shelfcache_background_timeouts_total",
            Unit::Count,
            "Background tasks cut off by the task timeout."
        );
        describe_gauge!(
            "shelfcache_background_in_flight",
            Unit::Count,
            "Detached background tasks not yet finished."
        );
        describe_histogram!(
            "shelfcache_revalidate_ms",
            Unit::Milliseconds,
            "Background revalidation latency in milliseconds."
        );
        describe_histogram!(
            "shelfcache_upstream_ms",
            Unit::Milliseconds,
            "Upstream round-trip latency in milliseconds."
        );
        describe_counter!(
            "shelfcache_control_commands_total",
            Unit::Count,
            "Side-channel commands applied."
        );
        describe_counter!(
            "shelfcache_control_dropped_total",
            Unit::Count,
            "Side-channel messages dropped as malformed or failed."
        );
        describe_counter!(
            "shelfcache_precache_total",
            Unit::Count,
            "Install precache runs, by outcome."
        );
        describe_counter!(
            "shelfcache_namespaces_pruned_total",
            Unit::Count,
            "Namespaces deleted at activation."
        );
    });
}
