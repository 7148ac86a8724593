use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::bus::METRIC_BUS_LAGGED_TOTAL;
use crate::coherence::{METRIC_REFRESH_FAILURE_TOTAL, METRIC_REFRESH_TOTAL};
use crate::collector::{
    METRIC_CACHE_HIT_TOTAL, METRIC_CACHE_MISS_TOTAL, METRIC_INVALIDATION_TOTAL,
    METRIC_REQUEST_LATENCY_MS, METRIC_UPTIME_SECONDS,
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
            METRIC_CACHE_HIT_TOTAL,
            Unit::Count,
            "Reads served from the region cache, labelled fresh or stale."
        );
        describe_counter!(
            METRIC_CACHE_MISS_TOTAL,
            Unit::Count,
            "Reads that fetched through to the origin."
        );
        describe_counter!(
            METRIC_INVALIDATION_TOTAL,
            Unit::Count,
            "Key invalidations applied, labelled by strategy."
        );
        describe_histogram!(
            METRIC_REQUEST_LATENCY_MS,
            Unit::Milliseconds,
            "Read latency in milliseconds, labelled by source."
        );
        describe_counter!(
            METRIC_REFRESH_TOTAL,
            Unit::Count,
            "Background refreshes finished, labelled by outcome."
        );
        describe_counter!(
            METRIC_REFRESH_FAILURE_TOTAL,
            Unit::Count,
            "Background refreshes that failed and left the entry stale."
        );
        describe_counter!(
            METRIC_BUS_LAGGED_TOTAL,
            Unit::Count,
            "Invalidation events a slow subscriber skipped."
        );
        describe_gauge!(
            METRIC_UPTIME_SECONDS,
            Unit::Seconds,
            "Seconds since the region collector started."
        );
    });
}
