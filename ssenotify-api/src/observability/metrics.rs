//! Prometheus metrics
//!
//! HTTP request metrics plus notification delivery and stream tracking.
//! Hub-owned totals are mirrored into the registry at scrape time.

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use ssenotify_hub::HubMetrics;
use std::sync::LazyLock;

/// Global metrics registry
static REGISTRY: LazyLock<Registry> = LazyLock::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

// --- HTTP Metrics ---

/// Total HTTP requests, labeled by method, path, and status code.
pub static HTTP_REQUESTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("http_requests_total", "Total number of HTTP requests"),
        &["method", "path", "status"],
    )
    .expect("failed to create http_requests_total")
});

/// HTTP request duration in seconds, labeled by method and path.
pub static HTTP_REQUEST_DURATION_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "http_request_duration_seconds",
            "HTTP request duration in seconds",
        )
        .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        &["method", "path"],
    )
    .expect("failed to create http_request_duration_seconds")
});

/// Number of in-flight HTTP requests.
pub static HTTP_REQUESTS_IN_FLIGHT: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "http_requests_in_flight",
        "Number of HTTP requests currently being processed",
    )
    .expect("failed to create http_requests_in_flight")
});

// --- Notification Metrics ---

/// Open event streams.
pub static STREAMS_ACTIVE: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new("notification_streams_active", "Number of open event streams")
        .expect("failed to create notification_streams_active")
});

/// Published notifications, labeled by outcome (`delivered` or `dropped`).
pub static NOTIFICATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "notifications_total",
            "Total number of published notifications",
        ),
        &["outcome"],
    )
    .expect("failed to create notifications_total")
});

/// Channels displaced by a newer subscription for the same session.
pub static CHANNEL_EVICTIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "notification_channel_evictions_total",
        "Total number of channels evicted by a newer subscription",
    )
    .expect("failed to create notification_channel_evictions_total")
});

/// Sessions with a live subscriber.
pub static CHANNELS_ACTIVE: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "notification_channels_active",
        "Number of sessions with an active channel",
    )
    .expect("failed to create notification_channels_active")
});

/// Channels ever registered, including ones that later got evicted.
pub static SUBSCRIPTIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "notification_subscriptions_total",
        "Total number of stream subscriptions",
    )
    .expect("failed to create notification_subscriptions_total")
});

/// Sessions currently tracked by the hub.
pub static SESSIONS_TRACKED: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "notification_sessions_tracked",
        "Number of sessions with a sequence counter",
    )
    .expect("failed to create notification_sessions_tracked")
});

/// Register all metrics with the registry.
fn register_metrics(registry: &Registry) {
    registry
        .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
        .expect("failed to register http_requests_total");
    registry
        .register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()))
        .expect("failed to register http_request_duration_seconds");
    registry
        .register(Box::new(HTTP_REQUESTS_IN_FLIGHT.clone()))
        .expect("failed to register http_requests_in_flight");
    registry
        .register(Box::new(STREAMS_ACTIVE.clone()))
        .expect("failed to register notification_streams_active");
    registry
        .register(Box::new(NOTIFICATIONS_TOTAL.clone()))
        .expect("failed to register notifications_total");
    registry
        .register(Box::new(CHANNEL_EVICTIONS_TOTAL.clone()))
        .expect("failed to register notification_channel_evictions_total");
    registry
        .register(Box::new(SESSIONS_TRACKED.clone()))
        .expect("failed to register notification_sessions_tracked");
    registry
        .register(Box::new(CHANNELS_ACTIVE.clone()))
        .expect("failed to register notification_channels_active");
    registry
        .register(Box::new(SUBSCRIPTIONS_TOTAL.clone()))
        .expect("failed to register notification_subscriptions_total");
}

/// Copy a hub snapshot into the registry.
///
/// Delivery outcomes come from the hub, which also sees publishes made
/// outside the HTTP handlers.
pub fn record_hub_snapshot(snapshot: &HubMetrics) {
    SESSIONS_TRACKED.set(i64::try_from(snapshot.sessions).unwrap_or(i64::MAX));
    CHANNELS_ACTIVE.set(i64::try_from(snapshot.active_channels).unwrap_or(i64::MAX));

    catch_up(&SUBSCRIPTIONS_TOTAL, snapshot.total_subscriptions);
    catch_up(&CHANNEL_EVICTIONS_TOTAL, snapshot.total_evictions);
    catch_up(
        &NOTIFICATIONS_TOTAL.with_label_values(&["delivered"]),
        snapshot.total_delivered,
    );
    catch_up(
        &NOTIFICATIONS_TOTAL.with_label_values(&["dropped"]),
        snapshot.total_dropped,
    );
}

/// Counters only move forward; advance `counter` to the hub's running total
fn catch_up(counter: &IntCounter, total: u64) {
    let seen = counter.get();
    if total > seen {
        counter.inc_by(total - seen);
    }
}

/// Gather all metrics and encode them in Prometheus text format.
pub fn gather_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

/// Normalize a request path for metric labels.
///
/// Session ids are client-chosen, so they are replaced with a placeholder to
/// keep label cardinality bounded.
pub fn normalize_path(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').collect();
    let mut result = Vec::with_capacity(segments.len());

    for (i, segment) in segments.iter().enumerate() {
        let after_notifications = i > 0 && segments[i - 1] == "notifications";
        if after_notifications && !segment.is_empty() {
            result.push(":session_id");
        } else {
            result.push(segment);
        }
    }

    result.join("/")
}
