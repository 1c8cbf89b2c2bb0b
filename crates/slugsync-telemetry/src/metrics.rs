//! Prometheus metrics for slugsync replicas.
//!
//! Covers:
//! - Feed connection state and reconnects
//! - Inbound message volume by event type
//! - Subscription set size and reconciliation passes
//! - Dispatcher handler failures
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally. A registration failure
//! means duplicate metric names, which must crash at startup. These panics
//! only occur during static initialization, never at runtime.

use crate::error::TelemetryResult;
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram,
    register_int_counter, register_int_gauge, CounterVec, Encoder, Gauge, GaugeVec, Histogram,
    IntCounter, IntGauge, TextEncoder,
};
use std::time::Instant;

/// Feed connection state (1 = connected, 0 = disconnected).
pub static FEED_CONNECTED: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "slugsync_feed_connected",
        "Feed connection state (1=connected)"
    )
    .unwrap()
});

/// Feed state machine current state.
/// Labels: state (disconnected/connecting/connected/backoff)
pub static FEED_STATE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "slugsync_feed_state",
        "Feed state machine current state (1=active, 0=inactive)",
        &["state"]
    )
    .unwrap()
});

pub static FEED_RECONNECT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "slugsync_feed_reconnect_total",
        "Total feed reconnection attempts",
        &["reason"]
    )
    .unwrap()
});

pub static FEED_MESSAGES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "slugsync_feed_messages_total",
        "Inbound feed events by event type",
        &["event_type"]
    )
    .unwrap()
});

pub static FEED_PROTOCOL_ERRORS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "slugsync_feed_protocol_errors_total",
        "Inbound frames dropped as undecodable"
    )
    .unwrap()
});

pub static FEED_FRAMES_SENT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "slugsync_feed_frames_sent_total",
        "Subscription frames written to the feed",
        &["operation"]
    )
    .unwrap()
});

/// Time from dial to a usable connection, in seconds.
pub static FEED_SETUP_LATENCY_SECONDS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "slugsync_feed_setup_latency_seconds",
        "Feed connection setup latency in seconds",
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .unwrap()
});

/// Slugs the feed connection currently tracks.
pub static SUBSCRIBED_SLUGS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "slugsync_subscribed_slugs",
        "Slugs tracked by the feed connection"
    )
    .unwrap()
});

/// Slugs in the coordinator's desired set.
pub static DESIRED_SLUGS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "slugsync_desired_slugs",
        "Slugs in the coordinator's desired set"
    )
    .unwrap()
});

/// Labels: trigger (startup/debounce/interval/reconnect/replace/resubscribe)
pub static RECONCILE_PASSES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "slugsync_reconcile_passes_total",
        "Reconciliation passes by trigger",
        &["trigger"]
    )
    .unwrap()
});

pub static RECONCILE_SKIPPED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "slugsync_reconcile_skipped_total",
        "Reconciliation passes skipped",
        &["reason"]
    )
    .unwrap()
});

pub static CHANGE_EVENTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "slugsync_change_events_total",
        "Registry change notifications received",
        &["kind"]
    )
    .unwrap()
});

/// Labels: handler, reason (error/timeout/panic)
pub static HANDLER_FAILURES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "slugsync_handler_failures_total",
        "Message handler failures",
        &["handler", "reason"]
    )
    .unwrap()
});

pub static UPTIME_SECONDS: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!("slugsync_uptime_seconds", "Process uptime in seconds").unwrap()
});

static STARTED_AT: Lazy<Instant> = Lazy::new(Instant::now);

const FEED_STATES: [&str; 4] = ["disconnected", "connecting", "connected", "backoff"];

/// Metrics facade for easy access.
pub struct Metrics;

impl Metrics {
    /// Pin the uptime origin. Call once at startup.
    pub fn init() {
        Lazy::force(&STARTED_AT);
    }

    // =========================================================================
    // Feed connection
    // =========================================================================

    pub fn feed_connected() {
        FEED_CONNECTED.set(1.0);
    }

    pub fn feed_disconnected() {
        FEED_CONNECTED.set(0.0);
    }

    /// Only the active state is set to 1, all others to 0.
    pub fn feed_state_set(state: &str) {
        for s in &FEED_STATES {
            FEED_STATE.with_label_values(&[s]).set(0.0);
        }
        FEED_STATE.with_label_values(&[state]).set(1.0);
    }

    pub fn feed_reconnect(reason: &str) {
        FEED_RECONNECT_TOTAL.with_label_values(&[reason]).inc();
    }

    pub fn feed_message(event_type: &str) {
        FEED_MESSAGES_TOTAL.with_label_values(&[event_type]).inc();
    }

    pub fn protocol_error() {
        FEED_PROTOCOL_ERRORS_TOTAL.inc();
    }

    pub fn frame_sent(operation: &str) {
        FEED_FRAMES_SENT_TOTAL.with_label_values(&[operation]).inc();
    }

    pub fn setup_latency(seconds: f64) {
        FEED_SETUP_LATENCY_SECONDS.observe(seconds);
    }

    pub fn subscribed_slugs(count: usize) {
        SUBSCRIBED_SLUGS.set(count as i64);
    }

    // =========================================================================
    // Reconciliation
    // =========================================================================

    pub fn desired_slugs(count: usize) {
        DESIRED_SLUGS.set(count as i64);
    }

    pub fn reconcile_pass(trigger: &str) {
        RECONCILE_PASSES_TOTAL.with_label_values(&[trigger]).inc();
    }

    pub fn reconcile_skipped(reason: &str) {
        RECONCILE_SKIPPED_TOTAL.with_label_values(&[reason]).inc();
    }

    pub fn change_event(kind: &str) {
        CHANGE_EVENTS_TOTAL.with_label_values(&[kind]).inc();
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    pub fn handler_failed(handler: &str, reason: &str) {
        HANDLER_FAILURES_TOTAL
            .with_label_values(&[handler, reason])
            .inc();
    }

    /// Render every registered metric in the Prometheus text format.
    pub fn gather_text() -> TelemetryResult<String> {
        UPTIME_SECONDS.set(STARTED_AT.elapsed().as_secs_f64());

        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&prometheus::gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}
