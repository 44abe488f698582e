//! Prometheus metrics, served unauthenticated on `GET /metrics`.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use smartpark_reservation::SweepReport;
use std::sync::{LazyLock, Once};

pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Direct and payment-backed claims, by outcome
pub static CLAIMS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("smartpark_claims_total", "Slot claims by outcome"),
        &["outcome"],
    )
    .expect("metric creation failed")
});

pub static PAYMENTS_INITIATED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("smartpark_payments_initiated_total", "Payment initiations by outcome"),
        &["outcome"],
    )
    .expect("metric creation failed")
});

pub static WEBHOOKS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("smartpark_webhooks_total", "Gateway status updates by result"),
        &["result"],
    )
    .expect("metric creation failed")
});

pub static RESERVATIONS_EXPIRED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("smartpark_reservations_expired_total", "Reservations expired by the sweeper")
        .expect("metric creation failed")
});

pub static INTENTS_CLOSED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "smartpark_payment_intents_closed_total",
        "Stale payment intents closed by the sweeper",
    )
    .expect("metric creation failed")
});

static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with [`REGISTRY`]. Idempotent.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(CLAIMS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(PAYMENTS_INITIATED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(WEBHOOKS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(RESERVATIONS_EXPIRED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(INTENTS_CLOSED.clone()))
            .expect("metric registration failed");
    });
}

pub fn record_claim(outcome: &str) {
    CLAIMS.with_label_values(&[outcome]).inc();
}

pub fn record_webhook(result: &str) {
    WEBHOOKS.with_label_values(&[result]).inc();
}

pub fn record_sweep(report: &SweepReport) {
    RESERVATIONS_EXPIRED.inc_by(report.expired as u64);
    INTENTS_CLOSED.inc_by(report.intents_closed as u64);
}

/// GET /metrics
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}
