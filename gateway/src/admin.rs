//! Ambient health/readiness/metrics surface, generalized from the teacher's
//! `health()`/`ready()`/`metrics()` handlers over its own `Metrics` struct of
//! atomic counters.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::audit::AuditLogger;

/// Process-wide counters updated by `gateway::Gateway` as it dispatches
/// datagrams, read here without touching any gateway-internal lock.
#[derive(Default)]
pub struct Metrics {
    pub ingested: AtomicU64,
    pub accepted: AtomicU64,
    pub constrained: AtomicU64,
    pub held: AtomicU64,
    pub rtl_triggered: AtomicU64,
    pub security_events: AtomicU64,
    pub parse_errors: AtomicU64,
    pub replay_events: AtomicU64,
    pub crypto_failures: AtomicU64,
    pub key_rotations: AtomicU64,
    /// Flips to true while the gateway drains its final datagram during
    /// shutdown, so `/ready` reports unavailable before the process exits.
    pub shutting_down: AtomicBool,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }
}

#[derive(Clone)]
struct AdminState {
    metrics: Arc<Metrics>,
    audit: Arc<AuditLogger>,
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn ready(State(s): State<AdminState>) -> StatusCode {
    if s.metrics.shutting_down.load(Ordering::Relaxed) {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    }
}

#[derive(Serialize)]
struct MResp {
    ingested: u64,
    accepted: u64,
    constrained: u64,
    held: u64,
    rtl_triggered: u64,
    security_events: u64,
    parse_errors: u64,
    replay_events: u64,
    crypto_failures: u64,
    key_rotations: u64,
}

async fn metrics_handler(State(s): State<AdminState>) -> Json<MResp> {
    let m = &s.metrics;
    Json(MResp {
        ingested: m.ingested.load(Ordering::Relaxed),
        accepted: m.accepted.load(Ordering::Relaxed),
        constrained: m.constrained.load(Ordering::Relaxed),
        held: m.held.load(Ordering::Relaxed),
        rtl_triggered: m.rtl_triggered.load(Ordering::Relaxed),
        security_events: m.security_events.load(Ordering::Relaxed),
        parse_errors: m.parse_errors.load(Ordering::Relaxed),
        replay_events: m.replay_events.load(Ordering::Relaxed),
        crypto_failures: m.crypto_failures.load(Ordering::Relaxed),
        key_rotations: m.key_rotations.load(Ordering::Relaxed),
    })
}

async fn audit_summary(State(s): State<AdminState>) -> Response {
    Json(s.audit.session_summary()).into_response()
}

/// Builds the admin router (`/health`, `/ready`, `/metrics`, `/audit/summary`)
/// over a shared `Metrics` handle and the same `Arc<AuditLogger>` the
/// ingress loop writes through. Neither ever touches the other's state
/// beyond the shared handles.
pub fn router(metrics: Arc<Metrics>, audit: Arc<AuditLogger>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/metrics", get(metrics_handler))
        .route("/audit/summary", get(audit_summary))
        .with_state(AdminState { metrics, audit })
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}
