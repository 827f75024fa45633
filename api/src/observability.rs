//! Health, readiness and metrics surface
//!
//! `/health` answers whenever the process does; `/ready` probes both
//! failure domains; `/metrics` renders Prometheus exposition from its
//! own listener on a separate port.

use axum::{
    body::Body,
    extract::{MatchedPath, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use metrics::{counter, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use metrics_util::MetricKindMask;
use serde::Serialize;
use std::time::{Duration, Instant};

use crate::adapters::ldap::PoolStats;
use crate::domain::ports::GiteaClient;
use crate::domain::Deadline;
use crate::AppState;

/// Initialize the Prometheus metrics exporter.
///
/// Safe to call more than once: if a recorder is already installed (as
/// happens in parallel tests) a local fallback handle is returned.
pub fn init_metrics() -> PrometheusHandle {
    PrometheusBuilder::new()
        .idle_timeout(
            MetricKindMask::COUNTER | MetricKindMask::HISTOGRAM,
            Some(Duration::from_secs(10)),
        )
        .install_recorder()
        .unwrap_or_else(|_| {
            tracing::debug!("Prometheus recorder already installed, using fallback handle");
            PrometheusBuilder::new().build_recorder().handle()
        })
}

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// GET /health - liveness; 200 whenever the process responds
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
pub struct ReadyResponse {
    ready: bool,
    checks: ReadyChecks,
    pool: PoolStats,
}

#[derive(Serialize)]
pub struct ReadyChecks {
    directory: bool,
    gitea: bool,
}

/// GET /ready - 200 only if both dependencies probe successfully
pub async fn ready(State(state): State<AppState>) -> Response {
    let directory = state.directory.pool().acquire(Deadline::none()).await.is_ok();
    let gitea = state.gitea.version().await.is_ok();

    let response = ReadyResponse {
        ready: directory && gitea,
        checks: ReadyChecks { directory, gitea },
        pool: state.directory.pool().stats(),
    };

    let status = if response.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(response)).into_response()
}

/// Router for the standalone metrics listener
pub fn metrics_router(handle: PrometheusHandle) -> Router {
    Router::new().route(
        "/metrics",
        get(move || {
            let handle = handle.clone();
            async move { handle.render() }
        }),
    )
}

/// Middleware recording HTTP request metrics
pub async fn track_metrics(req: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let path = if let Some(matched_path) = req.extensions().get::<MatchedPath>() {
        matched_path.as_str().to_owned()
    } else {
        req.uri().path().to_owned()
    };
    let method = req.method().clone();

    let response = next.run(req).await;

    let latency = start.elapsed().as_secs_f64();
    let labels = [
        ("method", method.to_string()),
        ("path", path),
        ("status", response.status().as_u16().to_string()),
    ];
    counter!("http_requests_total", &labels).increment(1);
    histogram!("http_request_duration_seconds", &labels).record(latency);

    response
}
