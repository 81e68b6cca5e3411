use std::sync::{Arc, OnceLock};

use axum::extract::{MatchedPath, State};
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use metaver_lib::MetadataScope;
use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

use super::state::AppState;

/// Global metrics registry
static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// All application metrics
pub struct Metrics {
    // Snapshot reloads
    pub reloads_total: IntCounterVec,
    pub generation: IntGauge,

    // Metadata serving
    pub items_served: IntCounterVec,

    pub http_requests_total: IntCounterVec,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

impl Metrics {
    fn new(registry: &Registry) -> Self {
        let reloads_total = IntCounterVec::new(
            Opts::new("mv_reloads_total", "Snapshot reloads triggered by staleness checks"),
            &["scope", "outcome"],
        )
        .expect("failed to create reloads_total metric");

        let generation = IntGauge::new("mv_snapshot_generation", "Currently published snapshot generation")
            .expect("failed to create generation metric");

        let items_served = IntCounterVec::new(
            Opts::new("mv_items_served_total", "Metadata items served"),
            &["scope"],
        )
        .expect("failed to create items_served metric");

        let http_requests_total = IntCounterVec::new(
            Opts::new("mv_http_requests_total", "HTTP requests by route and status"),
            &["route", "status"],
        )
        .expect("failed to create http_requests_total metric");

        registry.register(Box::new(reloads_total.clone())).expect("register reloads_total");
        registry.register(Box::new(generation.clone())).expect("register generation");
        registry.register(Box::new(items_served.clone())).expect("register items_served");
        registry.register(Box::new(http_requests_total.clone())).expect("register http_requests_total");

        Self {
            reloads_total,
            generation,
            items_served,
            http_requests_total,
        }
    }

    pub fn record_reload(&self, scope: MetadataScope, result: &metaver_lib::Result<u64>) {
        match result {
            Ok(generation) => {
                self.reloads_total
                    .with_label_values(&[scope.as_str(), "ok"])
                    .inc();
                self.generation.set(i64::try_from(*generation).unwrap_or(i64::MAX));
            }
            Err(_) => {
                self.reloads_total
                    .with_label_values(&[scope.as_str(), "error"])
                    .inc();
            }
        }
    }
}

/// Get the global metrics instance, initializing on first call
pub fn metrics() -> &'static Metrics {
    METRICS.get_or_init(|| {
        let registry = REGISTRY.get_or_init(Registry::new);
        Metrics::new(registry)
    })
}

/// Axum handler for GET /metrics, in Prometheus text format
pub async fn handle_metrics() -> Response {
    metrics();
    let mut buffer = Vec::new();
    let families = REGISTRY.get_or_init(Registry::new).gather();
    match TextEncoder::new().encode(&families, &mut buffer) {
        Ok(()) => ([("content-type", prometheus::TEXT_FORMAT)], buffer).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

/// Axum handler for GET /readyz
///
/// Ready once a snapshot is published and the shared timestamp store answers.
pub async fn handle_readyz(State(state): State<Arc<AppState>>) -> Response {
    let generation = state.coordinator.read().await.generation();

    if let Err(e) = state.tracker.store().ping().await {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            axum::Json(serde_json::json!({
                "ready": false,
                "reason": e.to_string(),
                "generation": generation,
            })),
        )
            .into_response();
    }

    (
        StatusCode::OK,
        axum::Json(serde_json::json!({
            "ready": true,
            "generation": generation,
        })),
    )
        .into_response()
}

/// Count requests per matched route. Unmatched paths share one label so
/// scanners cannot grow the label set.
pub async fn track_metrics(request: Request<axum::body::Body>, next: Next) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let response = next.run(request).await;
    metrics()
        .http_requests_total
        .with_label_values(&[route.as_str(), response.status().as_str()])
        .inc();
    response
}

/// Axum handler for GET /health. Always 200
pub async fn handle_health() -> Response {
    (
        StatusCode::OK,
        axum::Json(serde_json::json!({"status": "ok"})),
    )
        .into_response()
}
