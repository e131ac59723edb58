//! Observability endpoints.
//!
//! - `GET /metrics`: Prometheus text exposition
//! - `GET /shapes`: JSON view of every tracked query shape

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use tracing::warn;

use denorm_metrics::{PriorityGauge, Telemetry, render_prometheus};
use denorm_priority::PriorityAggregator;
use denorm_state::RuleStore;

#[derive(Clone)]
pub struct HttpState {
    pub telemetry: Arc<Telemetry>,
    pub aggregator: PriorityAggregator,
    pub rules: RuleStore,
}

pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .route("/metrics", get(prometheus_metrics))
        .route("/shapes", get(list_shapes))
        .with_state(state)
}

/// GET /metrics
async fn prometheus_metrics(State(state): State<HttpState>) -> impl IntoResponse {
    let gauges: Vec<PriorityGauge> = state
        .aggregator
        .snapshot()
        .await
        .into_iter()
        .map(|s| PriorityGauge {
            query: s.normalized_query,
            priority: s.priority,
            samples: s.samples,
        })
        .collect();

    let counts = match state.rules.status_counts() {
        Ok(counts) => counts.to_vec(),
        Err(e) => {
            warn!(error = %e, "could not count rules for /metrics");
            Vec::new()
        }
    };
    let counts: Vec<(&str, usize)> = counts.iter().map(|(s, n)| (s.as_str(), *n)).collect();

    let body = render_prometheus(&state.telemetry.snapshot(), &gauges, &counts);
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

/// GET /shapes
async fn list_shapes(State(state): State<HttpState>) -> impl IntoResponse {
    Json(state.aggregator.snapshot().await)
}
