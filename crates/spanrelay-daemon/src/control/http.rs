//! Control-plane HTTP surface.
//!
//! Routes:
//!
//! - `GET /sampling?service=<name>`: the sampling strategy for a service,
//!   as a [`StrategyResponse`] JSON body. Missing or empty `service` is a
//!   400.
//! - `GET /healthz`: liveness probe.
//!
//! The router is handed to the orchestrator inside a
//! [`ControlPlane`](crate::orchestrator::ControlPlane); the orchestrator
//! owns the listener and the serve loop, this module only routes requests.

use std::sync::Arc;

use axum::Router;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use serde::Deserialize;
use tracing::debug;

use spanrelay_core::sampling::StrategyResponse;

use super::StrategyProvider;

#[derive(Clone)]
struct ControlState {
    provider: Arc<dyn StrategyProvider>,
}

#[derive(Debug, Deserialize)]
struct SamplingQuery {
    #[serde(default)]
    service: Option<String>,
}

/// Builds the control-plane router around a strategy provider.
#[must_use]
pub fn control_router(provider: Arc<dyn StrategyProvider>) -> Router {
    Router::new()
        .route("/sampling", get(sampling))
        .route("/healthz", get(healthz))
        .with_state(ControlState { provider })
}

async fn sampling(
    State(state): State<ControlState>,
    Query(query): Query<SamplingQuery>,
) -> Result<axum::Json<StrategyResponse>, (StatusCode, &'static str)> {
    let service = match query.service {
        Some(service) if !service.is_empty() => service,
        _ => return Err((StatusCode::BAD_REQUEST, "missing service parameter")),
    };

    let strategy = state.provider.strategy_for(&service);
    debug!(service = %service, "sampling strategy served");
    Ok(axum::Json(StrategyResponse { service, strategy }))
}

async fn healthz() -> &'static str {
    "ok"
}
