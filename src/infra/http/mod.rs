//! HTTP surface: admin routes under `/_edge/`, everything else through the edge executor.

mod middleware;

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware as axum_middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::edge::EdgeExecutor;
use crate::error::GatewayError;
use crate::lifecycle::CacheGeneration;

pub use middleware::{RequestContext, log_responses, set_request_context};

/// Path of the proxy's own health probe; never forwarded to the origin.
pub const HEALTH_PATH: &str = "/_edge/health";
/// Activates a new edge cache generation.
pub const GENERATION_PATH: &str = "/_edge/generation";

#[derive(Clone)]
pub struct EdgeState {
    pub executor: Arc<EdgeExecutor>,
}

pub fn build_router(state: EdgeState) -> Router {
    Router::new()
        .route(HEALTH_PATH, get(health))
        .route(GENERATION_PATH, post(rotate_generation))
        .fallback(proxy)
        .with_state(state)
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn(set_request_context))
}

async fn proxy(State(state): State<EdgeState>, request: Request<Body>) -> Response {
    match state.executor.handle(request).await {
        Ok(response) => response,
        Err(err) => GatewayError::from(err).into_response(),
    }
}

#[derive(Debug, Serialize)]
struct HealthReport {
    status: &'static str,
    generation: CacheGeneration,
    pending_writes: usize,
}

async fn health(State(state): State<EdgeState>) -> Json<HealthReport> {
    Json(HealthReport {
        status: "ok",
        generation: state.executor.current_generation(),
        pending_writes: state.executor.pending_writes(),
    })
}

#[derive(Debug, Deserialize)]
struct RotateGeneration {
    name: String,
}

async fn rotate_generation(
    State(state): State<EdgeState>,
    Json(body): Json<RotateGeneration>,
) -> Response {
    let name = body.name.trim();
    if name.is_empty() {
        return (StatusCode::BAD_REQUEST, "generation name must not be empty").into_response();
    }

    let generation = state.executor.rotate_generation(name).await;
    info!(
        target = "tiercache::http::admin",
        generation = %generation.name,
        generation_id = generation.id,
        "Edge generation rotated"
    );
    Json(generation).into_response()
}
