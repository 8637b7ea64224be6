//! HTTP API consumed by the chat client.
//!
//! - GET  /api/completion/models
//! - POST /api/completion
//! - GET  /health

use std::sync::Arc;
use std::time::Instant;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderValue, Method};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::contract::{CompletionRequest, ModelCatalog};
use crate::server::catalog::fetch_catalog;
use crate::server::error::RelayError;
use crate::server::relay::{open_relay, prepare_request, RelayLimits};
use crate::upstream::CompletionProvider;

/// Application state shared across handlers.
pub struct AppState {
    pub provider: Arc<dyn CompletionProvider>,
    pub config: Arc<Config>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(provider: Arc<dyn CompletionProvider>, config: Arc<Config>) -> Self {
        Self {
            provider,
            config,
            start_time: Instant::now(),
        }
    }

    fn limits(&self) -> RelayLimits {
        RelayLimits {
            connect: self.config.upstream.connect_timeout(),
            total: self.config.upstream.stream_timeout(),
        }
    }
}

/// Build the axum router with all API routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config.server.allowed_origins);

    Router::new()
        .route("/api/completion/models", get(list_models))
        .route("/api/completion", post(completion))
        .route("/health", get(health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Only the configured origins get CORS approval; browsers refuse the rest.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(%origin, "Ignoring unparsable CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([CONTENT_TYPE])
        .allow_credentials(true)
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
}

// ─── Route Handlers ────────────────────────────────────────────────────────

async fn list_models(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ModelCatalog>, RelayError> {
    let catalog = fetch_catalog(state.provider.as_ref(), &state.config.catalog).await?;
    Ok(Json(catalog))
}

async fn completion(
    State(state): State<Arc<AppState>>,
    body: Result<Json<CompletionRequest>, JsonRejection>,
) -> Result<Response, RelayError> {
    let request_id = Uuid::new_v4().to_string();

    let Json(req) = body.map_err(|rejection| {
        warn!(%request_id, error = %rejection, "Unreadable completion request");
        RelayError::MissingParameter
    })?;

    let upstream_request = prepare_request(req, &state.config.completion).inspect_err(|_| {
        warn!(%request_id, "Completion request missing parameters");
    })?;

    info!(
        %request_id,
        model = %upstream_request.model,
        temperature = upstream_request.temperature,
        max_tokens = upstream_request.max_tokens,
        "Completion request"
    );

    let relay = open_relay(
        state.provider.clone(),
        upstream_request,
        state.limits(),
        request_id,
    )
    .await?;

    Ok(relay.into_response())
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}
