// ── Switchyard: HTTP Surface ───────────────────────────────────────────────
// The OpenAI-compatible front: completions, model listing, liveness.
// Everything interesting happens in the core; this layer validates,
// authenticates, sets routing headers, and shuttles bytes.

pub mod completions;
pub mod models;

use crate::budget::BudgetLedger;
use crate::config::GatewayConfig;
use crate::dispatch::Dispatcher;
use crate::error::GatewayError;
use crate::routing::Router;
use crate::store::RegistryStore;
use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router as AxumRouter,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

/// Everything the handlers need, threaded explicitly (no process-wide
/// singletons).
pub struct AppState {
    pub store: Arc<RegistryStore>,
    pub ledger: Arc<BudgetLedger>,
    pub router: Arc<Router>,
    pub dispatcher: Arc<Dispatcher>,
    pub config: Arc<GatewayConfig>,
}

pub type SharedState = Arc<AppState>;

/// Build the axum application.
pub fn build_app(state: SharedState) -> AxumRouter {
    AxumRouter::new()
        .route("/v1/chat/completions", post(completions::chat_completions))
        .route("/v1/models", get(models::list_models))
        .route("/health", get(models::health))
        .fallback(fallback)
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// OpenAI-shaped error body: `{"error": {"message", "type"}}`.
pub fn error_response(status: StatusCode, kind: &str, message: impl Into<String>) -> Response {
    (status, Json(json!({"error": {"message": message.into(), "type": kind}}))).into_response()
}

/// Map a core error onto the surface's status-code contract.
pub fn gateway_error_response(err: GatewayError) -> Response {
    match err {
        GatewayError::Validation(msg) => {
            error_response(StatusCode::BAD_REQUEST, "invalid_request_error", msg)
        }
        GatewayError::Auth(msg) => {
            error_response(StatusCode::UNAUTHORIZED, "authentication_error", msg)
        }
        GatewayError::NoAvailableModel => {
            error_response(StatusCode::SERVICE_UNAVAILABLE, "server_error", "No available model")
        }
        GatewayError::EmptyBackendResponse => {
            error_response(StatusCode::BAD_GATEWAY, "server_error", "Empty response from backend")
        }
        other => {
            log::error!("[gateway] Internal error: {other}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "server_error", "Internal error")
        }
    }
}

/// Bearer-key gate, active only when a gateway key is configured. The
/// liveness endpoint stays open for load balancers.
async fn require_auth(
    State(state): State<SharedState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if request.method() == Method::OPTIONS || request.uri().path() == "/health" {
        return next.run(request).await;
    }
    let Some(expected) = state.config.api_key.as_deref() else {
        return next.run(request).await;
    };

    let presented = request
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match presented {
        Some(key) if key == expected => next.run(request).await,
        _ => error_response(StatusCode::UNAUTHORIZED, "authentication_error", "Invalid or missing API key"),
    }
}

/// `OPTIONS *` answers 204 (CORS headers come from the layer); anything
/// else unknown is a JSON 404.
async fn fallback(method: Method) -> Response {
    if method == Method::OPTIONS {
        return StatusCode::NO_CONTENT.into_response();
    }
    error_response(StatusCode::NOT_FOUND, "invalid_request_error", "Unknown endpoint")
}

/// Only whitelisted source tags survive; anything else reads as untagged.
pub(crate) fn sanitize_source(headers: &HeaderMap) -> Option<String> {
    let value = headers.get("x-router-source")?.to_str().ok()?;
    matches!(value, "heartbeat" | "cron" | "webhook").then(|| value.to_string())
}

/// Channels are constrained to short lowercase tokens.
pub(crate) fn sanitize_channel(headers: &HeaderMap) -> Option<String> {
    let value = headers.get("x-router-channel")?.to_str().ok()?;
    let ok = !value.is_empty()
        && value.len() <= 32
        && value.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_');
    ok.then(|| value.to_string())
}

// ── Tests ──────────────────────────────────────────────────────────────────
