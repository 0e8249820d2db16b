//! Webhook surface for alert delivery.
//!
//! `POST /order` takes `{"message": "TVM:...:MVT"}` (or the raw envelope as the
//! body, which is what the alert tool sends for non-JSON messages) and answers
//! once the order pipeline has been launched, never after it finishes.

use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::State,
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use thiserror::Error;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};
use tvm_relay_core::{parse_envelope, Acknowledgement, Dispatcher, RelayError};

#[derive(Clone)]
pub struct AppState {
    dispatcher: Arc<Dispatcher>,
}

/// Errors surfaced to the webhook caller
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Rejected(RelayError),

    #[error(transparent)]
    Unavailable(RelayError),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<RelayError> for ApiError {
    fn from(err: RelayError) -> Self {
        if err.is_rejection() {
            ApiError::Rejected(err)
        } else if matches!(err, RelayError::Busy(_)) {
            ApiError::Unavailable(err)
        } else {
            ApiError::Internal(err.to_string())
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Rejected(_) => StatusCode::BAD_REQUEST,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %self, "signal not accepted");
        } else {
            warn!(error = %self, "signal rejected");
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct OrderRequest {
    #[serde(default)]
    message: String,
}

/// Build the router; split from [`serve`] so tests can drive it directly
pub fn router(dispatcher: Arc<Dispatcher>) -> Router {
    let state = AppState { dispatcher };

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_origin(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any);

    Router::new()
        .route("/health", get(health))
        .route("/order", post(post_order))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Serve the webhook until Ctrl+C
pub async fn serve(addr: SocketAddr, dispatcher: Arc<Dispatcher>) -> anyhow::Result<()> {
    let app = router(dispatcher);

    info!("Launching webhook listener at {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received shutdown signal (Ctrl+C)"),
        Err(err) => error!("Failed to listen for shutdown signal: {:?}", err),
    }
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "accounts": state.dispatcher.registry().len(),
        "available_capacity": state.dispatcher.available_capacity(),
    }))
}

async fn post_order(
    State(state): State<AppState>,
    body: String,
) -> Result<Json<Acknowledgement>, ApiError> {
    let message = extract_message(&body);
    let intent = parse_envelope(&message)?;
    let dispatched = state.dispatcher.dispatch(intent)?;
    // The pipeline keeps running detached; its outcome is only logged.
    drop(dispatched.task);
    Ok(Json(dispatched.ack))
}

/// Pull the envelope out of a `{"message": ...}` body, falling back to the raw body
fn extract_message(body: &str) -> String {
    match serde_json::from_str::<OrderRequest>(body) {
        Ok(request) => request.message,
        Err(_) => body.trim().to_string(),
    }
}
