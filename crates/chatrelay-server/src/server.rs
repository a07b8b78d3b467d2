use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;

use chatrelay_engine::{RelayDispatcher, SessionInfo, SessionRegistry};

/// Server configuration.
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<RelayDispatcher>,
    pub registry: Arc<SessionRegistry>,
}

/// Inbound send request body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    #[serde(default)]
    pub session_key: String,
    #[serde(default)]
    pub text: String,
    pub destination_identity: Option<String>,
    pub init_payload: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct SendResponse {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    ok: bool,
    #[serde(rename = "sessionCount")]
    session_count: usize,
}

#[derive(Debug, Serialize)]
struct DebugSessionsResponse {
    count: usize,
    list: Vec<SessionInfo>,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/send", post(send_handler))
        .route("/health", get(health_handler))
        .route("/debug/sessions", get(debug_sessions_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Create and start the server. Returns a handle that keeps it alive.
pub async fn start(config: ServerConfig, state: AppState) -> Result<ServerHandle, std::io::Error> {
    let router = build_router(state);
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(port = local_addr.port(), "Relay server started");

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        _server: server_handle,
    })
}

/// Handle returned by `start()` — keeps the accept loop alive.
pub struct ServerHandle {
    pub port: u16,
    _server: tokio::task::JoinHandle<()>,
}

async fn send_handler(
    State(state): State<AppState>,
    Json(body): Json<SendRequest>,
) -> impl IntoResponse {
    let result = state
        .dispatcher
        .relay(
            &body.session_key,
            &body.text,
            body.destination_identity.as_deref(),
            body.init_payload,
        )
        .await;

    match result {
        Ok(()) => (
            StatusCode::OK,
            Json(SendResponse {
                ok: true,
                error: None,
            }),
        ),
        Err(e) => {
            let status = if e.is_user_error() {
                StatusCode::BAD_REQUEST
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            };
            tracing::warn!(
                session_key = %body.session_key,
                kind = e.error_kind(),
                error = %e,
                "Relay request failed"
            );
            (
                status,
                Json(SendResponse {
                    ok: false,
                    error: Some(e.to_string()),
                }),
            )
        }
    }
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        ok: true,
        session_count: state.registry.count(),
    })
}

async fn debug_sessions_handler(State(state): State<AppState>) -> impl IntoResponse {
    let list = state.registry.snapshot();
    Json(DebugSessionsResponse {
        count: list.len(),
        list,
    })
}
