// ABOUTME: HTTP trigger and status endpoints served with axum.
// ABOUTME: POST /v1/update starts a run; GET /v1/session returns the latest results.

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::agent::Agent;
use crate::update::{SessionResult, Trigger};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("missing or invalid bearer token")]
    Unauthorized,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
        };
        let mut response = (status, Json(ErrorBody { error: self.to_string() })).into_response();
        response
            .headers_mut()
            .insert(header::WWW_AUTHENTICATE, header::HeaderValue::from_static("Bearer"));
        response
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Serialize)]
struct Accepted {
    accepted: bool,
    /// A session was already running when the request arrived.
    busy: bool,
}

#[derive(Debug, Serialize)]
struct Sessions {
    sessions: Vec<SessionResult>,
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    providers: Vec<String>,
}

struct ApiState {
    agent: Agent,
    token: Option<String>,
}

type AppState = Arc<ApiState>;

pub fn router(agent: Agent, token: Option<String>) -> Router {
    let state = Arc::new(ApiState { agent, token });
    Router::new()
        .route("/v1/update", post(update))
        .route("/v1/session", get(sessions))
        .route("/healthz", get(health))
        .with_state(state)
}

/// Serve until the agent is cancelled.
///
/// # Errors
///
/// Binding the listener or the server itself failing.
pub async fn serve(agent: Agent, listen: SocketAddr, token: Option<String>) -> std::io::Result<()> {
    let cancel = agent.cancel_token().clone();
    let listener = tokio::net::TcpListener::bind(listen).await?;
    tracing::info!(%listen, auth = token.is_some(), "HTTP API listening");
    axum::serve(listener, router(agent, token))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
}

fn authorize(state: &ApiState, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(expected) = state.token.as_deref() else {
        return Ok(());
    };
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim);
    match presented {
        Some(token) if token == expected => Ok(()),
        _ => Err(ApiError::Unauthorized),
    }
}

/// Any request body is ignored, whatever its size.
async fn update(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Accepted>, ApiError> {
    authorize(&state, &headers)?;
    let busy = state.agent.is_busy();
    tracing::info!(busy, "update requested over HTTP");
    state.agent.trigger(Trigger::Api);
    Ok(Json(Accepted {
        accepted: true,
        busy,
    }))
}

async fn sessions(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Sessions>, ApiError> {
    authorize(&state, &headers)?;
    Ok(Json(Sessions {
        sessions: state.agent.sessions().all(),
    }))
}

async fn health(State(state): State<AppState>) -> Json<Health> {
    Json(Health {
        status: "ok",
        providers: state
            .agent
            .providers()
            .into_iter()
            .map(str::to_string)
            .collect(),
    })
}
