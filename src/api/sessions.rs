//! Session API endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::AppState;
use crate::combat::{CombatError, EntitySeed};
use crate::session::{Mutation, SessionError};

/// Build session router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/sessions", post(create_session).get(list_sessions))
        .route("/sessions/{id}", get(get_session))
        .route("/sessions/{id}/actions", get(list_actions))
        .route("/sessions/{id}/log", get(action_log))
        .route("/sessions/{id}/mutations", post(apply_mutation))
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: &'static str,
}

/// HTTP status and short kind for an error
pub fn classify(err: &SessionError) -> (StatusCode, &'static str) {
    match err {
        SessionError::SessionNotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        SessionError::Combat(CombatError::NotFound { .. }) => (StatusCode::NOT_FOUND, "not_found"),
        SessionError::Combat(CombatError::InvalidState(_)) => (StatusCode::CONFLICT, "invalid_state"),
        SessionError::Combat(CombatError::InsufficientResource(_)) => {
            (StatusCode::UNPROCESSABLE_ENTITY, "insufficient_resource")
        }
        SessionError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "storage"),
    }
}

impl IntoResponse for SessionError {
    fn into_response(self) -> Response {
        let (status, kind) = classify(&self);
        if status.is_server_error() {
            warn!("Request failed: {}", self);
        }
        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
                kind,
            }),
        )
            .into_response()
    }
}

/// Create session request
#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub name: String,
    #[serde(default)]
    pub entities: Vec<EntitySeed>,
}

#[derive(Debug, Serialize)]
pub struct CreateSessionResponse {
    pub id: String,
    pub revision: u64,
}

async fn create_session(
    State(state): State<AppState>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<impl IntoResponse, SessionError> {
    let session = state.sessions.create(&req.name, req.entities).await?;
    Ok((
        StatusCode::CREATED,
        Json(CreateSessionResponse {
            id: session.id,
            revision: session.revision,
        }),
    ))
}

async fn list_sessions(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.sessions.list().await)
}

/// Full snapshot
async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, SessionError> {
    Ok(Json(state.sessions.get(&id).await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct ActionsQuery {
    /// Only unresolved actions
    #[serde(default)]
    pub open: bool,
}

async fn list_actions(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ActionsQuery>,
) -> Result<impl IntoResponse, SessionError> {
    Ok(Json(state.sessions.actions(&id, query.open).await?))
}

async fn action_log(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, SessionError> {
    Ok(Json(state.sessions.history(&id).await?))
}

async fn apply_mutation(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(mutation): Json<Mutation>,
) -> Result<impl IntoResponse, SessionError> {
    Ok(Json(state.sessions.apply(&id, mutation).await?))
}
