//! # Sessions API
//!
//! Start scripted sessions, inspect their history, cancel running ones.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use utoipa::{IntoParams, ToSchema};

use agora_core::config::OrchestratorConfig;
use agora_core::state::{SessionRecord, StoredEvent};
use agora_core::swarm::{AgentScript, Coordinator, CoordinatorCommand, ScriptFile};

use super::{api_error, internal, ApiError};
use crate::{ApiResponse, SharedState};

/// Per-session overrides of the server config
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(default)]
pub struct SessionOverrides {
    pub max_iterations: Option<u32>,
    pub max_workspace_tokens: Option<usize>,
    pub agent_timeout_ms: Option<u64>,
}

impl SessionOverrides {
    pub fn apply(&self, base: &OrchestratorConfig) -> OrchestratorConfig {
        let mut config = base.clone();
        if let Some(v) = self.max_iterations {
            config.max_iterations = v;
        }
        if let Some(v) = self.max_workspace_tokens {
            config.max_workspace_tokens = v;
        }
        if let Some(v) = self.agent_timeout_ms {
            config.agent_timeout_ms = v;
        }
        config
    }
}

/// Request to start a session
#[derive(Debug, Deserialize, ToSchema)]
pub struct StartSessionRequest {
    pub goal: String,
    /// Scripted agents, same shape as a script file's `agents`
    #[schema(value_type = Vec<Object>)]
    pub agents: Vec<AgentScript>,
    #[serde(default)]
    pub overrides: SessionOverrides,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StartSessionResponse {
    pub session_id: String,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListQuery {
    /// Maximum sessions to return (default 20)
    pub limit: Option<usize>,
}

/// A session summary plus its stored result, if finished
#[derive(Debug, Serialize)]
pub struct SessionDetail {
    #[serde(flatten)]
    pub session: SessionRecord,
    pub running: bool,
    pub result: Option<serde_json::Value>,
}

pub fn session_routes() -> Router<SharedState> {
    Router::new()
        .route("/", get(list_sessions).post(start_session))
        .route("/:id", get(get_session))
        .route("/:id/events", get(session_events))
        .route("/:id/cancel", post(cancel_session))
}

/// Start a session in the background
#[utoipa::path(
    post,
    path = "/api/v1/sessions",
    tag = "sessions",
    request_body = StartSessionRequest,
    responses(
        (status = 200, description = "Session started", body = StartSessionResponse),
        (status = 400, description = "No agents or empty goal", body = ApiResponse)
    )
)]
pub async fn start_session(
    State(state): State<SharedState>,
    Json(req): Json<StartSessionRequest>,
) -> Result<Json<StartSessionResponse>, ApiError> {
    if req.goal.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "Goal must not be empty"));
    }
    if req.agents.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "At least one agent is required"));
    }

    let config = req.overrides.apply(&state.config);
    let agents = ScriptFile { agents: req.agents }.into_agents();
    let (cmd_tx, cmd_rx) = mpsc::channel(1);

    let mut coordinator = Coordinator::new(config, agents)
        .with_event_sink(state.sink.clone())
        .with_recall(state.episodes.clone())
        .with_notifier(Arc::new(state.notifier.clone()))
        .with_command_channel(cmd_rx);
    let session_id = coordinator.session_id().to_string();

    state
        .running
        .write()
        .await
        .insert(session_id.clone(), cmd_tx);

    let task_state = state.clone();
    let task_id = session_id.clone();
    let goal = req.goal;
    tokio::spawn(async move {
        match coordinator.run(&goal).await {
            Ok(result) => tracing::info!(
                session_id = %task_id,
                termination = result.termination.as_str(),
                "Session finished"
            ),
            Err(e) => tracing::error!(session_id = %task_id, error = %e, "Session failed"),
        }
        task_state.running.write().await.remove(&task_id);
    });

    Ok(Json(StartSessionResponse { session_id }))
}

/// List sessions, newest first
#[utoipa::path(
    get,
    path = "/api/v1/sessions",
    tag = "sessions",
    params(ListQuery),
    responses(
        (status = 200, description = "Session summaries")
    )
)]
pub async fn list_sessions(
    State(state): State<SharedState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<SessionRecord>>, ApiError> {
    let limit = query.limit.unwrap_or(20);
    state.sink.list_sessions(limit).map(Json).map_err(internal)
}

/// One session with its result
#[utoipa::path(
    get,
    path = "/api/v1/sessions/{id}",
    tag = "sessions",
    params(("id" = String, Path, description = "Session id")),
    responses(
        (status = 200, description = "Session detail"),
        (status = 404, description = "Unknown session", body = ApiResponse)
    )
)]
pub async fn get_session(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<SessionDetail>, ApiError> {
    let running = state.running.read().await.contains_key(&id);
    let session = state
        .sink
        .load_session(&id)
        .map_err(|e| api_error(StatusCode::NOT_FOUND, e.to_string()))?;
    let result = state.sink.load_result(&id).map_err(internal)?;

    Ok(Json(SessionDetail {
        session,
        running,
        result,
    }))
}

/// Stored round events of a session
#[utoipa::path(
    get,
    path = "/api/v1/sessions/{id}/events",
    tag = "sessions",
    params(("id" = String, Path, description = "Session id")),
    responses(
        (status = 200, description = "Events in round order")
    )
)]
pub async fn session_events(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<StoredEvent>>, ApiError> {
    state.sink.events_for(&id).map(Json).map_err(internal)
}

/// Cancel a running session after its current round
#[utoipa::path(
    post,
    path = "/api/v1/sessions/{id}/cancel",
    tag = "sessions",
    params(("id" = String, Path, description = "Session id")),
    responses(
        (status = 200, description = "Cancellation requested", body = ApiResponse),
        (status = 404, description = "Session is not running", body = ApiResponse)
    )
)]
pub async fn cancel_session(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse>, ApiError> {
    let tx = state.running.read().await.get(&id).cloned();
    let Some(tx) = tx else {
        return Err(api_error(
            StatusCode::NOT_FOUND,
            format!("Session '{}' is not running", id),
        ));
    };

    // A full channel already holds an Abort
    let _ = tx.try_send(CoordinatorCommand::Abort);
    tracing::info!(session_id = %id, "Cancellation requested");

    Ok(Json(ApiResponse {
        success: true,
        message: format!("Cancelling session {}", id),
    }))
}
