//! # Memory API
//!
//! Search the episodic store the coordinator recalls from.

use axum::{extract::State, routing::post, Json, Router};
use serde::Deserialize;
use utoipa::ToSchema;

use agora_core::memory::EpisodicRecall;
use agora_core::workspace::EpisodicMatch;

use super::{internal, ApiError};
use crate::SharedState;

#[derive(Debug, Deserialize, ToSchema)]
pub struct MemorySearchRequest {
    pub query: String,
    /// Defaults to the server's episodic limit
    pub limit: Option<usize>,
    /// Defaults to the server's episodic min_score
    pub min_score: Option<f64>,
}

pub fn memory_routes() -> Router<SharedState> {
    Router::new().route("/search", post(search_memory))
}

/// Past sessions similar to a query
#[utoipa::path(
    post,
    path = "/api/v1/memory/search",
    tag = "memory",
    request_body = MemorySearchRequest,
    responses(
        (status = 200, description = "Matches, most similar first")
    )
)]
pub async fn search_memory(
    State(state): State<SharedState>,
    Json(req): Json<MemorySearchRequest>,
) -> Result<Json<Vec<EpisodicMatch>>, ApiError> {
    let limit = req.limit.unwrap_or(state.config.episodic.limit);
    let min_score = req.min_score.unwrap_or(state.config.episodic.min_score);

    state
        .episodes
        .search(&req.query, limit, min_score)
        .await
        .map(Json)
        .map_err(internal)
}
