//! # HTTP API
//!
//! Route groups nested under `/api/v1`.

pub mod memory;
pub mod sessions;

use axum::{http::StatusCode, Json};

use crate::ApiResponse;

/// Error half of every fallible handler
pub type ApiError = (StatusCode, Json<ApiResponse>);

pub fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ApiResponse {
            success: false,
            message: message.into(),
        }),
    )
}

pub fn internal(err: anyhow::Error) -> ApiError {
    tracing::error!(error = %err, "Request failed");
    api_error(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}
