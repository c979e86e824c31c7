use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("No text provided")]
    EmptyText,

    #[error("No texts provided")]
    EmptyBatch,

    #[error("Batch size too large. Maximum {max} texts per request.")]
    BatchTooLarge { max: usize, got: usize },

    #[error("Invalid request payload: {0}")]
    InvalidPayload(String),

    #[error("Rate limit exceeded. Please try again later.")]
    RateLimited,

    #[error("model initialization failed: {0:#}")]
    ModelLoad(anyhow::Error),

    #[error("model inference failed: {0:#}")]
    Inference(anyhow::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Body of every error response.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    pub error: String,
}

impl AnalysisError {
    pub fn status(&self) -> StatusCode {
        match self {
            AnalysisError::EmptyText
            | AnalysisError::EmptyBatch
            | AnalysisError::BatchTooLarge { .. }
            | AnalysisError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
            AnalysisError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            AnalysisError::ModelLoad(_) | AnalysisError::Inference(_) | AnalysisError::Database(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Text that is safe to put in a response body.
    pub fn public_message(&self) -> String {
        match self {
            AnalysisError::ModelLoad(_) | AnalysisError::Inference(_) => {
                "An error occurred during analysis".to_string()
            }
            AnalysisError::Database(_) => "Database error occurred".to_string(),
            other => other.to_string(),
        }
    }

    /// Swaps the generic 5xx text for a route-specific one. Client errors keep theirs.
    pub fn into_response_with(self, server_message: &str) -> Response {
        if self.status().is_server_error() {
            tracing::error!(error = %self, "request failed");
            (self.status(), Json(ErrorBody { error: server_message.to_string() })).into_response()
        } else {
            self.into_response()
        }
    }
}

impl IntoResponse for AnalysisError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (status, Json(ErrorBody { error: self.public_message() })).into_response()
    }
}
