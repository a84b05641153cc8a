//! Error handling module
//!
//! Two layers of errors live here:
//! - [`PipelineError`]: the closed taxonomy every pipeline stage converts its failures into.
//!   The orchestrator turns these into user-facing outcomes, never raw backend or
//!   database text.
//! - [`AppError`]: HTTP-level failures (bad request bodies, unknown clarification ids,
//!   infrastructure problems at startup), rendered as JSON error bodies.

use crate::pipeline::types::ResolvedEntity;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;

// =============================================================================
// PIPELINE ERRORS
// =============================================================================

/// Kind of a pipeline failure, exposed to API clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    OutOfDomain,
    AmbiguousEntity,
    UnanswerableQuestion,
    UnsafeQuery,
    ExecutionFailed,
    BackendUnavailable,
}

#[derive(Error, Debug, Clone)]
pub enum PipelineError {
    #[error("Question is out of domain: {reason}")]
    OutOfDomain { reason: String },

    #[error("Ambiguous entities: {}", surfaces(.entities))]
    AmbiguousEntity { entities: Vec<ResolvedEntity> },

    #[error("Question cannot be answered from the schema: {reason}")]
    Unanswerable { reason: String },

    #[error("Query rejected by safety validator: {reason}")]
    UnsafeQuery { reason: String, sql: String },

    #[error("Query execution failed: {detail}")]
    ExecutionFailed { detail: String },

    #[error("Language backend unavailable: {detail}")]
    BackendUnavailable { detail: String },
}

fn surfaces(entities: &[ResolvedEntity]) -> String {
    entities
        .iter()
        .map(|e| e.surface.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::OutOfDomain { .. } => ErrorKind::OutOfDomain,
            PipelineError::AmbiguousEntity { .. } => ErrorKind::AmbiguousEntity,
            PipelineError::Unanswerable { .. } => ErrorKind::UnanswerableQuestion,
            PipelineError::UnsafeQuery { .. } => ErrorKind::UnsafeQuery,
            PipelineError::ExecutionFailed { .. } => ErrorKind::ExecutionFailed,
            PipelineError::BackendUnavailable { .. } => ErrorKind::BackendUnavailable,
        }
    }

    /// Message safe to show to the end user.
    ///
    /// UnsafeQuery and ExecutionFailed stay generic so that neither schema nor query
    /// internals leak.
    pub fn user_message(&self) -> String {
        match self {
            PipelineError::OutOfDomain { reason } => format!(
                "I can only answer questions about the 2025 legislative election results ({}).",
                reason
            ),
            PipelineError::AmbiguousEntity { entities } => format!(
                "Several records match {}. Please specify which one you mean.",
                entities
                    .iter()
                    .map(|e| format!("'{}'", e.surface))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            PipelineError::Unanswerable { .. } => {
                "I could not answer this from the election results. Try rephrasing your question.".to_string()
            }
            PipelineError::UnsafeQuery { .. } => {
                "This request was blocked for security reasons.".to_string()
            }
            PipelineError::ExecutionFailed { .. } => {
                "The results database could not answer right now. Please try again later.".to_string()
            }
            PipelineError::BackendUnavailable { .. } => {
                "The question service is temporarily unavailable. Please try again later.".to_string()
            }
        }
    }
}

// =============================================================================
// HTTP ERRORS
// =============================================================================

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match &self {
            AppError::Database(e) => {
                error!("Database error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "A database error occurred".to_string(),
                )
            }
            AppError::Pool(e) => {
                error!("Pool error: {:?}", e);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "POOL_EXHAUSTED",
                    "Database connection pool exhausted".to_string(),
                )
            }
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::Config(msg) => {
                error!("Configuration error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "CONFIG_ERROR",
                    "A configuration error occurred".to_string(),
                )
            }
        };

        let body = Json(ErrorResponse {
            success: false,
            message,
            code: Some(error_code.to_string()),
        });

        (status, body).into_response()
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, AppError>;

/// Helper function to create a validation error
pub fn validation_error(msg: impl Into<String>) -> AppError {
    AppError::Validation(msg.into())
}

/// Helper function to create a not found error
pub fn not_found_error(msg: impl Into<String>) -> AppError {
    AppError::NotFound(msg.into())
}
