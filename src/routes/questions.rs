//! Question route handlers

use crate::error::{not_found_error, validation_error, ApiResult};
use crate::models::{AskRequest, ClarifyRequest, SuccessResponse};
use crate::pipeline::PipelineOutcome;
use crate::state::SharedState;
use axum::{
    extract::{Path, State},
    Json,
};
use uuid::Uuid;
use validator::Validate;

fn message(outcome: &PipelineOutcome) -> &'static str {
    match outcome {
        PipelineOutcome::Answered(_) => "Question answered",
        PipelineOutcome::Clarification(_) => "Clarification needed",
        PipelineOutcome::Refused(_) => "Question refused",
        PipelineOutcome::Greeting(_) => "Greeting",
    }
}

/// Ask a question about the election results
pub async fn ask_question(
    State(state): State<SharedState>,
    Json(payload): Json<AskRequest>,
) -> ApiResult<Json<SuccessResponse<PipelineOutcome>>> {
    payload
        .validate()
        .map_err(|e| validation_error(e.to_string()))?;

    let outcome = state.pipeline.ask(&payload.question, payload.chart).await;
    Ok(Json(SuccessResponse::with_data(message(&outcome), outcome)))
}

/// Answer a pending clarification
pub async fn answer_clarification(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ClarifyRequest>,
) -> ApiResult<Json<SuccessResponse<PipelineOutcome>>> {
    payload
        .validate()
        .map_err(|e| validation_error(e.to_string()))?;

    let outcome = state
        .pipeline
        .clarify(id, &payload.choice)
        .await
        .ok_or_else(|| not_found_error(format!("Clarification {} not found or expired", id)))?;
    Ok(Json(SuccessResponse::with_data(message(&outcome), outcome)))
}
