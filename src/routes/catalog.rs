//! Catalog route handlers

use crate::error::ApiResult;
use crate::models::{CatalogResponse, SuccessResponse};
use crate::state::SharedState;
use axum::{extract::State, Json};

/// Tables and columns the pipeline can query
pub async fn get_catalog(
    State(state): State<SharedState>,
) -> ApiResult<Json<SuccessResponse<CatalogResponse>>> {
    let catalog = CatalogResponse::from(state.catalog.as_ref());
    Ok(Json(SuccessResponse::with_data(
        format!("{} tables", catalog.tables.len()),
        catalog,
    )))
}
