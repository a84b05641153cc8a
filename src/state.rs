//! Application state management
//!
//! Contains shared state accessible across all handlers.

use crate::catalog::SchemaCatalog;
use crate::pipeline::QueryPipeline;
use std::sync::Arc;

/// Application state shared across all handlers
pub struct AppState {
    /// Schema catalog the pipeline answers from
    pub catalog: Arc<SchemaCatalog>,

    /// Question pipeline (stateless stages plus the clarification store)
    pub pipeline: QueryPipeline,
}

impl AppState {
    pub fn new(catalog: Arc<SchemaCatalog>, pipeline: QueryPipeline) -> Self {
        Self { catalog, pipeline }
    }
}

/// Type alias for shared state
pub type SharedState = Arc<AppState>;
