//! Question Pipeline Module
//!
//! Turns a natural-language question about the 2025 legislative election results into
//! one validated, read-only SQL query and a composed answer:
//!
//! 1. **Intent**: keep the closed election domain, refuse everything else
//! 2. **Resolve**: map place, candidate and party mentions onto catalog values
//! 3. **Translate**: plan a SELECT from templates or the language backend
//! 4. **Validate**: closed-world static check of the SQL against the catalog
//! 5. **Execute**: read-only transaction, timeouts and a row cap
//! 6. **Compose**: answer text and optional chart

pub mod composer;
pub mod executor;
pub mod intent;
pub mod orchestrator;
pub mod resolver;
pub mod session;
pub mod sql_refs;
pub mod translator;
pub mod types;
pub mod validator;

// Re-export main types for convenient access
pub use executor::{DataStore, PostgresStore};
pub use orchestrator::{PipelineOptions, PipelineOutcome, QueryPipeline};
pub use types::ChartKind;
