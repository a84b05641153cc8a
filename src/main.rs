//! Scrutin API - Election Results Question Service
//!
//! Answers natural-language questions about the 2025 Ivorian legislative election
//! results. Every answer comes from one validated, read-only SQL query:
//! - Intent: closed-domain classification, refusals for anything else
//! - Resolve: entity resolution against the catalog, with one clarification round
//! - Translate: template planner first, language backend second
//! - Validate: closed-world SQL safety check
//! - Execute: read-only transaction, timeouts, row cap

mod backend;
mod catalog;
mod config;
mod db;
mod error;
mod models;
mod pipeline;
mod routes;
mod state;
mod text;

use crate::backend::{OllamaBackend, RetryPolicy};
use crate::catalog::SchemaCatalog;
use crate::config::Settings;
use crate::pipeline::{PipelineOptions, PostgresStore, QueryPipeline};
use crate::routes::create_router;
use crate::state::AppState;
use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber for structured logging
    init_tracing();

    info!("🚀 Starting Scrutin - election results question service...");

    // Load configuration
    let settings = Settings::load()?;
    info!("📋 Configuration loaded successfully");

    // Load the schema catalog
    let mut catalog = SchemaCatalog::load(&settings.pipeline.catalog_path)
        .with_context(|| format!("loading catalog {}", settings.pipeline.catalog_path.display()))?;

    // Results database - REQUIRED
    let pool = db::init_pool(&settings.database)
        .await
        .context("results database must be reachable")?;

    // Complete the entity values from the live data
    db::load_entity_values(&pool, &mut catalog)
        .await
        .context("loading entity values")?;

    let catalog = Arc::new(catalog);
    info!(
        "📚 Catalog '{}' loaded: {} tables, fingerprint {}",
        catalog.database.name,
        catalog.tables.len(),
        &catalog.fingerprint()[..12]
    );

    // Language backend
    let backend = OllamaBackend::new(
        settings.backend.base_url.clone(),
        settings.backend.classify_model.clone(),
        settings.backend.translate_model.clone(),
        settings.backend.timeout,
    )?;
    info!(
        "🧠 Language backend: {} (classify={}, translate={})",
        settings.backend.base_url, settings.backend.classify_model, settings.backend.translate_model
    );

    let options = PipelineOptions {
        retry: RetryPolicy {
            timeout: settings.backend.timeout,
            max_retries: 1,
            backoff: settings.backend.retry_backoff,
        },
        max_rows: settings.pipeline.max_result_rows,
        statement_timeout: settings.pipeline.statement_timeout,
        clarification_ttl: chrono::Duration::from_std(settings.pipeline.clarification_ttl)
            .context("CLARIFICATION_TTL_SECS out of range")?,
    };
    let pipeline = QueryPipeline::new(
        catalog.clone(),
        Arc::new(backend),
        Arc::new(PostgresStore::new(pool)),
        options,
    );
    let state = Arc::new(AppState::new(catalog, pipeline));

    // Build the router
    let app = create_router(state, &settings);

    // Create socket address
    let addr = SocketAddr::from((settings.server.host, settings.server.port));

    info!("🌐 Server listening on http://{}", addr);
    info!("");
    info!("📚 API Endpoints:");
    info!("   GET  /health                     - Health check");
    info!("   GET  /api/catalog                - Queryable tables and columns");
    info!("   POST /api/questions              - Ask a question");
    info!("   POST /api/clarifications/{{id}}   - Answer a clarification");
    info!("");

    // Create TCP listener and serve
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("👋 Server shutdown complete");
    Ok(())
}

/// Initialize tracing with structured logging
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,scrutin_api=debug,tower_http=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .compact(),
        )
        .init();
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("📴 Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            info!("📴 Received terminate signal, initiating graceful shutdown...");
        },
    }
}
