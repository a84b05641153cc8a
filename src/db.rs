//! Database connection management
//!
//! Builds the read-only connection pool to the election results database and loads
//! the entity value lists the resolver matches questions against.

use crate::catalog::SchemaCatalog;
use crate::config::DatabaseConfig;
use crate::error::AppError;
use deadpool_postgres::{Config, ManagerConfig, Pool, RecyclingMethod, Runtime};
use tracing::{debug, info};

/// Create the results pool and check that it answers
pub async fn init_pool(config: &DatabaseConfig) -> Result<Pool, AppError> {
    let mut cfg = Config::new();
    cfg.host = Some(config.host.clone());
    cfg.port = Some(config.port);
    cfg.user = Some(config.user.clone());
    cfg.password = Some(config.password.clone());
    cfg.dbname = Some(config.database.clone());
    cfg.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });
    cfg.pool = Some(deadpool_postgres::PoolConfig::new(config.max_pool_size));

    let pool = if config.ssl {
        let certs = rustls_native_certs::load_native_certs();
        let mut root_store = rustls::RootCertStore::empty();
        for cert in certs.certs {
            root_store.add(cert).ok();
        }

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();

        let tls = tokio_postgres_rustls::MakeRustlsConnect::new(tls_config);

        cfg.create_pool(Some(Runtime::Tokio1), tls)
            .map_err(|e| AppError::Config(format!("Failed to create TLS pool: {}", e)))?
    } else {
        cfg.create_pool(Some(Runtime::Tokio1), tokio_postgres::NoTls)
            .map_err(|e| AppError::Config(format!("Failed to create pool: {}", e)))?
    };

    // Test the connection
    let client = pool.get().await?;
    client.query_one("SELECT 1", &[]).await?;

    info!(
        "✅ Results database reachable at {}:{}/{} (TLS: {})",
        config.host, config.port, config.database, config.ssl
    );
    Ok(pool)
}

/// Merge every distinct value of the catalog's entity columns into the catalog.
///
/// The catalog samples only cover a handful of places and candidates; a question about
/// any other one must still resolve to its exact value. Runs once, before the catalog
/// is shared.
pub async fn load_entity_values(pool: &Pool, catalog: &mut SchemaCatalog) -> Result<usize, AppError> {
    let targets: Vec<(String, String)> = catalog
        .entity_columns()
        .map(|(table, column)| (table.name.clone(), column.name.clone()))
        .collect();

    let client = pool.get().await?;
    let mut added = 0;
    for (table, column) in targets {
        // Names are plain identifiers, checked when the catalog was loaded
        let sql = format!(
            "SELECT DISTINCT {column}::text FROM {table} WHERE {column} IS NOT NULL ORDER BY 1"
        );
        let rows = client.query(sql.as_str(), &[]).await?;
        let values = rows
            .iter()
            .map(|row| row.try_get::<_, String>(0))
            .collect::<Result<Vec<_>, _>>()?;

        let count = values.len();
        let new = catalog.merge_values(&table, &column, values);
        debug!("📥 {}.{}: {} distinct values, {} new", table, column, count, new);
        added += new;
    }

    info!("✅ Entity values loaded: {} added to the catalog", added);
    Ok(added)
}
