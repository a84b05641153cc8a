//! Query Executor
//!
//! Runs a [`ValidatedQuery`] against the results store. The store sits behind the
//! [`DataStore`] trait; [`PostgresStore`] is the production implementation.
//!
//! Every statement runs in a READ ONLY transaction with a server-side
//! `statement_timeout`, wrapped in an outer `LIMIT cap + 1`. The executor truncates
//! again on the client, so the row cap holds whatever LIMIT the query carries.

use super::types::QueryResult;
use super::validator::ValidatedQuery;
use crate::error::PipelineError;
use async_trait::async_trait;
use deadpool_postgres::Pool;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_postgres::error::SqlState;
use tracing::{debug, error, info};

/// Extra time the client waits beyond the server-side statement timeout
const CLIENT_GRACE: Duration = Duration::from_secs(2);

#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("connection pool error: {0}")]
    Pool(String),

    #[error("query error: {0}")]
    Query(String),

    #[error("statement timed out after {0:?}")]
    Timeout(Duration),

    #[error("could not decode row: {0}")]
    Decode(String),
}

/// Read-only access to the results data
#[async_trait]
pub trait DataStore: Send + Sync {
    /// Run `sql` and return at most `cap + 1` rows, so that callers can tell when rows
    /// were dropped.
    async fn fetch(&self, sql: &str, cap: usize, statement_timeout: Duration)
        -> Result<QueryResult, StoreError>;
}

// =============================================================================
// POSTGRES
// =============================================================================

pub struct PostgresStore {
    pool: Pool,
}

impl PostgresStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

fn query_error(e: tokio_postgres::Error, statement_timeout: Duration) -> StoreError {
    if e.code() == Some(&SqlState::QUERY_CANCELED) {
        StoreError::Timeout(statement_timeout)
    } else {
        StoreError::Query(e.to_string())
    }
}

#[async_trait]
impl DataStore for PostgresStore {
    async fn fetch(
        &self,
        sql: &str,
        cap: usize,
        statement_timeout: Duration,
    ) -> Result<QueryResult, StoreError> {
        let mut client = self
            .pool
            .get()
            .await
            .map_err(|e| StoreError::Pool(e.to_string()))?;

        // Dropping the transaction on an early return rolls it back
        let tx = client
            .build_transaction()
            .read_only(true)
            .start()
            .await
            .map_err(|e| query_error(e, statement_timeout))?;

        tx.batch_execute(&format!(
            "SET LOCAL statement_timeout = {}",
            statement_timeout.as_millis()
        ))
        .await
        .map_err(|e| query_error(e, statement_timeout))?;

        // Column order comes from the prepared statement, values from row_to_json
        let statement = tx
            .prepare(sql)
            .await
            .map_err(|e| query_error(e, statement_timeout))?;
        let columns: Vec<String> = statement
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();

        let wrapped = format!(
            "SELECT row_to_json(capped)::text FROM ({}) AS capped LIMIT {}",
            sql,
            cap + 1
        );
        let rows = tx
            .query(wrapped.as_str(), &[])
            .await
            .map_err(|e| query_error(e, statement_timeout))?;

        let mut decoded = Vec::with_capacity(rows.len());
        for row in &rows {
            let json: String = row.try_get(0).map_err(|e| StoreError::Decode(e.to_string()))?;
            let object: Map<String, Value> =
                serde_json::from_str(&json).map_err(|e| StoreError::Decode(e.to_string()))?;
            decoded.push(
                columns
                    .iter()
                    .map(|c| object.get(c).cloned().unwrap_or(Value::Null))
                    .collect(),
            );
        }

        tx.rollback()
            .await
            .map_err(|e| query_error(e, statement_timeout))?;

        Ok(QueryResult::new(columns, decoded))
    }
}

// =============================================================================
// EXECUTOR
// =============================================================================

pub struct QueryExecutor {
    store: Arc<dyn DataStore>,
    max_rows: usize,
    statement_timeout: Duration,
}

impl QueryExecutor {
    pub fn new(store: Arc<dyn DataStore>, max_rows: usize, statement_timeout: Duration) -> Self {
        Self {
            store,
            max_rows,
            statement_timeout,
        }
    }

    /// Execute a validated query under the row cap and both timeouts
    pub async fn execute(&self, query: &ValidatedQuery) -> Result<QueryResult, PipelineError> {
        let started = Instant::now();
        let fetch = self
            .store
            .fetch(query.sql(), self.max_rows, self.statement_timeout);

        let outcome = match tokio::time::timeout(self.statement_timeout + CLIENT_GRACE, fetch).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.statement_timeout + CLIENT_GRACE)),
        };

        match outcome {
            Ok(mut result) => {
                if result.rows.len() > self.max_rows {
                    result.rows.truncate(self.max_rows);
                    result.truncated = true;
                }
                result.row_count = result.rows.len();
                info!(
                    "📊 Query returned {} row(s) in {:?}{}",
                    result.row_count,
                    started.elapsed(),
                    if result.truncated { " (truncated)" } else { "" }
                );
                debug!("SQL: {}", query.sql());
                Ok(result)
            }
            Err(e) => {
                error!("❌ Query execution failed: {} | sql={}", e, query.sql());
                Err(PipelineError::ExecutionFailed {
                    detail: e.to_string(),
                })
            }
        }
    }
}
