//! SQL Safety Validator
//!
//! Static, closed-world inspection of candidate SQL. A query is accepted only when it is
//! a single read-only SELECT whose every table, column and function is known to the
//! schema catalog. The result of a positive check is a [`ValidatedQuery`], the only type
//! the executor accepts; it cannot be built anywhere else.

use super::sql_refs::{collect_references, parse_statements, References, MAX_SQL_LEN};
use super::types::{CandidateQuery, QueryOrigin, ValidationVerdict};
use crate::catalog::{SchemaCatalog, TableDescriptor};
use crate::error::PipelineError;
use sqlparser::ast::Statement;
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::tokenizer::{Token, Tokenizer, Whitespace};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// A query that passed every safety check
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedQuery {
    sql: String,
    tables: Vec<String>,
    origin: QueryOrigin,
}

impl ValidatedQuery {
    /// Normalized SQL, re-serialized from the checked AST
    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn tables(&self) -> &[String] {
        &self.tables
    }

    pub fn origin(&self) -> QueryOrigin {
        self.origin
    }
}

pub struct SqlSafetyValidator {
    catalog: Arc<SchemaCatalog>,
}

impl SqlSafetyValidator {
    pub fn new(catalog: Arc<SchemaCatalog>) -> Self {
        Self { catalog }
    }

    /// Verdict for an arbitrary string. Total: never panics, always terminates.
    pub fn verdict(&self, sql: &str) -> ValidationVerdict {
        match self.inspect(sql) {
            Ok(_) => ValidationVerdict::accept(),
            Err(reason) => ValidationVerdict::reject(reason),
        }
    }

    /// Check a candidate and upgrade it to a [`ValidatedQuery`]
    pub fn validate(&self, candidate: &CandidateQuery) -> Result<ValidatedQuery, PipelineError> {
        match self.inspect(&candidate.sql) {
            Ok((statement, references)) => {
                debug!("🛡️  Query accepted ({:?})", candidate.origin);
                Ok(ValidatedQuery {
                    sql: statement.to_string(),
                    tables: references.table_names(),
                    origin: candidate.origin,
                })
            }
            Err(reason) => {
                warn!(
                    "🚫 Query rejected: {} | origin={:?} | sql={}",
                    reason, candidate.origin, candidate.sql
                );
                Err(PipelineError::UnsafeQuery {
                    reason,
                    sql: candidate.sql.clone(),
                })
            }
        }
    }

    fn inspect(&self, sql: &str) -> Result<(Statement, References), String> {
        if sql.trim().is_empty() {
            return Err("empty query".to_string());
        }
        if sql.len() > MAX_SQL_LEN {
            return Err(format!("query longer than {} characters", MAX_SQL_LEN));
        }

        check_tokens(sql)?;

        let mut statements = parse_statements(sql).map_err(|e| format!("malformed SQL: {}", e))?;
        if statements.len() != 1 {
            return Err("multi-statement batch".to_string());
        }
        let statement = statements.remove(0);
        if !matches!(statement, Statement::Query(_)) {
            return Err("non-SELECT statement".to_string());
        }

        let references = collect_references(&statement);
        if let Some(violation) = references.violations.first() {
            return Err(violation.clone());
        }
        self.check_references(&references)?;

        Ok((statement, references))
    }

    fn check_references(&self, refs: &References) -> Result<(), String> {
        // ===== Relations =====
        let mut tables: Vec<&TableDescriptor> = Vec::new();
        for relation in &refs.relations {
            let name = match relation.as_slice() {
                [name] => name,
                _ => {
                    return Err(format!(
                        "schema-qualified relation '{}' is not allowed",
                        relation.join(".")
                    ))
                }
            };
            if refs.ctes.contains(name) {
                continue;
            }
            match self.catalog.table(name) {
                Some(table) => tables.push(table),
                None => return Err(format!("unknown table '{}'", name)),
            }
        }

        let qualifiers: HashSet<String> = tables
            .iter()
            .map(|t| t.name.to_lowercase())
            .chain(refs.table_aliases.iter().cloned())
            .chain(refs.ctes.iter().cloned())
            .collect();

        let check_qualifier = |qualifier: &str| -> Result<(), String> {
            if qualifiers.contains(qualifier) {
                Ok(())
            } else {
                Err(format!("unknown table or alias '{}'", qualifier))
            }
        };

        // ===== Columns =====
        let known_column = |name: &str| {
            tables.iter().any(|t| t.has_column(name))
                || refs.projection_aliases.contains(name)
                || refs.local_columns.contains(name)
        };

        for column in &refs.columns {
            let name = match column.as_slice() {
                [name] => name,
                [qualifier, name] => {
                    check_qualifier(qualifier.as_str())?;
                    name
                }
                _ => {
                    return Err(format!(
                        "schema-qualified reference '{}' is not allowed",
                        column.join(".")
                    ))
                }
            };
            if !known_column(name.as_str()) {
                return Err(format!("unknown column '{}'", name));
            }
        }

        for qualifier in &refs.wildcard_qualifiers {
            match qualifier.as_slice() {
                [name] => check_qualifier(name.as_str())?,
                _ => {
                    return Err(format!(
                        "schema-qualified reference '{}' is not allowed",
                        qualifier.join(".")
                    ))
                }
            }
        }

        // ===== Functions =====
        for function in &refs.functions {
            match function.as_slice() {
                [name] if self.catalog.is_function_allowed(name) => {}
                _ => return Err(format!("function '{}' is not allowed", function.join("."))),
            }
        }

        Ok(())
    }
}

/// Lexical checks that do not need a parse: comments and trailing statements
fn check_tokens(sql: &str) -> Result<(), String> {
    let dialect = PostgreSqlDialect {};
    let tokens = Tokenizer::new(&dialect, sql)
        .tokenize()
        .map_err(|e| format!("malformed SQL: {}", e))?;

    let mut after_semicolon = false;
    for token in &tokens {
        match token {
            Token::Whitespace(Whitespace::SingleLineComment { .. })
            | Token::Whitespace(Whitespace::MultiLineComment(_)) => {
                return Err("SQL comments are not allowed".to_string());
            }
            Token::Whitespace(_) | Token::EOF => {}
            Token::SemiColon => after_semicolon = true,
            _ if after_semicolon => return Err("multi-statement batch".to_string()),
            _ => {}
        }
    }
    Ok(())
}
