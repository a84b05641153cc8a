//! SQL parsing helpers shared by the translator and the safety validator
//!
//! Everything here works on the sqlparser AST. [`collect_references`] walks a statement
//! once and records every relation, identifier and function it mentions, plus the local
//! names (CTEs, aliases) that are allowed to shadow catalog names.

use sqlparser::ast::{
    Expr, Ident, ObjectName, Query, SelectItem, SetExpr, Statement, TableFactor, Value, Visit,
    Visitor,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::{Parser, ParserError};
use std::collections::HashSet;
use std::ops::ControlFlow;

/// Longest SQL text the pipeline will look at
pub const MAX_SQL_LEN: usize = 4_000;

/// Nesting depth accepted by the parser before it gives up
const RECURSION_LIMIT: usize = 50;

/// Parse with the PostgreSQL dialect and a bounded recursion depth
pub fn parse_statements(sql: &str) -> Result<Vec<Statement>, ParserError> {
    let dialect = PostgreSqlDialect {};
    Parser::new(&dialect)
        .with_recursion_limit(RECURSION_LIMIT)
        .try_with_sql(sql)?
        .parse_statements()
}

fn lower(ident: &Ident) -> String {
    ident.value.to_lowercase()
}

fn parts(name: &ObjectName) -> Vec<String> {
    name.0.iter().map(lower).collect()
}

/// Names referenced by a statement, lower-cased
#[derive(Debug, Default)]
pub struct References {
    /// Relations in FROM / JOIN, one entry per occurrence, split on dots
    pub relations: Vec<Vec<String>>,
    pub ctes: HashSet<String>,
    /// Column names declared by CTE or derived-table aliases
    pub local_columns: HashSet<String>,
    pub table_aliases: HashSet<String>,
    pub projection_aliases: HashSet<String>,
    /// Column identifiers, split on dots
    pub columns: Vec<Vec<String>>,
    pub wildcard_qualifiers: Vec<Vec<String>>,
    pub functions: Vec<Vec<String>>,
    /// Constructs rejected outright, in walk order
    pub violations: Vec<String>,
}

impl References {
    /// Relation names without schema qualification
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for relation in &self.relations {
            if let [name] = relation.as_slice() {
                if !names.contains(name) {
                    names.push(name.clone());
                }
            }
        }
        names
    }

    /// Last component of every column identifier, deduplicated in first-seen order
    pub fn column_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for column in &self.columns {
            if let Some(name) = column.last() {
                if !names.contains(name) {
                    names.push(name.clone());
                }
            }
        }
        names
    }

    /// Structural checks on one query block. The visitor has no query hook, so every
    /// entry point that owns a [`Query`] calls this: the statement itself, derived
    /// tables, subquery expressions, CTE bodies and parenthesised set operands.
    fn inspect_query(&mut self, query: &Query) {
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                self.ctes.insert(lower(&cte.alias.name));
                for column in &cte.alias.columns {
                    self.local_columns.insert(lower(column));
                }
                self.inspect_query(&cte.query);
            }
        }
        if !query.locks.is_empty() {
            self.violations.push("row-locking clause is not allowed".to_string());
        }
        self.inspect_set_expr(&query.body);
    }

    fn inspect_set_expr(&mut self, body: &SetExpr) {
        match body {
            SetExpr::Select(select) => {
                if select.into.is_some() {
                    self.violations.push("SELECT INTO is not allowed".to_string());
                }
                for item in &select.projection {
                    match item {
                        SelectItem::ExprWithAlias { alias, .. } => {
                            self.projection_aliases.insert(lower(alias));
                        }
                        SelectItem::QualifiedWildcard(name, _) => {
                            self.wildcard_qualifiers.push(parts(name));
                        }
                        _ => {}
                    }
                }
            }
            SetExpr::Query(query) => self.inspect_query(query),
            SetExpr::SetOperation { left, right, .. } => {
                self.inspect_set_expr(left);
                self.inspect_set_expr(right);
            }
            _ => self.violations.push("non-SELECT statement".to_string()),
        }
    }
}

impl Visitor for References {
    type Break = ();

    fn pre_visit_statement(&mut self, statement: &Statement) -> ControlFlow<Self::Break> {
        match statement {
            Statement::Query(query) => self.inspect_query(query),
            _ => self.violations.push("non-SELECT statement".to_string()),
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_table_factor(&mut self, table_factor: &TableFactor) -> ControlFlow<Self::Break> {
        match table_factor {
            TableFactor::Table { alias, args, .. } => {
                if args.is_some() {
                    self.violations.push("table-valued function is not allowed".to_string());
                }
                if let Some(alias) = alias {
                    self.table_aliases.insert(lower(&alias.name));
                    for column in &alias.columns {
                        self.local_columns.insert(lower(column));
                    }
                }
            }
            TableFactor::Derived {
                subquery, alias, ..
            } => {
                self.inspect_query(subquery);
                if let Some(alias) = alias {
                    self.table_aliases.insert(lower(&alias.name));
                    for column in &alias.columns {
                        self.local_columns.insert(lower(column));
                    }
                }
            }
            TableFactor::NestedJoin { alias, .. } => {
                if let Some(alias) = alias {
                    self.table_aliases.insert(lower(&alias.name));
                    for column in &alias.columns {
                        self.local_columns.insert(lower(column));
                    }
                }
            }
            _ => self
                .violations
                .push("unsupported table expression in FROM".to_string()),
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_relation(&mut self, relation: &ObjectName) -> ControlFlow<Self::Break> {
        self.relations.push(parts(relation));
        ControlFlow::Continue(())
    }

    fn pre_visit_expr(&mut self, expr: &Expr) -> ControlFlow<Self::Break> {
        match expr {
            Expr::Identifier(ident) => self.columns.push(vec![lower(ident)]),
            Expr::CompoundIdentifier(idents) => {
                self.columns.push(idents.iter().map(lower).collect())
            }
            Expr::Function(function) => self.functions.push(parts(&function.name)),
            Expr::Subquery(query) => self.inspect_query(query),
            Expr::InSubquery { subquery, .. } | Expr::Exists { subquery, .. } => {
                self.inspect_query(subquery)
            }
            Expr::Value(Value::Placeholder(name)) => self
                .violations
                .push(format!("unbound parameter '{}' is not allowed", name)),
            _ => {}
        }
        ControlFlow::Continue(())
    }
}

/// Walk a statement and record everything it references
pub fn collect_references(statement: &Statement) -> References {
    let mut references = References::default();
    let _ = statement.visit(&mut references);
    references
}

#[cfg(test)]
mod tests {
    use super::*;

    fn refs(sql: &str) -> References {
        let statements = parse_statements(sql).unwrap();
        collect_references(&statements[0])
    }

    #[test]
    fn test_collects_tables_columns_and_functions() {
        let r = refs(
            "SELECT r.region, SUM(r.voix) AS total FROM vw_results_clean r \
             WHERE r.parti_standardized = 'RHDP' GROUP BY r.region ORDER BY total DESC",
        );
        assert_eq!(r.table_names(), vec!["vw_results_clean"]);
        assert!(r.table_aliases.contains("r"));
        assert!(r.projection_aliases.contains("total"));
        assert!(r.functions.contains(&vec!["sum".to_string()]));
        assert_eq!(r.column_names(), vec!["region", "voix", "parti_standardized", "total"]);
        assert!(r.violations.is_empty());
    }

    #[test]
    fn test_cte_names_are_local() {
        let r = refs(
            "WITH totals (parti, n) AS (SELECT parti_standardized, COUNT(*) FROM vw_winners \
             GROUP BY parti_standardized) SELECT parti, n FROM totals",
        );
        assert!(r.ctes.contains("totals"));
        assert!(r.local_columns.contains("n"));
        assert_eq!(r.table_names(), vec!["vw_winners", "totals"]);
    }

    #[test]
    fn test_subquery_relations_are_seen() {
        let r = refs(
            "SELECT candidat FROM vw_results_clean WHERE circonscription IN \
             (SELECT circonscription FROM vw_winners WHERE candidat = 'X')",
        );
        assert_eq!(r.table_names(), vec!["vw_results_clean", "vw_winners"]);
    }

    #[test]
    fn test_flags_table_functions_into_and_values() {
        assert!(!refs("SELECT * FROM generate_series(1, 10)").violations.is_empty());
        assert!(!refs("SELECT voix INTO copie FROM vw_results_clean").violations.is_empty());
        assert!(!refs("VALUES (1), (2)").violations.is_empty());
    }

    #[test]
    fn test_nested_queries_are_inspected() {
        let r = refs(
            "SELECT region FROM (SELECT region FROM vw_region_stats UNION VALUES ('X')) AS s",
        );
        assert_eq!(r.violations, vec!["non-SELECT statement".to_string()]);

        let r = refs(
            "SELECT candidat FROM vw_winners WHERE EXISTS \
             (WITH t AS (SELECT region FROM vw_region_stats) SELECT region FROM t)",
        );
        assert!(r.ctes.contains("t"));
        assert!(r.violations.is_empty());
    }

    #[test]
    fn test_flags_placeholders() {
        let r = refs("SELECT voix FROM vw_results_clean WHERE region = $1");
        assert_eq!(r.violations, vec!["unbound parameter '$1' is not allowed".to_string()]);
    }

    #[test]
    fn test_recursion_limit_stops_deep_nesting() {
        let deep = format!("SELECT {}1{}", "(".repeat(500), ")".repeat(500));
        assert!(parse_statements(&deep).is_err());
    }
}
