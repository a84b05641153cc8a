//! Query Translator
//!
//! Turns a question and its resolved entities into one candidate SELECT. Recurring
//! question shapes are planned deterministically from templates; anything else is
//! delegated to the language backend and cleaned up before validation.
//!
//! Entity values are always catalog values, never user text, and are escaped as SQL
//! literals. A multi-valued entity (best-effort scope) becomes an `IN (...)` filter and
//! its column joins the select list so every row says which record it belongs to.

use super::resolver::unresolved_place;
use super::sql_refs::{collect_references, parse_statements};
use super::types::{CandidateQuery, QueryOrigin, ResolvedEntity};
use crate::backend::{
    call_with_retry, strip_code_fences, BackendError, LanguageBackend, RetryPolicy, UNANSWERABLE,
};
use crate::catalog::SchemaCatalog;
use crate::error::PipelineError;
use crate::text;
use once_cell::sync::Lazy;
use regex::Regex;
use sqlparser::ast::{Expr, Statement, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Entity columns usable as filters, in the order filters are rendered
const FILTER_COLUMNS: &[&str] = &["region", "circonscription", "candidat", "parti_standardized"];

const DEFAULT_TOP_N: u32 = 10;

static TOP_N: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:TOP|LES|THE|PREMIERS|FIRST|MEILLEURS|BEST)\s+(\d{1,4})\b")
        .expect("top-N pattern is valid")
});

/// Leading keywords of statements other than queries
const STATEMENT_KEYWORDS: &[&str] = &[
    "DELETE", "DROP", "INSERT", "UPDATE", "ALTER", "CREATE", "TRUNCATE", "GRANT", "REVOKE",
    "COPY", "ATTACH", "PRAGMA", "MERGE", "VACUUM", "EXECUTE", "SET",
];

// ===== Question vocabulary (normalized) =====

const OPPONENT_WORDS: &[&str] = &[
    "ADVERSAIRE", "ADVERSAIRES", "CONCURRENT", "CONCURRENTS", "RIVAL", "RIVAUX", "OPPONENT",
    "OPPONENTS",
];
const TURNOUT_WORDS: &[&str] = &[
    "PARTICIPATION", "TURNOUT", "ABSTENTION", "INSCRITS", "VOTANTS", "BULLETINS", "REGISTERED",
];
const RATE_WORDS: &[&str] = &["TAUX", "RATE", "POURCENTAGE", "PERCENTAGE"];
const SEAT_WORDS: &[&str] = &["SIEGE", "SIEGES", "SEAT", "SEATS"];
const COUNT_WORDS: &[&str] = &["COMBIEN", "NOMBRE", "HOW MANY"];
const WINNER_WORDS: &[&str] = &[
    "GAGNE", "GAGNANT", "GAGNANTS", "VAINQUEUR", "VAINQUEURS", "ELU", "ELUS", "ELUE", "WINNER",
    "WINNERS", "WON", "ELECTED",
];
const RANKING_WORDS: &[&str] = &[
    "TOP", "CLASSEMENT", "MEILLEUR", "MEILLEURS", "PREMIERS", "RANKING", "BEST", "PLUS DE VOIX",
    "MOST VOTES",
];
const VOTE_WORDS: &[&str] = &["VOIX", "VOTES", "SUFFRAGES"];
const PARTY_WORDS: &[&str] = &["PARTI", "PARTIS", "PARTY", "PARTIES"];
const BREAKDOWN_WORDS: &[&str] = &["REPARTITION", "BREAKDOWN", "DETAIL"];
const BREAKDOWN_DIMENSIONS: &[(&str, &[&str])] = &[
    (
        "parti_standardized",
        &["PAR PARTI", "PAR PARTIS", "BY PARTY", "PER PARTY"],
    ),
    ("region", &["PAR REGION", "PAR REGIONS", "BY REGION", "PER REGION"]),
    (
        "circonscription",
        &[
            "PAR CIRCONSCRIPTION",
            "PAR CIRCONSCRIPTIONS",
            "PAR COMMUNE",
            "BY CONSTITUENCY",
            "PER CONSTITUENCY",
        ],
    ),
];

fn has_any(question: &str, words: &[&str]) -> bool {
    words.iter().any(|w| text::contains_phrase(question, w))
}

/// Quote a value as a SQL string literal
pub fn sql_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

// =============================================================================
// FILTERS
// =============================================================================

/// Entity values grouped by column
#[derive(Debug, Default)]
struct Filters {
    by_column: Vec<(String, Vec<String>)>,
}

impl Filters {
    fn from_entities(entities: &[ResolvedEntity]) -> Self {
        let mut by_column: Vec<(String, Vec<String>)> = FILTER_COLUMNS
            .iter()
            .map(|c| (c.to_string(), Vec::new()))
            .collect();

        for entity in entities {
            for m in &entity.matches {
                if let Some((_, values)) = by_column.iter_mut().find(|(c, _)| *c == m.column) {
                    if !values.contains(&m.value) {
                        values.push(m.value.clone());
                    }
                }
            }
        }

        by_column.retain(|(_, values)| !values.is_empty());
        Self { by_column }
    }

    fn values(&self, column: &str) -> &[String] {
        self.by_column
            .iter()
            .find(|(c, _)| c == column)
            .map(|(_, v)| v.as_slice())
            .unwrap_or(&[])
    }

    fn is_empty(&self) -> bool {
        self.by_column.is_empty()
    }

    /// WHERE clauses restricted to the columns a table has
    fn clauses(&self, available: &[&str]) -> Vec<String> {
        self.by_column
            .iter()
            .filter(|(c, _)| available.contains(&c.as_str()))
            .map(|(c, values)| membership(c, values, false))
            .collect()
    }

    /// Columns with several values, among those a table has
    fn multi_valued(&self, available: &[&str]) -> Vec<String> {
        self.by_column
            .iter()
            .filter(|(c, v)| v.len() > 1 && available.contains(&c.as_str()))
            .map(|(c, _)| c.clone())
            .collect()
    }
}

fn membership(column: &str, values: &[String], negated: bool) -> String {
    match values {
        [single] => format!("{} {} {}", column, if negated { "<>" } else { "=" }, sql_literal(single)),
        _ => format!(
            "{} {}IN ({})",
            column,
            if negated { "NOT " } else { "" },
            values.iter().map(|v| sql_literal(v)).collect::<Vec<_>>().join(", ")
        ),
    }
}

// =============================================================================
// SELECT BUILDER
// =============================================================================

#[derive(Debug, Default)]
struct SelectBuilder {
    columns: Vec<String>,
    from: String,
    filters: Vec<String>,
    group_by: Vec<String>,
    order_by: Option<String>,
    limit: Option<u32>,
}

impl SelectBuilder {
    fn new(from: &str, columns: &[&str]) -> Self {
        Self {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            from: from.to_string(),
            ..Default::default()
        }
    }

    fn filters(mut self, filters: Vec<String>) -> Self {
        self.filters.extend(filters);
        self
    }

    fn group_by(mut self, columns: &[&str]) -> Self {
        self.group_by.extend(columns.iter().map(|c| c.to_string()));
        self
    }

    /// Prefix dimension columns, grouping by them when the query aggregates
    fn dimensions(mut self, dims: Vec<String>) -> Self {
        let aggregated = !self.group_by.is_empty() || self.columns.iter().any(|c| c.contains('('));
        for dim in dims.into_iter().rev() {
            if !self.columns.contains(&dim) {
                self.columns.insert(0, dim.clone());
            }
            if aggregated && !self.group_by.contains(&dim) {
                self.group_by.insert(0, dim);
            }
        }
        self
    }

    fn order_by(mut self, order: &str) -> Self {
        self.order_by = Some(order.to_string());
        self
    }

    fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    fn render(&self) -> String {
        let mut sql = format!("SELECT {} FROM {}", self.columns.join(", "), self.from);
        if !self.filters.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.filters.join(" AND "));
        }
        if !self.group_by.is_empty() {
            sql.push_str(" GROUP BY ");
            sql.push_str(&self.group_by.join(", "));
        }
        if let Some(order) = &self.order_by {
            sql.push_str(" ORDER BY ");
            sql.push_str(order);
        }
        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        sql
    }
}

// =============================================================================
// TRANSLATOR
// =============================================================================

pub struct QueryTranslator {
    catalog: Arc<SchemaCatalog>,
    backend: Arc<dyn LanguageBackend>,
    policy: RetryPolicy,
}

impl QueryTranslator {
    pub fn new(catalog: Arc<SchemaCatalog>, backend: Arc<dyn LanguageBackend>, policy: RetryPolicy) -> Self {
        Self {
            catalog,
            backend,
            policy,
        }
    }

    /// Produce a candidate query, from a template when one fits, from the backend otherwise
    pub async fn translate(
        &self,
        question: &str,
        entities: &[ResolvedEntity],
    ) -> Result<CandidateQuery, PipelineError> {
        if let Some(sql) = self.plan(question, entities) {
            debug!("📐 Template plan: {}", sql);
            return Ok(candidate(sql, QueryOrigin::Template));
        }

        info!("🧠 No template fits, asking backend '{}'", self.backend.name());
        self.ask_backend(question, entities, None).await
    }

    /// Ask the backend for a new query after `failed_sql` hit a database error
    pub async fn correct(
        &self,
        question: &str,
        entities: &[ResolvedEntity],
        failed_sql: &str,
        error: &str,
    ) -> Result<CandidateQuery, PipelineError> {
        info!("🔁 Asking backend '{}' to correct a failed query", self.backend.name());
        let feedback = format!("{}\nError: {}", failed_sql, error);
        self.ask_backend(question, entities, Some(&feedback)).await
    }

    async fn ask_backend(
        &self,
        question: &str,
        entities: &[ResolvedEntity],
        feedback: Option<&str>,
    ) -> Result<CandidateQuery, PipelineError> {
        let backend = &self.backend;
        let catalog = self.catalog.as_ref();
        let reply = call_with_retry(&self.policy, move || {
            backend.translate(question, catalog, entities, feedback)
        })
        .await;

        match reply {
            Ok(raw) => self.clean_backend_sql(&raw),
            Err(BackendError::Timeout(after)) => {
                warn!("⏱️  Translation timed out after {:?}", after);
                Err(PipelineError::Unanswerable {
                    reason: format!("translation timed out after {:?}", after),
                })
            }
            Err(BackendError::InvalidResponse(detail)) => Err(PipelineError::Unanswerable { reason: detail }),
            Err(BackendError::Unavailable(detail)) => {
                warn!("⚠️  Backend unavailable for translation: {}", detail);
                Err(PipelineError::BackendUnavailable { detail })
            }
        }
    }

    /// Deterministic template plan, `None` when no template covers the question
    pub fn plan(&self, question: &str, entities: &[ResolvedEntity]) -> Option<String> {
        // A template would silently widen the scope to the whole country
        if let Some(place) = unresolved_place(question, entities) {
            debug!("📍 '{}' is not a known place, no template applies", place);
            return None;
        }

        let q = text::normalize(question);
        let filters = Filters::from_entities(entities);
        let limit = self.catalog.security.auto_limit;

        // Opponents of a candidate
        if has_any(&q, OPPONENT_WORDS) && !filters.values("candidat").is_empty() {
            let candidates = filters.values("candidat");
            let inner = format!(
                "circonscription IN (SELECT circonscription FROM vw_results_clean WHERE {})",
                membership("candidat", candidates, false)
            );
            let sql = SelectBuilder::new(
                "vw_results_clean",
                &["candidat", "parti_standardized", "circonscription", "voix", "score"],
            )
            .filters(vec![inner, membership("candidat", candidates, true)])
            .order_by("voix DESC")
            .limit(limit);
            return Some(sql.render());
        }

        if has_any(&q, TURNOUT_WORDS) {
            return Some(self.plan_turnout(&q, &filters));
        }

        if has_any(&q, SEAT_WORDS) || (has_any(&q, COUNT_WORDS) && has_any(&q, WINNER_WORDS)) {
            return Some(self.plan_seats(&filters));
        }

        if has_any(&q, WINNER_WORDS) {
            let sql = SelectBuilder::new(
                "vw_winners",
                &["candidat", "parti_standardized", "circonscription", "voix", "score"],
            )
            .filters(filters.clauses(FILTER_COLUMNS))
            .order_by("voix DESC")
            .limit(limit);
            return Some(sql.render());
        }

        if filters.values("parti_standardized").len() >= 2 {
            let sql = SelectBuilder::new(
                "vw_results_clean",
                &[
                    "parti_standardized",
                    "SUM(voix) AS total_voix",
                    "SUM(est_elu) AS total_sieges",
                ],
            )
            .filters(filters.clauses(FILTER_COLUMNS))
            .group_by(&["parti_standardized"])
            .dimensions(filters.multi_valued(FILTER_COLUMNS))
            .order_by("total_voix DESC");
            return Some(sql.render());
        }

        let dimension = BREAKDOWN_DIMENSIONS
            .iter()
            .find(|(_, phrases)| has_any(&q, phrases))
            .map(|(column, _)| *column)
            .or_else(|| has_any(&q, BREAKDOWN_WORDS).then_some("parti_standardized"));
        if let Some(dimension) = dimension {
            let sql = SelectBuilder::new("vw_results_clean", &[dimension, "SUM(voix) AS total_voix"])
                .filters(filters.clauses(FILTER_COLUMNS))
                .group_by(&[dimension])
                .dimensions(filters.multi_valued(FILTER_COLUMNS))
                .order_by("total_voix DESC")
                .limit(limit);
            return Some(sql.render());
        }

        if has_any(&q, RANKING_WORDS) {
            let n = top_n(&q).min(limit).max(1);
            if has_any(&q, PARTY_WORDS) && filters.is_empty() {
                let sql = SelectBuilder::new("vw_party_stats", &["parti_standardized", "total_voix"])
                    .order_by("total_voix DESC")
                    .limit(n);
                return Some(sql.render());
            }
            let sql = SelectBuilder::new(
                "vw_results_clean",
                &["candidat", "parti_standardized", "circonscription", "voix", "score"],
            )
            .filters(filters.clauses(FILTER_COLUMNS))
            .order_by("voix DESC")
            .limit(n);
            return Some(sql.render());
        }

        if has_any(&q, VOTE_WORDS) {
            let sql = SelectBuilder::new("vw_results_clean", &["SUM(voix) AS total_voix"])
                .filters(filters.clauses(FILTER_COLUMNS))
                .dimensions(filters.multi_valued(FILTER_COLUMNS));
            let sql = if sql.group_by.is_empty() {
                sql
            } else {
                sql.order_by("total_voix DESC")
            };
            return Some(sql.render());
        }

        if !filters.is_empty() {
            let sql = SelectBuilder::new(
                "vw_results_clean",
                &["candidat", "parti_standardized", "circonscription", "voix", "score", "est_elu"],
            )
            .filters(filters.clauses(FILTER_COLUMNS))
            .order_by("voix DESC")
            .limit(limit);
            return Some(sql.render());
        }

        None
    }

    fn plan_turnout(&self, q: &str, filters: &Filters) -> String {
        let measures: &[&str] = if has_any(q, RATE_WORDS) {
            &["taux_participation"]
        } else {
            &["inscrits", "votants", "suffrages_exprimes", "taux_participation"]
        };

        if !filters.values("circonscription").is_empty() {
            let available = &["region", "circonscription"];
            SelectBuilder::new("vw_turnout", measures)
                .filters(filters.clauses(available))
                .dimensions(filters.multi_valued(available))
                .render()
        } else if !filters.values("region").is_empty() {
            let available = &["region"];
            SelectBuilder::new("vw_region_stats", measures)
                .filters(filters.clauses(available))
                .dimensions(filters.multi_valued(available))
                .render()
        } else {
            SelectBuilder::new("vw_national_stats", measures).render()
        }
    }

    fn plan_seats(&self, filters: &Filters) -> String {
        let parties = filters.values("parti_standardized");
        let scoped = ["region", "circonscription", "candidat"]
            .iter()
            .any(|c| !filters.values(c).is_empty());

        if scoped {
            let sql = if parties.len() == 1 {
                SelectBuilder::new("vw_winners", &["COUNT(*) AS sieges"])
            } else {
                SelectBuilder::new("vw_winners", &["parti_standardized", "COUNT(*) AS sieges"])
                    .group_by(&["parti_standardized"])
                    .order_by("sieges DESC")
            };
            return sql
                .filters(filters.clauses(FILTER_COLUMNS))
                .dimensions(filters.multi_valued(&["region", "circonscription", "candidat"]))
                .render();
        }

        match parties.len() {
            0 => SelectBuilder::new("vw_party_stats", &["parti_standardized", "total_sieges"])
                .order_by("total_sieges DESC")
                .limit(self.catalog.security.auto_limit)
                .render(),
            1 => SelectBuilder::new("vw_party_stats", &["total_sieges"])
                .filters(filters.clauses(&["parti_standardized"]))
                .render(),
            _ => SelectBuilder::new("vw_party_stats", &["parti_standardized", "total_sieges"])
                .filters(filters.clauses(&["parti_standardized"]))
                .order_by("total_sieges DESC")
                .render(),
        }
    }

    /// Clean a raw backend reply into a candidate query.
    ///
    /// Only prose before the first SELECT/WITH is dropped. Multi-statement replies, and
    /// replies whose prefix holds a statement keyword or a semicolon, are passed through
    /// untouched so that the validator rejects them.
    pub fn clean_backend_sql(&self, raw: &str) -> Result<CandidateQuery, PipelineError> {
        let text = fenced_block(raw).unwrap_or_else(|| strip_code_fences(raw));
        let upper = text.to_ascii_uppercase();
        if text.is_empty() || upper.starts_with(UNANSWERABLE) {
            return Err(PipelineError::Unanswerable {
                reason: "backend found no query for this question".to_string(),
            });
        }

        let mut starts: Vec<usize> = ["SELECT", "WITH"]
            .iter()
            .filter_map(|kw| upper.find(kw))
            .collect();
        starts.sort_unstable();

        for start in starts {
            if smuggles_statement(&text[..start]) {
                return Ok(candidate(text.to_string(), QueryOrigin::Backend));
            }
            let sql = text[start..].trim();
            let mut statements = match parse_statements(sql) {
                Ok(statements) if !statements.is_empty() => statements,
                _ => continue,
            };
            if statements.len() > 1 {
                return Ok(candidate(sql.to_string(), QueryOrigin::Backend));
            }

            let mut statement = statements.remove(0);
            let references = collect_references(&statement);
            for name in references.table_names() {
                if !self.catalog.has_table(&name) && !references.ctes.contains(&name) {
                    return Err(PipelineError::Unanswerable {
                        reason: format!("backend referenced unknown table '{}'", name),
                    });
                }
            }

            if let Statement::Query(query) = &mut statement {
                if query.limit.is_none() && query.fetch.is_none() {
                    query.limit = Some(Expr::Value(Value::Number(
                        self.catalog.security.auto_limit.to_string(),
                        false,
                    )));
                }
            }

            return Ok(candidate(statement.to_string(), QueryOrigin::Backend));
        }

        Err(PipelineError::Unanswerable {
            reason: "backend reply is not a SQL query".to_string(),
        })
    }
}

/// True when text in front of the query looks like SQL rather than prose
fn smuggles_statement(prefix: &str) -> bool {
    prefix.contains(';')
        || text::words(prefix)
            .iter()
            .any(|w| STATEMENT_KEYWORDS.contains(&w.as_str()))
}

/// Body of the first markdown code block of a reply, if any
fn fenced_block(raw: &str) -> Option<&str> {
    let start = raw.find("```")?;
    let after = &raw[start + 3..];
    let after = after
        .strip_prefix("sql")
        .or_else(|| after.strip_prefix("SQL"))
        .unwrap_or(after);
    let end = after.find("```").unwrap_or(after.len());
    Some(after[..end].trim())
}

fn top_n(question: &str) -> u32 {
    TOP_N
        .captures(question)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(DEFAULT_TOP_N)
}

fn candidate(sql: String, origin: QueryOrigin) -> CandidateQuery {
    let (tables, columns) = match parse_statements(&sql) {
        Ok(statements) if statements.len() == 1 => {
            let references = collect_references(&statements[0]);
            (references.table_names(), references.column_names())
        }
        _ => (Vec::new(), Vec::new()),
    };
    CandidateQuery {
        sql,
        tables,
        columns,
        origin,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::{fast_policy, ScriptedBackend};
    use crate::catalog::test_catalog;
    use crate::pipeline::resolver::EntityResolver;
    use crate::pipeline::types::{EntityMatch, MatchKind};
    use crate::pipeline::validator::SqlSafetyValidator;
    use pretty_assertions::assert_eq;

    fn build(backend: ScriptedBackend) -> (QueryTranslator, Arc<ScriptedBackend>) {
        let backend = Arc::new(backend);
        (
            QueryTranslator::new(Arc::new(test_catalog()), backend.clone(), fast_policy()),
            backend,
        )
    }

    fn plan(question: &str) -> Option<String> {
        let (translator, _) = build(ScriptedBackend::answering("UNANSWERABLE"));
        let entities = EntityResolver::new(&test_catalog()).resolve(question);
        translator.plan(question, &entities)
    }

    #[test]
    fn test_vote_total_for_party_in_region() {
        assert_eq!(
            plan("Combien de voix pour le RHDP dans la région du Poro ?").unwrap(),
            "SELECT SUM(voix) AS total_voix FROM vw_results_clean \
             WHERE region = 'PORO' AND parti_standardized = 'RHDP'"
        );
    }

    #[test]
    fn test_same_question_same_sql() {
        let q = "Qui a gagné à Cocody ?";
        assert_eq!(plan(q), plan(q));
        assert_eq!(
            plan(q).unwrap(),
            "SELECT candidat, parti_standardized, circonscription, voix, score FROM vw_winners \
             WHERE circonscription = 'COCODY, COMMUNE' ORDER BY voix DESC LIMIT 50"
        );
    }

    #[test]
    fn test_compare_parties() {
        assert_eq!(
            plan("Compare les résultats du RHDP et du PDCI").unwrap(),
            "SELECT parti_standardized, SUM(voix) AS total_voix, SUM(est_elu) AS total_sieges \
             FROM vw_results_clean WHERE parti_standardized IN ('RHDP', 'PDCI-RDA') \
             GROUP BY parti_standardized ORDER BY total_voix DESC"
        );
    }

    #[test]
    fn test_turnout_reads_published_rate() {
        assert_eq!(
            plan("Quel est le taux de participation national ?").unwrap(),
            "SELECT taux_participation FROM vw_national_stats"
        );
        assert_eq!(
            plan("Taux de participation à Bouaké").unwrap(),
            "SELECT taux_participation FROM vw_turnout WHERE circonscription = 'BOUAKE, COMMUNE'"
        );
        assert_eq!(
            plan("Participation dans la région du Gbeke").unwrap(),
            "SELECT inscrits, votants, suffrages_exprimes, taux_participation FROM vw_region_stats \
             WHERE region = 'GBEKE'"
        );
    }

    #[test]
    fn test_top_n_is_capped() {
        assert_eq!(
            plan("Top 5 des candidats").unwrap(),
            "SELECT candidat, parti_standardized, circonscription, voix, score FROM vw_results_clean \
             ORDER BY voix DESC LIMIT 5"
        );
        assert!(plan("Top 500 des candidats").unwrap().ends_with("LIMIT 50"));
        assert_eq!(
            plan("Classement des partis").unwrap(),
            "SELECT parti_standardized, total_voix FROM vw_party_stats ORDER BY total_voix DESC LIMIT 10"
        );
    }

    #[test]
    fn test_opponents_of_candidate() {
        assert_eq!(
            plan("Qui sont les adversaires de Traore ?").unwrap(),
            "SELECT candidat, parti_standardized, circonscription, voix, score FROM vw_results_clean \
             WHERE circonscription IN (SELECT circonscription FROM vw_results_clean \
             WHERE candidat = 'TRAORE ISSOUF') AND candidat <> 'TRAORE ISSOUF' \
             ORDER BY voix DESC LIMIT 50"
        );
    }

    #[test]
    fn test_seats() {
        assert_eq!(
            plan("Combien de sièges pour le PDCI ?").unwrap(),
            "SELECT total_sieges FROM vw_party_stats WHERE parti_standardized = 'PDCI-RDA'"
        );
        assert_eq!(
            plan("Combien de sièges dans la région du Poro ?").unwrap(),
            "SELECT parti_standardized, COUNT(*) AS sieges FROM vw_winners WHERE region = 'PORO' \
             GROUP BY parti_standardized ORDER BY sieges DESC"
        );
    }

    #[test]
    fn test_breakdown_by_region() {
        assert_eq!(
            plan("Voix du FPI par région").unwrap(),
            "SELECT region, SUM(voix) AS total_voix FROM vw_results_clean \
             WHERE parti_standardized = 'FPI' GROUP BY region ORDER BY total_voix DESC LIMIT 50"
        );
    }

    #[test]
    fn test_best_effort_scope_lists_every_match() {
        assert_eq!(
            plan("Combien de voix à Tiapoum ?").unwrap(),
            "SELECT circonscription, SUM(voix) AS total_voix FROM vw_results_clean \
             WHERE circonscription IN ('TIAPOUM, COMMUNE', 'NOE, NOUAMOU, TIAPOUM, SOUS-PREFECTURES') \
             GROUP BY circonscription ORDER BY total_voix DESC"
        );
    }

    #[test]
    fn test_literals_are_escaped() {
        let (translator, _) = build(ScriptedBackend::answering("UNANSWERABLE"));
        let entities = vec![ResolvedEntity {
            surface: "N ZI".to_string(),
            matches: vec![EntityMatch {
                table: "vw_results_clean".to_string(),
                column: "region".to_string(),
                value: "N'ZI".to_string(),
                kind: MatchKind::Exact,
            }],
        }];
        let sql = translator.plan("Voix dans le N'Zi", &entities).unwrap();
        assert_eq!(sql, "SELECT SUM(voix) AS total_voix FROM vw_results_clean WHERE region = 'N''ZI'");
    }

    #[test]
    fn test_unknown_place_gets_no_template() {
        assert_eq!(plan("Combien de voix pour le RHDP à Abengourou ?"), None);
        assert_eq!(plan("Taux de participation à Abengourou"), None);
        assert_eq!(plan("Qui a gagné à Abengourou ?"), None);
    }

    #[tokio::test]
    async fn test_unknown_place_goes_to_backend() {
        let (translator, backend) = build(ScriptedBackend::answering("UNANSWERABLE"));
        let q = "Combien de voix pour le RHDP à Abengourou ?";
        let entities = EntityResolver::new(&test_catalog()).resolve(q);
        let err = translator.translate(q, &entities).await.unwrap_err();
        assert!(matches!(err, PipelineError::Unanswerable { .. }));
        assert_eq!(backend.translate_count(), 1);
    }

    #[test]
    fn test_every_template_passes_the_validator() {
        let validator = SqlSafetyValidator::new(Arc::new(test_catalog()));
        for q in [
            "Combien de voix pour le RHDP dans la région du Poro ?",
            "Qui a gagné à Cocody ?",
            "Compare les résultats du RHDP et du PDCI",
            "Taux de participation à Bouaké",
            "Participation à Tiapoum",
            "Top 5 des candidats",
            "Classement des partis",
            "Qui sont les adversaires de Traore ?",
            "Combien de sièges pour le PDCI ?",
            "Combien de sièges dans la région du Poro ?",
            "Voix du FPI par région",
            "Combien de voix à Tiapoum ?",
            "Résultats de Divo",
        ] {
            let sql = plan(q).unwrap();
            let verdict = validator.verdict(&sql);
            assert!(verdict.accepted, "{} -> {} ({:?})", q, sql, verdict.reason);
        }
    }

    #[tokio::test]
    async fn test_backend_reply_is_cleaned_and_capped() {
        let (translator, backend) = build(ScriptedBackend::answering(
            "Voici la requête :\n```sql\nSELECT AVG(score) AS moyenne FROM vw_results_clean\n```",
        ));
        let query = translator.translate("Quelle est la moyenne des scores ?", &[]).await.unwrap();
        assert_eq!(query.sql, "SELECT AVG(score) AS moyenne FROM vw_results_clean LIMIT 50");
        assert_eq!(query.origin, QueryOrigin::Backend);
        assert_eq!(query.tables, vec!["vw_results_clean".to_string()]);
        assert_eq!(backend.translate_count(), 1);
    }

    #[tokio::test]
    async fn test_backend_unanswerable_and_unknown_tables() {
        let (translator, _) = build(ScriptedBackend::answering("UNANSWERABLE"));
        let err = translator.translate("Quelle est la moyenne des scores ?", &[]).await.unwrap_err();
        assert!(matches!(err, PipelineError::Unanswerable { .. }));

        let (translator, _) = build(ScriptedBackend::answering("SELECT * FROM users"));
        let err = translator.translate("Quelle est la moyenne des scores ?", &[]).await.unwrap_err();
        assert!(matches!(err, PipelineError::Unanswerable { .. }));

        let (translator, _) = build(ScriptedBackend::answering("I cannot help with that."));
        let err = translator.translate("Quelle est la moyenne des scores ?", &[]).await.unwrap_err();
        assert!(matches!(err, PipelineError::Unanswerable { .. }));
    }

    #[tokio::test]
    async fn test_backend_failures() {
        let mut scripted = ScriptedBackend::answering("");
        scripted.translate_reply = Err(BackendError::Timeout(std::time::Duration::from_secs(20)));
        let (translator, backend) = build(scripted);
        let err = translator.translate("Quelle est la moyenne des scores ?", &[]).await.unwrap_err();
        assert!(matches!(err, PipelineError::Unanswerable { .. }));
        assert_eq!(backend.translate_count(), 1);

        let mut scripted = ScriptedBackend::answering("");
        scripted.translate_reply = Err(BackendError::Unavailable("connection refused".to_string()));
        let (translator, backend) = build(scripted);
        let err = translator.translate("Quelle est la moyenne des scores ?", &[]).await.unwrap_err();
        assert!(matches!(err, PipelineError::BackendUnavailable { .. }));
        assert_eq!(backend.translate_count(), 2);
    }

    #[tokio::test]
    async fn test_statement_before_select_is_kept() {
        let validator = SqlSafetyValidator::new(Arc::new(test_catalog()));
        for reply in [
            "DELETE FROM vw_results_clean; SELECT AVG(score) FROM vw_results_clean",
            "DROP TABLE vw_winners\nSELECT AVG(score) FROM vw_results_clean",
        ] {
            let (translator, _) = build(ScriptedBackend::answering(reply));
            let query = translator.translate("Quelle est la moyenne des scores ?", &[]).await.unwrap();
            assert_eq!(query.sql, reply);
            assert!(!validator.verdict(&query.sql).accepted, "{}", reply);
        }
    }

    #[tokio::test]
    async fn test_correction_sends_feedback() {
        let (translator, backend) = build(
            ScriptedBackend::answering("SELECT votes FROM vw_results_clean")
                .correcting("SELECT SUM(voix) AS total_voix FROM vw_results_clean"),
        );
        let query = translator
            .correct(
                "Total des voix ?",
                &[],
                "SELECT votes FROM vw_results_clean",
                "column \"votes\" does not exist",
            )
            .await
            .unwrap();
        assert_eq!(query.sql, "SELECT SUM(voix) AS total_voix FROM vw_results_clean LIMIT 50");
        assert_eq!(
            backend.feedback_seen(),
            vec!["SELECT votes FROM vw_results_clean\nError: column \"votes\" does not exist".to_string()]
        );
    }

    #[tokio::test]
    async fn test_multi_statement_reply_reaches_validator() {
        let (translator, _) = build(ScriptedBackend::answering(
            "SELECT voix FROM vw_results_clean; DROP TABLE vw_results_clean",
        ));
        let query = translator.translate("Quelle est la moyenne des scores ?", &[]).await.unwrap();
        let validator = SqlSafetyValidator::new(Arc::new(test_catalog()));
        assert_eq!(validator.verdict(&query.sql).reason.as_deref(), Some("multi-statement batch"));
    }
}
