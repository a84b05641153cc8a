//! Pipeline Orchestrator
//!
//! Wires the stages into one linear flow per question:
//!
//! ```text
//! classify -> resolve -> (clarify) -> translate -> validate -> execute -> compose
//! ```
//!
//! Any stage can short-circuit with a refusal or a clarification request. The
//! clarification loop is bounded to one round: after the user answers, a still
//! unresolved entity is answered best-effort with every matching record.

use super::composer::ResponseComposer;
use super::executor::{DataStore, QueryExecutor};
use super::intent::IntentClassifier;
use super::resolver::EntityResolver;
use super::session::{ClarificationStore, PendingClarification};
use super::translator::QueryTranslator;
use super::types::{
    CandidateQuery, ChartKind, ComposedAnswer, EntityMatch, IntentCategory, QueryOrigin,
    QueryResult, Question, ResolvedEntity,
};
use super::validator::{SqlSafetyValidator, ValidatedQuery};
use crate::backend::{LanguageBackend, RetryPolicy};
use crate::catalog::SchemaCatalog;
use crate::error::{ErrorKind, PipelineError};
use crate::text;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

// =============================================================================
// OUTCOMES
// =============================================================================

/// Result of one conversation turn
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PipelineOutcome {
    Answered(Answered),
    Clarification(ClarificationRequest),
    Refused(Refusal),
    Greeting(Greeting),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Answered {
    pub turn_id: Uuid,
    #[serde(flatten)]
    pub answer: ComposedAnswer,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClarificationOption {
    /// 1-based, as shown to the user
    pub index: usize,
    pub label: String,
    pub column: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClarificationRequest {
    pub turn_id: Uuid,
    /// Id to post the choice to
    pub clarification_id: Uuid,
    pub surface: String,
    pub message: String,
    pub options: Vec<ClarificationOption>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Refusal {
    pub turn_id: Uuid,
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Greeting {
    pub turn_id: Uuid,
    pub message: String,
}

impl PipelineOutcome {
    fn refused(turn_id: Uuid, error: &PipelineError) -> Self {
        PipelineOutcome::Refused(Refusal {
            turn_id,
            kind: error.kind(),
            message: error.user_message(),
        })
    }
}

// =============================================================================
// PIPELINE
// =============================================================================

/// Runtime knobs of the pipeline
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub retry: RetryPolicy,
    pub max_rows: usize,
    pub statement_timeout: Duration,
    pub clarification_ttl: chrono::Duration,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            max_rows: 200,
            statement_timeout: Duration::from_secs(5),
            clarification_ttl: chrono::Duration::minutes(10),
        }
    }
}

pub struct QueryPipeline {
    catalog: Arc<SchemaCatalog>,
    classifier: IntentClassifier,
    resolver: EntityResolver,
    translator: QueryTranslator,
    validator: SqlSafetyValidator,
    executor: QueryExecutor,
    composer: ResponseComposer,
    clarifications: ClarificationStore,
}

impl QueryPipeline {
    pub fn new(
        catalog: Arc<SchemaCatalog>,
        backend: Arc<dyn LanguageBackend>,
        store: Arc<dyn DataStore>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            classifier: IntentClassifier::new(&catalog, backend.clone(), options.retry),
            resolver: EntityResolver::new(&catalog),
            translator: QueryTranslator::new(catalog.clone(), backend, options.retry),
            validator: SqlSafetyValidator::new(catalog.clone()),
            executor: QueryExecutor::new(store, options.max_rows, options.statement_timeout),
            composer: ResponseComposer::new(catalog.clone()),
            clarifications: ClarificationStore::new(options.clarification_ttl),
            catalog,
        }
    }

    /// Answer a new question
    pub async fn ask(&self, text: &str, chart: Option<ChartKind>) -> PipelineOutcome {
        let purged = self.clarifications.purge_expired().await;
        if purged > 0 {
            info!("🧹 Purged {} expired clarification(s)", purged);
        }

        let question = Question::new(text);
        info!("❓ Turn {}: {}", question.turn_id, question.text);

        let verdict = self.classifier.classify(&question).await;
        if !verdict.in_domain {
            if verdict.category == IntentCategory::Greeting {
                return PipelineOutcome::Greeting(Greeting {
                    turn_id: question.turn_id,
                    message: self.greeting(),
                });
            }
            info!("🚫 Turn {} refused: {:?} ({})", question.turn_id, verdict.category, verdict.reason);
            let error = PipelineError::OutOfDomain {
                reason: verdict.reason,
            };
            return PipelineOutcome::refused(question.turn_id, &error);
        }

        let entities = self.resolver.resolve(&question.text);
        if let Some(ambiguous) = entities.iter().position(ResolvedEntity::is_ambiguous) {
            return self
                .request_clarification(&question, entities, ambiguous, chart)
                .await;
        }

        self.answer(question.turn_id, &question.text, &entities, chart, false)
            .await
    }

    /// Resume a question paused on an ambiguous entity. `None` when the id is unknown
    /// or expired.
    pub async fn clarify(&self, id: Uuid, choice: &str) -> Option<PipelineOutcome> {
        let mut pending = self.clarifications.take(id).await?;
        let turn_id = Uuid::new_v4();

        let chosen = pending.entity().and_then(|e| pick(e, choice)).cloned();
        match (&chosen, pending.entities.get_mut(pending.ambiguous)) {
            (Some(choice), Some(entity)) => {
                info!("✅ Clarification {} resolved to {} = '{}'", id, choice.column, choice.value);
                entity.matches = vec![choice.clone()];
            }
            _ => warn!("🤷 Clarification {} left unresolved, answering best-effort", id),
        }

        let best_effort = pending.entities.iter().any(ResolvedEntity::is_ambiguous);
        Some(
            self.answer(turn_id, &pending.question, &pending.entities, pending.chart, best_effort)
                .await,
        )
    }

    async fn request_clarification(
        &self,
        question: &Question,
        entities: Vec<ResolvedEntity>,
        ambiguous: usize,
        chart: Option<ChartKind>,
    ) -> PipelineOutcome {
        let entity = &entities[ambiguous];
        let error = PipelineError::AmbiguousEntity {
            entities: vec![entity.clone()],
        };
        let options = self.options(entity);
        let surface = entity.surface.clone();
        info!(
            "🔀 Turn {}: '{}' matches {} records, asking the user",
            question.turn_id,
            surface,
            options.len()
        );

        let pending = PendingClarification::new(question.text.clone(), entities, ambiguous, chart);
        let clarification_id = self.clarifications.insert(pending).await;

        PipelineOutcome::Clarification(ClarificationRequest {
            turn_id: question.turn_id,
            clarification_id,
            surface,
            message: error.user_message(),
            options,
        })
    }

    fn options(&self, entity: &ResolvedEntity) -> Vec<ClarificationOption> {
        entity
            .matches
            .iter()
            .enumerate()
            .map(|(i, m)| {
                let label = self
                    .catalog
                    .semantic_type_of(&m.column)
                    .map(|t| t.label())
                    .unwrap_or("Value");
                ClarificationOption {
                    index: i + 1,
                    label: format!("{}: {}", label, m.value),
                    column: m.column.clone(),
                    value: m.value.clone(),
                }
            })
            .collect()
    }

    async fn answer(
        &self,
        turn_id: Uuid,
        question: &str,
        entities: &[ResolvedEntity],
        chart: Option<ChartKind>,
        best_effort: bool,
    ) -> PipelineOutcome {
        match self.run(question, entities, chart, best_effort).await {
            Ok(answer) => {
                info!("💬 Turn {} answered ({} row(s))", turn_id, answer.data.row_count);
                PipelineOutcome::Answered(Answered { turn_id, answer })
            }
            Err(e) => {
                warn!("⚠️  Turn {} failed: {}", turn_id, e);
                PipelineOutcome::refused(turn_id, &e)
            }
        }
    }

    async fn run(
        &self,
        question: &str,
        entities: &[ResolvedEntity],
        chart: Option<ChartKind>,
        best_effort: bool,
    ) -> Result<ComposedAnswer, PipelineError> {
        let candidate = self.translator.translate(question, entities).await?;
        let (validated, result) = match self.validate_and_execute(&candidate).await {
            // One corrected attempt for backend queries the database refused
            Err(PipelineError::ExecutionFailed { detail }) if candidate.origin == QueryOrigin::Backend => {
                info!("🔁 Backend query failed at execution, asking for a correction");
                let corrected = self
                    .translator
                    .correct(question, entities, &candidate.sql, &detail)
                    .await?;
                self.validate_and_execute(&corrected).await?
            }
            other => other?,
        };
        Ok(self
            .composer
            .compose(question, result, validated.sql(), chart, best_effort))
    }

    async fn validate_and_execute(
        &self,
        candidate: &CandidateQuery,
    ) -> Result<(ValidatedQuery, QueryResult), PipelineError> {
        let validated = self.validator.validate(candidate)?;
        debug!(
            "🛡️  Validated {:?} query over {}",
            validated.origin(),
            validated.tables().join(", ")
        );
        let result = self.executor.execute(&validated).await?;
        Ok((validated, result))
    }

    fn greeting(&self) -> String {
        let stats = &self.catalog.database.statistics;
        let mut facts: Vec<String> = Vec::new();
        if let Some(seats) = stats.total_seats {
            facts.push(format!("{} seats", seats));
        }
        if let Some(parties) = stats.total_parties {
            facts.push(format!("{} parties", parties));
        }
        if let Some(candidacies) = stats.total_candidacies {
            facts.push(format!("{} candidacies", candidacies));
        }

        let mut message =
            "Hello! I answer questions about the 2025 legislative election results".to_string();
        if !facts.is_empty() {
            message.push_str(&format!(" ({})", facts.join(", ")));
        }
        message.push_str(". Ask about votes, winners, seats, parties or turnout.");
        message
    }
}

/// Match a clarification reply against the offered records: a 1-based index, a whole
/// value, or a phrase found in exactly one value.
fn pick<'a>(entity: &'a ResolvedEntity, choice: &str) -> Option<&'a EntityMatch> {
    let trimmed = choice.trim();
    if let Ok(index) = trimmed.parse::<usize>() {
        return index.checked_sub(1).and_then(|i| entity.matches.get(i));
    }

    let wanted = text::normalize(trimmed);
    if wanted.is_empty() {
        return None;
    }
    if let Some(m) = entity
        .matches
        .iter()
        .find(|m| text::normalize(&m.value) == wanted)
    {
        return Some(m);
    }

    let mut containing = entity
        .matches
        .iter()
        .filter(|m| text::contains_phrase(&text::normalize(&m.value), &wanted));
    match (containing.next(), containing.next()) {
        (Some(only), None) => Some(only),
        _ => None,
    }
}
