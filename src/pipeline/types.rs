//! Data types flowing through the question pipeline

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A user question, one per conversation turn
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub text: String,
    pub turn_id: Uuid,
}

impl Question {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            turn_id: Uuid::new_v4(),
        }
    }
}

// =============================================================================
// INTENT
// =============================================================================

/// Topics of the closed domain taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    VoteCounts,
    Candidates,
    Localities,
    Parties,
    Turnout,
    SeatAllocation,
}

impl Topic {
    pub const ALL: [Topic; 6] = [
        Topic::VoteCounts,
        Topic::Candidates,
        Topic::Localities,
        Topic::Parties,
        Topic::Turnout,
        Topic::SeatAllocation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::VoteCounts => "vote_counts",
            Topic::Candidates => "candidates",
            Topic::Localities => "localities",
            Topic::Parties => "parties",
            Topic::Turnout => "turnout",
            Topic::SeatAllocation => "seat_allocation",
        }
    }

    pub fn parse(raw: &str) -> Option<Topic> {
        let raw = raw.trim();
        Topic::ALL.into_iter().find(|t| t.as_str().eq_ignore_ascii_case(raw))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentCategory {
    /// Election-results question, may proceed
    Data,
    /// Greeting without a question
    Greeting,
    /// Asks to change or delete data
    WriteRequest,
    OffTopic,
    /// Backend could not classify; treated as off-topic
    Unclassified,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentVerdict {
    pub in_domain: bool,
    pub category: IntentCategory,
    pub topics: Vec<Topic>,
    pub reason: String,
}

impl IntentVerdict {
    pub fn in_domain(topics: Vec<Topic>, reason: impl Into<String>) -> Self {
        Self {
            in_domain: true,
            category: IntentCategory::Data,
            topics,
            reason: reason.into(),
        }
    }

    pub fn refused(category: IntentCategory, reason: impl Into<String>) -> Self {
        Self {
            in_domain: false,
            category,
            topics: Vec::new(),
            reason: reason.into(),
        }
    }
}

// =============================================================================
// ENTITIES
// =============================================================================

/// How a surface text matched a catalog value
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    /// Whole value or alias
    Exact,
    /// Whole component of a value (one commune of a constituency, one word of a name)
    Component,
    Fuzzy,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityMatch {
    pub table: String,
    pub column: String,
    pub value: String,
    pub kind: MatchKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedEntity {
    pub surface: String,
    pub matches: Vec<EntityMatch>,
}

impl ResolvedEntity {
    pub fn is_ambiguous(&self) -> bool {
        self.matches.len() > 1
    }

    pub fn resolved(&self) -> Option<&EntityMatch> {
        match self.matches.as_slice() {
            [only] => Some(only),
            _ => None,
        }
    }
}

// =============================================================================
// QUERIES
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryOrigin {
    /// Built by the deterministic planner
    Template,
    /// Written by the language backend
    Backend,
}

/// SQL produced by the translator, not yet validated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateQuery {
    pub sql: String,
    pub tables: Vec<String>,
    pub columns: Vec<String>,
    pub origin: QueryOrigin,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationVerdict {
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ValidationVerdict {
    pub fn accept() -> Self {
        Self {
            accepted: true,
            reason: None,
        }
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        Self {
            accepted: false,
            reason: Some(reason.into()),
        }
    }
}

/// Tabular result of an executed query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub row_count: usize,
    /// Rows were dropped by the executor row cap
    pub truncated: bool,
}

impl QueryResult {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        let row_count = rows.len();
        Self {
            columns,
            rows,
            row_count,
            truncated: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.row_count == 0
    }
}

// =============================================================================
// ANSWERS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartKind {
    Bar,
    Pie,
    Histogram,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartPoint {
    pub label: String,
    pub value: f64,
}

/// Structured chart specification for the rendering collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartSpec {
    pub kind: ChartKind,
    pub x_field: String,
    pub y_field: String,
    pub data: Vec<ChartPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComposedAnswer {
    pub text: String,
    pub data: QueryResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chart: Option<ChartSpec>,
    /// SQL that produced the data
    pub sql: String,
    /// Answer covers every match of an entity left ambiguous after clarification
    pub best_effort: bool,
}
