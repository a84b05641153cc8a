//! Intent Classifier
//!
//! Decides whether a question belongs to the closed election-results domain. A
//! deterministic pre-screen handles the obvious cases (empty text, write requests,
//! greetings, explicit off-topic markers, taxonomy keywords); only what is left goes to
//! the language backend. Any backend failure fails closed.

use super::types::{IntentCategory, IntentVerdict, Question, Topic};
use crate::backend::{call_with_retry, LanguageBackend, RetryPolicy};
use crate::catalog::{SchemaCatalog, SemanticType};
use crate::text;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Wording that asks to change data, in French and English
const WRITE_WORDS: &[&str] = &[
    "DELETE", "DROP", "INSERT", "UPDATE", "CREATE", "REPLACE", "MERGE", "REMOVE", "ERASE",
    "MODIFY", "SUPPRIMER", "SUPPRIME", "SUPRIMER", "SUPRIME", "EFFACE", "EFFACER", "DETRUIRE",
    "DETRUIT", "MODIFIER", "MODIFIE", "AJOUTER", "AJOUTE", "CHANGER", "REMPLACE", "REMPLACER",
    "CREE", "CREER", "VIDER", "NETTOYER", "ENLEVER", "RETIRER",
];

const GREETING_WORDS: &[&str] = &[
    "BONJOUR", "BONSOIR", "SALUT", "COUCOU", "HELLO", "HI", "HEY", "MERCI", "THANKS",
];

/// Filler accepted around a greeting ("bonjour a tous", "hello there")
const GREETING_FILLER: &[&str] = &[
    "A", "TOUS", "TOUT", "LE", "MONDE", "THERE", "EVERYONE", "CA", "VA", "COMMENT", "HOW",
    "ARE", "YOU", "VOUS", "ALLEZ", "BEAUCOUP",
];

const OFF_TOPIC_MARKERS: &[&str] = &[
    "METEO", "WEATHER", "CLIMAT", "CLIMATE", "FOOTBALL", "SPORT", "SPORTS", "MUSIQUE", "MUSIC",
    "CINEMA", "FILM", "MOVIE", "CUISINE", "RECETTE", "RECIPE", "VOYAGE", "VACANCES", "TRAVEL",
    "SANTE", "HEALTH", "BLAGUE", "JOKE", "HISTOIRE", "HISTORY", "CONSTITUTION", "PRESIDENTIELLE",
    "PRESIDENT", "COMMENT FAIRE", "HOW TO",
];

/// Keywords of the closed taxonomy
const TOPIC_KEYWORDS: &[(Topic, &[&str])] = &[
    (
        Topic::VoteCounts,
        &[
            "VOIX", "VOTE", "VOTES", "SUFFRAGE", "SUFFRAGES", "SCORE", "SCORES", "RESULTAT",
            "RESULTATS", "RESULT", "RESULTS", "CLASSEMENT", "RANKING", "TOP",
        ],
    ),
    (
        Topic::Candidates,
        &[
            "CANDIDAT", "CANDIDATS", "CANDIDATE", "CANDIDATES", "DEPUTE", "DEPUTES", "ELU",
            "ELUS", "ELUE", "ELECTED", "GAGNE", "GAGNANT", "VAINQUEUR", "WINNER", "WON",
            "ADVERSAIRE", "ADVERSAIRES", "OPPONENT", "OPPONENTS",
        ],
    ),
    (
        Topic::Localities,
        &[
            "CIRCONSCRIPTION", "CIRCONSCRIPTIONS", "COMMUNE", "COMMUNES", "REGION", "REGIONS",
            "DISTRICT", "LOCALITE", "CONSTITUENCY", "CONSTITUENCIES", "SOUS PREFECTURE",
        ],
    ),
    (
        Topic::Parties,
        &["PARTI", "PARTIS", "PARTY", "PARTIES", "COALITION", "GROUPEMENT"],
    ),
    (
        Topic::Turnout,
        &[
            "PARTICIPATION", "TURNOUT", "ABSTENTION", "INSCRITS", "VOTANTS", "BULLETINS",
            "REGISTERED",
        ],
    ),
    (
        Topic::SeatAllocation,
        &["SIEGE", "SIEGES", "SEAT", "SEATS", "MAJORITE", "MAJORITY"],
    ),
];

pub struct IntentClassifier {
    backend: Arc<dyn LanguageBackend>,
    policy: RetryPolicy,
    forbidden: Vec<String>,
    party_names: Vec<String>,
}

impl IntentClassifier {
    pub fn new(catalog: &SchemaCatalog, backend: Arc<dyn LanguageBackend>, policy: RetryPolicy) -> Self {
        let forbidden = catalog
            .security
            .forbidden_keywords
            .iter()
            .map(|k| text::normalize(k))
            .filter(|k| !k.is_empty())
            .collect();

        let mut party_names: Vec<String> = Vec::new();
        for (_, column) in catalog.entity_columns() {
            if column.semantic_type != SemanticType::Party {
                continue;
            }
            let aliases = column.value_aliases.values().flatten();
            for name in column.samples.iter().chain(aliases) {
                let normalized = text::normalize(name);
                if !normalized.is_empty() && !party_names.contains(&normalized) {
                    party_names.push(normalized);
                }
            }
        }

        Self {
            backend,
            policy,
            forbidden,
            party_names,
        }
    }

    /// Classify a question. Never fails: backend trouble yields an out-of-domain verdict.
    pub async fn classify(&self, question: &Question) -> IntentVerdict {
        if let Some(verdict) = self.prescreen(&question.text) {
            debug!("🧭 Pre-screen verdict for {}: {:?}", question.turn_id, verdict.category);
            return verdict;
        }

        let backend = &self.backend;
        let text = question.text.as_str();
        match call_with_retry(&self.policy, move || backend.classify(text)).await {
            Ok(answer) => match answer.topic.as_deref().and_then(Topic::parse) {
                Some(topic) if answer.in_domain => {
                    info!("🧭 Backend classified {} as {}", question.turn_id, topic.as_str());
                    IntentVerdict::in_domain(vec![topic], answer.reason)
                }
                _ => IntentVerdict::refused(
                    IntentCategory::OffTopic,
                    if answer.reason.is_empty() {
                        "not about the election results".to_string()
                    } else {
                        answer.reason
                    },
                ),
            },
            Err(e) => {
                warn!("⚠️  Classification failed for {}, refusing: {}", question.turn_id, e);
                IntentVerdict::refused(IntentCategory::Unclassified, "the question could not be classified")
            }
        }
    }

    /// Deterministic verdict when one is obvious, `None` when the backend must decide
    pub fn prescreen(&self, question: &str) -> Option<IntentVerdict> {
        let normalized = text::normalize(question);
        if normalized.is_empty() {
            return Some(IntentVerdict::refused(IntentCategory::OffTopic, "empty question"));
        }
        let words: Vec<&str> = normalized.split(' ').collect();

        let write_request = WRITE_WORDS.iter().any(|w| text::contains_phrase(&normalized, w))
            || self.forbidden.iter().any(|w| text::contains_phrase(&normalized, w));
        if write_request {
            return Some(IntentVerdict::refused(
                IntentCategory::WriteRequest,
                "the election results are read-only",
            ));
        }

        let greets = words.iter().any(|w| GREETING_WORDS.contains(w));
        if greets
            && words
                .iter()
                .all(|w| GREETING_WORDS.contains(w) || GREETING_FILLER.contains(w))
        {
            return Some(IntentVerdict::refused(IntentCategory::Greeting, "greeting"));
        }

        if OFF_TOPIC_MARKERS
            .iter()
            .any(|marker| text::contains_phrase(&normalized, marker))
        {
            return Some(IntentVerdict::refused(
                IntentCategory::OffTopic,
                "not about the 2025 legislative election results",
            ));
        }

        let mut topics: Vec<Topic> = Vec::new();
        for (topic, keywords) in TOPIC_KEYWORDS {
            if keywords.iter().any(|k| text::contains_phrase(&normalized, k)) {
                topics.push(*topic);
            }
        }
        if !topics.contains(&Topic::Parties)
            && self
                .party_names
                .iter()
                .any(|p| text::contains_phrase(&normalized, p))
        {
            topics.push(Topic::Parties);
        }

        if topics.is_empty() {
            None
        } else {
            Some(IntentVerdict::in_domain(topics, "matched election vocabulary"))
        }
    }
}
