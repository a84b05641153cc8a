//! Language-understanding backend
//!
//! The pipeline only needs two capabilities from a language model:
//! `classify(question)` and `translate(question, schema, entities, feedback)`. Anything that
//! implements [`LanguageBackend`] can be plugged in; production uses [`OllamaBackend`].

mod ollama;
mod prompts;

pub use ollama::OllamaBackend;
pub use prompts::{classification_prompt, translation_prompt, UNANSWERABLE};

use crate::catalog::SchemaCatalog;
use crate::pipeline::types::ResolvedEntity;
use async_trait::async_trait;
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug, Clone)]
pub enum BackendError {
    #[error("backend call timed out after {0:?}")]
    Timeout(Duration),

    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("backend returned an unusable response: {0}")]
    InvalidResponse(String),
}

impl BackendError {
    /// Only transport failures are worth a second attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, BackendError::Unavailable(_))
    }
}

/// Verdict of the backend classifier, before the closed taxonomy is applied
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BackendClassification {
    pub in_domain: bool,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub reason: String,
}

#[async_trait]
pub trait LanguageBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn classify(&self, question: &str) -> Result<BackendClassification, BackendError>;

    /// Returns raw SQL text; cleaning and validation happen downstream.
    ///
    /// `feedback` carries the previous attempt and the database error it hit, when the
    /// pipeline asks for a corrected query.
    async fn translate(
        &self,
        question: &str,
        schema: &SchemaCatalog,
        entities: &[ResolvedEntity],
        feedback: Option<&str>,
    ) -> Result<String, BackendError>;
}

/// Timeout and retry budget for backend calls
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub timeout: Duration,
    pub max_retries: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            max_retries: 1,
            backoff: Duration::from_millis(500),
        }
    }
}

/// Run a backend call under the policy timeout, retrying transport failures.
///
/// Timeouts are not retried: a slow backend fails closed right away.
pub async fn call_with_retry<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, BackendError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, BackendError>>,
{
    let mut attempt: u32 = 0;
    loop {
        let outcome = match tokio::time::timeout(policy.timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::Timeout(policy.timeout)),
        };

        match outcome {
            Err(e) if e.is_retryable() && attempt < policy.max_retries => {
                attempt += 1;
                warn!("⚠️  Backend call failed ({}), retrying (attempt {})", e, attempt + 1);
                tokio::time::sleep(policy.backoff * attempt).await;
            }
            other => return other,
        }
    }
}

/// Strip markdown fences and surrounding prose markers from a model reply
pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let inner = if let Some(s) = trimmed.strip_prefix("```sql") {
        s
    } else if let Some(s) = trimmed.strip_prefix("```json") {
        s
    } else if let Some(s) = trimmed.strip_prefix("```") {
        s
    } else {
        trimmed
    };
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

/// Parse the JSON verdict produced for a classification prompt
pub fn parse_classification(raw: &str) -> Result<BackendClassification, BackendError> {
    let cleaned = strip_code_fences(raw);
    let start = cleaned.find('{');
    let end = cleaned.rfind('}');
    let json = match (start, end) {
        (Some(s), Some(e)) if s < e => &cleaned[s..=e],
        _ => {
            return Err(BackendError::InvalidResponse(
                "no JSON object in classification reply".to_string(),
            ))
        }
    };

    serde_json::from_str(json)
        .map_err(|e| BackendError::InvalidResponse(format!("bad classification JSON: {}", e)))
}

/// Scripted backend for tests across the crate
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    pub(crate) struct ScriptedBackend {
        pub classify_reply: Result<BackendClassification, BackendError>,
        pub translate_reply: Result<String, BackendError>,
        /// Reply to a translation that carries feedback, `translate_reply` when unset
        pub corrected_reply: Option<String>,
        pub classify_calls: AtomicU32,
        pub translate_calls: AtomicU32,
        pub feedback: Mutex<Vec<String>>,
    }

    impl ScriptedBackend {
        pub(crate) fn new(
            classify_reply: Result<BackendClassification, BackendError>,
            translate_reply: Result<String, BackendError>,
        ) -> Self {
            Self {
                classify_reply,
                translate_reply,
                corrected_reply: None,
                classify_calls: AtomicU32::new(0),
                translate_calls: AtomicU32::new(0),
                feedback: Mutex::new(Vec::new()),
            }
        }

        /// Classifies everything as in domain and translates to `sql`
        pub(crate) fn answering(sql: &str) -> Self {
            Self::new(
                Ok(BackendClassification {
                    in_domain: true,
                    topic: Some("vote_counts".to_string()),
                    reason: "scripted".to_string(),
                }),
                Ok(sql.to_string()),
            )
        }

        pub(crate) fn classify_count(&self) -> u32 {
            self.classify_calls.load(Ordering::SeqCst)
        }

        pub(crate) fn translate_count(&self) -> u32 {
            self.translate_calls.load(Ordering::SeqCst)
        }

        pub(crate) fn correcting(mut self, sql: &str) -> Self {
            self.corrected_reply = Some(sql.to_string());
            self
        }

        pub(crate) fn feedback_seen(&self) -> Vec<String> {
            self.feedback.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LanguageBackend for ScriptedBackend {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn classify(&self, _question: &str) -> Result<BackendClassification, BackendError> {
            self.classify_calls.fetch_add(1, Ordering::SeqCst);
            self.classify_reply.clone()
        }

        async fn translate(
            &self,
            _question: &str,
            _schema: &SchemaCatalog,
            _entities: &[ResolvedEntity],
            feedback: Option<&str>,
        ) -> Result<String, BackendError> {
            self.translate_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(feedback) = feedback {
                self.feedback.lock().unwrap().push(feedback.to_string());
                if let Some(corrected) = &self.corrected_reply {
                    return Ok(corrected.clone());
                }
            }
            self.translate_reply.clone()
        }
    }

    pub(crate) fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_millis(200),
            max_retries: 1,
            backoff: Duration::from_millis(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::testing::fast_policy;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_retries_unavailable_once() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<u32, BackendError> = call_with_retry(&fast_policy(), move || async move {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                Err(BackendError::Unavailable("connection refused".to_string()))
            } else {
                Ok(7)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_gives_up_after_one_retry() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<u32, BackendError> = call_with_retry(&fast_policy(), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(BackendError::Unavailable("down".to_string()))
        })
        .await;

        assert!(matches!(result, Err(BackendError::Unavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_timeout_is_not_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<u32, BackendError> = call_with_retry(&fast_policy(), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(1)
        })
        .await;

        assert!(matches!(result, Err(BackendError::Timeout(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_parse_classification_tolerates_fences() {
        let raw = "```json\n{\"in_domain\": true, \"topic\": \"turnout\", \"reason\": \"asks for participation\"}\n```";
        let verdict = parse_classification(raw).unwrap();
        assert!(verdict.in_domain);
        assert_eq!(verdict.topic.as_deref(), Some("turnout"));
    }

    #[test]
    fn test_parse_classification_rejects_prose() {
        assert!(matches!(
            parse_classification("Sure! This is about elections."),
            Err(BackendError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```sql\nSELECT 1\n```"), "SELECT 1");
        assert_eq!(strip_code_fences("  SELECT 1 "), "SELECT 1");
    }
}
