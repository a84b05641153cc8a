//! Clarification store
//!
//! Holds the questions paused on an ambiguous entity until the user picks one of the
//! offered records. Entries live for one round only: `take` removes them, and anything
//! older than the TTL is treated as gone.

use super::types::{ChartKind, ResolvedEntity};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// A question waiting for the user to pick one record of an ambiguous entity
#[derive(Debug, Clone)]
pub struct PendingClarification {
    pub id: Uuid,
    pub question: String,
    pub entities: Vec<ResolvedEntity>,
    /// Index in `entities` of the entity the user is asked about
    pub ambiguous: usize,
    pub chart: Option<ChartKind>,
    pub created_at: DateTime<Utc>,
}

impl PendingClarification {
    pub fn new(
        question: impl Into<String>,
        entities: Vec<ResolvedEntity>,
        ambiguous: usize,
        chart: Option<ChartKind>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            question: question.into(),
            entities,
            ambiguous,
            chart,
            created_at: Utc::now(),
        }
    }

    pub fn entity(&self) -> Option<&ResolvedEntity> {
        self.entities.get(self.ambiguous)
    }
}

/// Thread-safe, TTL-bounded clarification store
pub struct ClarificationStore {
    pending: Arc<RwLock<HashMap<Uuid, PendingClarification>>>,
    ttl: Duration,
}

impl ClarificationStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            pending: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    fn is_expired(&self, entry: &PendingClarification, now: DateTime<Utc>) -> bool {
        now - entry.created_at >= self.ttl
    }

    pub async fn insert(&self, entry: PendingClarification) -> Uuid {
        let id = entry.id;
        self.pending.write().await.insert(id, entry);
        id
    }

    /// Remove and return a pending clarification, `None` when unknown or expired
    pub async fn take(&self, id: Uuid) -> Option<PendingClarification> {
        let entry = self.pending.write().await.remove(&id)?;
        if self.is_expired(&entry, Utc::now()) {
            debug!("⌛ Clarification {} expired", id);
            return None;
        }
        Some(entry)
    }

    /// Drop expired entries, returning how many were removed
    pub async fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut pending = self.pending.write().await;
        let before = pending.len();
        pending.retain(|_, entry| !self.is_expired(entry, now));
        before - pending.len()
    }

    pub async fn len(&self) -> usize {
        self.pending.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> PendingClarification {
        PendingClarification::new("Combien de voix à Tiapoum ?", vec![], 0, None)
    }

    #[tokio::test]
    async fn test_take_is_single_use() {
        let store = ClarificationStore::new(Duration::minutes(10));
        let id = store.insert(entry()).await;

        let taken = store.take(id).await.unwrap();
        assert_eq!(taken.question, "Combien de voix à Tiapoum ?");
        assert!(store.take(id).await.is_none());
    }

    #[tokio::test]
    async fn test_expired_entries_are_gone() {
        let store = ClarificationStore::new(Duration::zero());
        let id = store.insert(entry()).await;
        assert!(store.take(id).await.is_none());

        store.insert(entry()).await;
        store.insert(entry()).await;
        assert_eq!(store.purge_expired().await, 2);
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn test_purge_keeps_live_entries() {
        let store = ClarificationStore::new(Duration::minutes(10));
        store.insert(entry()).await;
        assert_eq!(store.purge_expired().await, 0);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_unknown_id() {
        let store = ClarificationStore::new(Duration::minutes(10));
        assert!(store.take(Uuid::new_v4()).await.is_none());
    }
}
