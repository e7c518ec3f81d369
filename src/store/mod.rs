//! Event store: the append-only interaction log and the per-user bandit
//! registry.
//!
//! This is the one owned piece of cross-request state. Events append to an
//! [`EventLog`] backend (in-memory or SQLite); bandit state lives in memory
//! under one async mutex per user, so every bandit operation for a given
//! user is mutually exclusive while different users never contend.
//! `reset` deletes a user's bandit and log slice in one operation.

pub mod sqlite;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::bandit::FeatureBandit;
use crate::models::{EventType, UserEvent};

/// Errors that can occur in the event store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend connection failure.
    #[error("Store connection failed: {0}")]
    Connection(String),

    /// Query execution failure.
    #[error("Store query failed: {0}")]
    Query(String),

    /// Meta (de)serialization failure.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Schema creation failure.
    #[error("Schema error: {0}")]
    Schema(String),

    /// The event is malformed (e.g. empty user id). Intake logs and drops.
    #[error("Invalid event: {0}")]
    InvalidEvent(String),
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Default page size for event listings.
pub const DEFAULT_EVENT_LIMIT: usize = 100;

/// Hard cap on one event listing.
pub const MAX_EVENT_LIMIT: usize = 500;

/// Trait for append-only event log backends.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Append one event.
    async fn append(&self, event: &UserEvent) -> StoreResult<()>;

    /// List a user's events in timestamp order, up to `limit`.
    async fn list(&self, user_id: &str, limit: usize) -> StoreResult<Vec<UserEvent>>;

    /// Number of stored events for a user.
    async fn count(&self, user_id: &str) -> StoreResult<usize>;

    /// Remove every event for a user.
    async fn delete_user(&self, user_id: &str) -> StoreResult<()>;
}

/// In-memory event log, the default backend (state need not be durable).
#[derive(Default)]
pub struct MemoryEventLog {
    events: std::sync::Mutex<Vec<UserEvent>>,
}

impl MemoryEventLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventLog for MemoryEventLog {
    async fn append(&self, event: &UserEvent) -> StoreResult<()> {
        let mut events = self
            .events
            .lock()
            .map_err(|e| StoreError::Connection(format!("Lock error: {}", e)))?;
        events.push(event.clone());
        Ok(())
    }

    async fn list(&self, user_id: &str, limit: usize) -> StoreResult<Vec<UserEvent>> {
        let events = self
            .events
            .lock()
            .map_err(|e| StoreError::Connection(format!("Lock error: {}", e)))?;
        Ok(events
            .iter()
            .filter(|e| e.user_id == user_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn count(&self, user_id: &str) -> StoreResult<usize> {
        let events = self
            .events
            .lock()
            .map_err(|e| StoreError::Connection(format!("Lock error: {}", e)))?;
        Ok(events.iter().filter(|e| e.user_id == user_id).count())
    }

    async fn delete_user(&self, user_id: &str) -> StoreResult<()> {
        let mut events = self
            .events
            .lock()
            .map_err(|e| StoreError::Connection(format!("Lock error: {}", e)))?;
        events.retain(|e| e.user_id != user_id);
        Ok(())
    }
}

/// An impression the pipeline wants the bandit to track.
#[derive(Debug, Clone)]
pub struct ImpressionRecord {
    /// Arms of the shown document.
    pub arms: Vec<String>,

    /// The request that showed it.
    pub query_id: String,

    /// The shown document.
    pub source_id: String,
}

/// The owned event store: log backend plus per-user bandits.
pub struct EventStore {
    users: tokio::sync::RwLock<HashMap<String, Arc<tokio::sync::Mutex<FeatureBandit>>>>,
    log: Box<dyn EventLog>,
    impression_timeout_ms: u64,
}

impl EventStore {
    /// Create a store over the given log backend.
    pub fn new(log: Box<dyn EventLog>) -> Self {
        Self {
            users: tokio::sync::RwLock::new(HashMap::new()),
            log,
            impression_timeout_ms: crate::bandit::DEFAULT_IMPRESSION_TIMEOUT_MS,
        }
    }

    /// Create a store with the in-memory log backend.
    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryEventLog::new()))
    }

    /// Override the impression timeout (tests).
    pub fn with_impression_timeout(mut self, timeout_ms: u64) -> Self {
        self.impression_timeout_ms = timeout_ms;
        self
    }

    /// Milliseconds since the Unix epoch.
    pub fn now_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    /// Get-or-create the per-user bandit handle.
    async fn bandit_handle(&self, user_id: &str) -> Arc<tokio::sync::Mutex<FeatureBandit>> {
        {
            let users = self.users.read().await;
            if let Some(handle) = users.get(user_id) {
                return handle.clone();
            }
        }
        let mut users = self.users.write().await;
        users
            .entry(user_id.to_string())
            .or_insert_with(|| {
                Arc::new(tokio::sync::Mutex::new(FeatureBandit::with_timeout(
                    self.impression_timeout_ms,
                )))
            })
            .clone()
    }

    /// Start-of-request bandit step: resolve stale impressions from the
    /// previous request, then snapshot scores. Both happen under the user's
    /// lock so the read cannot interleave with another mutation.
    pub async fn begin_request(&self, user_id: &str) -> HashMap<String, f64> {
        let handle = self.bandit_handle(user_id).await;
        let mut bandit = handle.lock().await;
        bandit.resolve_pending_impressions(Self::now_ms());
        bandit.scores()
    }

    /// Record pending impressions for the documents a request showed.
    pub async fn record_impressions(&self, user_id: &str, impressions: Vec<ImpressionRecord>) {
        if impressions.is_empty() {
            return;
        }
        let handle = self.bandit_handle(user_id).await;
        let mut bandit = handle.lock().await;
        let now_ms = Self::now_ms();
        for record in impressions {
            bandit.record_pending_impression(
                record.arms,
                &record.query_id,
                &record.source_id,
                now_ms,
            );
        }
    }

    /// Ingest one interaction event: append to the log, then apply its
    /// bandit effect. Click-equivalent events credit the arms carried in
    /// the event meta; hover/expand events only log.
    ///
    /// # Errors
    /// Returns `StoreError::InvalidEvent` for a malformed event (callers
    /// log and drop), or a backend error from the log append.
    pub async fn record_event(&self, event: UserEvent) -> StoreResult<()> {
        if event.user_id.trim().is_empty() {
            return Err(StoreError::InvalidEvent("empty user id".to_string()));
        }

        self.log.append(&event).await?;

        let clicked_arms: Vec<Vec<String>> = match event.event_type {
            EventType::SourceClicked | EventType::CitationClicked => event
                .meta
                .as_ref()
                .and_then(|m| m.features.as_ref())
                .map(|f| vec![f.arms()])
                .unwrap_or_default(),
            EventType::AnswerSaved => event
                .meta
                .as_ref()
                .and_then(|m| m.all_source_features.as_ref())
                .map(|sets| sets.iter().map(|f| f.arms()).collect())
                .unwrap_or_default(),
            EventType::CitationHovered | EventType::SourceExpanded => Vec::new(),
        };

        if !clicked_arms.is_empty() {
            let handle = self.bandit_handle(&event.user_id).await;
            let mut bandit = handle.lock().await;
            for arms in clicked_arms {
                bandit.record_click(&arms, event.source_id.as_deref());
            }
        }
        Ok(())
    }

    /// List a user's events.
    pub async fn events(&self, user_id: &str, limit: Option<usize>) -> StoreResult<Vec<UserEvent>> {
        let limit = limit.unwrap_or(DEFAULT_EVENT_LIMIT).min(MAX_EVENT_LIMIT);
        self.log.list(user_id, limit).await
    }

    /// A user's top-`k` arms with their scores, plus total interactions.
    pub async fn preferences(
        &self,
        user_id: &str,
        k: usize,
    ) -> StoreResult<(Vec<(String, f64)>, usize)> {
        let top_arms = {
            let users = self.users.read().await;
            match users.get(user_id) {
                Some(handle) => handle.lock().await.top_k(k),
                None => Vec::new(),
            }
        };
        let total = self.log.count(user_id).await?;
        Ok((top_arms, total))
    }

    /// Deterministic score snapshot for a user (empty when untracked).
    pub async fn scores(&self, user_id: &str) -> HashMap<String, f64> {
        let users = self.users.read().await;
        match users.get(user_id) {
            Some(handle) => handle.lock().await.scores(),
            None => HashMap::new(),
        }
    }

    /// Wipe all per-user state: bandit, pending impressions, and log slice.
    pub async fn reset(&self, user_id: &str) -> StoreResult<()> {
        {
            let mut users = self.users.write().await;
            users.remove(user_id);
        }
        self.log.delete_user(user_id).await?;
        debug!("reset all state for user {}", user_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ContentFeatures, Depth, EventMeta, Style};

    fn click_event(user: &str, source: &str) -> UserEvent {
        UserEvent {
            user_id: user.to_string(),
            timestamp: 1_700_000_000_000,
            event_type: EventType::SourceClicked,
            source_id: Some(source.to_string()),
            query_id: Some("q1".to_string()),
            meta: Some(EventMeta {
                features: Some(ContentFeatures {
                    depth: Some(Depth::Expert),
                    style: Some(Style::Technical),
                    ..Default::default()
                }),
                ..Default::default()
            }),
        }
    }

    #[tokio::test]
    async fn test_clicks_feed_preferences() {
        let store = EventStore::in_memory();
        for i in 0..5 {
            store
                .record_event(click_event("u1", &format!("src{}", i)))
                .await
                .unwrap();
        }

        let (top_arms, total) = store.preferences("u1", 5).await.unwrap();
        assert_eq!(total, 5);
        assert!(
            top_arms[0].0 == "depth:expert" || top_arms[0].0 == "style:technical",
            "unexpected top arm {:?}",
            top_arms[0]
        );
        // 5 clicks at 0.5 credit each: score = (2.5 + 1) / (2.5 + 0 + 2).
        assert!((top_arms[0].1 - 3.5 / 4.5).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_hover_and_expand_only_log() {
        let store = EventStore::in_memory();
        let mut event = click_event("u1", "src");
        event.event_type = EventType::CitationHovered;
        store.record_event(event).await.unwrap();

        let (top_arms, total) = store.preferences("u1", 5).await.unwrap();
        assert_eq!(total, 1);
        assert!(top_arms.is_empty());
    }

    #[tokio::test]
    async fn test_answer_saved_credits_every_source() {
        let store = EventStore::in_memory();
        let event = UserEvent {
            user_id: "u1".to_string(),
            timestamp: 0,
            event_type: EventType::AnswerSaved,
            source_id: None,
            query_id: Some("q1".to_string()),
            meta: Some(EventMeta {
                all_source_features: Some(vec![
                    ContentFeatures {
                        depth: Some(Depth::Expert),
                        ..Default::default()
                    },
                    ContentFeatures {
                        style: Some(Style::Academic),
                        ..Default::default()
                    },
                ]),
                ..Default::default()
            }),
        };
        store.record_event(event).await.unwrap();

        let scores = store.scores("u1").await;
        assert!(scores.contains_key("depth:expert"));
        assert!(scores.contains_key("style:academic"));
    }

    #[tokio::test]
    async fn test_empty_user_id_is_invalid() {
        let store = EventStore::in_memory();
        let mut event = click_event("", "src");
        event.user_id = "   ".to_string();
        let result = store.record_event(event).await;
        assert!(matches!(result, Err(StoreError::InvalidEvent(_))));
    }

    #[tokio::test]
    async fn test_per_user_isolation() {
        let store = EventStore::in_memory();
        for i in 0..3 {
            store
                .record_event(click_event("user-x", &format!("s{}", i)))
                .await
                .unwrap();
        }

        // User Y sees nothing of user X's state.
        assert!(store.scores("user-y").await.is_empty());
        let (top_arms, total) = store.preferences("user-y", 5).await.unwrap();
        assert!(top_arms.is_empty());
        assert_eq!(total, 0);
        assert!(store.events("user-y", None).await.unwrap().is_empty());

        // And X's own view is intact.
        assert_eq!(store.events("user-x", None).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_reset_is_total() {
        let store = EventStore::in_memory();
        store.record_event(click_event("u1", "s1")).await.unwrap();
        store
            .record_impressions(
                "u1",
                vec![ImpressionRecord {
                    arms: vec!["depth:expert".to_string()],
                    query_id: "q".to_string(),
                    source_id: "s2".to_string(),
                }],
            )
            .await;

        store.reset("u1").await.unwrap();

        assert!(store.scores("u1").await.is_empty());
        assert!(store.events("u1", None).await.unwrap().is_empty());
        let (top_arms, total) = store.preferences("u1", 5).await.unwrap();
        assert!(top_arms.is_empty());
        assert_eq!(total, 0);
    }

    #[tokio::test]
    async fn test_begin_request_resolves_stale_impressions() {
        let store = EventStore::in_memory().with_impression_timeout(0);
        store
            .record_impressions(
                "u1",
                vec![ImpressionRecord {
                    arms: vec!["depth:expert".to_string()],
                    query_id: "q".to_string(),
                    source_id: "s".to_string(),
                }],
            )
            .await;

        // Timeout of zero: the next request attributes the failure.
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let scores = store.begin_request("u1").await;
        let score = scores.get("depth:expert").copied().unwrap();
        // One failure, no successes: (0 + 1) / (0 + 1 + 2).
        assert!((score - 1.0 / 3.0).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_event_listing_respects_limit() {
        let store = EventStore::in_memory();
        for i in 0..10 {
            store
                .record_event(click_event("u1", &format!("s{}", i)))
                .await
                .unwrap();
        }
        assert_eq!(store.events("u1", Some(4)).await.unwrap().len(), 4);
        assert_eq!(store.events("u1", None).await.unwrap().len(), 10);
    }
}
