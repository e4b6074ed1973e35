//! In-memory implementation of the engine store.
//!
//! # Purpose
//! Backs local development and the test suites with no external
//! dependencies. Not durable: all state is lost on restart.
//!
//! # Semantics parity
//! The memory backend mirrors the Postgres semantics the engine relies on:
//! - idempotency conflicts are detected at insert, like the unique index;
//! - `begin_poll` hands out disjoint batches by parking claimed ids in a
//!   shared set (the skip-locked analogue), released when the batch is
//!   committed or dropped;
//! - poll mutations buffer inside the batch and apply atomically under one
//!   write lock at commit, so an abandoned batch leaves no trace.

use super::{
    InsertOutcome, NewAdminEvent, NewMessage, NewProject, PollBatch, ProjectPatch, Store,
    StoreError, StoreResult,
};
use crate::model::{
    AdminEvent, ApiKey, ChannelType, Event, EventType, Message, MessageStatus, Project,
    ProjectStatus, UsageBucket,
};
use crate::usage::period_key;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct MemoryInner {
    projects: HashMap<Uuid, Project>,
    api_keys: HashMap<Uuid, ApiKey>,
    /// key hash -> key id; the auth lookup path.
    key_hashes: HashMap<String, Uuid>,
    messages: HashMap<Uuid, Message>,
    events: Vec<Event>,
    usage: HashMap<(Uuid, String, ChannelType), i64>,
    rate: HashMap<(Uuid, DateTime<Utc>), i64>,
    admin_events: Vec<AdminEvent>,
}

impl MemoryInner {
    fn push_event(
        &mut self,
        message_id: Uuid,
        project_id: Uuid,
        event_type: EventType,
        payload: Option<Value>,
    ) {
        self.events.push(Event {
            id: Uuid::new_v4(),
            message_id,
            project_id,
            event_type,
            provider_response: payload,
            created_at: Utc::now(),
        });
    }
}

/// Shared-state store for dev and tests.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<MemoryInner>>,
    /// Ids currently held by an open poll batch. Plays the role of the
    /// row locks: a claimed id is invisible to other polls.
    claimed: Arc<Mutex<HashSet<Uuid>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_project(&self, project: NewProject) -> StoreResult<Project> {
        let created = Project {
            id: Uuid::new_v4(),
            name: project.name,
            owner_email: project.owner_email,
            status: ProjectStatus::Active,
            monthly_limit: project.monthly_limit,
            rate_limit_per_minute: project.rate_limit_per_minute,
            created_at: Utc::now(),
        };
        self.inner
            .write()
            .await
            .projects
            .insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_project(&self, project_id: Uuid) -> StoreResult<Option<Project>> {
        Ok(self.inner.read().await.projects.get(&project_id).cloned())
    }

    async fn list_projects(&self) -> StoreResult<Vec<Project>> {
        let mut projects: Vec<Project> =
            self.inner.read().await.projects.values().cloned().collect();
        projects.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(projects)
    }

    async fn patch_project(&self, project_id: Uuid, patch: ProjectPatch) -> StoreResult<Project> {
        let mut inner = self.inner.write().await;
        let project = inner
            .projects
            .get_mut(&project_id)
            .ok_or_else(|| StoreError::NotFound("project".into()))?;
        if let Some(status) = patch.status {
            project.status = status;
        }
        if let Some(monthly_limit) = patch.monthly_limit {
            project.monthly_limit = monthly_limit;
        }
        if let Some(rate_limit) = patch.rate_limit_per_minute {
            project.rate_limit_per_minute = rate_limit;
        }
        Ok(project.clone())
    }

    async fn create_api_key(
        &self,
        project_id: Uuid,
        name: &str,
        key_hash: &str,
    ) -> StoreResult<ApiKey> {
        let mut inner = self.inner.write().await;
        if inner.key_hashes.contains_key(key_hash) {
            return Err(StoreError::Conflict("api key hash exists".into()));
        }
        let key = ApiKey {
            id: Uuid::new_v4(),
            project_id,
            name: name.to_string(),
            created_at: Utc::now(),
            last_used_at: None,
            revoked_at: None,
        };
        inner.key_hashes.insert(key_hash.to_string(), key.id);
        inner.api_keys.insert(key.id, key.clone());
        Ok(key)
    }

    async fn find_active_api_key(&self, key_hash: &str) -> StoreResult<Option<ApiKey>> {
        let inner = self.inner.read().await;
        let key = inner
            .key_hashes
            .get(key_hash)
            .and_then(|id| inner.api_keys.get(id))
            .filter(|key| !key.is_revoked())
            .cloned();
        Ok(key)
    }

    async fn touch_api_key(&self, key_id: Uuid) -> StoreResult<()> {
        if let Some(key) = self.inner.write().await.api_keys.get_mut(&key_id) {
            key.last_used_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn revoke_api_key(&self, key_id: Uuid) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        match inner.api_keys.get_mut(&key_id) {
            Some(key) if key.revoked_at.is_none() => {
                key.revoked_at = Some(Utc::now());
                Ok(())
            }
            _ => Err(StoreError::NotFound("api key".into())),
        }
    }

    async fn insert_message(&self, message: NewMessage) -> StoreResult<InsertOutcome> {
        let mut inner = self.inner.write().await;
        if let Some(key) = &message.idempotency_key {
            let duplicate = inner.messages.values().any(|m| {
                m.project_id == message.project_id && m.idempotency_key.as_deref() == Some(key)
            });
            if duplicate {
                return Ok(InsertOutcome::DuplicateKey);
            }
        }
        let now = Utc::now();
        let created = Message {
            id: Uuid::new_v4(),
            project_id: message.project_id,
            channel: message.channel,
            status: MessageStatus::Queued,
            from_address: message.from_address,
            to_address: message.to_address,
            subject: message.subject,
            body: message.body,
            metadata: message.metadata,
            idempotency_key: message.idempotency_key,
            attempts: 0,
            max_attempts: message.max_attempts,
            next_attempt_at: None,
            scheduled_for: None,
            created_at: now,
            updated_at: now,
        };
        inner.messages.insert(created.id, created.clone());
        inner.push_event(created.id, created.project_id, EventType::Requested, None);
        Ok(InsertOutcome::Inserted(created))
    }

    async fn find_by_idempotency_key(
        &self,
        project_id: Uuid,
        key: &str,
    ) -> StoreResult<Option<(Uuid, MessageStatus)>> {
        let inner = self.inner.read().await;
        Ok(inner
            .messages
            .values()
            .find(|m| m.project_id == project_id && m.idempotency_key.as_deref() == Some(key))
            .map(|m| (m.id, m.status)))
    }

    async fn get_message(
        &self,
        project_id: Uuid,
        message_id: Uuid,
    ) -> StoreResult<Option<Message>> {
        Ok(self
            .inner
            .read()
            .await
            .messages
            .get(&message_id)
            .filter(|m| m.project_id == project_id)
            .cloned())
    }

    async fn list_messages(&self, project_id: Uuid, limit: i64) -> StoreResult<Vec<Message>> {
        let inner = self.inner.read().await;
        let mut messages: Vec<Message> = inner
            .messages
            .values()
            .filter(|m| m.project_id == project_id)
            .cloned()
            .collect();
        messages.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        messages.truncate(limit.max(0) as usize);
        Ok(messages)
    }

    async fn list_events(&self, message_id: Uuid) -> StoreResult<Vec<Event>> {
        Ok(self
            .inner
            .read()
            .await
            .events
            .iter()
            .filter(|e| e.message_id == message_id)
            .cloned()
            .collect())
    }

    async fn usage_total(&self, project_id: Uuid, period: &str) -> StoreResult<i64> {
        let inner = self.inner.read().await;
        Ok(inner
            .usage
            .iter()
            .filter(|((pid, p, _), _)| *pid == project_id && p == period)
            .map(|(_, count)| *count)
            .sum())
    }

    async fn usage_breakdown(
        &self,
        project_id: Uuid,
        period: &str,
    ) -> StoreResult<Vec<UsageBucket>> {
        let inner = self.inner.read().await;
        let mut buckets: Vec<UsageBucket> = inner
            .usage
            .iter()
            .filter(|((pid, p, _), _)| *pid == project_id && p == period)
            .map(|((pid, p, channel), count)| UsageBucket {
                project_id: *pid,
                period: p.clone(),
                channel: *channel,
                count: *count,
            })
            .collect();
        buckets.sort_by_key(|b| b.channel.as_str());
        Ok(buckets)
    }

    async fn increment_rate_bucket(
        &self,
        project_id: Uuid,
        window: DateTime<Utc>,
    ) -> StoreResult<i64> {
        let mut inner = self.inner.write().await;
        let count = inner.rate.entry((project_id, window)).or_insert(0);
        *count += 1;
        Ok(*count)
    }

    async fn begin_poll(
        &self,
        batch_size: i64,
        now: DateTime<Utc>,
    ) -> StoreResult<Box<dyn PollBatch>> {
        let inner = self.inner.read().await;
        let mut claimed = self.claimed.lock().expect("claimed set poisoned");
        let mut due: Vec<Message> = inner
            .messages
            .values()
            .filter(|m| {
                m.status == MessageStatus::Queued
                    && m.next_attempt_at.map_or(true, |at| at <= now)
                    && !claimed.contains(&m.id)
            })
            .cloned()
            .collect();
        due.sort_by_key(|m| m.created_at);
        due.truncate(batch_size.max(0) as usize);
        for message in &due {
            claimed.insert(message.id);
        }
        drop(claimed);

        Ok(Box::new(MemoryPollBatch {
            inner: Arc::clone(&self.inner),
            claimed: Arc::clone(&self.claimed),
            messages: due,
            attempts: HashMap::new(),
            ops: Vec::new(),
        }))
    }

    async fn delete_events_before(&self, cutoff: DateTime<Utc>, chunk: i64) -> StoreResult<u64> {
        let mut inner = self.inner.write().await;
        let mut budget = chunk.max(0) as u64;
        let before = inner.events.len();
        inner.events.retain(|e| {
            if budget > 0 && e.created_at < cutoff {
                budget -= 1;
                false
            } else {
                true
            }
        });
        Ok((before - inner.events.len()) as u64)
    }

    async fn delete_terminal_messages_before(
        &self,
        cutoff: DateTime<Utc>,
        chunk: i64,
    ) -> StoreResult<u64> {
        let mut inner = self.inner.write().await;
        let victims: Vec<Uuid> = inner
            .messages
            .values()
            .filter(|m| m.status.is_terminal() && m.created_at < cutoff)
            .take(chunk.max(0) as usize)
            .map(|m| m.id)
            .collect();
        for id in &victims {
            inner.messages.remove(id);
            // Postgres cascades events with the message; keep parity here.
            inner.events.retain(|e| e.message_id != *id);
        }
        Ok(victims.len() as u64)
    }

    async fn delete_rate_buckets_before(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let mut inner = self.inner.write().await;
        let before = inner.rate.len();
        inner.rate.retain(|(_, window), _| *window >= cutoff);
        Ok((before - inner.rate.len()) as u64)
    }

    async fn record_admin_event(&self, event: NewAdminEvent) -> StoreResult<()> {
        self.inner.write().await.admin_events.push(AdminEvent {
            id: Uuid::new_v4(),
            actor: event.actor,
            action: event.action,
            project_id: event.project_id,
            detail: event.detail,
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn list_admin_events(&self, limit: i64) -> StoreResult<Vec<AdminEvent>> {
        let inner = self.inner.read().await;
        let mut events: Vec<AdminEvent> = inner.admin_events.clone();
        events.reverse();
        events.truncate(limit.max(0) as usize);
        Ok(events)
    }

    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }

    fn is_durable(&self) -> bool {
        false
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

/// Buffered mutation staged by a poll batch, applied at commit.
enum PollOp {
    Skipped {
        message_id: Uuid,
        project_id: Uuid,
        detail: Value,
    },
    Dead {
        message_id: Uuid,
        project_id: Uuid,
        detail: Value,
    },
    Attempt {
        message_id: Uuid,
    },
    Delivered {
        message_id: Uuid,
        project_id: Uuid,
        channel: ChannelType,
        payload: Value,
    },
    Retry {
        message_id: Uuid,
        project_id: Uuid,
        next_attempt_at: DateTime<Utc>,
        detail: Value,
    },
    Failed {
        message_id: Uuid,
        project_id: Uuid,
        detail: Value,
    },
}

struct MemoryPollBatch {
    inner: Arc<RwLock<MemoryInner>>,
    claimed: Arc<Mutex<HashSet<Uuid>>>,
    messages: Vec<Message>,
    /// Local attempt counters so `start_attempt` can answer before commit.
    attempts: HashMap<Uuid, i32>,
    ops: Vec<PollOp>,
}

impl MemoryPollBatch {
    fn release_claims(&self) {
        if let Ok(mut claimed) = self.claimed.lock() {
            for message in &self.messages {
                claimed.remove(&message.id);
            }
        }
    }
}

impl Drop for MemoryPollBatch {
    fn drop(&mut self) {
        // Covers both commit and abandonment; an uncommitted batch simply
        // becomes claimable again with its ops discarded.
        self.release_claims();
    }
}

#[async_trait]
impl PollBatch for MemoryPollBatch {
    fn messages(&self) -> &[Message] {
        &self.messages
    }

    async fn project_status(&mut self, project_id: Uuid) -> StoreResult<Option<ProjectStatus>> {
        Ok(self
            .inner
            .read()
            .await
            .projects
            .get(&project_id)
            .map(|p| p.status))
    }

    async fn record_skipped(&mut self, message: &Message, detail: Value) -> StoreResult<()> {
        self.ops.push(PollOp::Skipped {
            message_id: message.id,
            project_id: message.project_id,
            detail,
        });
        Ok(())
    }

    async fn mark_dead(&mut self, message: &Message, detail: Value) -> StoreResult<()> {
        self.ops.push(PollOp::Dead {
            message_id: message.id,
            project_id: message.project_id,
            detail,
        });
        Ok(())
    }

    async fn start_attempt(&mut self, message: &Message) -> StoreResult<i32> {
        let attempts = self
            .attempts
            .entry(message.id)
            .or_insert(message.attempts);
        *attempts += 1;
        self.ops.push(PollOp::Attempt {
            message_id: message.id,
        });
        Ok(*attempts)
    }

    async fn mark_delivered(
        &mut self,
        message: &Message,
        provider_response: Value,
    ) -> StoreResult<()> {
        self.ops.push(PollOp::Delivered {
            message_id: message.id,
            project_id: message.project_id,
            channel: message.channel,
            payload: provider_response,
        });
        Ok(())
    }

    async fn mark_retry(
        &mut self,
        message: &Message,
        next_attempt_at: DateTime<Utc>,
        detail: Value,
    ) -> StoreResult<()> {
        self.ops.push(PollOp::Retry {
            message_id: message.id,
            project_id: message.project_id,
            next_attempt_at,
            detail,
        });
        Ok(())
    }

    async fn mark_failed(&mut self, message: &Message, detail: Value) -> StoreResult<()> {
        self.ops.push(PollOp::Failed {
            message_id: message.id,
            project_id: message.project_id,
            detail,
        });
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> StoreResult<()> {
        let ops = std::mem::take(&mut self.ops);
        let mut inner = self.inner.write().await;
        let now = Utc::now();
        for op in ops {
            match op {
                PollOp::Skipped {
                    message_id,
                    project_id,
                    detail,
                } => {
                    inner.push_event(message_id, project_id, EventType::Skipped, Some(detail));
                }
                PollOp::Dead {
                    message_id,
                    project_id,
                    detail,
                } => {
                    if let Some(m) = inner.messages.get_mut(&message_id) {
                        m.status = MessageStatus::Dead;
                        m.updated_at = now;
                    }
                    inner.push_event(message_id, project_id, EventType::Dead, Some(detail));
                }
                PollOp::Attempt { message_id } => {
                    if let Some(m) = inner.messages.get_mut(&message_id) {
                        m.attempts += 1;
                        m.updated_at = now;
                    }
                }
                PollOp::Delivered {
                    message_id,
                    project_id,
                    channel,
                    payload,
                } => {
                    if let Some(m) = inner.messages.get_mut(&message_id) {
                        m.status = MessageStatus::Delivered;
                        m.updated_at = now;
                    }
                    inner.push_event(message_id, project_id, EventType::Delivered, Some(payload));
                    let period = period_key(now);
                    *inner
                        .usage
                        .entry((project_id, period, channel))
                        .or_insert(0) += 1;
                }
                PollOp::Retry {
                    message_id,
                    project_id,
                    next_attempt_at,
                    detail,
                } => {
                    if let Some(m) = inner.messages.get_mut(&message_id) {
                        m.next_attempt_at = Some(next_attempt_at);
                        m.updated_at = now;
                    }
                    inner.push_event(message_id, project_id, EventType::Failed, Some(detail));
                }
                PollOp::Failed {
                    message_id,
                    project_id,
                    detail,
                } => {
                    if let Some(m) = inner.messages.get_mut(&message_id) {
                        m.status = MessageStatus::Failed;
                        m.updated_at = now;
                    }
                    inner.push_event(message_id, project_id, EventType::Failed, Some(detail));
                }
            }
        }
        Ok(())
        // Claims release in Drop.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_message(project_id: Uuid) -> NewMessage {
        NewMessage {
            project_id,
            channel: ChannelType::Email,
            from_address: "noreply@example.com".to_string(),
            to_address: "someone@example.com".to_string(),
            subject: None,
            body: "hi".to_string(),
            metadata: None,
            idempotency_key: None,
            max_attempts: 3,
        }
    }

    async fn seed_project(store: &MemoryStore) -> Project {
        store
            .create_project(NewProject {
                name: "acme".to_string(),
                owner_email: "ops@acme.test".to_string(),
                monthly_limit: None,
                rate_limit_per_minute: None,
            })
            .await
            .expect("project")
    }

    #[tokio::test]
    async fn insert_writes_requested_event() {
        let store = MemoryStore::new();
        let project = seed_project(&store).await;
        let outcome = store
            .insert_message(new_message(project.id))
            .await
            .expect("insert");
        let message = match outcome {
            InsertOutcome::Inserted(m) => m,
            InsertOutcome::DuplicateKey => panic!("unexpected duplicate"),
        };
        let events = store.list_events(message.id).await.expect("events");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::Requested);
    }

    #[tokio::test]
    async fn duplicate_idempotency_key_is_reported() {
        let store = MemoryStore::new();
        let project = seed_project(&store).await;
        let mut first = new_message(project.id);
        first.idempotency_key = Some("k1".to_string());
        let mut second = new_message(project.id);
        second.idempotency_key = Some("k1".to_string());

        assert!(matches!(
            store.insert_message(first).await.expect("first"),
            InsertOutcome::Inserted(_)
        ));
        assert!(matches!(
            store.insert_message(second).await.expect("second"),
            InsertOutcome::DuplicateKey
        ));
    }

    #[tokio::test]
    async fn concurrent_polls_claim_disjoint_batches() {
        let store = MemoryStore::new();
        let project = seed_project(&store).await;
        for _ in 0..4 {
            store
                .insert_message(new_message(project.id))
                .await
                .expect("insert");
        }

        let now = Utc::now();
        let first = store.begin_poll(2, now).await.expect("poll one");
        let second = store.begin_poll(10, now).await.expect("poll two");

        let first_ids: HashSet<Uuid> = first.messages().iter().map(|m| m.id).collect();
        let second_ids: HashSet<Uuid> = second.messages().iter().map(|m| m.id).collect();
        assert_eq!(first_ids.len(), 2);
        assert_eq!(second_ids.len(), 2);
        assert!(first_ids.is_disjoint(&second_ids));
    }

    #[tokio::test]
    async fn dropped_batch_releases_its_claim() {
        let store = MemoryStore::new();
        let project = seed_project(&store).await;
        store
            .insert_message(new_message(project.id))
            .await
            .expect("insert");

        let now = Utc::now();
        {
            let batch = store.begin_poll(10, now).await.expect("poll");
            assert_eq!(batch.messages().len(), 1);
            // Dropped without commit: claim must dissolve.
        }
        let batch = store.begin_poll(10, now).await.expect("repoll");
        assert_eq!(batch.messages().len(), 1);
    }

    #[tokio::test]
    async fn future_next_attempt_is_not_claimable() {
        let store = MemoryStore::new();
        let project = seed_project(&store).await;
        store
            .insert_message(new_message(project.id))
            .await
            .expect("insert");

        let now = Utc::now();
        let mut batch = store.begin_poll(10, now).await.expect("poll");
        let message = batch.messages()[0].clone();
        batch
            .mark_retry(
                &message,
                now + chrono::Duration::seconds(30),
                serde_json::json!({"retryable": true}),
            )
            .await
            .expect("retry");
        batch.commit().await.expect("commit");

        let early = store.begin_poll(10, now).await.expect("early poll");
        assert!(early.messages().is_empty());
        drop(early);

        let later = store
            .begin_poll(10, now + chrono::Duration::seconds(31))
            .await
            .expect("later poll");
        assert_eq!(later.messages().len(), 1);
    }

    #[tokio::test]
    async fn delivered_commit_updates_usage_and_events() {
        let store = MemoryStore::new();
        let project = seed_project(&store).await;
        store
            .insert_message(new_message(project.id))
            .await
            .expect("insert");

        let now = Utc::now();
        let mut batch = store.begin_poll(10, now).await.expect("poll");
        let message = batch.messages()[0].clone();
        let attempts = batch.start_attempt(&message).await.expect("attempt");
        assert_eq!(attempts, 1);
        batch
            .mark_delivered(&message, serde_json::json!({"accepted": true}))
            .await
            .expect("delivered");
        batch.commit().await.expect("commit");

        let stored = store
            .get_message(project.id, message.id)
            .await
            .expect("get")
            .expect("present");
        assert_eq!(stored.status, MessageStatus::Delivered);
        assert_eq!(stored.attempts, 1);

        let period = period_key(Utc::now());
        assert_eq!(
            store.usage_total(project.id, &period).await.expect("usage"),
            1
        );
        let events = store.list_events(message.id).await.expect("events");
        let kinds: Vec<EventType> = events.iter().map(|e| e.event_type).collect();
        assert_eq!(kinds, vec![EventType::Requested, EventType::Delivered]);
    }

    #[tokio::test]
    async fn rate_bucket_increments_are_cumulative() {
        let store = MemoryStore::new();
        let project = seed_project(&store).await;
        let window = Utc::now();
        for expected in 1..=3 {
            let count = store
                .increment_rate_bucket(project.id, window)
                .await
                .expect("increment");
            assert_eq!(count, expected);
        }
    }
}
