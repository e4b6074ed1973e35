//! Data-access facade over the canonical queue and ledger.
//!
//! # Purpose
//! `Store` hides SQL and transaction boundaries from the rest of the engine.
//! Two backends implement it: Postgres (canonical, durable) and an in-memory
//! store for development and tests. Both must honor the same semantics so the
//! dispatcher and admission controllers are backend-agnostic.
//!
//! # The poll transaction
//! `begin_poll` is the one place where the store exposes a transaction to a
//! caller: the dispatcher claims a batch under row-level locks and drives
//! each message through its state machine *inside* that transaction, then
//! commits once per batch. Dropping an uncommitted [`PollBatch`] dissolves
//! the claim.

use crate::model::{
    AdminEvent, ApiKey, ChannelType, Event, Message, MessageStatus, Project, ProjectStatus,
    UsageBucket,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

pub mod memory;
pub mod postgres;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Input for project creation. The store assigns id and timestamps.
#[derive(Debug, Clone)]
pub struct NewProject {
    pub name: String,
    pub owner_email: String,
    pub monthly_limit: Option<i32>,
    pub rate_limit_per_minute: Option<i32>,
}

/// Partial project update from the admin plane. `None` leaves a field
/// untouched; the inner `Option` on the limits clears them (unlimited).
#[derive(Debug, Clone, Default)]
pub struct ProjectPatch {
    pub status: Option<ProjectStatus>,
    pub monthly_limit: Option<Option<i32>>,
    pub rate_limit_per_minute: Option<Option<i32>>,
}

/// Input for message insertion. The store assigns id, timestamps, the
/// initial `queued` status, and writes the `requested` event in the same
/// transaction.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub project_id: Uuid,
    pub channel: ChannelType,
    pub from_address: String,
    pub to_address: String,
    pub subject: Option<String>,
    pub body: String,
    pub metadata: Option<Value>,
    pub idempotency_key: Option<String>,
    pub max_attempts: i32,
}

/// Result of the admission insert. The unique partial index on
/// `(project_id, idempotency_key)` is the final arbiter under races; a
/// violation surfaces here instead of as an error so the enqueuer can
/// recover by re-reading the winner.
#[derive(Debug)]
pub enum InsertOutcome {
    Inserted(Message),
    DuplicateKey,
}

#[derive(Debug, Clone)]
pub struct NewAdminEvent {
    pub actor: String,
    pub action: String,
    pub project_id: Option<Uuid>,
    pub detail: Option<Value>,
}

#[async_trait]
pub trait Store: Send + Sync {
    // Projects
    async fn create_project(&self, project: NewProject) -> StoreResult<Project>;
    async fn get_project(&self, project_id: Uuid) -> StoreResult<Option<Project>>;
    async fn list_projects(&self) -> StoreResult<Vec<Project>>;
    async fn patch_project(&self, project_id: Uuid, patch: ProjectPatch) -> StoreResult<Project>;

    // API keys
    async fn create_api_key(
        &self,
        project_id: Uuid,
        name: &str,
        key_hash: &str,
    ) -> StoreResult<ApiKey>;
    async fn find_active_api_key(&self, key_hash: &str) -> StoreResult<Option<ApiKey>>;
    async fn touch_api_key(&self, key_id: Uuid) -> StoreResult<()>;
    async fn revoke_api_key(&self, key_id: Uuid) -> StoreResult<()>;

    // Messages and events
    async fn insert_message(&self, message: NewMessage) -> StoreResult<InsertOutcome>;
    async fn find_by_idempotency_key(
        &self,
        project_id: Uuid,
        key: &str,
    ) -> StoreResult<Option<(Uuid, MessageStatus)>>;
    async fn get_message(
        &self,
        project_id: Uuid,
        message_id: Uuid,
    ) -> StoreResult<Option<Message>>;
    async fn list_messages(&self, project_id: Uuid, limit: i64) -> StoreResult<Vec<Message>>;
    async fn list_events(&self, message_id: Uuid) -> StoreResult<Vec<Event>>;

    // Admission counters
    async fn usage_total(&self, project_id: Uuid, period: &str) -> StoreResult<i64>;
    async fn usage_breakdown(
        &self,
        project_id: Uuid,
        period: &str,
    ) -> StoreResult<Vec<UsageBucket>>;
    /// Atomic upsert of the per-minute counter; returns the post-increment
    /// count. Every call consumes one token.
    async fn increment_rate_bucket(
        &self,
        project_id: Uuid,
        window: DateTime<Utc>,
    ) -> StoreResult<i64>;

    // Dispatch
    /// Open the poll transaction: claim up to `batch_size` due messages with
    /// skip-locked semantics, ordered by `created_at`.
    async fn begin_poll(
        &self,
        batch_size: i64,
        now: DateTime<Utc>,
    ) -> StoreResult<Box<dyn PollBatch>>;

    // Retention
    async fn delete_events_before(&self, cutoff: DateTime<Utc>, chunk: i64) -> StoreResult<u64>;
    async fn delete_terminal_messages_before(
        &self,
        cutoff: DateTime<Utc>,
        chunk: i64,
    ) -> StoreResult<u64>;
    async fn delete_rate_buckets_before(&self, cutoff: DateTime<Utc>) -> StoreResult<u64>;

    // Audit
    async fn record_admin_event(&self, event: NewAdminEvent) -> StoreResult<()>;
    async fn list_admin_events(&self, limit: i64) -> StoreResult<Vec<AdminEvent>>;

    // Ops
    async fn health_check(&self) -> StoreResult<()>;
    fn is_durable(&self) -> bool;
    fn backend_name(&self) -> &'static str;
}

/// One claimed batch, bound to an open transaction.
///
/// All mutations stage into the transaction; nothing is visible to other
/// workers until `commit`. The claim holds for the life of the value: in
/// Postgres via row locks, in memory via a claimed-id set released on drop.
#[async_trait]
pub trait PollBatch: Send {
    /// The claimed messages, in claim order.
    fn messages(&self) -> &[Message];

    /// Current status of the owning project, read inside the transaction.
    async fn project_status(&mut self, project_id: Uuid) -> StoreResult<Option<ProjectStatus>>;

    /// Record a `skipped` event without touching the message row.
    async fn record_skipped(&mut self, message: &Message, detail: Value) -> StoreResult<()>;

    /// Transition to terminal `dead` and record a `dead` event.
    async fn mark_dead(&mut self, message: &Message, detail: Value) -> StoreResult<()>;

    /// Increment `attempts` by one; returns the new count.
    async fn start_attempt(&mut self, message: &Message) -> StoreResult<i32>;

    /// Transition to `delivered`, record the event with the provider payload,
    /// and increment the monthly usage bucket, all in this transaction.
    async fn mark_delivered(&mut self, message: &Message, provider_response: Value)
    -> StoreResult<()>;

    /// Leave the message `queued` with a new `next_attempt_at`; record a
    /// `failed` event carrying the retry detail.
    async fn mark_retry(
        &mut self,
        message: &Message,
        next_attempt_at: DateTime<Utc>,
        detail: Value,
    ) -> StoreResult<()>;

    /// Transition to terminal `failed` and record a `failed` event.
    async fn mark_failed(&mut self, message: &Message, detail: Value) -> StoreResult<()>;

    /// Commit the batch. Consumes the claim.
    async fn commit(self: Box<Self>) -> StoreResult<()>;
}
