//! Postgres-backed implementation of the engine store.
//!
//! # Purpose
//! This is the canonical backend: the `messages` table *is* the queue, and
//! every state transition, event append, and counter increment is a SQL
//! statement against it. Durability semantics come from the Postgres
//! deployment (WAL, fsync, replication); this module adds nothing on top.
//!
//! # Claim protocol
//! `begin_poll` opens one transaction per poll and claims due messages with
//! `SELECT ... FOR UPDATE SKIP LOCKED`, so concurrent workers receive
//! disjoint batches without any coordination beyond row locks. The returned
//! [`PgPollBatch`] owns the transaction; all transitions stage into it and
//! become visible at `commit`. Dropping the batch rolls back and the claim
//! dissolves.
//!
//! # Idempotency
//! The unique partial index on `(project_id, idempotency_key)` is the final
//! arbiter. `insert_message` translates a 23505 violation into
//! [`InsertOutcome::DuplicateKey`] so the enqueuer can re-read the winner.

use super::{
    InsertOutcome, NewAdminEvent, NewMessage, NewProject, PollBatch, ProjectPatch, Store,
    StoreError, StoreResult,
};
use crate::model::{
    AdminEvent, ApiKey, ChannelType, Event, EventType, Message, MessageStatus, Project,
    ProjectStatus, UsageBucket,
};
use crate::usage::period_key;
use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Connection settings for the canonical backend.
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout_ms: u64,
}

impl PostgresConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: 10,
            acquire_timeout_ms: 5_000,
        }
    }
}

/// Durable store backed by Postgres.
///
/// Safe to share across request handlers and worker tasks; `sqlx` leases
/// connections from the pool per statement. All multi-statement writes
/// (message + event, claim + transitions) run in explicit transactions.
pub struct PostgresStore {
    pool: PgPool,
}

/// Row shape for the `messages` table. Kept separate from the domain
/// `Message` so schema details (string enums, column names) stay local to
/// this module.
#[derive(Debug, Clone, FromRow)]
struct DbMessage {
    id: Uuid,
    project_id: Uuid,
    channel: String,
    status: String,
    from_address: String,
    to_address: String,
    subject: Option<String>,
    body: String,
    metadata: Option<Value>,
    idempotency_key: Option<String>,
    attempts: i32,
    max_attempts: i32,
    next_attempt_at: Option<DateTime<Utc>>,
    scheduled_for: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Row shape for the `projects` table.
#[derive(Debug, Clone, FromRow)]
struct DbProject {
    id: Uuid,
    name: String,
    owner_email: String,
    status: String,
    monthly_limit: Option<i32>,
    rate_limit_per_minute: Option<i32>,
    created_at: DateTime<Utc>,
}

/// Row shape for the `api_keys` table (hash column intentionally omitted
/// from reads that return domain values).
#[derive(Debug, Clone, FromRow)]
struct DbApiKey {
    id: Uuid,
    project_id: Uuid,
    name: String,
    created_at: DateTime<Utc>,
    last_used_at: Option<DateTime<Utc>>,
    revoked_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow)]
struct DbUsageBucket {
    project_id: Uuid,
    period: String,
    channel: String,
    count: i32,
}

#[derive(Debug, Clone, FromRow)]
struct DbEvent {
    id: Uuid,
    message_id: Uuid,
    project_id: Uuid,
    event_type: String,
    provider_response: Option<Value>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
struct DbAdminEvent {
    id: Uuid,
    actor: String,
    action: String,
    project_id: Option<Uuid>,
    detail: Option<Value>,
    created_at: DateTime<Utc>,
}

const MESSAGE_COLUMNS: &str = "id, project_id, type AS channel, status, from_address, to_address, \
     subject, body, metadata, idempotency_key, attempts, max_attempts, next_attempt_at, \
     scheduled_for, created_at, updated_at";

impl PostgresStore {
    /// Connect to Postgres and run migrations before serving anything.
    ///
    /// Pool timeouts are deliberate: a request that cannot get a connection
    /// fails fast instead of hanging behind an unhealthy database.
    pub async fn connect(config: &PostgresConfig) -> StoreResult<Self> {
        let connect_options =
            PgConnectOptions::from_str(&config.url).map_err(|e| StoreError::Unexpected(e.into()))?;
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_millis(config.acquire_timeout_ms))
            .connect_with(connect_options)
            .await
            .map_err(|e| StoreError::Unexpected(e.into()))?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StoreError::Unexpected(e.into()))?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn create_project(&self, project: NewProject) -> StoreResult<Project> {
        let id = Uuid::new_v4();
        let row = sqlx::query_as::<_, DbProject>(
            r#"INSERT INTO projects (id, name, owner_email, status, monthly_limit, rate_limit_per_minute)
               VALUES ($1, $2, $3, 'active', $4, $5)
               RETURNING id, name, owner_email, status, monthly_limit, rate_limit_per_minute, created_at"#,
        )
        .bind(id)
        .bind(&project.name)
        .bind(&project.owner_email)
        .bind(project.monthly_limit)
        .bind(project.rate_limit_per_minute)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::Unexpected(e.into()))?;
        project_from_db(row)
    }

    async fn get_project(&self, project_id: Uuid) -> StoreResult<Option<Project>> {
        let row = sqlx::query_as::<_, DbProject>(
            r#"SELECT id, name, owner_email, status, monthly_limit, rate_limit_per_minute, created_at
               FROM projects WHERE id = $1"#,
        )
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Unexpected(e.into()))?;
        row.map(project_from_db).transpose()
    }

    async fn list_projects(&self) -> StoreResult<Vec<Project>> {
        let rows = sqlx::query_as::<_, DbProject>(
            r#"SELECT id, name, owner_email, status, monthly_limit, rate_limit_per_minute, created_at
               FROM projects ORDER BY created_at DESC"#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Unexpected(e.into()))?;
        rows.into_iter().map(project_from_db).collect()
    }

    /// Read-modify-write under `FOR UPDATE` so concurrent admin patches
    /// cannot interleave.
    async fn patch_project(&self, project_id: Uuid, patch: ProjectPatch) -> StoreResult<Project> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Unexpected(e.into()))?;
        let current = sqlx::query_as::<_, DbProject>(
            r#"SELECT id, name, owner_email, status, monthly_limit, rate_limit_per_minute, created_at
               FROM projects WHERE id = $1 FOR UPDATE"#,
        )
        .bind(project_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| StoreError::Unexpected(e.into()))?;
        let current = match current {
            Some(row) => row,
            None => return Err(StoreError::NotFound("project".into())),
        };

        let mut updated = project_from_db(current)?;
        if let Some(status) = patch.status {
            updated.status = status;
        }
        if let Some(monthly_limit) = patch.monthly_limit {
            updated.monthly_limit = monthly_limit;
        }
        if let Some(rate_limit) = patch.rate_limit_per_minute {
            updated.rate_limit_per_minute = rate_limit;
        }

        sqlx::query(
            r#"UPDATE projects SET status = $1, monthly_limit = $2, rate_limit_per_minute = $3
               WHERE id = $4"#,
        )
        .bind(updated.status.as_str())
        .bind(updated.monthly_limit)
        .bind(updated.rate_limit_per_minute)
        .bind(project_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::Unexpected(e.into()))?;

        tx.commit()
            .await
            .map_err(|e| StoreError::Unexpected(e.into()))?;
        Ok(updated)
    }

    async fn create_api_key(
        &self,
        project_id: Uuid,
        name: &str,
        key_hash: &str,
    ) -> StoreResult<ApiKey> {
        let id = Uuid::new_v4();
        let insert = sqlx::query_as::<_, DbApiKey>(
            r#"INSERT INTO api_keys (id, project_id, key_hash, name)
               VALUES ($1, $2, $3, $4)
               RETURNING id, project_id, name, created_at, last_used_at, revoked_at"#,
        )
        .bind(id)
        .bind(project_id)
        .bind(key_hash)
        .bind(name)
        .fetch_one(&self.pool)
        .await;
        match insert {
            Ok(row) => Ok(api_key_from_db(row)),
            Err(err) if is_unique_violation(&err) => {
                Err(StoreError::Conflict("api key hash exists".into()))
            }
            Err(err) => Err(StoreError::Unexpected(err.into())),
        }
    }

    async fn find_active_api_key(&self, key_hash: &str) -> StoreResult<Option<ApiKey>> {
        let row = sqlx::query_as::<_, DbApiKey>(
            r#"SELECT id, project_id, name, created_at, last_used_at, revoked_at
               FROM api_keys WHERE key_hash = $1 AND revoked_at IS NULL"#,
        )
        .bind(key_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Unexpected(e.into()))?;
        Ok(row.map(api_key_from_db))
    }

    async fn touch_api_key(&self, key_id: Uuid) -> StoreResult<()> {
        sqlx::query("UPDATE api_keys SET last_used_at = now() WHERE id = $1")
            .bind(key_id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Unexpected(e.into()))?;
        Ok(())
    }

    async fn revoke_api_key(&self, key_id: Uuid) -> StoreResult<()> {
        let result =
            sqlx::query("UPDATE api_keys SET revoked_at = now() WHERE id = $1 AND revoked_at IS NULL")
                .bind(key_id)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::Unexpected(e.into()))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("api key".into()));
        }
        Ok(())
    }

    /// Insert the message and its `requested` event in one transaction.
    ///
    /// A 23505 on the idempotency index means another writer won the race;
    /// the transaction rolls back and the caller re-reads the winner.
    async fn insert_message(&self, message: NewMessage) -> StoreResult<InsertOutcome> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Unexpected(e.into()))?;

        let id = Uuid::new_v4();
        let insert = sqlx::query_as::<_, DbMessage>(&format!(
            r#"INSERT INTO messages
                   (id, project_id, type, status, from_address, to_address, subject, body,
                    metadata, idempotency_key, attempts, max_attempts)
               VALUES ($1, $2, $3, 'queued', $4, $5, $6, $7, $8, $9, 0, $10)
               RETURNING {MESSAGE_COLUMNS}"#
        ))
        .bind(id)
        .bind(message.project_id)
        .bind(message.channel.as_str())
        .bind(&message.from_address)
        .bind(&message.to_address)
        .bind(&message.subject)
        .bind(&message.body)
        .bind(&message.metadata)
        .bind(&message.idempotency_key)
        .bind(message.max_attempts)
        .fetch_one(&mut *tx)
        .await;

        let row = match insert {
            Ok(row) => row,
            Err(err) if is_unique_violation(&err) => return Ok(InsertOutcome::DuplicateKey),
            Err(err) => return Err(StoreError::Unexpected(err.into())),
        };

        insert_event(&mut tx, id, message.project_id, EventType::Requested, None).await?;

        tx.commit()
            .await
            .map_err(|e| StoreError::Unexpected(e.into()))?;
        Ok(InsertOutcome::Inserted(message_from_db(row)?))
    }

    async fn find_by_idempotency_key(
        &self,
        project_id: Uuid,
        key: &str,
    ) -> StoreResult<Option<(Uuid, MessageStatus)>> {
        let row = sqlx::query_as::<_, (Uuid, String)>(
            "SELECT id, status FROM messages WHERE project_id = $1 AND idempotency_key = $2",
        )
        .bind(project_id)
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Unexpected(e.into()))?;
        row.map(|(id, status)| Ok((id, parse_status(&status)?)))
            .transpose()
    }

    async fn get_message(
        &self,
        project_id: Uuid,
        message_id: Uuid,
    ) -> StoreResult<Option<Message>> {
        let row = sqlx::query_as::<_, DbMessage>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE project_id = $1 AND id = $2"
        ))
        .bind(project_id)
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Unexpected(e.into()))?;
        row.map(message_from_db).transpose()
    }

    async fn list_messages(&self, project_id: Uuid, limit: i64) -> StoreResult<Vec<Message>> {
        let rows = sqlx::query_as::<_, DbMessage>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE project_id = $1 \
             ORDER BY created_at DESC LIMIT $2"
        ))
        .bind(project_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Unexpected(e.into()))?;
        rows.into_iter().map(message_from_db).collect()
    }

    async fn list_events(&self, message_id: Uuid) -> StoreResult<Vec<Event>> {
        let rows = sqlx::query_as::<_, DbEvent>(
            r#"SELECT id, message_id, project_id, event_type, provider_response, created_at
               FROM events WHERE message_id = $1 ORDER BY created_at ASC"#,
        )
        .bind(message_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Unexpected(e.into()))?;
        rows.into_iter().map(event_from_db).collect()
    }

    async fn usage_total(&self, project_id: Uuid, period: &str) -> StoreResult<i64> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(count), 0) FROM usage WHERE project_id = $1 AND period = $2",
        )
        .bind(project_id)
        .bind(period)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::Unexpected(e.into()))?;
        Ok(total)
    }

    async fn usage_breakdown(
        &self,
        project_id: Uuid,
        period: &str,
    ) -> StoreResult<Vec<UsageBucket>> {
        let rows = sqlx::query_as::<_, DbUsageBucket>(
            r#"SELECT project_id, period, message_type AS channel, count
               FROM usage WHERE project_id = $1 AND period = $2 ORDER BY message_type"#,
        )
        .bind(project_id)
        .bind(period)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Unexpected(e.into()))?;
        rows.into_iter()
            .map(|row| {
                Ok(UsageBucket {
                    project_id: row.project_id,
                    period: row.period,
                    channel: parse_channel(&row.channel)?,
                    count: row.count as i64,
                })
            })
            .collect()
    }

    /// Insert-on-conflict-increment so lost updates are impossible under
    /// concurrent API writers.
    async fn increment_rate_bucket(
        &self,
        project_id: Uuid,
        window: DateTime<Utc>,
    ) -> StoreResult<i64> {
        let count: i32 = sqlx::query_scalar(
            r#"INSERT INTO rate_limit_tracking (id, project_id, minute_window, count)
               VALUES ($1, $2, $3, 1)
               ON CONFLICT (project_id, minute_window)
               DO UPDATE SET count = rate_limit_tracking.count + 1
               RETURNING count"#,
        )
        .bind(Uuid::new_v4())
        .bind(project_id)
        .bind(window)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::Unexpected(e.into()))?;
        Ok(count as i64)
    }

    async fn begin_poll(
        &self,
        batch_size: i64,
        now: DateTime<Utc>,
    ) -> StoreResult<Box<dyn PollBatch>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Unexpected(e.into()))?;

        // Skip-locked claim: each concurrent worker sees only rows nobody
        // else holds. Ties in created_at resolve however Postgres likes.
        let rows = sqlx::query_as::<_, DbMessage>(&format!(
            r#"SELECT {MESSAGE_COLUMNS} FROM messages
               WHERE status = 'queued'
                 AND (next_attempt_at IS NULL OR next_attempt_at <= $1)
               ORDER BY created_at ASC
               LIMIT $2
               FOR UPDATE SKIP LOCKED"#
        ))
        .bind(now)
        .bind(batch_size)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| StoreError::Unexpected(e.into()))?;

        let messages = rows
            .into_iter()
            .map(message_from_db)
            .collect::<StoreResult<Vec<_>>>()?;

        Ok(Box::new(PgPollBatch { tx, messages }))
    }

    async fn delete_events_before(&self, cutoff: DateTime<Utc>, chunk: i64) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"DELETE FROM events WHERE id IN
               (SELECT id FROM events WHERE created_at < $1 ORDER BY created_at LIMIT $2)"#,
        )
        .bind(cutoff)
        .bind(chunk)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Unexpected(e.into()))?;
        Ok(result.rows_affected())
    }

    async fn delete_terminal_messages_before(
        &self,
        cutoff: DateTime<Utc>,
        chunk: i64,
    ) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"DELETE FROM messages WHERE id IN
               (SELECT id FROM messages
                WHERE status IN ('delivered', 'failed', 'dead') AND created_at < $1
                ORDER BY created_at LIMIT $2)"#,
        )
        .bind(cutoff)
        .bind(chunk)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Unexpected(e.into()))?;
        Ok(result.rows_affected())
    }

    async fn delete_rate_buckets_before(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM rate_limit_tracking WHERE minute_window < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Unexpected(e.into()))?;
        Ok(result.rows_affected())
    }

    async fn record_admin_event(&self, event: NewAdminEvent) -> StoreResult<()> {
        sqlx::query(
            r#"INSERT INTO admin_events (id, actor, action, project_id, detail)
               VALUES ($1, $2, $3, $4, $5)"#,
        )
        .bind(Uuid::new_v4())
        .bind(&event.actor)
        .bind(&event.action)
        .bind(event.project_id)
        .bind(&event.detail)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Unexpected(e.into()))?;
        Ok(())
    }

    async fn list_admin_events(&self, limit: i64) -> StoreResult<Vec<AdminEvent>> {
        let rows = sqlx::query_as::<_, DbAdminEvent>(
            r#"SELECT id, actor, action, project_id, detail, created_at
               FROM admin_events ORDER BY created_at DESC LIMIT $1"#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Unexpected(e.into()))?;
        Ok(rows
            .into_iter()
            .map(|row| AdminEvent {
                id: row.id,
                actor: row.actor,
                action: row.action,
                project_id: row.project_id,
                detail: row.detail,
                created_at: row.created_at,
            })
            .collect())
    }

    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Unexpected(e.into()))?;
        Ok(())
    }

    fn is_durable(&self) -> bool {
        true
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}

/// A claimed batch holding its poll transaction open. Row locks from the
/// claim query persist until commit or drop.
struct PgPollBatch {
    tx: Transaction<'static, Postgres>,
    messages: Vec<Message>,
}

#[async_trait]
impl PollBatch for PgPollBatch {
    fn messages(&self) -> &[Message] {
        &self.messages
    }

    async fn project_status(&mut self, project_id: Uuid) -> StoreResult<Option<ProjectStatus>> {
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM projects WHERE id = $1")
                .bind(project_id)
                .fetch_optional(&mut *self.tx)
                .await
                .map_err(|e| StoreError::Unexpected(e.into()))?;
        status.map(|s| parse_project_status(&s)).transpose()
    }

    async fn record_skipped(&mut self, message: &Message, detail: Value) -> StoreResult<()> {
        insert_event(
            &mut self.tx,
            message.id,
            message.project_id,
            EventType::Skipped,
            Some(detail),
        )
        .await
    }

    async fn mark_dead(&mut self, message: &Message, detail: Value) -> StoreResult<()> {
        sqlx::query("UPDATE messages SET status = 'dead', updated_at = now() WHERE id = $1")
            .bind(message.id)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| StoreError::Unexpected(e.into()))?;
        insert_event(
            &mut self.tx,
            message.id,
            message.project_id,
            EventType::Dead,
            Some(detail),
        )
        .await
    }

    async fn start_attempt(&mut self, message: &Message) -> StoreResult<i32> {
        let attempts: i32 = sqlx::query_scalar(
            "UPDATE messages SET attempts = attempts + 1, updated_at = now() \
             WHERE id = $1 RETURNING attempts",
        )
        .bind(message.id)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| StoreError::Unexpected(e.into()))?;
        Ok(attempts)
    }

    async fn mark_delivered(
        &mut self,
        message: &Message,
        provider_response: Value,
    ) -> StoreResult<()> {
        sqlx::query("UPDATE messages SET status = 'delivered', updated_at = now() WHERE id = $1")
            .bind(message.id)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| StoreError::Unexpected(e.into()))?;
        insert_event(
            &mut self.tx,
            message.id,
            message.project_id,
            EventType::Delivered,
            Some(provider_response),
        )
        .await?;

        // Usage rides the delivery transaction: the counter and the terminal
        // status commit or roll back together.
        sqlx::query(
            r#"INSERT INTO usage (project_id, period, message_type, count)
               VALUES ($1, $2, $3, 1)
               ON CONFLICT (project_id, period, message_type)
               DO UPDATE SET count = usage.count + 1"#,
        )
        .bind(message.project_id)
        .bind(period_key(Utc::now()))
        .bind(message.channel.as_str())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| StoreError::Unexpected(e.into()))?;
        Ok(())
    }

    async fn mark_retry(
        &mut self,
        message: &Message,
        next_attempt_at: DateTime<Utc>,
        detail: Value,
    ) -> StoreResult<()> {
        sqlx::query(
            "UPDATE messages SET next_attempt_at = $1, updated_at = now() WHERE id = $2",
        )
        .bind(next_attempt_at)
        .bind(message.id)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| StoreError::Unexpected(e.into()))?;
        insert_event(
            &mut self.tx,
            message.id,
            message.project_id,
            EventType::Failed,
            Some(detail),
        )
        .await
    }

    async fn mark_failed(&mut self, message: &Message, detail: Value) -> StoreResult<()> {
        sqlx::query("UPDATE messages SET status = 'failed', updated_at = now() WHERE id = $1")
            .bind(message.id)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| StoreError::Unexpected(e.into()))?;
        insert_event(
            &mut self.tx,
            message.id,
            message.project_id,
            EventType::Failed,
            Some(detail),
        )
        .await
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| StoreError::Unexpected(e.into()))
    }
}

async fn insert_event(
    tx: &mut Transaction<'static, Postgres>,
    message_id: Uuid,
    project_id: Uuid,
    event_type: EventType,
    payload: Option<Value>,
) -> StoreResult<()> {
    sqlx::query(
        r#"INSERT INTO events (id, message_id, project_id, event_type, provider_response)
           VALUES ($1, $2, $3, $4, $5)"#,
    )
    .bind(Uuid::new_v4())
    .bind(message_id)
    .bind(project_id)
    .bind(event_type.as_str())
    .bind(payload)
    .execute(&mut **tx)
    .await
    .map_err(|e| StoreError::Unexpected(e.into()))?;
    Ok(())
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        return db_err.code().map(|code| code == "23505").unwrap_or(false);
    }
    false
}

fn project_from_db(row: DbProject) -> StoreResult<Project> {
    Ok(Project {
        id: row.id,
        name: row.name,
        owner_email: row.owner_email,
        status: parse_project_status(&row.status)?,
        monthly_limit: row.monthly_limit,
        rate_limit_per_minute: row.rate_limit_per_minute,
        created_at: row.created_at,
    })
}

fn api_key_from_db(row: DbApiKey) -> ApiKey {
    ApiKey {
        id: row.id,
        project_id: row.project_id,
        name: row.name,
        created_at: row.created_at,
        last_used_at: row.last_used_at,
        revoked_at: row.revoked_at,
    }
}

fn message_from_db(row: DbMessage) -> StoreResult<Message> {
    Ok(Message {
        id: row.id,
        project_id: row.project_id,
        channel: parse_channel(&row.channel)?,
        status: parse_status(&row.status)?,
        from_address: row.from_address,
        to_address: row.to_address,
        subject: row.subject,
        body: row.body,
        metadata: row.metadata,
        idempotency_key: row.idempotency_key,
        attempts: row.attempts,
        max_attempts: row.max_attempts,
        next_attempt_at: row.next_attempt_at,
        scheduled_for: row.scheduled_for,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}

fn event_from_db(row: DbEvent) -> StoreResult<Event> {
    Ok(Event {
        id: row.id,
        message_id: row.message_id,
        project_id: row.project_id,
        event_type: EventType::parse(&row.event_type)
            .ok_or_else(|| StoreError::Unexpected(anyhow!("invalid event type {}", row.event_type)))?,
        provider_response: row.provider_response,
        created_at: row.created_at,
    })
}

fn parse_project_status(value: &str) -> StoreResult<ProjectStatus> {
    ProjectStatus::parse(value)
        .ok_or_else(|| StoreError::Unexpected(anyhow!("invalid project status {value}")))
}

fn parse_status(value: &str) -> StoreResult<MessageStatus> {
    MessageStatus::parse(value)
        .ok_or_else(|| StoreError::Unexpected(anyhow!("invalid message status {value}")))
}

fn parse_channel(value: &str) -> StoreResult<ChannelType> {
    ChannelType::parse(value)
        .ok_or_else(|| StoreError::Unexpected(anyhow!("invalid channel type {value}")))
}
