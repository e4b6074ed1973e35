//! Admission orchestration: the write path from an authenticated request to
//! a `queued` row plus its `requested` event.
//!
//! # Ordering
//! Suspension is free and always fatal, so it goes first. Quota is a
//! read-only check. The rate limiter consumes a token, so it must not be
//! charged for requests that would fail suspension or quota. The
//! idempotency read precedes the insert, but the unique index is the final
//! arbiter: a conflict on insert means another writer won, and we return the
//! winner's id instead.

use crate::idempotency::{IdempotencyGuard, IdempotencyOutcome};
use crate::model::{ChannelType, MessageStatus, ProjectStatus};
use crate::quota::{QuotaController, QuotaDecision};
use crate::rate_limit::{RateDecision, RateLimiter};
use crate::store::{InsertOutcome, NewMessage, Store, StoreError, StoreResult};
use anyhow::anyhow;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Default attempt ceiling for accepted messages.
pub const DEFAULT_MAX_ATTEMPTS: i32 = 3;

#[derive(Debug, Clone)]
pub struct AcceptRequest {
    pub project_id: Uuid,
    pub channel: ChannelType,
    pub from_address: String,
    pub to_address: String,
    pub subject: Option<String>,
    pub body: String,
    pub metadata: Option<Value>,
    pub idempotency_key: Option<String>,
}

/// Successful admission. `duplicate` is true when an idempotency key matched
/// an existing message; `message_id` is then the winner's id.
#[derive(Debug, Clone)]
pub struct Acceptance {
    pub message_id: Uuid,
    pub status: MessageStatus,
    pub duplicate: bool,
}

#[derive(Debug, Error)]
pub enum EnqueueError {
    #[error("project not found")]
    ProjectNotFound,
    #[error("project is suspended")]
    ProjectSuspended,
    #[error("monthly quota exceeded ({current}/{limit})")]
    QuotaExceeded { current: i64, limit: i64 },
    #[error("rate limit exceeded ({current}/{limit} per minute)")]
    RateLimited { current: i64, limit: i64 },
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct Enqueuer {
    store: Arc<dyn Store>,
    quota: QuotaController,
    rate: RateLimiter,
    idempotency: IdempotencyGuard,
}

impl Enqueuer {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            quota: QuotaController::new(store.clone()),
            rate: RateLimiter::new(store.clone()),
            idempotency: IdempotencyGuard::new(store.clone()),
            store,
        }
    }

    pub async fn accept(&self, request: AcceptRequest) -> Result<Acceptance, EnqueueError> {
        let project = self
            .store
            .get_project(request.project_id)
            .await?
            .ok_or(EnqueueError::ProjectNotFound)?;
        if project.status == ProjectStatus::Suspended {
            metrics::counter!("courier_enqueue_rejected_total", "reason" => "suspended")
                .increment(1);
            return Err(EnqueueError::ProjectSuspended);
        }

        if let QuotaDecision::Exceeded { current, limit } = self.quota.check(&project).await? {
            metrics::counter!("courier_enqueue_rejected_total", "reason" => "quota").increment(1);
            return Err(EnqueueError::QuotaExceeded { current, limit });
        }

        if let RateDecision::Exceeded { current, limit } = self.rate.acquire(&project).await? {
            metrics::counter!("courier_enqueue_rejected_total", "reason" => "rate").increment(1);
            return Err(EnqueueError::RateLimited { current, limit });
        }

        if let IdempotencyOutcome::Duplicate { message_id, status } = self
            .idempotency
            .check(project.id, request.idempotency_key.as_deref())
            .await?
        {
            metrics::counter!("courier_enqueue_duplicate_total").increment(1);
            return Ok(Acceptance {
                message_id,
                status,
                duplicate: true,
            });
        }

        let idempotency_key = request.idempotency_key.clone();
        let outcome = self
            .store
            .insert_message(NewMessage {
                project_id: request.project_id,
                channel: request.channel,
                from_address: request.from_address,
                to_address: request.to_address,
                subject: request.subject,
                body: request.body,
                metadata: request.metadata,
                idempotency_key: request.idempotency_key,
                max_attempts: DEFAULT_MAX_ATTEMPTS,
            })
            .await?;

        match outcome {
            InsertOutcome::Inserted(message) => {
                metrics::counter!("courier_enqueue_accepted_total").increment(1);
                tracing::debug!(message_id = %message.id, project_id = %project.id, "message queued");
                Ok(Acceptance {
                    message_id: message.id,
                    status: message.status,
                    duplicate: false,
                })
            }
            InsertOutcome::DuplicateKey => {
                // Lost the insert race; the unique index chose a winner.
                let key = idempotency_key.as_deref().ok_or_else(|| {
                    StoreError::Unexpected(anyhow!("duplicate insert outcome without a key"))
                })?;
                let (message_id, status) = self
                    .store
                    .find_by_idempotency_key(request.project_id, key)
                    .await?
                    .ok_or_else(|| {
                        StoreError::Unexpected(anyhow!(
                            "idempotency race lost but winning row is missing"
                        ))
                    })?;
                metrics::counter!("courier_enqueue_duplicate_total").increment(1);
                Ok(Acceptance {
                    message_id,
                    status,
                    duplicate: true,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EventType;
    use crate::store::memory::MemoryStore;
    use crate::store::NewProject;

    async fn store_with_project(
        monthly_limit: Option<i32>,
        rate_limit: Option<i32>,
    ) -> (Arc<MemoryStore>, Uuid) {
        let store = Arc::new(MemoryStore::new());
        let project = store
            .create_project(NewProject {
                name: "acme".to_string(),
                owner_email: "ops@acme.test".to_string(),
                monthly_limit,
                rate_limit_per_minute: rate_limit,
            })
            .await
            .expect("project");
        (store, project.id)
    }

    fn request(project_id: Uuid, key: Option<&str>) -> AcceptRequest {
        AcceptRequest {
            project_id,
            channel: ChannelType::Email,
            from_address: "noreply@example.com".to_string(),
            to_address: "someone@example.com".to_string(),
            subject: Some("hello".to_string()),
            body: "hi".to_string(),
            metadata: None,
            idempotency_key: key.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn fresh_accept_queues_with_requested_event() {
        let (store, project_id) = store_with_project(None, None).await;
        let enqueuer = Enqueuer::new(store.clone());

        let acceptance = enqueuer
            .accept(request(project_id, None))
            .await
            .expect("accept");
        assert!(!acceptance.duplicate);
        assert_eq!(acceptance.status, MessageStatus::Queued);

        let events = store
            .list_events(acceptance.message_id)
            .await
            .expect("events");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::Requested);
    }

    #[tokio::test]
    async fn repeated_key_returns_the_same_id() {
        let (store, project_id) = store_with_project(None, None).await;
        let enqueuer = Enqueuer::new(store.clone());

        let first = enqueuer
            .accept(request(project_id, Some("k1")))
            .await
            .expect("first");
        let second = enqueuer
            .accept(request(project_id, Some("k1")))
            .await
            .expect("second");

        assert!(!first.duplicate);
        assert!(second.duplicate);
        assert_eq!(first.message_id, second.message_id);

        let messages = store.list_messages(project_id, 100).await.expect("list");
        assert_eq!(messages.len(), 1);
    }

    #[tokio::test]
    async fn unknown_project_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let enqueuer = Enqueuer::new(store);
        let err = enqueuer
            .accept(request(Uuid::new_v4(), None))
            .await
            .expect_err("reject");
        assert!(matches!(err, EnqueueError::ProjectNotFound));
    }

    #[tokio::test]
    async fn suspended_project_is_rejected_before_consuming_a_token() {
        let (store, project_id) = store_with_project(None, Some(10)).await;
        store
            .patch_project(
                project_id,
                crate::store::ProjectPatch {
                    status: Some(ProjectStatus::Suspended),
                    ..Default::default()
                },
            )
            .await
            .expect("suspend");

        let enqueuer = Enqueuer::new(store.clone());
        let err = enqueuer
            .accept(request(project_id, None))
            .await
            .expect_err("reject");
        assert!(matches!(err, EnqueueError::ProjectSuspended));

        // Suspension fires before the rate limiter: no token was burned.
        let window = crate::usage::minute_window(chrono::Utc::now());
        assert_eq!(
            store
                .increment_rate_bucket(project_id, window)
                .await
                .expect("probe"),
            1
        );
    }

    #[tokio::test]
    async fn rate_limit_rejection_reports_counts() {
        let (store, project_id) = store_with_project(None, Some(2)).await;
        let enqueuer = Enqueuer::new(store);

        enqueuer
            .accept(request(project_id, None))
            .await
            .expect("first");
        enqueuer
            .accept(request(project_id, None))
            .await
            .expect("second");
        let err = enqueuer
            .accept(request(project_id, None))
            .await
            .expect_err("third");
        match err {
            EnqueueError::RateLimited { current, limit } => {
                assert_eq!(current, 3);
                assert_eq!(limit, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
