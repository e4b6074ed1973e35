//! Idempotency guard consulted at enqueue time.
//!
//! The guard is a read; the unique partial index on
//! `(project_id, idempotency_key)` remains the final arbiter under races.
//! The enqueuer handles the lost-race case by calling back into
//! [`crate::store::Store::find_by_idempotency_key`] after an insert
//! conflict.

use crate::model::MessageStatus;
use crate::store::{Store, StoreResult};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdempotencyOutcome {
    Fresh,
    Duplicate {
        message_id: Uuid,
        status: MessageStatus,
    },
}

pub struct IdempotencyGuard {
    store: Arc<dyn Store>,
}

impl IdempotencyGuard {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Absent key always reads as fresh.
    pub async fn check(
        &self,
        project_id: Uuid,
        key: Option<&str>,
    ) -> StoreResult<IdempotencyOutcome> {
        let Some(key) = key else {
            return Ok(IdempotencyOutcome::Fresh);
        };
        match self.store.find_by_idempotency_key(project_id, key).await? {
            Some((message_id, status)) => Ok(IdempotencyOutcome::Duplicate { message_id, status }),
            None => Ok(IdempotencyOutcome::Fresh),
        }
    }
}
