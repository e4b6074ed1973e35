//! Per-tenant, per-minute admission rate limiter.
//!
//! The counter is an atomic upsert on a time-bucketed table, so concurrent
//! API writers cannot lose updates. Every `acquire` on a limited project
//! consumes one token whether or not the request ultimately enqueues:
//! burst protection, not fairness accounting. The janitor disposes of
//! buckets older than an hour.

use crate::model::Project;
use crate::store::{Store, StoreResult};
use crate::usage::minute_window;
use chrono::Utc;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    Exceeded { current: i64, limit: i64 },
}

pub struct RateLimiter {
    store: Arc<dyn Store>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Increment the current tumbling-minute bucket and compare against the
    /// project ceiling. Unlimited projects pass with no side effect.
    pub async fn acquire(&self, project: &Project) -> StoreResult<RateDecision> {
        let Some(limit) = project.rate_limit_per_minute else {
            return Ok(RateDecision::Allowed);
        };
        let limit = limit as i64;
        let window = minute_window(Utc::now());
        let current = self.store.increment_rate_bucket(project.id, window).await?;
        if current > limit {
            return Ok(RateDecision::Exceeded { current, limit });
        }
        Ok(RateDecision::Allowed)
    }
}
