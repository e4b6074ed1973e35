//! Monthly quota admission check.
//!
//! Advisory by design: the check is not transactional with the subsequent
//! enqueue. Usage only increments on successful delivery, so double-admission
//! inside one usage tick is acceptable: the ceiling is a fairness boundary,
//! not a billing gate.

use crate::model::Project;
use crate::store::{Store, StoreResult};
use crate::usage::current_period;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuotaDecision {
    Allowed,
    Exceeded { current: i64, limit: i64 },
}

pub struct QuotaController {
    store: Arc<dyn Store>,
}

impl QuotaController {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Sum this period's usage across channels against the project ceiling.
    /// No ceiling means unlimited.
    pub async fn check(&self, project: &Project) -> StoreResult<QuotaDecision> {
        let Some(limit) = project.monthly_limit else {
            return Ok(QuotaDecision::Allowed);
        };
        let limit = limit as i64;
        let current = self
            .store
            .usage_total(project.id, &current_period())
            .await?;
        if current >= limit {
            return Ok(QuotaDecision::Exceeded { current, limit });
        }
        Ok(QuotaDecision::Allowed)
    }
}
