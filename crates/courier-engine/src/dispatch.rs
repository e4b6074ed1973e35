//! The worker poll loop's inner machinery: claim a batch, drive each
//! message through the delivery state machine, commit once.
//!
//! # State machine per claimed message
//! 1. Suspension re-check: a now-suspended project gets a `skipped` event and
//!    the message is left untouched, so delivery pauses without penalty.
//! 2. Attempt ceiling: `attempts >= max_attempts` transitions to `dead`.
//! 3. Otherwise increment `attempts`, call the provider under its deadline,
//!    and classify: delivered / retry with backoff / terminal failure.
//!    Broker-level errors (missing adapter, deadline, adapter breakage) are
//!    retryable transients.
//!
//! Attempt bookkeeping and termination stay separate steps: a retryable
//! failure that exhausts the ceiling is dead-lettered by the *next* poll,
//! not by this one.
//!
//! # At-least-once boundary
//! Provider calls happen before the batch commit. If the commit fails, a
//! delivered message may be recorded as still queued and will be sent again.

use crate::model::{Message, ProjectStatus};
use crate::provider::ProviderBroker;
use crate::retry::backoff_seconds;
use crate::store::{PollBatch, Store, StoreResult};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub batch_size: i64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self { batch_size: 10 }
    }
}

/// Cumulative counters since process start, surfaced by the heartbeat.
#[derive(Debug, Default)]
pub struct DispatcherStats {
    pub polls: AtomicU64,
    pub claimed: AtomicU64,
    pub delivered: AtomicU64,
    pub retried: AtomicU64,
    pub failed: AtomicU64,
    pub dead: AtomicU64,
    pub skipped: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub polls: u64,
    pub claimed: u64,
    pub delivered: u64,
    pub retried: u64,
    pub failed: u64,
    pub dead: u64,
    pub skipped: u64,
}

impl DispatcherStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            polls: self.polls.load(Ordering::Relaxed),
            claimed: self.claimed.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dead: self.dead.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }
}

pub struct Dispatcher {
    store: Arc<dyn Store>,
    broker: ProviderBroker,
    config: DispatcherConfig,
    stats: Arc<DispatcherStats>,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn Store>, broker: ProviderBroker, config: DispatcherConfig) -> Self {
        Self {
            store,
            broker,
            config,
            stats: Arc::new(DispatcherStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<DispatcherStats> {
        Arc::clone(&self.stats)
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// One poll against the current wall clock.
    pub async fn poll_once(&self) -> StoreResult<usize> {
        self.poll_once_at(Utc::now()).await
    }

    /// One poll: claim, process every claimed message, commit the batch.
    ///
    /// `now` parameterizes claim eligibility and backoff arithmetic so the
    /// retry schedule is testable without sleeping through it.
    pub async fn poll_once_at(&self, now: DateTime<Utc>) -> StoreResult<usize> {
        let mut batch = self.store.begin_poll(self.config.batch_size, now).await?;
        self.stats.polls.fetch_add(1, Ordering::Relaxed);

        let messages = batch.messages().to_vec();
        if messages.is_empty() {
            batch.commit().await?;
            return Ok(0);
        }
        let claimed = messages.len();
        self.stats.claimed.fetch_add(claimed as u64, Ordering::Relaxed);
        metrics::counter!("courier_messages_claimed_total").increment(claimed as u64);

        // One status read per project per poll, inside the transaction.
        let mut project_status: HashMap<Uuid, Option<ProjectStatus>> = HashMap::new();

        for message in &messages {
            let status = match project_status.get(&message.project_id) {
                Some(status) => *status,
                None => {
                    let status = batch.project_status(message.project_id).await?;
                    project_status.insert(message.project_id, status);
                    status
                }
            };
            self.process(&mut batch, message, status, now).await?;
        }

        batch.commit().await?;
        Ok(claimed)
    }

    async fn process(
        &self,
        batch: &mut Box<dyn PollBatch>,
        message: &Message,
        project_status: Option<ProjectStatus>,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        if project_status != Some(ProjectStatus::Active) {
            // Leave the message queued and untouched; it becomes deliverable
            // again the moment the project is resumed.
            batch
                .record_skipped(message, json!({"reason": "Project suspended"}))
                .await?;
            self.stats.skipped.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("courier_messages_skipped_total").increment(1);
            tracing::debug!(message_id = %message.id, "skipped message of suspended project");
            return Ok(());
        }

        if message.attempts >= message.max_attempts {
            batch
                .mark_dead(
                    message,
                    json!({"reason": "Max attempts exceeded", "attempts": message.attempts}),
                )
                .await?;
            self.stats.dead.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("courier_messages_dead_total").increment(1);
            tracing::warn!(
                message_id = %message.id,
                attempts = message.attempts,
                "message dead-lettered"
            );
            return Ok(());
        }

        let attempts = batch.start_attempt(message).await?;

        match self.broker.send(message).await {
            Ok(verdict) if verdict.success => {
                batch
                    .mark_delivered(message, verdict.provider_response)
                    .await?;
                self.stats.delivered.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("courier_messages_delivered_total").increment(1);
                tracing::info!(message_id = %message.id, attempts, "message delivered");
            }
            Ok(verdict) if verdict.retryable => {
                let error = verdict
                    .error_message
                    .unwrap_or_else(|| "provider failure".to_string());
                self.schedule_retry(batch, message, attempts, now, &error).await?;
            }
            Ok(verdict) => {
                let error = verdict
                    .error_message
                    .unwrap_or_else(|| "provider failure".to_string());
                batch
                    .mark_failed(
                        message,
                        json!({
                            "error": error,
                            "retryable": false,
                            "provider_response": verdict.provider_response,
                        }),
                    )
                    .await?;
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("courier_messages_failed_total").increment(1);
                tracing::warn!(message_id = %message.id, attempts, error, "message failed permanently");
            }
            Err(err) => {
                // Missing adapter, deadline, or adapter breakage: all
                // retryable transients; the worker must keep going.
                self.schedule_retry(batch, message, attempts, now, &err.to_string())
                    .await?;
            }
        }
        Ok(())
    }

    async fn schedule_retry(
        &self,
        batch: &mut Box<dyn PollBatch>,
        message: &Message,
        attempts: i32,
        now: DateTime<Utc>,
        error: &str,
    ) -> StoreResult<()> {
        let backoff = backoff_seconds(attempts);
        let next_attempt_at = now + chrono::Duration::seconds(backoff as i64);
        batch
            .mark_retry(
                message,
                next_attempt_at,
                json!({
                    "error": error,
                    "retryable": true,
                    "next_attempt_at": next_attempt_at,
                    "backoff_seconds": backoff,
                }),
            )
            .await?;
        self.stats.retried.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("courier_messages_retried_total").increment(1);
        tracing::info!(
            message_id = %message.id,
            attempts,
            backoff_seconds = backoff,
            error,
            "message scheduled for retry"
        );
        Ok(())
    }
}
