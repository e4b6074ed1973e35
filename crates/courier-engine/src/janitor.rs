//! Retention janitor.
//!
//! Sweeps three tables on a timer: events and terminal messages past the
//! 30-day retention window, and rate-limit buckets older than an hour.
//! Deletes run in bounded chunks with short pauses so a backlog never holds
//! long locks. Sweep failures are logged and the worker carries on.

use crate::store::Store;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct JanitorConfig {
    /// Events and terminal messages older than this are deleted.
    pub retention: ChronoDuration,
    /// Rate buckets older than this are deleted.
    pub rate_bucket_retention: ChronoDuration,
    pub chunk_size: i64,
    /// Pause between chunks of one sweep.
    pub chunk_pause: Duration,
    /// Delay before the first sweep after startup.
    pub initial_delay: Duration,
    /// Interval between sweeps.
    pub interval: Duration,
}

impl Default for JanitorConfig {
    fn default() -> Self {
        Self {
            retention: ChronoDuration::days(30),
            rate_bucket_retention: ChronoDuration::hours(1),
            chunk_size: 1_000,
            chunk_pause: Duration::from_millis(100),
            initial_delay: Duration::from_secs(10),
            interval: Duration::from_secs(3_600),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub events_deleted: u64,
    pub messages_deleted: u64,
    pub rate_buckets_deleted: u64,
}

pub struct Janitor {
    store: Arc<dyn Store>,
    config: JanitorConfig,
}

impl Janitor {
    pub fn new(store: Arc<dyn Store>, config: JanitorConfig) -> Self {
        Self { store, config }
    }

    /// Periodic loop: first sweep after `initial_delay`, then every
    /// `interval`, until shutdown.
    pub async fn run(&self, shutdown: CancellationToken) {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep(self.config.initial_delay) => {}
        }
        loop {
            match self.sweep().await {
                Ok(report) => {
                    tracing::info!(
                        events = report.events_deleted,
                        messages = report.messages_deleted,
                        rate_buckets = report.rate_buckets_deleted,
                        "retention sweep complete"
                    );
                }
                Err(err) => {
                    tracing::warn!(error = ?err, "retention sweep failed");
                }
            }
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(self.config.interval) => {}
            }
        }
    }

    /// One full sweep across all three tables.
    pub async fn sweep(&self) -> crate::store::StoreResult<SweepReport> {
        let now = Utc::now();
        let cutoff = now - self.config.retention;
        let mut report = SweepReport::default();

        loop {
            let deleted = self
                .store
                .delete_events_before(cutoff, self.config.chunk_size)
                .await?;
            report.events_deleted += deleted;
            if deleted < self.config.chunk_size as u64 {
                break;
            }
            tokio::time::sleep(self.config.chunk_pause).await;
        }

        loop {
            let deleted = self
                .store
                .delete_terminal_messages_before(cutoff, self.config.chunk_size)
                .await?;
            report.messages_deleted += deleted;
            if deleted < self.config.chunk_size as u64 {
                break;
            }
            tokio::time::sleep(self.config.chunk_pause).await;
        }

        let rate_cutoff = now - self.config.rate_bucket_retention;
        report.rate_buckets_deleted = self.store.delete_rate_buckets_before(rate_cutoff).await?;

        metrics::counter!("courier_janitor_deleted_total", "entity" => "events")
            .increment(report.events_deleted);
        metrics::counter!("courier_janitor_deleted_total", "entity" => "messages")
            .increment(report.messages_deleted);
        metrics::counter!("courier_janitor_deleted_total", "entity" => "rate_buckets")
            .increment(report.rate_buckets_deleted);
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ChannelType;
    use crate::store::memory::MemoryStore;
    use crate::store::{InsertOutcome, NewMessage, NewProject, PollBatch, Store};
    use serde_json::json;

    #[tokio::test]
    async fn sweep_removes_only_expired_rate_buckets() {
        let store = Arc::new(MemoryStore::new());
        let project = store
            .create_project(NewProject {
                name: "acme".to_string(),
                owner_email: "ops@acme.test".to_string(),
                monthly_limit: None,
                rate_limit_per_minute: Some(10),
            })
            .await
            .expect("project");

        let stale = Utc::now() - ChronoDuration::hours(2);
        let fresh = Utc::now();
        store
            .increment_rate_bucket(project.id, stale)
            .await
            .expect("stale bucket");
        store
            .increment_rate_bucket(project.id, fresh)
            .await
            .expect("fresh bucket");

        let janitor = Janitor::new(store.clone(), JanitorConfig::default());
        let report = janitor.sweep().await.expect("sweep");
        assert_eq!(report.rate_buckets_deleted, 1);

        // The fresh bucket survived: incrementing it continues its count.
        assert_eq!(
            store
                .increment_rate_bucket(project.id, fresh)
                .await
                .expect("probe"),
            2
        );
    }

    #[tokio::test]
    async fn sweep_leaves_recent_messages_alone() {
        let store = Arc::new(MemoryStore::new());
        let project = store
            .create_project(NewProject {
                name: "acme".to_string(),
                owner_email: "ops@acme.test".to_string(),
                monthly_limit: None,
                rate_limit_per_minute: None,
            })
            .await
            .expect("project");
        let outcome = store
            .insert_message(NewMessage {
                project_id: project.id,
                channel: ChannelType::Email,
                from_address: "a@x".to_string(),
                to_address: "b@y".to_string(),
                subject: None,
                body: "hi".to_string(),
                metadata: None,
                idempotency_key: None,
                max_attempts: 3,
            })
            .await
            .expect("insert");
        let message = match outcome {
            InsertOutcome::Inserted(m) => m,
            InsertOutcome::DuplicateKey => panic!("duplicate"),
        };
        let mut batch = store.begin_poll(10, Utc::now()).await.expect("poll");
        batch.start_attempt(&message).await.expect("attempt");
        batch
            .mark_delivered(&message, json!({}))
            .await
            .expect("delivered");
        batch.commit().await.expect("commit");

        let janitor = Janitor::new(store.clone(), JanitorConfig::default());
        let report = janitor.sweep().await.expect("sweep");
        assert_eq!(report.events_deleted, 0);
        assert_eq!(report.messages_deleted, 0);
        assert!(store
            .get_message(project.id, message.id)
            .await
            .expect("get")
            .is_some());
    }
}
