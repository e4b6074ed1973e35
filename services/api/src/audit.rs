//! Bounded audit pipeline for control-plane writes.
//!
//! Admin handlers record audit entries without waiting on the database: the
//! entry goes into a bounded channel and a dedicated task persists it. A full
//! channel drops the entry (with a log line) rather than backpressuring the
//! request. On shutdown the writer drains whatever is queued once the last
//! sender is dropped.

use courier_engine::store::{NewAdminEvent, Store};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Clone)]
pub struct AuditLogger {
    tx: mpsc::Sender<NewAdminEvent>,
}

impl AuditLogger {
    /// Fire-and-forget. Never blocks a request handler.
    pub fn record(&self, event: NewAdminEvent) {
        if self.tx.try_send(event).is_err() {
            metrics::counter!("courier_audit_dropped_total").increment(1);
            tracing::warn!("audit channel full; dropping admin event");
        }
    }
}

/// Spawn the writer task; returns the logger handle and the join handle so
/// the binary can await the final drain on shutdown.
pub fn spawn_audit_writer(
    store: Arc<dyn Store>,
    capacity: usize,
) -> (AuditLogger, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<NewAdminEvent>(capacity);
    let handle = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let Err(err) = store.record_admin_event(event).await {
                tracing::warn!(error = ?err, "failed to persist admin event");
            }
        }
        tracing::debug!("audit writer drained");
    });
    (AuditLogger { tx }, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_engine::store::memory::MemoryStore;

    #[tokio::test]
    async fn events_flow_through_to_the_store() {
        let store = Arc::new(MemoryStore::new());
        let (audit, writer) = spawn_audit_writer(store.clone(), 8);

        audit.record(NewAdminEvent {
            actor: "admin:write".to_string(),
            action: "project.create".to_string(),
            project_id: None,
            detail: Some(serde_json::json!({"name": "acme"})),
        });
        drop(audit);
        writer.await.expect("writer");

        let events = store.list_admin_events(10).await.expect("events");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action, "project.create");
    }

    #[tokio::test]
    async fn overflow_drops_instead_of_blocking() {
        let store = Arc::new(MemoryStore::new());
        // Capacity 1 with a writer that we deliberately starve by flooding
        // before it gets scheduled: at least one record must survive and the
        // call itself never blocks.
        let (audit, writer) = spawn_audit_writer(store.clone(), 1);
        for i in 0..32 {
            audit.record(NewAdminEvent {
                actor: "admin:write".to_string(),
                action: format!("burst.{i}"),
                project_id: None,
                detail: None,
            });
        }
        drop(audit);
        writer.await.expect("writer");

        let events = store.list_admin_events(64).await.expect("events");
        assert!(!events.is_empty());
        assert!(events.len() <= 32);
    }
}
