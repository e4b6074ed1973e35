// Courier ingestion API
// ---------------------
// Accepts authenticated message submissions into the durable queue and
// serves tenant-scoped reads plus the admin control plane. Delivery itself
// happens in the separate worker process; the two share nothing but the
// database.
//
// Storage backend selection mirrors the worker: Postgres when DATABASE_URL
// is set, otherwise a non-durable in-memory store for local development.

use anyhow::Result;
use courier_api::app::{build_router, AppState};
use courier_api::audit::spawn_audit_writer;
use courier_api::config::ApiConfig;
use courier_api::observability;
use courier_engine::enqueue::Enqueuer;
use courier_engine::store::memory::MemoryStore;
use courier_engine::store::postgres::{PostgresConfig, PostgresStore};
use courier_engine::store::Store;
use courier_engine::supervisor::install_signal_handler;
use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

/// After a shutdown signal, in-flight requests get this long to finish.
const SHUTDOWN_CEILING: Duration = Duration::from_secs(10);

const AUDIT_CHANNEL_CAPACITY: usize = 1024;

#[tokio::main]
async fn main() -> Result<()> {
    let metrics_handle = observability::init_observability("courier-api");
    let config = ApiConfig::from_env_or_yaml()?;

    let store: Arc<dyn Store> = match &config.database_url {
        Some(url) => Arc::new(PostgresStore::connect(&PostgresConfig::new(url)).await?),
        None => {
            tracing::warn!("DATABASE_URL not set; using the non-durable in-memory store");
            Arc::new(MemoryStore::new())
        }
    };
    tracing::info!(
        backend = store.backend_name(),
        durable = store.is_durable(),
        "store ready"
    );

    let (audit, audit_writer) = spawn_audit_writer(store.clone(), AUDIT_CHANNEL_CAPACITY);
    let state = AppState {
        enqueuer: Arc::new(Enqueuer::new(store.clone())),
        store,
        audit,
        admin_api_key_read: config.admin_api_key_read.clone(),
        admin_api_key_write: config.admin_api_key_write.clone(),
        api_version: "v1".to_string(),
    };

    tokio::spawn(observability::serve_metrics(
        metrics_handle,
        config.metrics_bind,
    ));

    let app = build_router(state);
    let addr = config.bind_addr;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "api listening");

    let shutdown = install_signal_handler();
    let drain = shutdown.clone();
    let server = axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move { drain.cancelled().await })
        .into_future();

    tokio::select! {
        result = server => result?,
        _ = async {
            shutdown.cancelled().await;
            tokio::time::sleep(SHUTDOWN_CEILING).await;
        } => {
            tracing::warn!(
                ceiling_secs = SHUTDOWN_CEILING.as_secs(),
                "shutdown ceiling elapsed; exiting with connections open"
            );
        }
    }

    // The server owned the last AuditLogger clones; once it is gone the
    // writer drains whatever is still queued.
    if tokio::time::timeout(Duration::from_secs(5), audit_writer)
        .await
        .is_err()
    {
        tracing::warn!("audit writer did not drain before exit");
    }
    Ok(())
}
