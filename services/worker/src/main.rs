// Courier delivery worker
// -----------------------
// Drains the message queue: claims batches under skip-locked row locks,
// drives each message through the provider adapters, records outcomes, and
// sweeps retention. Any number of worker processes may run against the same
// database; they coordinate only through the claim query.

use anyhow::Result;
use courier_engine::dispatch::{Dispatcher, DispatcherConfig};
use courier_engine::janitor::{Janitor, JanitorConfig};
use courier_engine::model::ChannelType;
use courier_engine::provider::email::MockSmtpProvider;
use courier_engine::provider::ProviderBroker;
use courier_engine::store::memory::MemoryStore;
use courier_engine::store::postgres::{PostgresConfig, PostgresStore};
use courier_engine::store::Store;
use courier_engine::supervisor::{install_signal_handler, Supervisor, SupervisorConfig};
use courier_worker::config::WorkerConfig;
use courier_worker::observability;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    let metrics_handle = observability::init_observability();
    let config = WorkerConfig::from_env_or_yaml()?;

    let store: Arc<dyn Store> = match &config.database_url {
        Some(url) => Arc::new(PostgresStore::connect(&PostgresConfig::new(url)).await?),
        None => {
            tracing::warn!(
                "DATABASE_URL not set; using the in-memory store (queue is not shared with the API)"
            );
            Arc::new(MemoryStore::new())
        }
    };
    tracing::info!(
        backend = store.backend_name(),
        durable = store.is_durable(),
        "store ready"
    );

    tokio::spawn(observability::serve_metrics(
        metrics_handle,
        config.metrics_bind,
    ));

    // Email is the only channel with a real adapter today; anything else a
    // tenant manages to enqueue keeps retrying as an unsupported channel.
    let broker =
        ProviderBroker::new().register(ChannelType::Email, Arc::new(MockSmtpProvider::new()));

    let dispatcher = Arc::new(Dispatcher::new(
        store.clone(),
        broker,
        DispatcherConfig {
            batch_size: config.batch_size,
        },
    ));
    let janitor = Arc::new(Janitor::new(store, JanitorConfig::default()));
    let supervisor = Supervisor::new(
        dispatcher,
        janitor,
        SupervisorConfig {
            poll_interval: config.poll_interval,
            ..SupervisorConfig::default()
        },
    );

    let shutdown = install_signal_handler();
    supervisor.run(shutdown).await
}
