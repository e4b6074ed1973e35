//! Worker lifecycle: startup validation, the polling loop, the periodic
//! heartbeat, and signal-driven graceful drain.
//!
//! The supervisor owns exactly one polling loop per process; horizontal
//! scale comes from running more worker processes, coordinated only through
//! the claim query's row locks.

use crate::dispatch::Dispatcher;
use crate::janitor::Janitor;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub poll_interval: Duration,
    pub heartbeat_interval: Duration,
    /// How long to wait for an in-flight batch after a shutdown signal.
    pub drain_timeout: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1_000),
            heartbeat_interval: Duration::from_secs(30),
            drain_timeout: Duration::from_secs(5),
        }
    }
}

pub struct Supervisor {
    dispatcher: Arc<Dispatcher>,
    janitor: Arc<Janitor>,
    config: SupervisorConfig,
}

impl Supervisor {
    pub fn new(dispatcher: Arc<Dispatcher>, janitor: Arc<Janitor>, config: SupervisorConfig) -> Self {
        Self {
            dispatcher,
            janitor,
            config,
        }
    }

    /// Warn about configurations that are legal but probably mistakes.
    pub fn validate(&self) {
        let batch_size = self.dispatcher.config().batch_size;
        if batch_size > 100 {
            tracing::warn!(batch_size, "batch size above 100; claims will hold many row locks");
        }
        if self.config.poll_interval < Duration::from_millis(100) {
            tracing::warn!(
                poll_interval_ms = self.config.poll_interval.as_millis() as u64,
                "poll interval below 100ms; the database will be polled very aggressively"
            );
        }
    }

    /// Run until `shutdown` is cancelled: heartbeat and janitor as side
    /// tasks, the polling loop in the foreground. On shutdown, no new batch
    /// is claimed and the in-flight one gets `drain_timeout` to commit.
    pub async fn run(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        self.validate();
        let started_at = Instant::now();

        let heartbeat = tokio::spawn(heartbeat_loop(
            Arc::clone(&self.dispatcher),
            self.config.heartbeat_interval,
            started_at,
            shutdown.clone(),
        ));
        let janitor = Arc::clone(&self.janitor);
        let janitor_shutdown = shutdown.clone();
        let janitor_task = tokio::spawn(async move {
            janitor.run(janitor_shutdown).await;
        });

        tracing::info!("worker polling loop started");
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let poll = self.dispatcher.poll_once();
                    tokio::pin!(poll);
                    tokio::select! {
                        result = &mut poll => {
                            if let Err(err) = result {
                                tracing::error!(error = ?err, "poll failed");
                            }
                        }
                        _ = shutdown.cancelled() => {
                            // Stop claiming; give the in-flight batch a
                            // bounded window to finish and commit.
                            match tokio::time::timeout(self.config.drain_timeout, &mut poll).await {
                                Ok(Ok(_)) => tracing::info!("in-flight batch drained"),
                                Ok(Err(err)) => {
                                    tracing::error!(error = ?err, "in-flight batch failed during drain");
                                }
                                Err(_) => {
                                    tracing::warn!(
                                        drain_timeout_ms = self.config.drain_timeout.as_millis() as u64,
                                        "drain timeout elapsed; abandoning in-flight batch"
                                    );
                                }
                            }
                            break;
                        }
                    }
                }
            }
        }

        tracing::info!("worker polling loop stopped");
        let _ = heartbeat.await;
        let _ = janitor_task.await;
        Ok(())
    }
}

async fn heartbeat_loop(
    dispatcher: Arc<Dispatcher>,
    interval: Duration,
    started_at: Instant,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    // The first tick fires immediately; skip it so the first heartbeat
    // carries a real uptime.
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = ticker.tick() => {
                let stats = dispatcher.stats().snapshot();
                tracing::info!(
                    uptime_secs = started_at.elapsed().as_secs(),
                    polls = stats.polls,
                    claimed = stats.claimed,
                    delivered = stats.delivered,
                    retried = stats.retried,
                    failed = stats.failed,
                    dead = stats.dead,
                    skipped = stats.skipped,
                    "worker heartbeat"
                );
            }
        }
    }
}

/// Install SIGTERM/SIGINT handlers; the returned token is cancelled when
/// either fires.
pub fn install_signal_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let handler_token = token.clone();

    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(sigterm) => sigterm,
                Err(err) => {
                    tracing::error!(error = ?err, "failed to install SIGTERM handler");
                    let _ = ctrl_c.await;
                    handler_token.cancel();
                    return;
                }
            };
            tokio::select! {
                _ = ctrl_c => tracing::info!("received SIGINT, draining"),
                _ = sigterm.recv() => tracing::info!("received SIGTERM, draining"),
            }
        }

        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
            tracing::info!("received Ctrl+C, draining");
        }

        handler_token.cancel();
    });

    token
}
