use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::time::Duration;

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_BATCH_SIZE: i64 = 10;
pub const DEFAULT_METRICS_PORT: u16 = 9465;

// Worker process configuration sourced from environment variables, with an
// optional YAML override file.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database_url: Option<String>,
    pub poll_interval: Duration,
    pub batch_size: i64,
    pub metrics_bind: SocketAddr,
}

#[derive(Debug, Deserialize)]
struct WorkerConfigOverride {
    database_url: Option<String>,
    poll_interval_ms: Option<u64>,
    batch_size: Option<i64>,
    metrics_port: Option<u16>,
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self> {
        let poll_interval_ms = match std::env::var("WORKER_POLL_INTERVAL_MS") {
            Ok(value) => value.parse().with_context(|| "parse WORKER_POLL_INTERVAL_MS")?,
            Err(_) => DEFAULT_POLL_INTERVAL_MS,
        };
        let batch_size = match std::env::var("WORKER_BATCH_SIZE") {
            Ok(value) => value.parse().with_context(|| "parse WORKER_BATCH_SIZE")?,
            Err(_) => DEFAULT_BATCH_SIZE,
        };
        let metrics_port = match std::env::var("METRICS_PORT") {
            Ok(value) => value.parse().with_context(|| "parse METRICS_PORT")?,
            Err(_) => DEFAULT_METRICS_PORT,
        };
        Ok(Self {
            database_url: std::env::var("DATABASE_URL").ok(),
            poll_interval: Duration::from_millis(poll_interval_ms),
            batch_size,
            metrics_bind: SocketAddr::from(([0, 0, 0, 0], metrics_port)),
        })
    }

    pub fn from_env_or_yaml() -> Result<Self> {
        let mut config = Self::from_env()?;
        if let Ok(path) = std::env::var("COURIER_WORKER_CONFIG") {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("read COURIER_WORKER_CONFIG: {path}"))?;
            let override_cfg: WorkerConfigOverride =
                serde_yaml::from_str(&contents).with_context(|| "parse worker config yaml")?;
            if let Some(url) = override_cfg.database_url {
                config.database_url = Some(url);
            }
            if let Some(ms) = override_cfg.poll_interval_ms {
                config.poll_interval = Duration::from_millis(ms);
            }
            if let Some(batch_size) = override_cfg.batch_size {
                config.batch_size = batch_size;
            }
            if let Some(port) = override_cfg.metrics_port {
                config.metrics_bind.set_port(port);
            }
        }
        Ok(config)
    }
}
