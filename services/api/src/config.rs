use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;

pub const DEFAULT_API_PORT: u16 = 3000;
pub const DEFAULT_METRICS_PORT: u16 = 9464;

// API process configuration sourced from environment variables, with an
// optional YAML override file for ops-managed deployments.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    // HTTP bind address; port comes from API_PORT.
    pub bind_addr: SocketAddr,
    // Prometheus exposition bind address.
    pub metrics_bind: SocketAddr,
    // Postgres connection URL. Absent means the non-durable memory store.
    pub database_url: Option<String>,
    pub admin_api_key_read: Option<String>,
    pub admin_api_key_write: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiConfigOverride {
    api_port: Option<u16>,
    metrics_port: Option<u16>,
    database_url: Option<String>,
    admin_api_key_read: Option<String>,
    admin_api_key_write: Option<String>,
}

impl ApiConfig {
    pub fn from_env() -> Result<Self> {
        let api_port = match std::env::var("API_PORT") {
            Ok(value) => value.parse().with_context(|| "parse API_PORT")?,
            Err(_) => DEFAULT_API_PORT,
        };
        let metrics_port = match std::env::var("METRICS_PORT") {
            Ok(value) => value.parse().with_context(|| "parse METRICS_PORT")?,
            Err(_) => DEFAULT_METRICS_PORT,
        };
        Ok(Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], api_port)),
            metrics_bind: SocketAddr::from(([0, 0, 0, 0], metrics_port)),
            database_url: std::env::var("DATABASE_URL").ok(),
            admin_api_key_read: std::env::var("ADMIN_API_KEY_READ").ok(),
            admin_api_key_write: std::env::var("ADMIN_API_KEY_WRITE").ok(),
        })
    }

    pub fn from_env_or_yaml() -> Result<Self> {
        let mut config = Self::from_env()?;
        if let Ok(path) = std::env::var("COURIER_API_CONFIG") {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("read COURIER_API_CONFIG: {path}"))?;
            let override_cfg: ApiConfigOverride =
                serde_yaml::from_str(&contents).with_context(|| "parse api config yaml")?;
            if let Some(port) = override_cfg.api_port {
                config.bind_addr.set_port(port);
            }
            if let Some(port) = override_cfg.metrics_port {
                config.metrics_bind.set_port(port);
            }
            if let Some(url) = override_cfg.database_url {
                config.database_url = Some(url);
            }
            if let Some(token) = override_cfg.admin_api_key_read {
                config.admin_api_key_read = Some(token);
            }
            if let Some(token) = override_cfg.admin_api_key_write {
                config.admin_api_key_write = Some(token);
            }
        }
        Ok(config)
    }
}
