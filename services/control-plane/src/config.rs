use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;

use crate::device::DeviceConfig;
use crate::store::DbConfig;

/// Which machine store backs the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

/// Reclaim worker configuration. Present only when a max hold duration has
/// been configured; absent means no timeout policy exists.
#[derive(Debug, Clone)]
pub struct ReclaimConfig {
    /// How long a reservation may sit in awaiting_dropoff before it is
    /// released.
    pub max_hold: Duration,

    /// How often the worker scans for overdue holds.
    pub interval: Duration,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub log_level: String,
    pub dev_mode: bool,
    pub store_backend: StoreBackend,
    pub database: DbConfig,
    pub device: DeviceConfig,
    pub api_tokens: Vec<String>,
    pub reclaim: Option<ReclaimConfig>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let listen_addr = std::env::var("SUDS_LISTEN_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8080".to_string())
            .parse()?;

        let log_level = std::env::var("SUDS_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let dev_mode = std::env::var("SUDS_DEV")
            .map(|v| v == "1" || v.to_lowercase() == "true")
            .unwrap_or(false);

        let store_backend = match std::env::var("SUDS_STORE").as_deref() {
            Ok("memory") => StoreBackend::Memory,
            _ => StoreBackend::Postgres,
        };

        let database = DbConfig::from_env();
        let device = DeviceConfig::from_env();

        let api_tokens = std::env::var("SUDS_API_TOKENS")
            .map(|raw| {
                raw.split(',')
                    .map(|t| t.trim().to_string())
                    .filter(|t| !t.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let reclaim = std::env::var("SUDS_MAX_HOLD_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(|max_hold_secs| {
                let interval_secs = std::env::var("SUDS_RECLAIM_INTERVAL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(60);
                ReclaimConfig {
                    max_hold: Duration::from_secs(max_hold_secs),
                    interval: Duration::from_secs(interval_secs),
                }
            });

        Ok(Self {
            listen_addr,
            log_level,
            dev_mode,
            store_backend,
            database,
            device,
            api_tokens,
            reclaim,
        })
    }
}
