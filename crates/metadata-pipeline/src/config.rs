use anyhow::{Context, Result};
use std::env;
use std::time::Duration;

/// Pipeline configuration, loaded once at startup from the process
/// environment. Every tunable carries the default that keeps a single
/// pipeline instance behaving the way the original Go service did out of
/// the box.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub db_max_connections: u32,
    pub network: String,
    pub max_retry_count: i32,
    pub workers_count: usize,
    pub tasks_capacity: usize,
    pub results_capacity: usize,
    pub saver_batch: usize,
    pub saver_interval_idle: Duration,
    pub saver_interval_after_flush: Duration,
    pub manager_tick: Duration,
    pub resolve_timeout: Duration,
    pub ipfs_gateways: Vec<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            db_max_connections: env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .context("Invalid DB_MAX_CONNECTIONS")?,
            network: env::var("NETWORK").context("NETWORK must be set")?,
            max_retry_count: env::var("MAX_RETRY_COUNT")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .context("Invalid MAX_RETRY_COUNT")?,
            workers_count: env::var("WORKERS_COUNT")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .context("Invalid WORKERS_COUNT")?,
            tasks_capacity: env::var("TASKS_CAPACITY")
                .unwrap_or_else(|_| "512".to_string())
                .parse()
                .context("Invalid TASKS_CAPACITY")?,
            results_capacity: env::var("RESULTS_CAPACITY")
                .unwrap_or_else(|_| "16".to_string())
                .parse()
                .context("Invalid RESULTS_CAPACITY")?,
            saver_batch: env::var("SAVER_BATCH")
                .unwrap_or_else(|_| "32".to_string())
                .parse()
                .context("Invalid SAVER_BATCH")?,
            saver_interval_idle: Duration::from_millis(
                env::var("SAVER_INTERVAL_IDLE_MS")
                    .unwrap_or_else(|_| "1000".to_string())
                    .parse()
                    .context("Invalid SAVER_INTERVAL_IDLE_MS")?,
            ),
            saver_interval_after_flush: Duration::from_millis(
                env::var("SAVER_INTERVAL_AFTER_FLUSH_MS")
                    .unwrap_or_else(|_| "15000".to_string())
                    .parse()
                    .context("Invalid SAVER_INTERVAL_AFTER_FLUSH_MS")?,
            ),
            manager_tick: Duration::from_millis(
                env::var("MANAGER_TICK_MS")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .context("Invalid MANAGER_TICK_MS")?,
            ),
            resolve_timeout: Duration::from_secs(
                env::var("RESOLVE_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()
                    .context("Invalid RESOLVE_TIMEOUT_SECS")?,
            ),
            ipfs_gateways: env::var("IPFS_GATEWAYS")
                .unwrap_or_else(|_| "https://ipfs.io".to_string())
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        })
    }
}
