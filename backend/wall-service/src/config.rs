/// Configuration management for Wall Service
///
/// Loads configuration from environment variables (a `.env` file is honoured).
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::services::CounterRetryPolicy;
use crate::workers::ReconcilerConfig;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    /// Counter ledger retry settings
    pub counters: CounterConfig,
    /// Background job settings
    pub jobs: JobsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application environment (development, staging, production)
    pub env: String,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    /// Per-statement timeout; a timed-out counter update is retried
    pub statement_timeout_ms: u64,
}

impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &"[REDACTED]")
            .field("max_connections", &self.max_connections)
            .field("min_connections", &self.min_connections)
            .field("statement_timeout_ms", &self.statement_timeout_ms)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CounterConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    /// 0 disables the reconciler
    pub reconcile_interval_secs: u64,
    pub reconcile_batch_size: i64,
    pub verification_code_ttl_secs: i64,
    /// 0 disables the purge job
    pub verification_purge_interval_secs: u64,
}

fn env_or<T: FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .ok()
            .with_context(|| format!("{} has an invalid value: {:?}", key, raw)),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let app = AppConfig {
            env: std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        };

        let database = DatabaseConfig {
            url: std::env::var("DATABASE_URL")
                .context("DATABASE_URL environment variable not set")?,
            max_connections: env_or("DB_MAX_CONNECTIONS", 20)?,
            min_connections: env_or("DB_MIN_CONNECTIONS", 5)?,
            statement_timeout_ms: env_or("DB_STATEMENT_TIMEOUT_MS", 5000)?,
        };

        let counters = CounterConfig {
            max_attempts: env_or("COUNTER_MAX_ATTEMPTS", 5)?,
            initial_backoff_ms: env_or("COUNTER_INITIAL_BACKOFF_MS", 10)?,
            max_backoff_ms: env_or("COUNTER_MAX_BACKOFF_MS", 200)?,
        };
        if counters.max_attempts == 0 {
            anyhow::bail!("COUNTER_MAX_ATTEMPTS must be at least 1");
        }

        let jobs = JobsConfig {
            reconcile_interval_secs: env_or("RECONCILE_INTERVAL_SECS", 300)?,
            reconcile_batch_size: env_or("RECONCILE_BATCH_SIZE", 500)?,
            verification_code_ttl_secs: env_or("VERIFICATION_CODE_TTL_SECS", 600)?,
            verification_purge_interval_secs: env_or("VERIFICATION_PURGE_INTERVAL_SECS", 60)?,
        };

        Ok(Config {
            app,
            database,
            counters,
            jobs,
        })
    }

    pub fn db_pool_config(&self) -> db_pool::DbConfig {
        db_pool::DbConfig {
            service_name: crate::SERVICE_NAME.to_string(),
            database_url: self.database.url.clone(),
            max_connections: self.database.max_connections,
            min_connections: self.database.min_connections,
            statement_timeout_ms: self.database.statement_timeout_ms,
            ..Default::default()
        }
    }

    pub fn retry_policy(&self) -> CounterRetryPolicy {
        CounterRetryPolicy {
            max_attempts: self.counters.max_attempts,
            initial_backoff: Duration::from_millis(self.counters.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.counters.max_backoff_ms),
            jitter: true,
        }
    }

    pub fn reconciler(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            enabled: self.jobs.reconcile_interval_secs > 0,
            interval: Duration::from_secs(self.jobs.reconcile_interval_secs),
            batch_size: self.jobs.reconcile_batch_size,
        }
    }

    pub fn verification_code_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.jobs.verification_code_ttl_secs)
    }

    pub fn verification_purge_interval(&self) -> Duration {
        Duration::from_secs(self.jobs.verification_purge_interval_secs)
    }
}
