//! Configuration management for the statusflow engine
//!
//! Handles server configuration, database location, background job cadence
//! and per-node-type handler timeouts.

use crate::runtime::handlers::NodeTimeouts;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Scan, sweep and handler settings
    pub engine: EngineConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Server port number
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file holding workflows, the execution ledger and continuations
    pub path: String,
    /// Host table read by the `application` target accessor
    pub applications_table: String,
    /// Host table read by the `contract` target accessor
    pub contracts_table: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// How often the stuck-entity scanner runs
    #[serde(with = "secs")]
    pub scan_interval: Duration,
    /// How often due continuations are swept
    #[serde(with = "secs")]
    pub sweep_interval: Duration,
    /// Most continuations resumed per sweep
    pub sweep_batch_size: u32,
    pub timeouts: NodeTimeouts,
}

mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for k8s/container deployment
    fn default() -> Self {
        let timeouts = NodeTimeouts::default();

        Self {
            server: ServerConfig {
                host: env_string("STATUSFLOW_HOST", "0.0.0.0"),
                port: env_or("STATUSFLOW_PORT", 3004),
            },
            database: DatabaseConfig {
                path: env_string("STATUSFLOW_DATABASE_PATH", "data/statusflow.db"),
                applications_table: env_string("STATUSFLOW_APPLICATIONS_TABLE", "applications"),
                contracts_table: env_string("STATUSFLOW_CONTRACTS_TABLE", "contracts"),
            },
            engine: EngineConfig {
                scan_interval: Duration::from_secs(env_or("STATUSFLOW_SCAN_INTERVAL_SECS", 300)),
                sweep_interval: Duration::from_secs(env_or("STATUSFLOW_SWEEP_INTERVAL_SECS", 30)),
                sweep_batch_size: env_or("STATUSFLOW_SWEEP_BATCH_SIZE", 100),
                timeouts: NodeTimeouts {
                    email: millis_env("STATUSFLOW_EMAIL_TIMEOUT_MS", timeouts.email),
                    webhook: millis_env("STATUSFLOW_WEBHOOK_TIMEOUT_MS", timeouts.webhook),
                    mutation: millis_env("STATUSFLOW_MUTATION_TIMEOUT_MS", timeouts.mutation),
                    condition: millis_env("STATUSFLOW_CONDITION_TIMEOUT_MS", timeouts.condition),
                },
            },
        }
    }
}

fn millis_env(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}
