//! Application configuration loaded from environment variables.

use crate::errors::{Result, StorefrontError};
use crate::revenue::RefreshMode;

/// Which [`DataStore`](crate::store::DataStore) implementation backs the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Sqlite,
    Rest,
}

impl StoreBackend {
    fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "rest" => Ok(Self::Rest),
            other => Err(StorefrontError::Config(format!(
                "Invalid STORE_BACKEND '{other}' (expected sqlite or rest)"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub store_backend: StoreBackend,
    /// Path to the SQLite database file (sqlite backend)
    pub database_url: String,
    /// Base URL of the PostgREST-compatible store (rest backend)
    pub rest_url: Option<String>,
    /// API key sent as `apikey` and bearer token (rest backend)
    pub rest_api_key: Option<String>,
    /// Port for the REST API server
    pub api_port: u16,
    /// How often (in seconds) the watcher snapshots the store for outside writes
    pub watch_interval_secs: u64,
    /// Read all revenue inputs inside one store transaction when supported
    pub revenue_snapshot: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let store_backend = StoreBackend::parse(
            &env_var("STORE_BACKEND").unwrap_or_else(|_| "sqlite".to_string()),
        )?;

        let rest_url = env_var("REST_URL").ok();
        let rest_api_key = env_var("REST_API_KEY").ok();
        if store_backend == StoreBackend::Rest {
            if rest_url.is_none() {
                return Err(StorefrontError::Config(
                    "REST_URL environment variable is required for the rest backend".to_string(),
                ));
            }
            if rest_api_key.is_none() {
                return Err(StorefrontError::Config(
                    "REST_API_KEY environment variable is required for the rest backend"
                        .to_string(),
                ));
            }
        }

        Ok(Config {
            store_backend,
            database_url: env_var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:./storefront.db".to_string()),
            rest_url,
            rest_api_key,
            api_port: env_var("API_PORT")
                .unwrap_or_else(|_| "3001".to_string())
                .parse()
                .map_err(|_| StorefrontError::Config("Invalid API_PORT".to_string()))?,
            watch_interval_secs: env_var("WATCH_INTERVAL_SECS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .map_err(|_| StorefrontError::Config("Invalid WATCH_INTERVAL_SECS".to_string()))?,
            revenue_snapshot: parse_bool(
                &env_var("REVENUE_SNAPSHOT").unwrap_or_else(|_| "false".to_string()),
            )
            .ok_or_else(|| StorefrontError::Config("Invalid REVENUE_SNAPSHOT".to_string()))?,
        })
    }

    pub fn refresh_mode(&self) -> RefreshMode {
        if self.revenue_snapshot {
            RefreshMode::Snapshot
        } else {
            RefreshMode::Sequential
        }
    }
}

fn env_var(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| StorefrontError::Config(format!("Missing env var: {key}")))
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}
