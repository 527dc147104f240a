use serde::Deserialize;
use std::env;
use std::str::FromStr;
use waybill_common::error::{WaybillError, WaybillResult};

/// Read a required variable, erroring when it is unset.
pub fn var(key: &str) -> WaybillResult<String> {
    env::var(key).map_err(|_| WaybillError::Config(format!("{key} is required but not set")))
}

/// Read a variable, falling back to `default` when unset.
pub fn var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_owned())
}

/// Parse a tunable, keeping `default` when the variable is unset or does
/// not parse. Tunables never take the process down.
pub fn parse_var_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub redis_url: String,
    pub host: String,
    pub port: u16,
    pub log_level: String,
}

impl AppConfig {
    /// Load service configuration, reading a `.env` file first when one
    /// is present. Only `DATABASE_URL` is required; everything else has
    /// a local-development default. A malformed `PORT` is an error, not
    /// a fallback, since silently binding the wrong port would be worse.
    pub fn from_env() -> WaybillResult<Self> {
        let _ = dotenvy::dotenv();

        let port_raw = var_or("PORT", "8080");
        let port = port_raw
            .parse()
            .map_err(|e| WaybillError::Config(format!("invalid PORT {port_raw:?}: {e}")))?;

        Ok(Self {
            database_url: var("DATABASE_URL")?,
            redis_url: var_or("REDIS_URL", "redis://127.0.0.1:6379"),
            host: var_or("HOST", "0.0.0.0"),
            port,
            log_level: var_or("LOG_LEVEL", "info"),
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
