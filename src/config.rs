//! Runtime configuration from the environment
//!
//! Binaries call `Config::from_env()` after loading `.env`. Secrets are only
//! ever read from the environment.

use std::str::FromStr;
use std::time::Duration;

use crate::error::LedgerError;
use crate::gemini::{DEFAULT_BASE_URL, DEFAULT_MODEL};
use crate::session::DEFAULT_HISTORY_TURNS;
use crate::store::RetryPolicy;
use crate::Result;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://technician_records.db";

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub database_url: String,
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub gemini_base_url: String,
    pub model_timeout: Duration,
    pub store_retries: u32,
    pub store_retry_delay: Duration,
    pub busy_timeout: Duration,
    pub history_turns: usize,
    pub session_idle_timeout: Duration,
    pub worker_command: Option<String>,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        Ok(Self {
            database_url: get("LEDGER_DATABASE_URL")
                .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            gemini_api_key: get("GEMINI_API_KEY"),
            gemini_model: get("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            gemini_base_url: get("GEMINI_BASE_URL")
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model_timeout: Duration::from_secs(parse_or(
                "LEDGER_MODEL_TIMEOUT_SECS",
                get("LEDGER_MODEL_TIMEOUT_SECS"),
                60,
            )?),
            store_retries: parse_or("LEDGER_STORE_RETRIES", get("LEDGER_STORE_RETRIES"), 3)?,
            store_retry_delay: Duration::from_millis(parse_or(
                "LEDGER_STORE_RETRY_DELAY_MS",
                get("LEDGER_STORE_RETRY_DELAY_MS"),
                100,
            )?),
            busy_timeout: Duration::from_millis(parse_or(
                "LEDGER_BUSY_TIMEOUT_MS",
                get("LEDGER_BUSY_TIMEOUT_MS"),
                100,
            )?),
            history_turns: parse_or(
                "LEDGER_HISTORY_TURNS",
                get("LEDGER_HISTORY_TURNS"),
                DEFAULT_HISTORY_TURNS,
            )?,
            session_idle_timeout: Duration::from_secs(parse_or(
                "LEDGER_SESSION_IDLE_SECS",
                get("LEDGER_SESSION_IDLE_SECS"),
                1800,
            )?),
            worker_command: get("LEDGER_WORKER_COMMAND"),
            port: parse_or("PORT", get("PORT").or_else(|| get("API_PORT")), 8080)?,
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.store_retries, self.store_retry_delay)
    }
}

fn parse_or<T: FromStr>(key: &str, value: Option<String>, default: T) -> Result<T> {
    match value {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| LedgerError::Config(format!("{} has invalid value '{}'", key, raw))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(config.gemini_api_key, None);
        assert_eq!(config.model_timeout, Duration::from_secs(60));
        assert_eq!(config.retry_policy(), RetryPolicy::default());
        assert_eq!(config.history_turns, 6);
        assert_eq!(config.session_idle_timeout, Duration::from_secs(1800));
        assert_eq!(config.port, 8080);
        assert!(config.worker_command.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("GEMINI_API_KEY", "test-key"),
            ("API_PORT", "9000"),
            ("LEDGER_STORE_RETRIES", "5"),
            ("LEDGER_WORKER_COMMAND", "ledger-worker --quiet"),
        ])
        .unwrap();

        assert_eq!(config.gemini_api_key.as_deref(), Some("test-key"));
        assert_eq!(config.port, 9000);
        assert_eq!(config.retry_policy().max_attempts(), 6);
        assert_eq!(config.worker_command.as_deref(), Some("ledger-worker --quiet"));
    }

    #[test]
    fn test_blank_key_is_unset() {
        let config = config(&[("GEMINI_API_KEY", "  ")]).unwrap();
        assert!(config.gemini_api_key.is_none());
    }

    #[test]
    fn test_invalid_number_names_key() {
        let err = config(&[("LEDGER_STORE_RETRIES", "three")]).unwrap_err();
        assert!(err.to_string().contains("LEDGER_STORE_RETRIES"));
    }
}
