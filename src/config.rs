use std::env;
use std::path::PathBuf;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfirmationMode {
    Poll,
    Push,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Backend endpoints
    pub api_url: String,
    pub catalog_url: Option<String>,
    pub push_url: Option<String>,
    pub request_timeout_ms: u64,

    // Claim flow
    pub terminal_count: u32,
    pub poll_interval_ms: u64,
    pub max_poll_attempts: u32,
    pub claim_timeout_ms: u64,

    // Session
    pub session_file: PathBuf,
    pub idle_logout_ms: u64,

    // Monitoring and logging
    pub log_level: String,
    pub metrics_enabled: bool,
    pub status_port: Option<u16>,

    // Error handling and recovery
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:5000".to_string(),
            catalog_url: None,
            push_url: None,
            request_timeout_ms: 10_000,

            terminal_count: 25,
            poll_interval_ms: 3_000,
            max_poll_attempts: 100,
            claim_timeout_ms: 300_000,

            session_file: PathBuf::from("kai-session.json"),
            idle_logout_ms: 2_000_000,

            log_level: "info".to_string(),
            metrics_enabled: true,
            status_port: None,

            max_retries: 3,
            retry_delay_ms: 1_000,
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, val: String) -> Result<T, ConfigError> {
    val.parse().map_err(|_| ConfigError::InvalidEnvVar(name.to_string(), val))
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds a config from any variable source; `from_env` uses the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        config.api_url = lookup("KAI_API_URL")
            .ok_or_else(|| ConfigError::MissingEnvVar("KAI_API_URL".to_string()))?;

        if let Some(val) = lookup("KAI_CATALOG_URL") {
            config.catalog_url = Some(val);
        }

        if let Some(val) = lookup("KAI_PUSH_URL") {
            config.push_url = Some(val).filter(|v| !v.is_empty());
        }

        if let Some(val) = lookup("REQUEST_TIMEOUT_MS") {
            config.request_timeout_ms = parse_var("REQUEST_TIMEOUT_MS", val)?;
        }

        // Claim flow
        if let Some(val) = lookup("TERMINAL_COUNT") {
            config.terminal_count = parse_var("TERMINAL_COUNT", val)?;
        }

        if let Some(val) = lookup("POLL_INTERVAL_MS") {
            config.poll_interval_ms = parse_var("POLL_INTERVAL_MS", val)?;
        }

        if let Some(val) = lookup("MAX_POLL_ATTEMPTS") {
            config.max_poll_attempts = parse_var("MAX_POLL_ATTEMPTS", val)?;
        }

        if let Some(val) = lookup("CLAIM_TIMEOUT_MS") {
            config.claim_timeout_ms = parse_var("CLAIM_TIMEOUT_MS", val)?;
        }

        // Session
        if let Some(val) = lookup("SESSION_FILE") {
            config.session_file = PathBuf::from(val);
        }

        if let Some(val) = lookup("IDLE_LOGOUT_MS") {
            config.idle_logout_ms = parse_var("IDLE_LOGOUT_MS", val)?;
        }

        // Debug and logging; LOG_LEVEL wins over RUST_LOG
        if let Some(val) = lookup("LOG_LEVEL").or_else(|| lookup("RUST_LOG")) {
            config.log_level = val;
        }

        if let Some(val) = lookup("METRICS_ENABLED") {
            config.metrics_enabled = val == "1";
        }

        if let Some(val) = lookup("STATUS_PORT") {
            config.status_port = Some(parse_var("STATUS_PORT", val)?);
        }

        // Error handling
        if let Some(val) = lookup("MAX_RETRIES") {
            config.max_retries = parse_var("MAX_RETRIES", val)?;
        }

        if let Some(val) = lookup("RETRY_DELAY_MS") {
            config.retry_delay_ms = parse_var("RETRY_DELAY_MS", val)?;
        }

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.api_url.starts_with("http") {
            return Err(ConfigError::ValidationError("KAI_API_URL must be a valid HTTP URL".to_string()));
        }

        if let Some(url) = &self.catalog_url {
            if !url.starts_with("http") {
                return Err(ConfigError::ValidationError("KAI_CATALOG_URL must be a valid HTTP URL".to_string()));
            }
        }

        if let Some(url) = &self.push_url {
            if !url.starts_with("http") {
                return Err(ConfigError::ValidationError("KAI_PUSH_URL must be a valid HTTP URL".to_string()));
            }
        }

        if self.terminal_count == 0 {
            return Err(ConfigError::ValidationError("TERMINAL_COUNT must be greater than 0".to_string()));
        }

        if self.poll_interval_ms == 0 {
            return Err(ConfigError::ValidationError("POLL_INTERVAL_MS must be greater than 0".to_string()));
        }

        if self.max_poll_attempts == 0 {
            return Err(ConfigError::ValidationError("MAX_POLL_ATTEMPTS must be greater than 0".to_string()));
        }

        if self.claim_timeout_ms == 0 {
            return Err(ConfigError::ValidationError("CLAIM_TIMEOUT_MS must be greater than 0".to_string()));
        }

        Ok(())
    }

    pub fn catalog_url(&self) -> &str {
        self.catalog_url.as_deref().unwrap_or(&self.api_url)
    }

    /// Push where a channel is configured, polling otherwise.
    pub fn confirmation_mode(&self) -> ConfirmationMode {
        if self.push_url.is_some() { ConfirmationMode::Push } else { ConfirmationMode::Poll }
    }

    pub fn get_poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn get_claim_timeout(&self) -> Duration {
        Duration::from_millis(self.claim_timeout_ms)
    }

    pub fn get_idle_logout(&self) -> Duration {
        Duration::from_millis(self.idle_logout_ms)
    }

    pub fn get_retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}
