// Runtime configuration for the booking core

use crate::pricing::FeePolicy;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

pub const ENV_PREFIX: &str = "STAY_BOOKING_";

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Configuration parse error: {0}")]
    ParseError(String),

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("I/O error: {0}")]
    IoError(String),
}

// Per-attempt limits for the HTTP reservation boundary. The whole sequence of
// attempts has to fit inside the wizard's submission timeout.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub request_timeout_ms: u64,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    // Fraction of the delay added or removed at random, 0.0..=1.0
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            request_timeout_ms: 5000,
            backoff_base_ms: 200,
            backoff_cap_ms: 2000,
            jitter: 0.2,
        }
    }
}

impl RetryConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    // Delay before retry number `attempt + 1`, before jitter
    pub fn backoff_ceiling_ms(&self, attempt: u32) -> u64 {
        self.backoff_base_ms
            .saturating_mul(1u64 << attempt.min(32))
            .min(self.backoff_cap_ms)
    }

    /// Longest a full run of attempts can take: every request timing out plus
    /// the largest possible delay between them.
    pub fn worst_case(&self) -> Duration {
        let requests = self
            .request_timeout_ms
            .saturating_mul(u64::from(self.max_retries) + 1);
        let delays: u64 = (0..self.max_retries)
            .map(|attempt| self.backoff_ceiling_ms(attempt))
            .fold(0, u64::saturating_add);
        let delays = (delays as f64 * (1.0 + self.jitter)).ceil() as u64;
        Duration::from_millis(requests.saturating_add(delays))
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BookingConfig {
    pub brand_prefix: String,
    pub fee_policy: FeePolicy,
    pub allow_same_day_check_in: bool,
    pub processing_delay_ms: u64,
    pub submission_timeout_ms: u64,
    pub reservations_url: String,
    pub api_key: Option<String>,
    pub retry_config: RetryConfig,
}

impl Default for BookingConfig {
    fn default() -> Self {
        Self {
            brand_prefix: "645".to_string(),
            fee_policy: FeePolicy::default(),
            allow_same_day_check_in: false,
            processing_delay_ms: 2000,
            submission_timeout_ms: 30000,
            reservations_url: "http://localhost:8080/api".to_string(),
            api_key: None,
            retry_config: RetryConfig::default(),
        }
    }
}

impl BookingConfig {
    pub fn processing_delay(&self) -> Duration {
        Duration::from_millis(self.processing_delay_ms)
    }

    pub fn submission_timeout(&self) -> Duration {
        Duration::from_millis(self.submission_timeout_ms)
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: BookingConfig =
            serde_json::from_str(json).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        Self::from_json(&content)
    }

    // Defaults overridden by STAY_BOOKING_* environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));

        if let Some(prefix) = var("BRAND_PREFIX") {
            config.brand_prefix = prefix;
        }
        if let Some(bps) = var("SERVICE_FEE_BPS") {
            config.fee_policy.fee_bps = parse_value("SERVICE_FEE_BPS", &bps)?;
        }
        if let Some(flag) = var("SAME_DAY_CHECK_IN") {
            config.allow_same_day_check_in = parse_value("SAME_DAY_CHECK_IN", &flag)?;
        }
        if let Some(delay) = var("PROCESSING_DELAY_MS") {
            config.processing_delay_ms = parse_value("PROCESSING_DELAY_MS", &delay)?;
        }
        if let Some(timeout) = var("SUBMISSION_TIMEOUT_MS") {
            config.submission_timeout_ms = parse_value("SUBMISSION_TIMEOUT_MS", &timeout)?;
        }
        if let Some(url) = var("RESERVATIONS_URL") {
            config.reservations_url = url;
        }
        if let Some(key) = var("API_KEY") {
            config.api_key = Some(key);
        }
        if let Some(retries) = var("MAX_RETRIES") {
            config.retry_config.max_retries = parse_value("MAX_RETRIES", &retries)?;
        }
        if let Some(timeout) = var("REQUEST_TIMEOUT_MS") {
            config.retry_config.request_timeout_ms = parse_value("REQUEST_TIMEOUT_MS", &timeout)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.brand_prefix.is_empty()
            || !self.brand_prefix.chars().all(|c| c.is_ascii_alphanumeric())
        {
            return Err(ConfigError::InvalidValue {
                key: "brand_prefix".to_string(),
                value: self.brand_prefix.clone(),
            });
        }
        if self.fee_policy.fee_bps > 10_000 {
            return Err(ConfigError::InvalidValue {
                key: "fee_bps".to_string(),
                value: self.fee_policy.fee_bps.to_string(),
            });
        }
        if self.submission_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "submission_timeout_ms".to_string(),
                value: "0".to_string(),
            });
        }
        let retry = &self.retry_config;
        if retry.request_timeout_ms == 0
            || retry.backoff_base_ms > retry.backoff_cap_ms
            || !(0.0..=1.0).contains(&retry.jitter)
        {
            return Err(ConfigError::InvalidValue {
                key: "retry_config".to_string(),
                value: format!("{:?}", retry),
            });
        }
        // Otherwise the wizard gives up before the gateway has used its retries
        if retry.worst_case() > self.submission_timeout() {
            return Err(ConfigError::InvalidValue {
                key: "submission_timeout_ms".to_string(),
                value: format!(
                    "{} (retries need up to {}ms)",
                    self.submission_timeout_ms,
                    retry.worst_case().as_millis()
                ),
            });
        }
        Ok(())
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}
