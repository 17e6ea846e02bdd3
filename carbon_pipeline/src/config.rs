use crate::error::{PipelineError, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const TOKEN_ENV: &str = "EM_API_TOKEN";
pub const API_URL_ENV: &str = "EM_API_URL";

pub const DEFAULT_API_URL: &str = "https://api.electricitymaps.com/v3/carbon-intensity/past-range";
pub const DEFAULT_DATA_DIR: &str = "data";
pub const REQUEST_TIMEOUT_SECS: u64 = 40;
pub const RETRY_MAX_ATTEMPTS: u32 = 4;
pub const RETRY_BASE_DELAY_SECS: u64 = 2;
/// Longest span the API serves for hourly data in one request.
pub const WINDOW_DAYS: i64 = 10;

/// Exponential backoff: attempt `n` (0-based) that fails waits
/// `base_delay * 2^n` before the next one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RETRY_MAX_ATTEMPTS, Duration::from_secs(RETRY_BASE_DELAY_SECS))
    }
}

/// Process-wide settings, resolved once at startup and handed to the
/// components that need them.
#[derive(Clone)]
pub struct PipelineConfig {
    pub api_token: String,
    pub api_url: String,
    pub data_dir: PathBuf,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    pub window_days: i64,
}

impl PipelineConfig {
    pub fn new(api_token: impl Into<String>) -> Result<Self> {
        let api_token = api_token.into().trim().to_string();
        if api_token.is_empty() {
            return Err(PipelineError::Configuration(format!(
                "Missing {} environment variable.",
                TOKEN_ENV
            )));
        }

        Ok(Self {
            api_token,
            api_url: DEFAULT_API_URL.to_string(),
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            request_timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
            retry: RetryPolicy::default(),
            window_days: WINDOW_DAYS,
        })
    }

    /// Resolve from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve using an arbitrary key lookup (same rules as [`from_env`]).
    ///
    /// [`from_env`]: PipelineConfig::from_env
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let token = lookup(TOKEN_ENV).unwrap_or_default();
        let mut config = Self::new(token)?;

        if let Some(url) = lookup(API_URL_ENV) {
            let url = url.trim();
            if !url.is_empty() {
                config.api_url = url.to_string();
            }
        }

        Ok(config)
    }

    pub fn with_data_dir(mut self, data_dir: impl AsRef<Path>) -> Self {
        self.data_dir = data_dir.as_ref().to_path_buf();
        self
    }

    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }
}

// Keeps the token out of logs.
impl std::fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("api_token", &"<redacted>")
            .field("api_url", &self.api_url)
            .field("data_dir", &self.data_dir)
            .field("request_timeout", &self.request_timeout)
            .field("retry", &self.retry)
            .field("window_days", &self.window_days)
            .finish()
    }
}
