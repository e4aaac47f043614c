//! Pipeline configuration read from the environment.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Default upstream API base URL.
pub const DEFAULT_API_URL: &str = "https://api.data.gov.in/resource";

/// Error raised when an environment variable holds an unusable value.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A numeric variable did not parse.
    #[error("Invalid value for {name}: {value:?} ({message})")]
    Invalid {
        /// Variable name.
        name: &'static str,
        /// Raw value as found in the environment.
        value: String,
        /// Parser message.
        message: String,
    },
}

/// Bounded exponential backoff for whole-dataset fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero behaves like one.
    pub max_retries: u32,
    /// Delay after the first failed attempt; doubles after each further
    /// failure.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(2000),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after failed attempt number `attempt` (1-based):
    /// `base_delay * 2^(attempt - 1)`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }
}

/// Everything the fetch pipeline and worker need to run.
#[derive(Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Upstream API base URL.
    pub api_url: String,
    /// Upstream API key. Empty means unauthenticated requests.
    pub api_key: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Retry policy for whole-dataset fetches.
    pub retry: RetryPolicy,
    /// Default records per page.
    pub page_size: u64,
    /// Pause between page requests.
    pub page_delay: Duration,
    /// Pause between datasets in a batch.
    pub dataset_delay: Duration,
    /// Worker cycle period.
    pub refresh_interval: Duration,
    /// Database file; `None` uses the default location.
    pub db_path: Option<PathBuf>,
    /// Extra directory of dataset TOML files.
    pub registry_dir: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            api_key: String::new(),
            timeout: Duration::from_millis(30_000),
            retry: RetryPolicy::default(),
            page_size: 100,
            page_delay: Duration::from_millis(500),
            dataset_delay: Duration::from_millis(1000),
            refresh_interval: Duration::from_secs(20 * 60),
            db_path: None,
            registry_dir: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("api_url", &self.api_url)
            .field("api_key", &if self.api_key.is_empty() { "" } else { "***" })
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .field("page_size", &self.page_size)
            .field("page_delay", &self.page_delay)
            .field("dataset_delay", &self.dataset_delay)
            .field("refresh_interval", &self.refresh_interval)
            .field("db_path", &self.db_path)
            .field("registry_dir", &self.registry_dir)
            .finish()
    }
}

impl PipelineConfig {
    /// Reads the configuration from process environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a numeric variable does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads the configuration through `lookup`, falling back to defaults
    /// for unset or blank variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a numeric variable does not parse.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let millis = |name: &'static str, default: Duration| -> Result<Duration, ConfigError> {
            get(name).map_or(Ok(default), |v| parse::<u64>(name, &v).map(Duration::from_millis))
        };

        let defaults = Self::default();

        let max_retries = get("DATA_RETRY_MAX")
            .map_or(Ok(defaults.retry.max_retries), |v| {
                parse("DATA_RETRY_MAX", &v)
            })?;
        let refresh_minutes = get("DATA_REFRESH_INTERVAL").map_or(Ok(20u64), |v| {
            parse("DATA_REFRESH_INTERVAL", &v)
        })?;
        let page_size = get("DATA_PAGE_SIZE")
            .map_or(Ok(defaults.page_size), |v| parse("DATA_PAGE_SIZE", &v))?;

        Ok(Self {
            api_url: get("DATA_GOV_API_URL").unwrap_or(defaults.api_url),
            api_key: get("DATA_GOV_API_KEY").unwrap_or_default(),
            timeout: millis("DATA_FETCH_TIMEOUT", defaults.timeout)?,
            retry: RetryPolicy {
                max_retries,
                base_delay: millis("DATA_RETRY_BASE_DELAY", defaults.retry.base_delay)?,
            },
            page_size,
            page_delay: millis("DATA_PAGE_DELAY", defaults.page_delay)?,
            dataset_delay: millis("DATA_DATASET_DELAY", defaults.dataset_delay)?,
            refresh_interval: Duration::from_secs(refresh_minutes.saturating_mul(60)),
            db_path: get("GOVDATA_DB_PATH").map(PathBuf::from),
            registry_dir: get("GOVDATA_REGISTRY_DIR").map(PathBuf::from),
        })
    }
}

fn parse<T>(name: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    value.parse().map_err(|e: T::Err| ConfigError::Invalid {
        name,
        value: value.to_string(),
        message: e.to_string(),
    })
}
