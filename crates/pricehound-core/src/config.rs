use std::str::FromStr;
use std::time::Duration;

use crate::batch::BatchConfig;
use crate::error::AppError;
use crate::events::DEFAULT_HISTORY_CAPACITY;
use crate::pool::PoolConfig;
use crate::retry::RetryPolicy;

/// Tuning for the scrape engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub pool: PoolConfig,
    pub batch: BatchConfig,
    pub retry: RetryPolicy,
    pub schedule_interval: Duration,
    pub event_history: usize,
    /// Upper bound on a single page navigation.
    pub navigation_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            batch: BatchConfig::default(),
            retry: RetryPolicy::default(),
            schedule_interval: Duration::from_secs(3600),
            event_history: DEFAULT_HISTORY_CAPACITY,
            navigation_timeout: Duration::from_secs(30),
        }
    }
}

impl EngineConfig {
    /// Read configuration from environment variables. Every variable is
    /// optional and falls back to the default.
    ///
    /// - `PRICEHOUND_MAX_BROWSERS` (5), `PRICEHOUND_PAGES_PER_BROWSER` (3)
    /// - `PRICEHOUND_BATCH_SIZE` (50), `PRICEHOUND_BATCH_DELAY_SECS` (2)
    /// - `PRICEHOUND_MAX_RETRIES` (3), `PRICEHOUND_RETRY_BASE_DELAY_MS` (1000),
    ///   `PRICEHOUND_RETRY_MAX_DELAY_SECS` (60)
    /// - `PRICEHOUND_SCHEDULE_INTERVAL_SECS` (3600)
    /// - `PRICEHOUND_EVENT_HISTORY` (1000)
    /// - `PRICEHOUND_NAV_TIMEOUT_SECS` (30)
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`Self::from_env`], reading values through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let max_browsers = positive(&lookup, "PRICEHOUND_MAX_BROWSERS", defaults.pool.max_browsers)?;
        let pages_per_browser = positive(
            &lookup,
            "PRICEHOUND_PAGES_PER_BROWSER",
            defaults.pool.pages_per_browser,
        )?;
        let batch_size = positive(&lookup, "PRICEHOUND_BATCH_SIZE", defaults.batch.batch_size)?;
        let batch_delay: u64 = parse(
            &lookup,
            "PRICEHOUND_BATCH_DELAY_SECS",
            defaults.batch.delay_between_batches.as_secs(),
        )?;
        let max_retries: u32 = parse(&lookup, "PRICEHOUND_MAX_RETRIES", defaults.retry.max_retries)?;
        let base_delay_ms: u64 = parse(
            &lookup,
            "PRICEHOUND_RETRY_BASE_DELAY_MS",
            defaults.retry.base_delay.as_millis() as u64,
        )?;
        let max_delay_secs: u64 = parse(
            &lookup,
            "PRICEHOUND_RETRY_MAX_DELAY_SECS",
            defaults.retry.max_delay.as_secs(),
        )?;
        let interval_secs: u64 = positive(
            &lookup,
            "PRICEHOUND_SCHEDULE_INTERVAL_SECS",
            defaults.schedule_interval.as_secs(),
        )?;
        let event_history = positive(&lookup, "PRICEHOUND_EVENT_HISTORY", defaults.event_history)?;
        let nav_timeout_secs: u64 = positive(
            &lookup,
            "PRICEHOUND_NAV_TIMEOUT_SECS",
            defaults.navigation_timeout.as_secs(),
        )?;

        let base_delay = Duration::from_millis(base_delay_ms);
        let max_delay = Duration::from_secs(max_delay_secs);
        if base_delay > max_delay {
            return Err(AppError::ConfigError(format!(
                "PRICEHOUND_RETRY_BASE_DELAY_MS ({base_delay_ms}) exceeds PRICEHOUND_RETRY_MAX_DELAY_SECS ({max_delay_secs})"
            )));
        }

        Ok(Self {
            pool: PoolConfig::new(max_browsers, pages_per_browser),
            batch: BatchConfig {
                batch_size,
                delay_between_batches: Duration::from_secs(batch_delay),
            },
            retry: RetryPolicy::default()
                .with_max_retries(max_retries)
                .with_base_delay(base_delay)
                .with_max_delay(max_delay),
            schedule_interval: Duration::from_secs(interval_secs),
            event_history,
            navigation_timeout: Duration::from_secs(nav_timeout_secs),
        })
    }
}

fn parse<T, F>(lookup: &F, key: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| {
            AppError::ConfigError(format!(
                "Invalid {key} '{raw}': must be a non-negative integer"
            ))
        }),
    }
}

fn positive<T, F>(lookup: &F, key: &str, default: T) -> Result<T, AppError>
where
    T: FromStr + PartialEq + Default,
    F: Fn(&str) -> Option<String>,
{
    let value = parse(lookup, key, default)?;
    if value == T::default() {
        return Err(AppError::ConfigError(format!("{key} must be at least 1")));
    }
    Ok(value)
}
