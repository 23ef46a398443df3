//! Configuration loading from the environment

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::debounce::MIN_DEBOUNCE;
use crate::executor::{ExecuteOptions, MAX_TIMEOUT, MIN_TIMEOUT};

/// Daemon configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Minimum gap between two hotkey firings
    pub hotkey_debounce: Duration,

    /// Minimum gap between two accepted filter keys
    pub key_debounce: Duration,

    /// Per-attempt timeout for platform operations
    pub operation_timeout: Duration,

    /// Attempts per platform operation
    pub operation_retries: u32,

    /// Base of the linear retry backoff
    pub retry_delay: Duration,

    /// Callback worker threads
    pub workers: usize,

    /// Pending callbacks before new ones are dropped
    pub queue_depth: usize,

    /// Timed-out operations allowed to linger before calls fail fast
    pub max_abandoned: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hotkey_debounce: Duration::from_millis(100),
            key_debounce: Duration::from_millis(50),
            operation_timeout: Duration::from_secs(5),
            operation_retries: 3,
            retry_delay: Duration::from_millis(100),
            workers: 4,
            queue_depth: 64,
            max_abandoned: 8,
        }
    }
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a configuration from any variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let hotkey_debounce_ms: u64 = parse_var(&lookup, "KEYGRID_HOTKEY_DEBOUNCE_MS")?
            .unwrap_or(defaults.hotkey_debounce.as_millis() as u64);
        let key_debounce_ms: u64 = parse_var(&lookup, "KEYGRID_KEY_DEBOUNCE_MS")?
            .unwrap_or(defaults.key_debounce.as_millis() as u64);
        let timeout_secs: u64 = parse_var(&lookup, "KEYGRID_OP_TIMEOUT_SECS")?
            .unwrap_or(defaults.operation_timeout.as_secs());
        let retries: u32 =
            parse_var(&lookup, "KEYGRID_OP_RETRIES")?.unwrap_or(defaults.operation_retries);
        let retry_delay_ms: u64 = parse_var(&lookup, "KEYGRID_RETRY_DELAY_MS")?
            .unwrap_or(defaults.retry_delay.as_millis() as u64);
        let workers: usize = parse_var(&lookup, "KEYGRID_WORKERS")?.unwrap_or(defaults.workers);
        let queue_depth: usize =
            parse_var(&lookup, "KEYGRID_QUEUE_DEPTH")?.unwrap_or(defaults.queue_depth);
        let max_abandoned: usize =
            parse_var(&lookup, "KEYGRID_MAX_ABANDONED")?.unwrap_or(defaults.max_abandoned);

        Ok(Self {
            hotkey_debounce: Duration::from_millis(hotkey_debounce_ms).max(MIN_DEBOUNCE),
            key_debounce: Duration::from_millis(key_debounce_ms).max(MIN_DEBOUNCE),
            operation_timeout: Duration::from_secs(timeout_secs).clamp(MIN_TIMEOUT, MAX_TIMEOUT),
            operation_retries: retries.max(1),
            retry_delay: Duration::from_millis(retry_delay_ms),
            workers: workers.max(1),
            queue_depth: queue_depth.max(1),
            max_abandoned: max_abandoned.max(1),
        })
    }

    /// Executor defaults derived from this configuration
    pub fn execute_options(&self) -> ExecuteOptions {
        ExecuteOptions::new()
            .with_max_retries(self.operation_retries)
            .with_retry_base_delay(self.retry_delay)
            .with_timeout(self.operation_timeout)
    }
}

fn parse_var<T, F>(lookup: &F, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(name) else {
        return Ok(None);
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse::<T>()
        .map(Some)
        .with_context(|| format!("invalid value {raw:?} for {name}"))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.execute_options().timeout(), Duration::from_secs(5));
        assert_eq!(config.execute_options().max_retries(), 3);
    }

    #[test]
    fn test_overrides_and_clamping() {
        let config = Config::from_lookup(lookup(&[
            ("KEYGRID_HOTKEY_DEBOUNCE_MS", "3"),
            ("KEYGRID_KEY_DEBOUNCE_MS", "75"),
            ("KEYGRID_OP_TIMEOUT_SECS", "120"),
            ("KEYGRID_OP_RETRIES", "0"),
            ("KEYGRID_WORKERS", " 2 "),
        ]))
        .unwrap();

        assert_eq!(config.hotkey_debounce, Duration::from_millis(10));
        assert_eq!(config.key_debounce, Duration::from_millis(75));
        assert_eq!(config.operation_timeout, Duration::from_secs(30));
        assert_eq!(config.operation_retries, 1);
        assert_eq!(config.workers, 2);
    }

    #[test]
    fn test_zero_timeout_raised_to_minimum() {
        let config = Config::from_lookup(lookup(&[("KEYGRID_OP_TIMEOUT_SECS", "0")])).unwrap();
        assert_eq!(config.operation_timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_invalid_value_names_variable() {
        let err = Config::from_lookup(lookup(&[("KEYGRID_QUEUE_DEPTH", "lots")])).unwrap_err();
        assert!(err.to_string().contains("KEYGRID_QUEUE_DEPTH"));
    }
}
