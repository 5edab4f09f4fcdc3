//! Controller configuration
//!
//! Every setting has a default and can be overridden through a
//! `GRAFANA_OPERATOR_*` environment variable.

use std::str::FromStr;
use std::time::Duration;

use crate::retry::{Backoff, RetryPolicy};
use crate::telemetry::LogFormat;
use crate::{Error, Result};

/// Reconcile workers per record kind
pub const ENV_WORKERS: &str = "GRAFANA_OPERATOR_WORKERS";
/// Requeues of a failing key before it is dropped
pub const ENV_MAX_REQUEUES: &str = "GRAFANA_OPERATOR_MAX_REQUEUES";
/// Seconds between full resyncs
pub const ENV_RESYNC_SECS: &str = "GRAFANA_OPERATOR_RESYNC_SECS";
/// Milliseconds between store write attempts
pub const ENV_RETRY_INTERVAL_MS: &str = "GRAFANA_OPERATOR_RETRY_INTERVAL_MS";
/// Total milliseconds budget of a retrying store write
pub const ENV_RETRY_TIMEOUT_MS: &str = "GRAFANA_OPERATOR_RETRY_TIMEOUT_MS";
/// `text` or `json`
pub const ENV_LOG_FORMAT: &str = "GRAFANA_OPERATOR_LOG_FORMAT";

/// Settings shared by every controller
#[derive(Clone, Debug, PartialEq)]
pub struct ControllerConfig {
    /// Concurrent reconciles per record kind
    pub workers: usize,
    /// Requeues of a failing key before it is dropped
    pub max_requeues: u32,
    /// Interval at which every known key is enqueued again
    pub resync_period: Duration,
    /// Retry policy for store writes
    pub retry: RetryPolicy,
    /// Delay between requeues of a failing key
    pub backoff: Backoff,
    /// Log output format
    pub log_format: LogFormat,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            max_requeues: 5,
            resync_period: Duration::from_secs(600),
            retry: RetryPolicy::default(),
            backoff: Backoff::default(),
            log_format: LogFormat::default(),
        }
    }
}

impl ControllerConfig {
    /// Defaults overridden by the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(workers) = parse::<usize, _>(&lookup, ENV_WORKERS)? {
            if workers == 0 {
                return Err(Error::config(format!("{ENV_WORKERS} must be at least 1")));
            }
            config.workers = workers;
        }
        if let Some(max) = parse(&lookup, ENV_MAX_REQUEUES)? {
            config.max_requeues = max;
        }
        if let Some(secs) = parse(&lookup, ENV_RESYNC_SECS)? {
            config.resync_period = Duration::from_secs(secs);
        }
        if let Some(ms) = parse(&lookup, ENV_RETRY_INTERVAL_MS)? {
            config.retry.interval = Duration::from_millis(ms);
        }
        if let Some(ms) = parse(&lookup, ENV_RETRY_TIMEOUT_MS)? {
            config.retry.timeout = Duration::from_millis(ms);
        }
        if let Some(format) = lookup(ENV_LOG_FORMAT) {
            config.log_format = format
                .parse()
                .map_err(|e| Error::config(format!("{ENV_LOG_FORMAT}: {e}")))?;
        }

        if config.retry.interval > config.retry.timeout {
            return Err(Error::config(format!(
                "{ENV_RETRY_INTERVAL_MS} ({:?}) exceeds {ENV_RETRY_TIMEOUT_MS} ({:?})",
                config.retry.interval, config.retry.timeout
            )));
        }

        Ok(config)
    }
}

fn parse<T, F>(lookup: &F, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::config(format!("{name}={raw:?}: {e}"))),
    }
}
