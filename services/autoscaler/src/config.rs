//! Configuration for the autoscaler.
//!
//! Kubernetes access is not configured here: the cluster client is inferred
//! from the pod's service account, or from the local kubeconfig when run
//! outside a cluster.

use std::time::Duration;

use anyhow::{Context, Result};
use fleet_reconcile::DEFAULT_POLL_INTERVAL;

/// Default runner task API base URL.
pub const DEFAULT_QUEUE_API_URL: &str = "https://runner.circleci.com/api/v2";

/// Default name of the ConfigMap holding the fleet pool list.
pub const DEFAULT_FLEET_CONFIG_MAP: &str = "circleci-k8s-agent";

/// Autoscaler configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Runner task API base URL.
    pub queue_api_url: String,

    /// Pause between the end of one fleet pass and the start of the next.
    pub poll_interval: Duration,

    /// Per-request timeout for both the queue and the cluster API.
    pub http_timeout: Duration,

    /// Name of the ConfigMap listing the pools, in the autoscaler's namespace.
    pub fleet_config_map: String,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let queue_api_url = lookup("FLEET_QUEUE_API_URL")
            .unwrap_or_else(|| DEFAULT_QUEUE_API_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        let poll_interval =
            secs(&lookup, "FLEET_POLL_INTERVAL_SECS")?.unwrap_or(DEFAULT_POLL_INTERVAL);
        if poll_interval.is_zero() {
            anyhow::bail!("FLEET_POLL_INTERVAL_SECS must be greater than zero");
        }

        let http_timeout =
            secs(&lookup, "FLEET_HTTP_TIMEOUT_SECS")?.unwrap_or(Duration::from_secs(30));

        let fleet_config_map = lookup("FLEET_CONFIG_MAP")
            .unwrap_or_else(|| DEFAULT_FLEET_CONFIG_MAP.to_string());

        let log_level = lookup("FLEET_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        Ok(Self {
            queue_api_url,
            poll_interval,
            http_timeout,
            fleet_config_map,
            log_level,
        })
    }
}

fn secs<F>(lookup: &F, key: &str) -> Result<Option<Duration>>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .with_context(|| format!("{key} must be a whole number of seconds, got '{raw}'"))
        })
        .transpose()
}
