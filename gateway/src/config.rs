use crate::partner::PartnerRecord;
use serde::Deserialize;
use std::fs::File;
use std::path::Path;

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub listener: Listener,
    #[serde(default)]
    pub broadcast: BroadcastConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub breaker: BreakerConfig,
    pub metrics: Option<MetricsConfig>,
    /// Key handed to the secret codec. `GATEWAY_ENCRYPTION_KEY` in the
    /// environment takes precedence.
    pub encryption_key: Option<String>,
    /// Seed records for the in-memory repository.
    #[serde(default)]
    pub partners: Vec<PartnerRecord>,
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let config = serde_yaml::from_reader(file)?;
        Ok(config)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            listener: Listener::default(),
            broadcast: BroadcastConfig::default(),
            cache: CacheConfig::default(),
            breaker: BreakerConfig::default(),
            metrics: None,
            encryption_key: None,
            partners: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    pub host: String,
    pub port: u16,
}

impl Default for Listener {
    fn default() -> Self {
        Listener {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct BroadcastConfig {
    /// Global deadline for one fan-out, independent of per-partner timeouts.
    pub deadline_ms: u64,
    /// Upper bound on in-flight partner sends across all broadcasts.
    pub max_concurrent_sends: usize,
    /// How long shutdown waits for in-flight broadcasts before giving up.
    pub shutdown_grace_ms: u64,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        BroadcastConfig {
            deadline_ms: 5000,
            max_concurrent_sends: 50,
            shutdown_grace_ms: 5000,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    pub capacity: u64,
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            capacity: 100,
            ttl_secs: 30 * 60,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct BreakerConfig {
    pub sliding_window_size: usize,
    pub minimum_calls: usize,
    /// Percentage of recorded failures that opens the breaker.
    pub failure_rate_threshold: f64,
    /// Percentage of slow calls that opens the breaker.
    pub slow_call_rate_threshold: f64,
    pub slow_call_threshold_ms: u64,
    pub open_duration_ms: u64,
    pub half_open_permits: usize,
    /// Breakers idle longer than this are removed by the sweeper.
    pub eviction_threshold_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        BreakerConfig {
            sliding_window_size: 10,
            minimum_calls: 5,
            failure_rate_threshold: 50.0,
            slow_call_rate_threshold: 50.0,
            slow_call_threshold_ms: 2000,
            open_duration_ms: 10_000,
            half_open_permits: 3,
            eviction_threshold_secs: 24 * 60 * 60,
            sweep_interval_secs: 60 * 60,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct MetricsConfig {
    pub statsd_host: String,
    pub statsd_port: u16,
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
}
