use crate::collector::{CollectorConfig, Schedule};
use crate::poller::snmp::RetryPolicy;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub snmp: SnmpConfig,
    #[serde(default)]
    pub collector: CollectorSection,
    #[serde(default)]
    pub legacy: LegacyConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
    #[serde(default = "default_max_pool_size")]
    pub max_pool_size: u32,
}

fn default_max_pool_size() -> u32 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct SnmpConfig {
    #[serde(default = "default_snmp_port")]
    pub port: u16,
    /// Community for devices without their own.
    #[serde(default = "default_community")]
    pub default_community: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Extra attempts per round-trip; the timeout doubles on each.
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_max_oids_per_request")]
    pub max_oids_per_request: usize,
}

fn default_snmp_port() -> u16 {
    crate::poller::snmp::DEFAULT_PORT
}

fn default_community() -> String {
    crate::inventory::DEFAULT_SECRET.into()
}

fn default_timeout_ms() -> u64 {
    1000
}

fn default_retries() -> u32 {
    3
}

fn default_max_oids_per_request() -> usize {
    crate::poller::DEFAULT_MAX_BATCH
}

impl Default for SnmpConfig {
    fn default() -> Self {
        Self {
            port: default_snmp_port(),
            default_community: default_community(),
            timeout_ms: default_timeout_ms(),
            retries: default_retries(),
            max_oids_per_request: default_max_oids_per_request(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CollectorSection {
    /// Sampling window; also the repeat interval when no cron schedule is set.
    #[serde(default = "default_poll_period_secs")]
    pub poll_period_secs: u64,
    #[serde(default = "default_max_concurrent_devices")]
    pub max_concurrent_devices: usize,
    #[serde(default = "default_write_queue_capacity")]
    pub write_queue_capacity: usize,
    /// Keep running and repeat cycles; otherwise run one cycle and exit.
    #[serde(default)]
    pub repeat: bool,
    /// Optional cron expression (local time) for repeated cycles, e.g. "0 */5 * * * *".
    #[serde(default)]
    pub schedule: Option<String>,
}

fn default_poll_period_secs() -> u64 {
    crate::delta::DEFAULT_WINDOW_SECS
}

fn default_max_concurrent_devices() -> usize {
    32
}

fn default_write_queue_capacity() -> usize {
    64
}

impl Default for CollectorSection {
    fn default() -> Self {
        Self {
            poll_period_secs: default_poll_period_secs(),
            max_concurrent_devices: default_max_concurrent_devices(),
            write_queue_capacity: default_write_queue_capacity(),
            repeat: false,
            schedule: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LegacyConfig {
    /// Commands started in order after each cycle; not awaited.
    #[serde(default)]
    pub jobs: Vec<String>,
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".into());
        let s = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("read config {}: {}", path, e))?;
        Self::load_from_str(&s)
    }

    /// Parse and validate config from a string (e.g. for tests).
    pub fn load_from_str(s: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            !self.database.path.is_empty(),
            "database.path must be non-empty"
        );
        anyhow::ensure!(
            self.database.max_pool_size > 0,
            "database.max_pool_size must be > 0, got {}",
            self.database.max_pool_size
        );
        anyhow::ensure!(
            self.snmp.port > 0,
            "snmp.port must be between 1 and 65535, got {}",
            self.snmp.port
        );
        anyhow::ensure!(
            !self.snmp.default_community.is_empty(),
            "snmp.default_community must be non-empty"
        );
        anyhow::ensure!(
            self.snmp.timeout_ms > 0,
            "snmp.timeout_ms must be > 0, got {}",
            self.snmp.timeout_ms
        );
        anyhow::ensure!(
            self.snmp.max_oids_per_request > 0,
            "snmp.max_oids_per_request must be > 0, got {}",
            self.snmp.max_oids_per_request
        );
        anyhow::ensure!(
            self.collector.poll_period_secs > 0,
            "collector.poll_period_secs must be > 0, got {}",
            self.collector.poll_period_secs
        );
        anyhow::ensure!(
            self.collector.max_concurrent_devices > 0,
            "collector.max_concurrent_devices must be > 0, got {}",
            self.collector.max_concurrent_devices
        );
        anyhow::ensure!(
            self.collector.write_queue_capacity > 0,
            "collector.write_queue_capacity must be > 0, got {}",
            self.collector.write_queue_capacity
        );
        if let Some(expr) = &self.collector.schedule {
            Schedule::cron(expr)?;
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_millis(self.snmp.timeout_ms),
            retries: self.snmp.retries,
        }
    }

    pub fn collector_config(&self) -> CollectorConfig {
        CollectorConfig {
            default_secret: self.snmp.default_community.clone(),
            window_seconds: self.collector.poll_period_secs,
            max_oids_per_request: self.snmp.max_oids_per_request,
            max_concurrent_devices: self.collector.max_concurrent_devices,
            write_queue_capacity: self.collector.write_queue_capacity,
            legacy_jobs: self.legacy.jobs.clone(),
        }
    }

    /// Repeat schedule: the cron expression if set, else every poll period.
    pub fn schedule(&self) -> anyhow::Result<Schedule> {
        match &self.collector.schedule {
            Some(expr) => Schedule::cron(expr),
            None => Ok(Schedule::Every(Duration::from_secs(
                self.collector.poll_period_secs,
            ))),
        }
    }
}
