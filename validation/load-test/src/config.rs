//! Configuration loading and management.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Main test configuration loaded from a YAML scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// `host:port` of the chat service.
    #[serde(default = "default_service_address")]
    pub service_address: String,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_total_messages")]
    pub total_messages: u64,
    #[serde(default)]
    pub workload: WorkloadConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub status_policy: StatusPolicy,
    /// Measure RTT before the main phase to predict throughput.
    #[serde(default)]
    pub warmup: Option<WarmupConfig>,
}

fn default_service_address() -> String {
    "localhost:8080".to_string()
}

fn default_workers() -> usize {
    32
}

fn default_total_messages() -> u64 {
    500_000
}

/// Synthetic workload shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadConfig {
    /// User ids are drawn from `1..=user_id_range`.
    pub user_id_range: u32,
    /// Rooms are drawn from `1..=room_count`.
    pub room_count: u32,
    /// Chance an active user leaves instead of sending text.
    pub leave_probability: f64,
    /// Capacity of the generator -> workers queue.
    pub queue_capacity: usize,
    /// Optional RNG seed for reproducible workloads.
    pub seed: Option<u64>,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            user_id_range: 100_000,
            room_count: 20,
            leave_probability: 0.05,
            queue_capacity: 10_000,
            seed: None,
        }
    }
}

/// Retry and deadline settings for each request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Additional attempts after the first one.
    pub max_retries: u32,
    /// Backoff before retry `n` is `base_backoff_ms * 2^n`.
    pub base_backoff_ms: u64,
    /// Deadline applied to connect, write and read independently.
    pub io_timeout_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_backoff_ms: 100,
            io_timeout_ms: 5_000,
        }
    }
}

/// Collector settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Capacity of the workers -> collector channel.
    pub intake_capacity: usize,
    /// Width of throughput buckets.
    pub bucket_width_secs: u32,
    /// Write one CSV row per request outcome to this file.
    pub telemetry_csv: Option<PathBuf>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            intake_capacity: 10_000,
            bucket_width_secs: 10,
            telemetry_csv: None,
        }
    }
}

/// How a reply with `status: ERROR` is counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusPolicy {
    /// Any well-formed reply is a success.
    #[default]
    Lenient,
    /// A `status: ERROR` reply is a failed attempt.
    Strict,
}

/// Warmup phase used for the Little's Law prediction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarmupConfig {
    #[serde(default = "default_warmup_messages")]
    pub messages_per_worker: u64,
}

fn default_warmup_messages() -> u64 {
    1_000
}

impl RetryConfig {
    pub fn base_backoff(&self) -> Duration {
        Duration::from_millis(self.base_backoff_ms)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }
}

impl TestConfig {
    /// Configuration with defaults for everything but the target.
    pub fn new(name: impl Into<String>, service_address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            service_address: service_address.into(),
            workers: default_workers(),
            total_messages: default_total_messages(),
            workload: WorkloadConfig::default(),
            retry: RetryConfig::default(),
            metrics: MetricsConfig::default(),
            status_policy: StatusPolicy::default(),
            warmup: None,
        }
    }

    /// Load configuration from YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read scenario {}", path.display()))?;
        let config: TestConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse scenario {}", path.display()))?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.service_address.trim().is_empty() {
            anyhow::bail!("service_address must not be empty");
        }
        if self.workers == 0 {
            anyhow::bail!("workers must be > 0");
        }
        if self.total_messages == 0 {
            anyhow::bail!("total_messages must be > 0");
        }
        if self.workload.user_id_range == 0 || self.workload.room_count == 0 {
            anyhow::bail!("user_id_range and room_count must be > 0");
        }
        if !(0.0..=1.0).contains(&self.workload.leave_probability) {
            anyhow::bail!("leave_probability must be within [0, 1]");
        }
        if self.workload.queue_capacity == 0 || self.metrics.intake_capacity == 0 {
            anyhow::bail!("queue_capacity and intake_capacity must be > 0");
        }
        if self.metrics.bucket_width_secs == 0 {
            anyhow::bail!("bucket_width_secs must be > 0");
        }
        if self.retry.io_timeout_ms == 0 {
            anyhow::bail!("io_timeout_ms must be > 0");
        }
        if let Some(warmup) = &self.warmup {
            if warmup.messages_per_worker == 0 {
                anyhow::bail!("warmup.messages_per_worker must be > 0");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_scenario_uses_defaults() {
        let yaml = "name: smoke\n";
        let config: TestConfig = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.service_address, "localhost:8080");
        assert_eq!(config.workers, 32);
        assert_eq!(config.total_messages, 500_000);
        assert_eq!(config.workload.room_count, 20);
        assert_eq!(config.workload.leave_probability, 0.05);
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.base_backoff(), Duration::from_millis(100));
        assert_eq!(config.retry.io_timeout(), Duration::from_secs(5));
        assert_eq!(config.metrics.bucket_width_secs, 10);
        assert_eq!(config.status_policy, StatusPolicy::Lenient);
        assert!(config.warmup.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn test_full_scenario() {
        let yaml = r#"
name: strict
description: Count ERROR replies as failures
service_address: 10.0.0.5:8080
workers: 64
total_messages: 1000
workload:
  room_count: 5
  seed: 7
retry:
  max_retries: 2
  io_timeout_ms: 250
metrics:
  telemetry_csv: results/strict.csv
status_policy: strict
warmup:
  messages_per_worker: 50
"#;
        let config: TestConfig = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.workers, 64);
        assert_eq!(config.workload.room_count, 5);
        assert_eq!(config.workload.user_id_range, 100_000);
        assert_eq!(config.workload.seed, Some(7));
        assert_eq!(config.retry.max_retries, 2);
        assert_eq!(config.retry.base_backoff_ms, 100);
        assert_eq!(
            config.metrics.telemetry_csv.as_deref(),
            Some(Path::new("results/strict.csv"))
        );
        assert_eq!(config.status_policy, StatusPolicy::Strict);
        assert_eq!(config.warmup.unwrap().messages_per_worker, 50);
    }

    #[test]
    fn test_shipped_scenarios_load_and_validate() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("scenarios");
        let mut names = Vec::new();

        for entry in std::fs::read_dir(&dir).unwrap() {
            let path = entry.unwrap().path();
            if path.extension().and_then(|s| s.to_str()) != Some("yaml") {
                continue;
            }
            let config = TestConfig::from_file(&path).unwrap();
            config
                .validate()
                .unwrap_or_else(|e| panic!("{}: {}", path.display(), e));
            names.push(config.name);
        }

        names.sort();
        assert_eq!(names, vec!["baseline", "little_law", "smoke", "strict"]);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = TestConfig::new("bad", "localhost:8080");
        config.workers = 0;
        assert!(config.validate().is_err());

        let mut config = TestConfig::new("bad", "localhost:8080");
        config.workload.leave_probability = 1.5;
        assert!(config.validate().is_err());

        let mut config = TestConfig::new("bad", "");
        assert!(config.validate().is_err());
        config.service_address = "localhost:8080".to_string();
        config.metrics.bucket_width_secs = 0;
        assert!(config.validate().is_err());
    }
}
