// Engine configuration loaded from file and environment

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

use crate::models::WorkflowType;

/// Top-level engine configuration.
///
/// Loaded from an optional `config/service_desk.toml` file with environment
/// overrides under the `SERVICE_DESK` prefix (`SERVICE_DESK__DATABASE_URL`,
/// `SERVICE_DESK__RECOVERY__STUCK_THRESHOLD_HOURS`, ...). Binaries call
/// `dotenv()` before loading so a local `.env` participates as well.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Postgres connection string for the backing store.
    pub database_url: String,

    /// Deadline applied to every store call, in seconds. Expiry surfaces as
    /// a transient error and is retried.
    pub store_timeout_secs: u64,

    /// Maximum write attempts on transient store failures.
    pub max_write_attempts: u32,

    /// Base delay of the write retry backoff, in seconds (doubled per
    /// attempt).
    pub write_retry_base_secs: u64,

    pub notification: NotificationConfig,
    pub recovery: RecoveryConfig,
}

/// Notification retry-queue tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Base retry delay in seconds.
    pub retry_base_secs: u64,
    /// Multiplier applied per attempt.
    pub retry_factor: u32,
    /// Upper bound on a single retry delay, in seconds.
    pub retry_cap_secs: u64,
    /// Attempts before an entry is left queued for manual review.
    pub max_attempts: u32,
    /// Interval of the drain loop, in seconds.
    pub drain_interval_secs: u64,
}

/// Stuck-workflow detection tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Default staleness threshold in hours.
    pub stuck_threshold_hours: i64,
    /// Per-workflow-type overrides, keyed by the stored type tag.
    pub stuck_threshold_overrides: HashMap<String, i64>,
    /// Interval of the daemon's stuck-workflow sweep, in seconds.
    pub sweep_interval_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            database_url: "postgres://localhost/service_desk".to_string(),
            store_timeout_secs: 10,
            max_write_attempts: 3,
            write_retry_base_secs: 1,
            notification: NotificationConfig::default(),
            recovery: RecoveryConfig::default(),
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        NotificationConfig {
            retry_base_secs: 30,
            retry_factor: 2,
            retry_cap_secs: 30 * 60,
            max_attempts: 10,
            drain_interval_secs: 15,
        }
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        RecoveryConfig {
            stuck_threshold_hours: 24,
            stuck_threshold_overrides: HashMap::new(),
            sweep_interval_secs: 15 * 60,
        }
    }
}

impl EngineConfig {
    /// Load configuration from `config/service_desk.toml` (optional) and the
    /// environment.
    pub fn load() -> anyhow::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name("config/service_desk").required(false))
            .add_source(config::Environment::with_prefix("SERVICE_DESK").separator("__"))
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }

    pub fn write_retry_base(&self) -> Duration {
        Duration::from_secs(self.write_retry_base_secs)
    }
}

impl RecoveryConfig {
    /// Staleness threshold for a workflow type, honoring overrides.
    pub fn stuck_threshold_for(&self, workflow_type: WorkflowType) -> chrono::Duration {
        let hours = self
            .stuck_threshold_overrides
            .get(workflow_type.as_str())
            .copied()
            .unwrap_or(self.stuck_threshold_hours);
        chrono::Duration::hours(hours)
    }
}
