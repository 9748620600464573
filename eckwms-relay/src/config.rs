//! Relay server configuration.

use crate::registry::CascadePolicy;
use crate::retention::RetentionPolicy;
use crate::scheduler::Schedule;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Upper bound for configured day-scale durations (about a century).
pub const MAX_DURATION_DAYS: u64 = 36_500;
const SECS_PER_DAY: u64 = 86_400;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub listen_addr: String,
    pub storage_path: PathBuf,
    /// Largest accepted scan payload, in bytes of its stored form.
    pub max_payload_bytes: usize,
    pub max_body_bytes: usize,
    /// Per-instance request budget. 0 disables rate limiting.
    pub rate_limit_per_minute: u32,
    pub retention_interval_secs: u64,
    pub retention_first_run_secs: u64,
    pub stale_buffer_ttl_days: u64,
    /// Delivered but unconfirmed scans become pullable again after this long. 0 disables.
    pub redelivery_after_secs: u64,
    pub instance_delete_policy: CascadePolicy,
    /// Required in `X-Registration-Token` for registration when set.
    pub registration_token: Option<String>,
    /// Bearer token for the admin API. Admin routes refuse every request when unset.
    pub admin_token: Option<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8780".to_string(),
            storage_path: PathBuf::from("eckwms-relay.db"),
            max_payload_bytes: 65_536,
            max_body_bytes: 1024 * 1024,
            rate_limit_per_minute: 600,
            retention_interval_secs: 3600,
            retention_first_run_secs: 10,
            stale_buffer_ttl_days: 7,
            redelivery_after_secs: 900,
            instance_delete_policy: CascadePolicy::Orphan,
            registration_token: None,
            admin_token: None,
        }
    }
}

impl RelayConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml_dep::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject durations too large to subtract from the current time.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.stale_buffer_ttl_days > MAX_DURATION_DAYS {
            anyhow::bail!(
                "stale_buffer_ttl_days must be at most {}, got {}",
                MAX_DURATION_DAYS,
                self.stale_buffer_ttl_days
            );
        }
        if self.redelivery_after_secs > MAX_DURATION_DAYS * SECS_PER_DAY {
            anyhow::bail!(
                "redelivery_after_secs must be at most {}, got {}",
                MAX_DURATION_DAYS * SECS_PER_DAY,
                self.redelivery_after_secs
            );
        }
        Ok(())
    }

    pub fn retention_policy(&self) -> RetentionPolicy {
        let days = self.stale_buffer_ttl_days.min(MAX_DURATION_DAYS) as i64;
        RetentionPolicy {
            stale_buffer_ttl: chrono::Duration::try_days(days).unwrap_or(chrono::Duration::MAX),
        }
    }

    pub fn retention_schedule(&self) -> Schedule {
        Schedule {
            interval: Duration::from_secs(self.retention_interval_secs.max(1)),
            first_run_after: Some(Duration::from_secs(self.retention_first_run_secs)),
        }
    }

    pub fn redelivery_after(&self) -> Option<chrono::Duration> {
        match self.redelivery_after_secs {
            0 => None,
            secs => {
                let secs = secs.min(MAX_DURATION_DAYS * SECS_PER_DAY) as i64;
                Some(chrono::Duration::try_seconds(secs).unwrap_or(chrono::Duration::MAX))
            }
        }
    }
}
