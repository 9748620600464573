//! Tier-based retention sweeps.
//!
//! Free tier: confirmed scans are redundant once the site has them, so they
//! are deleted without a grace period. Buffered scans that were never pulled
//! are deleted after `stale_buffer_ttl`. Paid tier: nothing is deleted.
//!
//! Every step runs on its own and a failing step is logged without stopping
//! the next one. A sweep acts only on what is committed when the step runs;
//! scans confirmed after that wait for the next sweep.

use crate::error::RelayError;
use crate::storage::models::{to_millis, StoredInstance};
use crate::storage::RelayStorage;
use chrono::{DateTime, Duration, Utc};
use eckwms_core::{ScanStatus, Tier};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub stale_buffer_ttl: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            stale_buffer_ttl: Duration::days(7),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Deleted(u64),
    Retained(u64),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub free_confirmed: StepOutcome,
    pub free_stale: StepOutcome,
    pub paid: StepOutcome,
}

fn delete_free_confirmed(storage: &RelayStorage) -> Result<u64, RelayError> {
    let deleted = storage.conn()?.execute(
        "DELETE FROM scans
         WHERE status = 'confirmed'
           AND instance_id IN (SELECT instance_id FROM instances WHERE tier = 'free')",
        [],
    )?;
    Ok(deleted as u64)
}

fn delete_free_stale(storage: &RelayStorage, cutoff: DateTime<Utc>) -> Result<u64, RelayError> {
    let deleted = storage.conn()?.execute(
        "DELETE FROM scans
         WHERE status = 'buffered' AND created_at < ?1
           AND instance_id IN (SELECT instance_id FROM instances WHERE tier = 'free')",
        [to_millis(cutoff)],
    )?;
    Ok(deleted as u64)
}

fn count_paid(storage: &RelayStorage) -> Result<u64, RelayError> {
    let count: i64 = storage.conn()?.query_row(
        "SELECT COUNT(*) FROM scans
         WHERE instance_id IN (SELECT instance_id FROM instances WHERE tier = 'paid')",
        [],
        |row| row.get(0),
    )?;
    Ok(count as u64)
}

fn deleted(tier: Tier, reason: &'static str, result: Result<u64, RelayError>) -> StepOutcome {
    match result {
        Ok(count) => {
            tracing::info!(tier = tier.as_str(), reason, count, "Retention sweep deleted scans");
            StepOutcome::Deleted(count)
        }
        Err(e) => {
            tracing::error!(tier = tier.as_str(), reason, "Retention step failed: {}", e);
            StepOutcome::Failed(e.to_string())
        }
    }
}

/// Run one full sweep at time `now`.
pub fn run_sweep(storage: &RelayStorage, policy: &RetentionPolicy, now: DateTime<Utc>) -> SweepReport {
    let free_confirmed = deleted(Tier::Free, "confirmed", delete_free_confirmed(storage));
    let free_stale = deleted(
        Tier::Free,
        "stale_buffer",
        delete_free_stale(
            storage,
            now.checked_sub_signed(policy.stale_buffer_ttl)
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
        ),
    );

    let paid = match count_paid(storage) {
        Ok(count) => {
            tracing::info!(tier = "paid", reason = "retained", count, "Retention sweep kept scans");
            StepOutcome::Retained(count)
        }
        Err(e) => {
            tracing::error!(tier = "paid", reason = "retained", "Retention step failed: {}", e);
            StepOutcome::Failed(e.to_string())
        }
    };

    SweepReport {
        free_confirmed,
        free_stale,
        paid,
    }
}

/// Delete the confirmed scans of one free-tier instance. No-op for paid tier.
pub fn purge_confirmed_for_instance(
    storage: &RelayStorage,
    instance: &StoredInstance,
) -> Result<u64, RelayError> {
    if instance.tier != Tier::Free {
        return Ok(0);
    }
    let deleted = storage.conn()?.execute(
        "DELETE FROM scans WHERE instance_id = ?1 AND status = 'confirmed'",
        [instance.instance_id.to_string()],
    )?;
    if deleted > 0 {
        tracing::debug!(
            instance_id = %instance.instance_id,
            count = deleted,
            "Confirmed scans purged"
        );
    }
    Ok(deleted as u64)
}

/// Administrative purge of an instance's scans, optionally restricted to one status.
pub fn purge_instance_scans(
    storage: &RelayStorage,
    instance_id: &Uuid,
    status: Option<ScanStatus>,
) -> Result<u64, RelayError> {
    let conn = storage.conn()?;
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM instances WHERE instance_id = ?1)",
        [instance_id.to_string()],
        |row| row.get(0),
    )?;
    if !exists {
        return Err(RelayError::NotFound(format!(
            "Instance {} not found",
            instance_id
        )));
    }

    let deleted = match status {
        Some(status) => conn.execute(
            "DELETE FROM scans WHERE instance_id = ?1 AND status = ?2",
            rusqlite::params![instance_id.to_string(), status.as_str()],
        )?,
        None => conn.execute(
            "DELETE FROM scans WHERE instance_id = ?1",
            [instance_id.to_string()],
        )?,
    };

    tracing::info!(
        %instance_id,
        status = status.map(|s| s.as_str()).unwrap_or("any"),
        count = deleted,
        "Administrative purge"
    );
    Ok(deleted as u64)
}
