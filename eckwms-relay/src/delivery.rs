//! Pull/confirm protocol.
//!
//! Pull hands out buffered scans and marks them delivered in the same
//! transaction. Confirm marks delivered (or still buffered) scans confirmed
//! and is idempotent. Delivered scans that are never confirmed become
//! pullable again once the redelivery window has passed, which closes the
//! gap left by pull responses lost in transit. Status never moves backwards.

use crate::error::RelayError;
use crate::storage::models::{from_millis, to_millis, StoredInstance, StoredScan};
use crate::storage::RelayStorage;
use chrono::{DateTime, Duration, Utc};
use eckwms_core::models::{effective_pull_limit, StatusResponse};
use eckwms_core::ScanStatus;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, Default)]
pub struct PullOptions {
    pub limit: Option<u32>,
    pub min_priority: Option<i64>,
}

impl PullOptions {
    /// Requested limit clamped to `1..=MAX_PULL_LIMIT`.
    pub fn effective_limit(&self) -> u32 {
        effective_pull_limit(self.limit)
    }
}

/// Hand out up to `limit` pullable scans of `instance`, highest priority
/// first and oldest first within a priority.
pub fn pull(
    storage: &RelayStorage,
    instance: &StoredInstance,
    options: &PullOptions,
    redelivery_after: Option<Duration>,
    now: DateTime<Utc>,
) -> Result<Vec<StoredScan>, RelayError> {
    let now_ms = to_millis(now);
    // i64::MIN matches no delivered_at, which disables redelivery.
    let redeliver_before = redelivery_after
        .map(|window| now_ms.saturating_sub(window.num_milliseconds()))
        .unwrap_or(i64::MIN);
    let min_priority = options.min_priority.unwrap_or(i64::MIN);
    let limit = options.effective_limit();

    let mut conn = storage.conn()?;
    let tx = conn.transaction()?;

    let mut scans: Vec<StoredScan> = {
        let mut stmt = tx.prepare(&format!(
            "SELECT {} FROM scans
             WHERE instance_id = ?1
               AND (status = 'buffered' OR (status = 'delivered' AND delivered_at <= ?2))
               AND priority >= ?3
             ORDER BY priority DESC, created_at ASC, rowid ASC
             LIMIT ?4",
            StoredScan::COLUMNS
        ))?;
        let rows = stmt.query_map(
            rusqlite::params![
                instance.instance_id.to_string(),
                redeliver_before,
                min_priority,
                limit,
            ],
            StoredScan::from_row,
        )?;
        rows.collect::<Result<Vec<_>, _>>()?
    };

    {
        let mut mark = tx.prepare(
            "UPDATE scans
             SET status = 'delivered', delivered_at = ?1, updated_at = ?1,
                 delivery_count = delivery_count + 1
             WHERE scan_id = ?2",
        )?;
        for scan in &mut scans {
            mark.execute(rusqlite::params![now_ms, scan.scan_id.to_string()])?;
            scan.status = ScanStatus::Delivered;
            scan.delivered_at = Some(from_millis(now_ms));
            scan.updated_at = from_millis(now_ms);
            scan.delivery_count += 1;
        }
    }

    tx.commit()?;

    let redelivered = scans.iter().filter(|s| s.delivery_count > 1).count();
    tracing::debug!(
        instance_id = %instance.instance_id,
        count = scans.len(),
        redelivered,
        "Scans pulled"
    );
    Ok(scans)
}

/// Confirm receipt of `scan_ids`. Returns how many scans changed state.
///
/// IDs that are unknown, already confirmed, or owned by another instance
/// are ignored.
pub fn confirm(
    storage: &RelayStorage,
    instance: &StoredInstance,
    scan_ids: &[String],
    now: DateTime<Utc>,
) -> Result<u64, RelayError> {
    if scan_ids.is_empty() {
        return Err(RelayError::Validation(
            "scanIds must be a non-empty array".to_string(),
        ));
    }

    let unique: BTreeSet<&str> = scan_ids.iter().map(|id| id.trim()).collect();
    let instance_id = instance.instance_id.to_string();
    let now_ms = to_millis(now);

    let mut conn = storage.conn()?;
    let tx = conn.transaction()?;
    let mut confirmed = 0u64;
    {
        let mut stmt = tx.prepare(
            "UPDATE scans SET status = 'confirmed', updated_at = ?1
             WHERE scan_id = ?2 AND instance_id = ?3 AND status != 'confirmed'",
        )?;
        for scan_id in unique {
            confirmed += stmt.execute(rusqlite::params![now_ms, scan_id, instance_id])? as u64;
        }
    }
    tx.commit()?;

    tracing::debug!(
        instance_id = %instance.instance_id,
        requested = scan_ids.len(),
        confirmed,
        "Scans confirmed"
    );
    Ok(confirmed)
}

/// Per-status counts for `instance`.
pub fn status_summary(
    storage: &RelayStorage,
    instance: &StoredInstance,
) -> Result<StatusResponse, RelayError> {
    let mut summary = StatusResponse {
        instance_id: instance.instance_id,
        tier: instance.tier,
        buffered: 0,
        delivered: 0,
        confirmed: 0,
    };

    let conn = storage.conn()?;
    let mut stmt =
        conn.prepare("SELECT status, COUNT(*) FROM scans WHERE instance_id = ?1 GROUP BY status")?;
    let rows = stmt.query_map([instance.instance_id.to_string()], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
    })?;

    for row in rows {
        let (status, count) = row?;
        let count = count as u64;
        match ScanStatus::parse(&status) {
            Some(ScanStatus::Buffered) => summary.buffered = count,
            Some(ScanStatus::Delivered) => summary.delivered = count,
            Some(ScanStatus::Confirmed) => summary.confirmed = count,
            None => tracing::warn!("Unknown scan status in store: {}", status),
        }
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::submit_scan;
    use crate::registry;
    use eckwms_core::models::{RegisterInstanceRequest, SubmitScanRequest};
    use uuid::Uuid;

    const NO_REDELIVERY: Option<Duration> = None;

    fn register(storage: &RelayStorage, name: &str) -> StoredInstance {
        let request = RegisterInstanceRequest {
            name: name.to_string(),
            ..RegisterInstanceRequest::default()
        };
        let reg = registry::register(storage, &request, Utc::now()).unwrap();
        registry::find(storage, &reg.instance_id).unwrap()
    }

    fn submit(
        storage: &RelayStorage,
        instance: &StoredInstance,
        payload: &str,
        priority: i64,
        at: DateTime<Utc>,
    ) -> Uuid {
        let request = SubmitScanRequest {
            payload: serde_json::json!(payload),
            priority: Some(priority),
            ..SubmitScanRequest::default()
        };
        submit_scan(storage, instance, &request, 4096, at)
            .unwrap()
            .scan_id
    }

    fn status_of(storage: &RelayStorage, scan_id: &Uuid) -> ScanStatus {
        let raw: String = storage
            .conn()
            .unwrap()
            .query_row(
                "SELECT status FROM scans WHERE scan_id = ?1",
                [scan_id.to_string()],
                |row| row.get(0),
            )
            .unwrap();
        ScanStatus::parse(&raw).unwrap()
    }

    fn pull_all(storage: &RelayStorage, instance: &StoredInstance) -> Vec<StoredScan> {
        pull(storage, instance, &PullOptions::default(), NO_REDELIVERY, Utc::now()).unwrap()
    }

    #[test]
    fn example_round_trip() {
        let storage = RelayStorage::in_memory().unwrap();
        let a = register(&storage, "A");
        let scan_id = submit(&storage, &a, "BOX123", 5, Utc::now());

        let options = PullOptions {
            limit: Some(10),
            min_priority: None,
        };
        let pulled = pull(&storage, &a, &options, NO_REDELIVERY, Utc::now()).unwrap();
        assert_eq!(pulled.len(), 1);
        assert_eq!(pulled[0].scan_id, scan_id);
        assert_eq!(pulled[0].status, ScanStatus::Delivered);
        assert_eq!(status_of(&storage, &scan_id), ScanStatus::Delivered);

        let confirmed = confirm(&storage, &a, &[scan_id.to_string()], Utc::now()).unwrap();
        assert_eq!(confirmed, 1);
        assert_eq!(status_of(&storage, &scan_id), ScanStatus::Confirmed);

        assert!(pull_all(&storage, &a).is_empty());
    }

    #[test]
    fn pulled_scans_are_not_pulled_again() {
        let storage = RelayStorage::in_memory().unwrap();
        let a = register(&storage, "A");
        submit(&storage, &a, "BOX1", 0, Utc::now());

        assert_eq!(pull_all(&storage, &a).len(), 1);
        assert!(pull_all(&storage, &a).is_empty());
    }

    #[test]
    fn priority_ordering() {
        let storage = RelayStorage::in_memory().unwrap();
        let a = register(&storage, "A");
        let base = Utc::now();
        for (i, priority) in [1, 5, 3].into_iter().enumerate() {
            let at = base + Duration::seconds(i as i64);
            submit(&storage, &a, &format!("P{}", priority), priority, at);
        }

        let priorities: Vec<i64> = pull_all(&storage, &a).iter().map(|s| s.priority).collect();
        assert_eq!(priorities, vec![5, 3, 1]);
    }

    #[test]
    fn age_breaks_priority_ties() {
        let storage = RelayStorage::in_memory().unwrap();
        let a = register(&storage, "A");
        let base = Utc::now();
        // Newer row is inserted first so insertion order cannot explain the result.
        let newer = submit(&storage, &a, "NEW", 2, base + Duration::seconds(10));
        let older = submit(&storage, &a, "OLD", 2, base);

        let ids: Vec<Uuid> = pull_all(&storage, &a).iter().map(|s| s.scan_id).collect();
        assert_eq!(ids, vec![older, newer]);
    }

    #[test]
    fn min_priority_filter() {
        let storage = RelayStorage::in_memory().unwrap();
        let a = register(&storage, "A");
        let low = submit(&storage, &a, "LOW", 1, Utc::now());
        submit(&storage, &a, "HIGH", 7, Utc::now());

        let options = PullOptions {
            limit: None,
            min_priority: Some(5),
        };
        let pulled = pull(&storage, &a, &options, NO_REDELIVERY, Utc::now()).unwrap();
        assert_eq!(pulled.len(), 1);
        assert_eq!(pulled[0].payload, "HIGH");
        assert_eq!(status_of(&storage, &low), ScanStatus::Buffered);
    }

    #[test]
    fn limit_is_clamped() {
        assert_eq!(PullOptions::default().effective_limit(), 100);
        let huge = PullOptions {
            limit: Some(5000),
            min_priority: None,
        };
        assert_eq!(huge.effective_limit(), 1000);
        let zero = PullOptions {
            limit: Some(0),
            min_priority: None,
        };
        assert_eq!(zero.effective_limit(), 1);
    }

    #[test]
    fn pull_returns_at_most_the_cap() {
        let storage = RelayStorage::in_memory().unwrap();
        let a = register(&storage, "A");
        let now = Utc::now();
        {
            let mut conn = storage.conn().unwrap();
            let tx = conn.transaction().unwrap();
            for i in 0..1005 {
                tx.execute(
                    "INSERT INTO scans (scan_id, instance_id, payload, checksum, status,
                                        created_at, updated_at)
                     VALUES (?1, ?2, ?3, '00000000', 'buffered', ?4, ?4)",
                    rusqlite::params![
                        Uuid::new_v4().to_string(),
                        a.instance_id.to_string(),
                        format!("BOX{}", i),
                        to_millis(now) + i,
                    ],
                )
                .unwrap();
            }
            tx.commit().unwrap();
        }

        let options = PullOptions {
            limit: Some(5000),
            min_priority: None,
        };
        let pulled = pull(&storage, &a, &options, NO_REDELIVERY, now).unwrap();
        assert_eq!(pulled.len(), 1000);
        assert_eq!(pull_all(&storage, &a).len(), 5);
    }

    #[test]
    fn instances_only_see_their_own_scans() {
        let storage = RelayStorage::in_memory().unwrap();
        let a = register(&storage, "A");
        let b = register(&storage, "B");
        submit(&storage, &a, "A1", 0, Utc::now());

        assert!(pull_all(&storage, &b).is_empty());
        assert_eq!(pull_all(&storage, &a).len(), 1);
    }

    #[test]
    fn confirm_is_idempotent() {
        let storage = RelayStorage::in_memory().unwrap();
        let a = register(&storage, "A");
        let scan_id = submit(&storage, &a, "BOX1", 0, Utc::now());
        pull_all(&storage, &a);

        let ids = vec![scan_id.to_string()];
        assert_eq!(confirm(&storage, &a, &ids, Utc::now()).unwrap(), 1);
        assert_eq!(confirm(&storage, &a, &ids, Utc::now()).unwrap(), 0);
    }

    #[test]
    fn confirm_counts_duplicates_once() {
        let storage = RelayStorage::in_memory().unwrap();
        let a = register(&storage, "A");
        let scan_id = submit(&storage, &a, "BOX1", 0, Utc::now()).to_string();
        pull_all(&storage, &a);

        let ids = vec![scan_id.clone(), scan_id.clone(), format!(" {} ", scan_id)];
        assert_eq!(confirm(&storage, &a, &ids, Utc::now()).unwrap(), 1);
    }

    #[test]
    fn confirm_ignores_foreign_and_unknown_ids() {
        let storage = RelayStorage::in_memory().unwrap();
        let a = register(&storage, "A");
        let b = register(&storage, "B");
        let foreign = submit(&storage, &b, "B1", 0, Utc::now());
        pull_all(&storage, &b);

        let ids = vec![
            foreign.to_string(),
            Uuid::new_v4().to_string(),
            "not-a-uuid".to_string(),
        ];
        assert_eq!(confirm(&storage, &a, &ids, Utc::now()).unwrap(), 0);
        assert_eq!(status_of(&storage, &foreign), ScanStatus::Delivered);
    }

    #[test]
    fn confirm_requires_ids() {
        let storage = RelayStorage::in_memory().unwrap();
        let a = register(&storage, "A");
        assert!(matches!(
            confirm(&storage, &a, &[], Utc::now()),
            Err(RelayError::Validation(_))
        ));
    }

    #[test]
    fn unconfirmed_deliveries_are_redelivered_after_window() {
        let storage = RelayStorage::in_memory().unwrap();
        let a = register(&storage, "A");
        let t0 = Utc::now();
        let scan_id = submit(&storage, &a, "BOX1", 0, t0);
        let window = Some(Duration::minutes(15));
        let options = PullOptions::default();

        let first = pull(&storage, &a, &options, window, t0).unwrap();
        assert_eq!(first[0].delivery_count, 1);

        // Still inside the window: nothing to hand out.
        let early = pull(&storage, &a, &options, window, t0 + Duration::minutes(5)).unwrap();
        assert!(early.is_empty());

        let late = pull(&storage, &a, &options, window, t0 + Duration::minutes(16)).unwrap();
        assert_eq!(late.len(), 1);
        assert_eq!(late[0].scan_id, scan_id);
        assert_eq!(late[0].delivery_count, 2);
        assert_eq!(late[0].status, ScanStatus::Delivered);
    }

    #[test]
    fn huge_redelivery_window_never_redelivers() {
        let storage = RelayStorage::in_memory().unwrap();
        let a = register(&storage, "A");
        let start = Utc::now();
        submit(&storage, &a, "BOX1", 0, start);
        assert_eq!(pull_all(&storage, &a).len(), 1);

        let again = pull(
            &storage,
            &a,
            &PullOptions::default(),
            Some(Duration::MAX),
            start + Duration::days(365),
        )
        .unwrap();
        assert!(again.is_empty());
    }

    #[test]
    fn confirmed_scans_are_never_redelivered() {
        let storage = RelayStorage::in_memory().unwrap();
        let a = register(&storage, "A");
        let t0 = Utc::now();
        let scan_id = submit(&storage, &a, "BOX1", 0, t0);
        let window = Some(Duration::minutes(15));

        pull(&storage, &a, &PullOptions::default(), window, t0).unwrap();
        confirm(&storage, &a, &[scan_id.to_string()], t0).unwrap();

        let later = pull(&storage, &a, &PullOptions::default(), window, t0 + Duration::days(1))
            .unwrap();
        assert!(later.is_empty());
    }

    #[test]
    fn concurrent_pulls_hand_out_each_scan_once() {
        let storage = RelayStorage::in_memory().unwrap();
        let a = register(&storage, "A");
        let base = Utc::now();
        let submitted: BTreeSet<Uuid> = (0..200)
            .map(|i| submit(&storage, &a, &format!("BOX{}", i), i % 4, base))
            .collect();

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let storage = storage.clone();
                let instance = a.clone();
                std::thread::spawn(move || {
                    let options = PullOptions {
                        limit: Some(7),
                        min_priority: None,
                    };
                    let mut seen = Vec::new();
                    loop {
                        let batch =
                            pull(&storage, &instance, &options, NO_REDELIVERY, Utc::now()).unwrap();
                        if batch.is_empty() {
                            return seen;
                        }
                        seen.extend(batch.into_iter().map(|s| s.scan_id));
                    }
                })
            })
            .collect();

        let mut union = BTreeSet::new();
        let mut total = 0;
        for worker in workers {
            let seen = worker.join().unwrap();
            total += seen.len();
            union.extend(seen);
        }

        // Disjoint batches: no ID was handed to two workers
        assert_eq!(total, submitted.len());
        assert_eq!(union, submitted);
        for id in &submitted {
            assert_eq!(status_of(&storage, id), ScanStatus::Delivered);
        }
        let summary = status_summary(&storage, &a).unwrap();
        assert_eq!(summary.delivered, 200);
        assert_eq!(summary.buffered, 0);
    }

    #[test]
    fn concurrent_confirms_and_sweeps_agree() {
        let storage = RelayStorage::in_memory().unwrap();
        let a = register(&storage, "A");
        let ids: Vec<String> = (0..60)
            .map(|i| submit(&storage, &a, &format!("BOX{}", i), 0, Utc::now()).to_string())
            .collect();
        pull_all(&storage, &a);

        // Every worker confirms the full overlapping set while sweeps run
        let confirmers: Vec<_> = (0..4)
            .map(|_| {
                let storage = storage.clone();
                let instance = a.clone();
                let ids = ids.clone();
                std::thread::spawn(move || {
                    ids.chunks(5)
                        .map(|chunk| confirm(&storage, &instance, chunk, Utc::now()).unwrap())
                        .sum::<u64>()
                })
            })
            .collect();
        let sweeper = {
            let storage = storage.clone();
            std::thread::spawn(move || {
                for _ in 0..20 {
                    crate::retention::run_sweep(
                        &storage,
                        &crate::retention::RetentionPolicy::default(),
                        Utc::now(),
                    );
                }
            })
        };

        let confirmed: u64 = confirmers.into_iter().map(|w| w.join().unwrap()).sum();
        sweeper.join().unwrap();

        // Each scan changes state exactly once across all workers
        assert_eq!(confirmed, ids.len() as u64);
        crate::retention::run_sweep(&storage, &Default::default(), Utc::now());
        let summary = status_summary(&storage, &a).unwrap();
        assert_eq!(summary.buffered + summary.delivered + summary.confirmed, 0);
    }

    #[test]
    fn status_summary_counts_per_status() {
        let storage = RelayStorage::in_memory().unwrap();
        let a = register(&storage, "A");
        let first = submit(&storage, &a, "BOX1", 9, Utc::now());
        submit(&storage, &a, "BOX2", 0, Utc::now());
        submit(&storage, &a, "BOX3", 0, Utc::now());

        let options = PullOptions {
            limit: Some(2),
            min_priority: None,
        };
        pull(&storage, &a, &options, NO_REDELIVERY, Utc::now()).unwrap();
        confirm(&storage, &a, &[first.to_string()], Utc::now()).unwrap();

        let summary = status_summary(&storage, &a).unwrap();
        assert_eq!(summary.buffered, 1);
        assert_eq!(summary.delivered, 1);
        assert_eq!(summary.confirmed, 1);
    }
}
