//! Buffering gateway: accept scans from authenticated instances.

use crate::error::RelayError;
use crate::storage::models::{from_millis, to_millis, StoredInstance};
use crate::storage::RelayStorage;
use chrono::{DateTime, Utc};
use eckwms_core::compute_checksum;
use eckwms_core::models::{SubmitScanRequest, SubmitScanResponse};
use eckwms_core::ScanStatus;
use serde_json::Value;
use uuid::Uuid;

/// Turn a submitted payload into the exact text that is stored and checksummed.
///
/// Strings are kept verbatim; any other JSON value is serialized compactly.
pub fn payload_text(payload: &Value) -> Result<String, RelayError> {
    match payload {
        Value::Null => Err(RelayError::Validation("payload is required".to_string())),
        Value::String(s) if s.trim().is_empty() => {
            Err(RelayError::Validation("payload must not be empty".to_string()))
        }
        Value::String(s) => Ok(s.clone()),
        other => serde_json::to_string(other).map_err(|e| RelayError::Internal(e.to_string())),
    }
}

/// Buffer one scan for `instance`.
pub fn submit_scan(
    storage: &RelayStorage,
    instance: &StoredInstance,
    request: &SubmitScanRequest,
    max_payload_bytes: usize,
    now: DateTime<Utc>,
) -> Result<SubmitScanResponse, RelayError> {
    let payload = payload_text(&request.payload)?;
    if payload.len() > max_payload_bytes {
        return Err(RelayError::Validation(format!(
            "payload exceeds {} bytes",
            max_payload_bytes
        )));
    }

    let checksum = compute_checksum(payload.as_bytes());
    // Public/demo credentials are shared, so device identifiers are never kept for them.
    let device_id = if instance.public_demo {
        None
    } else {
        request
            .device_id
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
    };
    let scan_type = request
        .scan_type
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty());

    let scan_id = Uuid::new_v4();
    let now_ms = to_millis(now);

    storage.conn()?.execute(
        "INSERT INTO scans (scan_id, instance_id, payload, checksum, device_id, priority,
                            scan_type, status, delivery_count, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9, ?9)",
        rusqlite::params![
            scan_id.to_string(),
            instance.instance_id.to_string(),
            payload,
            checksum,
            device_id,
            request.priority.unwrap_or(0),
            scan_type,
            ScanStatus::Buffered.as_str(),
            now_ms,
        ],
    )?;

    tracing::debug!(%scan_id, instance_id = %instance.instance_id, "Scan buffered");

    Ok(SubmitScanResponse {
        scan_id,
        checksum,
        created_at: from_millis(now_ms),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry;
    use crate::storage::models::StoredScan;
    use eckwms_core::models::RegisterInstanceRequest;
    use serde_json::json;

    fn setup(public_demo: bool) -> (RelayStorage, StoredInstance) {
        let storage = RelayStorage::in_memory().unwrap();
        let request = RegisterInstanceRequest {
            name: "Lager Nord".to_string(),
            public_demo,
            ..RegisterInstanceRequest::default()
        };
        let reg = registry::register(&storage, &request, Utc::now()).unwrap();
        let instance = registry::find(&storage, &reg.instance_id).unwrap();
        (storage, instance)
    }

    fn load(storage: &RelayStorage, scan_id: &Uuid) -> StoredScan {
        storage
            .conn()
            .unwrap()
            .query_row(
                &format!("SELECT {} FROM scans WHERE scan_id = ?1", StoredScan::COLUMNS),
                [scan_id.to_string()],
                StoredScan::from_row,
            )
            .unwrap()
    }

    fn scan(payload: Value) -> SubmitScanRequest {
        SubmitScanRequest {
            payload,
            ..SubmitScanRequest::default()
        }
    }

    #[test]
    fn submit_buffers_with_checksum() {
        let (storage, instance) = setup(false);
        let request = SubmitScanRequest {
            payload: json!("BOX123"),
            device_id: Some("scanner-7".to_string()),
            priority: Some(5),
            scan_type: Some("barcode".to_string()),
        };

        let receipt = submit_scan(&storage, &instance, &request, 1024, Utc::now()).unwrap();
        assert_eq!(receipt.checksum.len(), 8);
        assert_eq!(receipt.checksum, compute_checksum(b"BOX123"));

        let stored = load(&storage, &receipt.scan_id);
        assert_eq!(stored.status, ScanStatus::Buffered);
        assert_eq!(stored.instance_id, Some(instance.instance_id));
        assert_eq!(stored.payload, "BOX123");
        assert_eq!(stored.device_id.as_deref(), Some("scanner-7"));
        assert_eq!(stored.priority, 5);
        assert_eq!(stored.scan_type.as_deref(), Some("barcode"));
        assert_eq!(stored.delivery_count, 0);
        assert_eq!(stored.created_at, receipt.created_at);
    }

    #[test]
    fn missing_or_empty_payload_is_rejected() {
        let (storage, instance) = setup(false);
        for payload in [Value::Null, json!(""), json!("   ")] {
            let result = submit_scan(&storage, &instance, &scan(payload), 1024, Utc::now());
            assert!(matches!(result, Err(RelayError::Validation(_))));
        }
    }

    #[test]
    fn structured_payload_is_serialized_before_checksum() {
        let (storage, instance) = setup(false);
        let payload = json!({ "barcode": "BOX123", "qty": 2 });
        let receipt = submit_scan(&storage, &instance, &scan(payload.clone()), 1024, Utc::now())
            .unwrap();

        let text = serde_json::to_string(&payload).unwrap();
        assert_eq!(load(&storage, &receipt.scan_id).payload, text);
        assert_eq!(receipt.checksum, compute_checksum(text.as_bytes()));
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let (storage, instance) = setup(false);
        let result = submit_scan(&storage, &instance, &scan(json!("X".repeat(33))), 32, Utc::now());
        assert!(matches!(result, Err(RelayError::Validation(_))));
    }

    #[test]
    fn public_demo_instance_drops_device_id() {
        let (storage, instance) = setup(true);
        let request = SubmitScanRequest {
            payload: json!("BOX123"),
            device_id: Some("personal-phone".to_string()),
            ..SubmitScanRequest::default()
        };

        let receipt = submit_scan(&storage, &instance, &request, 1024, Utc::now()).unwrap();
        assert_eq!(load(&storage, &receipt.scan_id).device_id, None);
    }

    #[test]
    fn priority_defaults_to_zero() {
        let (storage, instance) = setup(false);
        let receipt =
            submit_scan(&storage, &instance, &scan(json!("BOX1")), 1024, Utc::now()).unwrap();
        assert_eq!(load(&storage, &receipt.scan_id).priority, 0);
    }

    #[test]
    fn submit_for_deleted_instance_is_a_conflict() {
        let (storage, instance) = setup(false);
        let gone = StoredInstance {
            instance_id: Uuid::new_v4(),
            ..instance
        };

        let err = submit_scan(&storage, &gone, &scan(json!("BOX1")), 1024, Utc::now())
            .unwrap_err();
        assert!(matches!(err, RelayError::Conflict(_)));
    }
}
