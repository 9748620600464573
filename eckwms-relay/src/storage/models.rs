//! Relay storage model types.

use chrono::{DateTime, Utc};
use eckwms_core::models::{InstanceInfo, PulledScan};
use eckwms_core::{Reachability, ScanStatus, Tier};
use rusqlite::types::Type;
use rusqlite::Row;
use uuid::Uuid;

/// A stored column value that does not decode into its domain type.
#[derive(Debug, thiserror::Error)]
#[error("invalid {column} value: {value}")]
pub struct InvalidColumn {
    column: &'static str,
    value: String,
}

fn invalid(idx: usize, column: &'static str, value: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(InvalidColumn { column, value }))
}

fn uuid_at(row: &Row<'_>, idx: usize, column: &'static str) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw).map_err(|_| invalid(idx, column, raw))
}

/// Milliseconds since the Unix epoch, the storage time unit.
pub fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredInstance {
    pub instance_id: Uuid,
    pub name: String,
    pub tier: Tier,
    pub public_demo: bool,
    pub reachability: Reachability,
    pub registered_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

impl StoredInstance {
    pub const COLUMNS: &'static str = "instance_id, name, tier, public_demo, public_ip, \
                                       local_ips, proxy_url, registered_at, last_seen_at";

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let tier_raw: String = row.get(2)?;
        let tier = Tier::parse(&tier_raw).ok_or_else(|| invalid(2, "tier", tier_raw.clone()))?;
        let local_ips_raw: String = row.get(5)?;
        let local_ips: Vec<String> = serde_json::from_str(&local_ips_raw)
            .map_err(|_| invalid(5, "local_ips", local_ips_raw.clone()))?;

        Ok(Self {
            instance_id: uuid_at(row, 0, "instance_id")?,
            name: row.get(1)?,
            tier,
            public_demo: row.get(3)?,
            reachability: Reachability {
                public_ip: row.get(4)?,
                local_ips,
                proxy_url: row.get(6)?,
            },
            registered_at: from_millis(row.get(7)?),
            last_seen_at: from_millis(row.get(8)?),
        })
    }

    /// Ordered connection hints: local addresses first, then public, then proxy.
    pub fn connection_candidates(&self) -> Vec<String> {
        let mut candidates: Vec<String> = Vec::new();
        let hints = self
            .reachability
            .local_ips
            .iter()
            .chain(self.reachability.public_ip.iter())
            .chain(self.reachability.proxy_url.iter());
        for hint in hints {
            if !hint.is_empty() && !candidates.contains(hint) {
                candidates.push(hint.clone());
            }
        }
        candidates
    }

    pub fn to_info(&self) -> InstanceInfo {
        InstanceInfo {
            instance_id: self.instance_id,
            name: self.name.clone(),
            tier: self.tier,
            public_demo: self.public_demo,
            reachability: self.reachability.clone(),
            candidates: self.connection_candidates(),
            registered_at: self.registered_at,
            last_seen_at: self.last_seen_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredScan {
    pub scan_id: Uuid,
    pub instance_id: Option<Uuid>,
    pub payload: String,
    pub checksum: String,
    pub device_id: Option<String>,
    pub priority: i64,
    pub scan_type: Option<String>,
    pub status: ScanStatus,
    pub delivery_count: u32,
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoredScan {
    pub const COLUMNS: &'static str = "scan_id, instance_id, payload, checksum, device_id, \
                                       priority, scan_type, status, delivery_count, \
                                       delivered_at, created_at, updated_at";

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let instance_id = match row.get::<_, Option<String>>(1)? {
            Some(raw) => Some(Uuid::parse_str(&raw).map_err(|_| invalid(1, "instance_id", raw))?),
            None => None,
        };
        let status_raw: String = row.get(7)?;
        let status =
            ScanStatus::parse(&status_raw).ok_or_else(|| invalid(7, "status", status_raw.clone()))?;

        Ok(Self {
            scan_id: uuid_at(row, 0, "scan_id")?,
            instance_id,
            payload: row.get(2)?,
            checksum: row.get(3)?,
            device_id: row.get(4)?,
            priority: row.get(5)?,
            scan_type: row.get(6)?,
            status,
            delivery_count: row.get(8)?,
            delivered_at: row.get::<_, Option<i64>>(9)?.map(from_millis),
            created_at: from_millis(row.get(10)?),
            updated_at: from_millis(row.get(11)?),
        })
    }

    pub fn to_pulled(&self) -> PulledScan {
        PulledScan {
            scan_id: self.scan_id,
            payload: self.payload.clone(),
            checksum: self.checksum.clone(),
            device_id: self.device_id.clone(),
            priority: self.priority,
            scan_type: self.scan_type.clone(),
            created_at: self.created_at,
            delivery_count: self.delivery_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(reachability: Reachability) -> StoredInstance {
        StoredInstance {
            instance_id: Uuid::new_v4(),
            name: "Lager Nord".to_string(),
            tier: Tier::Free,
            public_demo: false,
            reachability,
            registered_at: from_millis(0),
            last_seen_at: from_millis(0),
        }
    }

    #[test]
    fn candidates_are_ordered_nearest_first() {
        let inst = instance(Reachability {
            public_ip: Some("203.0.113.4".to_string()),
            local_ips: vec!["10.0.0.5".to_string(), "192.168.1.20".to_string()],
            proxy_url: Some("https://proxy.example.com/i/abc".to_string()),
        });
        assert_eq!(
            inst.connection_candidates(),
            vec![
                "10.0.0.5",
                "192.168.1.20",
                "203.0.113.4",
                "https://proxy.example.com/i/abc"
            ]
        );
    }

    #[test]
    fn candidates_skip_duplicates_and_blanks() {
        let inst = instance(Reachability {
            public_ip: Some("10.0.0.5".to_string()),
            local_ips: vec!["10.0.0.5".to_string(), String::new()],
            proxy_url: None,
        });
        assert_eq!(inst.connection_candidates(), vec!["10.0.0.5"]);
    }

    #[test]
    fn millis_round_trip() {
        let at = from_millis(1_700_000_000_123);
        assert_eq!(to_millis(at), 1_700_000_000_123);
    }
}
