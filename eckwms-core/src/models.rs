//! Scan sync data models: lifecycle enums and the request/response wire format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default number of scans returned by a pull.
pub const DEFAULT_PULL_LIMIT: u32 = 100;

/// Hard cap on the number of scans returned by a single pull.
pub const MAX_PULL_LIMIT: u32 = 1000;

/// The number of scans a pull asking for `requested` can return.
pub fn effective_pull_limit(requested: Option<u32>) -> u32 {
    requested
        .unwrap_or(DEFAULT_PULL_LIMIT)
        .clamp(1, MAX_PULL_LIMIT)
}

/// Lifecycle state of a buffered scan.
///
/// States only move forward: `buffered -> delivered -> confirmed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    Buffered,
    Delivered,
    Confirmed,
}

impl ScanStatus {
    /// Convert the status to its stored string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buffered => "buffered",
            Self::Delivered => "delivered",
            Self::Confirmed => "confirmed",
        }
    }

    /// Parse a status from its stored string representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "buffered" => Some(Self::Buffered),
            "delivered" => Some(Self::Delivered),
            "confirmed" => Some(Self::Confirmed),
            _ => None,
        }
    }
}

/// Service class of an instance. Governs retention.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    #[default]
    Free,
    Paid,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Paid => "paid",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "free" => Some(Self::Free),
            "paid" => Some(Self::Paid),
            _ => None,
        }
    }
}

/// Network hints an instance publishes so sites can find their nearest entry point.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reachability {
    #[serde(default)]
    pub public_ip: Option<String>,
    #[serde(default)]
    pub local_ips: Vec<String>,
    #[serde(default)]
    pub proxy_url: Option<String>,
}

/// Submit a single scan.
///
/// `payload` may be a JSON string (stored verbatim) or any other JSON value
/// (stored in its compact serialized form).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitScanRequest {
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub scan_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitScanResponse {
    pub scan_id: Uuid,
    pub checksum: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_priority: Option<i64>,
}

/// A scan handed out by a pull.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PulledScan {
    pub scan_id: Uuid,
    pub payload: String,
    pub checksum: String,
    pub device_id: Option<String>,
    pub priority: i64,
    #[serde(default, rename = "type")]
    pub scan_type: Option<String>,
    pub created_at: DateTime<Utc>,
    /// How many times this scan has been handed out, including this pull.
    #[serde(default)]
    pub delivery_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullResponse {
    pub count: usize,
    pub scans: Vec<PulledScan>,
}

/// Confirm receipt of previously pulled scans.
///
/// IDs are plain strings: anything that is not a known scan of the caller
/// is ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmRequest {
    #[serde(default)]
    pub scan_ids: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmResponse {
    pub confirmed_count: u64,
}

/// Per-status scan counts for the calling instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub instance_id: Uuid,
    pub tier: Tier,
    pub buffered: u64,
    pub delivered: u64,
    pub confirmed: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterInstanceRequest {
    pub name: String,
    #[serde(default)]
    pub tier: Option<Tier>,
    /// Marks the shared public/demo credential. Device IDs are never stored for it.
    #[serde(default)]
    pub public_demo: bool,
    #[serde(flatten)]
    pub reachability: Reachability,
}

/// Issued credentials. The API key is only ever shown here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationResponse {
    pub instance_id: Uuid,
    pub api_key: String,
    pub tier: Tier,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceInfo {
    pub instance_id: Uuid,
    pub name: String,
    pub tier: Tier,
    pub public_demo: bool,
    #[serde(flatten)]
    pub reachability: Reachability,
    /// Ordered connection hints, nearest first.
    pub candidates: Vec<String>,
    pub registered_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetTierRequest {
    pub tier: Tier,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurgeRequest {
    /// Restrict the purge to one status. `None` purges every scan.
    #[serde(default)]
    pub status: Option<ScanStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurgeResponse {
    pub deleted: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteInstanceResponse {
    pub instance_id: Uuid,
    pub scans_deleted: u64,
    pub scans_orphaned: u64,
}
