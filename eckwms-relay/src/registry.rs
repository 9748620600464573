//! Instance registry: registration, credential lookup, heartbeats, deletion.
//!
//! API keys are generated here and shown once. Only their SHA-256 digest is
//! stored, under a unique index, so lookups by credential stay O(log n).

use crate::error::RelayError;
use crate::storage::models::{to_millis, StoredInstance};
use crate::storage::RelayStorage;
use chrono::{DateTime, Utc};
use eckwms_core::models::{DeleteInstanceResponse, RegisterInstanceRequest, RegistrationResponse};
use eckwms_core::{Reachability, Tier};
use rand::RngCore;
use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::net::IpAddr;
use uuid::Uuid;

const API_KEY_PREFIX: &str = "eck_";
const MAX_NAME_LEN: usize = 200;

/// What happens to an instance's scans when the instance is deleted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CascadePolicy {
    /// Delete the scans with the instance.
    Cascade,
    /// Keep the scans with a null owner.
    #[default]
    Orphan,
}

/// Generate a fresh API key: prefix plus 32 random bytes in hex.
pub fn generate_api_key() -> String {
    let mut secret = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut secret);
    format!("{}{}", API_KEY_PREFIX, hex::encode(secret))
}

pub fn hash_api_key(api_key: &str) -> String {
    hex::encode(Sha256::digest(api_key.as_bytes()))
}

fn validate_reachability(reachability: &Reachability) -> Result<(), RelayError> {
    let ips = reachability
        .public_ip
        .iter()
        .chain(reachability.local_ips.iter());
    for ip in ips {
        if ip.parse::<IpAddr>().is_err() {
            return Err(RelayError::Validation(format!("Invalid IP address: {}", ip)));
        }
    }
    Ok(())
}

/// Register a new instance and issue its credential.
pub fn register(
    storage: &RelayStorage,
    request: &RegisterInstanceRequest,
    now: DateTime<Utc>,
) -> Result<RegistrationResponse, RelayError> {
    let name = request.name.trim();
    if name.is_empty() {
        return Err(RelayError::Validation("name is required".to_string()));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(RelayError::Validation(format!(
            "name must be at most {} bytes",
            MAX_NAME_LEN
        )));
    }
    validate_reachability(&request.reachability)?;

    let instance_id = Uuid::new_v4();
    let api_key = generate_api_key();
    let tier = request.tier.unwrap_or_default();
    let local_ips = serde_json::to_string(&request.reachability.local_ips)
        .map_err(|e| RelayError::Internal(e.to_string()))?;
    let now_ms = to_millis(now);

    let conn = storage.conn()?;
    conn.execute(
        "INSERT INTO instances (instance_id, name, api_key_hash, tier, public_demo,
                                public_ip, local_ips, proxy_url, registered_at, last_seen_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
        rusqlite::params![
            instance_id.to_string(),
            name,
            hash_api_key(&api_key),
            tier.as_str(),
            request.public_demo,
            request.reachability.public_ip,
            local_ips,
            request.reachability.proxy_url,
            now_ms,
        ],
    )?;

    tracing::info!(%instance_id, tier = tier.as_str(), public_demo = request.public_demo, "Instance registered");

    Ok(RegistrationResponse {
        instance_id,
        api_key,
        tier,
    })
}

/// Resolve a credential to its instance.
///
/// An absent or blank credential is `MissingCredential`; one that matches no
/// instance is `InvalidCredential`.
pub fn authenticate(
    storage: &RelayStorage,
    api_key: Option<&str>,
) -> Result<StoredInstance, RelayError> {
    let api_key = api_key
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .ok_or(RelayError::MissingCredential)?;

    let conn = storage.conn()?;
    conn.query_row(
        &format!(
            "SELECT {} FROM instances WHERE api_key_hash = ?1",
            StoredInstance::COLUMNS
        ),
        [hash_api_key(api_key)],
        StoredInstance::from_row,
    )
    .optional()?
    .ok_or(RelayError::InvalidCredential)
}

pub fn find(storage: &RelayStorage, instance_id: &Uuid) -> Result<StoredInstance, RelayError> {
    let conn = storage.conn()?;
    conn.query_row(
        &format!(
            "SELECT {} FROM instances WHERE instance_id = ?1",
            StoredInstance::COLUMNS
        ),
        [instance_id.to_string()],
        StoredInstance::from_row,
    )
    .optional()?
    .ok_or_else(|| RelayError::NotFound(format!("Instance {} not found", instance_id)))
}

/// Refresh reachability metadata and `last_seen_at`.
pub fn heartbeat(
    storage: &RelayStorage,
    instance_id: &Uuid,
    reachability: &Reachability,
    now: DateTime<Utc>,
) -> Result<StoredInstance, RelayError> {
    validate_reachability(reachability)?;
    let local_ips = serde_json::to_string(&reachability.local_ips)
        .map_err(|e| RelayError::Internal(e.to_string()))?;

    let updated = storage.conn()?.execute(
        "UPDATE instances SET public_ip = ?1, local_ips = ?2, proxy_url = ?3, last_seen_at = ?4
         WHERE instance_id = ?5",
        rusqlite::params![
            reachability.public_ip,
            local_ips,
            reachability.proxy_url,
            to_millis(now),
            instance_id.to_string(),
        ],
    )?;
    if updated == 0 {
        return Err(RelayError::NotFound(format!(
            "Instance {} not found",
            instance_id
        )));
    }

    find(storage, instance_id)
}

/// Issue a new API key. The previous key stops working immediately.
pub fn rotate_api_key(
    storage: &RelayStorage,
    instance_id: &Uuid,
) -> Result<RegistrationResponse, RelayError> {
    let api_key = generate_api_key();
    let updated = storage.conn()?.execute(
        "UPDATE instances SET api_key_hash = ?1 WHERE instance_id = ?2",
        rusqlite::params![hash_api_key(&api_key), instance_id.to_string()],
    )?;
    if updated == 0 {
        return Err(RelayError::NotFound(format!(
            "Instance {} not found",
            instance_id
        )));
    }

    let instance = find(storage, instance_id)?;
    tracing::info!(%instance_id, "API key rotated");
    Ok(RegistrationResponse {
        instance_id: *instance_id,
        api_key,
        tier: instance.tier,
    })
}

pub fn set_tier(
    storage: &RelayStorage,
    instance_id: &Uuid,
    tier: Tier,
) -> Result<StoredInstance, RelayError> {
    let updated = storage.conn()?.execute(
        "UPDATE instances SET tier = ?1 WHERE instance_id = ?2",
        rusqlite::params![tier.as_str(), instance_id.to_string()],
    )?;
    if updated == 0 {
        return Err(RelayError::NotFound(format!(
            "Instance {} not found",
            instance_id
        )));
    }
    tracing::info!(%instance_id, tier = tier.as_str(), "Instance tier changed");
    find(storage, instance_id)
}

/// Delete an instance, handling its scan history per `policy`.
pub fn delete_instance(
    storage: &RelayStorage,
    instance_id: &Uuid,
    policy: CascadePolicy,
) -> Result<DeleteInstanceResponse, RelayError> {
    let id = instance_id.to_string();
    let mut conn = storage.conn()?;
    let tx = conn.transaction()?;

    let (scans_deleted, scans_orphaned) = match policy {
        CascadePolicy::Cascade => (
            tx.execute("DELETE FROM scans WHERE instance_id = ?1", [&id])?,
            0,
        ),
        CascadePolicy::Orphan => (
            0,
            tx.execute(
                "UPDATE scans SET instance_id = NULL WHERE instance_id = ?1",
                [&id],
            )?,
        ),
    };

    let removed = tx.execute("DELETE FROM instances WHERE instance_id = ?1", [&id])?;
    if removed == 0 {
        return Err(RelayError::NotFound(format!(
            "Instance {} not found",
            instance_id
        )));
    }
    tx.commit()?;

    tracing::info!(
        %instance_id,
        policy = ?policy,
        scans_deleted,
        scans_orphaned,
        "Instance deleted"
    );

    Ok(DeleteInstanceResponse {
        instance_id: *instance_id,
        scans_deleted: scans_deleted as u64,
        scans_orphaned: scans_orphaned as u64,
    })
}
