//! Scan submit, pull and confirm handlers.

use super::{current_instance, ApiJson};
use crate::delivery::{self, PullOptions};
use crate::error::RelayError;
use crate::gateway;
use crate::retention;
use crate::server::AppState;
use axum::extract::State;
use axum::http::{Extensions, StatusCode};
use axum::Json;
use chrono::Utc;
use eckwms_core::models::{
    ConfirmRequest, ConfirmResponse, PullRequest, PullResponse, StatusResponse,
    SubmitScanRequest, SubmitScanResponse,
};
use eckwms_core::Tier;

pub async fn submit(
    State(state): State<AppState>,
    extensions: Extensions,
    ApiJson(req): ApiJson<SubmitScanRequest>,
) -> Result<(StatusCode, Json<SubmitScanResponse>), RelayError> {
    let instance = current_instance(&extensions)?;
    let receipt = gateway::submit_scan(
        &state.storage,
        instance,
        &req,
        state.config.max_payload_bytes,
        Utc::now(),
    )?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

pub async fn pull(
    State(state): State<AppState>,
    extensions: Extensions,
    ApiJson(req): ApiJson<PullRequest>,
) -> Result<Json<PullResponse>, RelayError> {
    let instance = current_instance(&extensions)?;
    let options = PullOptions {
        limit: req.limit,
        min_priority: req.min_priority,
    };

    let scans = delivery::pull(
        &state.storage,
        instance,
        &options,
        state.config.redelivery_after(),
        Utc::now(),
    )?;

    let scans: Vec<_> = scans.iter().map(|s| s.to_pulled()).collect();
    Ok(Json(PullResponse {
        count: scans.len(),
        scans,
    }))
}

pub async fn confirm(
    State(state): State<AppState>,
    extensions: Extensions,
    ApiJson(req): ApiJson<ConfirmRequest>,
) -> Result<Json<ConfirmResponse>, RelayError> {
    let instance = current_instance(&extensions)?;
    let confirmed_count = delivery::confirm(&state.storage, instance, &req.scan_ids, Utc::now())?;

    // The scheduled sweep is authoritative; this only frees space sooner.
    if confirmed_count > 0 && instance.tier == Tier::Free {
        let storage = state.storage.clone();
        let instance = instance.clone();
        tokio::spawn(async move {
            if let Err(e) = retention::purge_confirmed_for_instance(&storage, &instance) {
                tracing::warn!(
                    instance_id = %instance.instance_id,
                    "Post-confirm purge failed: {}",
                    e
                );
            }
        });
    }

    Ok(Json(ConfirmResponse { confirmed_count }))
}

pub async fn status(
    State(state): State<AppState>,
    extensions: Extensions,
) -> Result<Json<StatusResponse>, RelayError> {
    let instance = current_instance(&extensions)?;
    Ok(Json(delivery::status_summary(&state.storage, instance)?))
}
