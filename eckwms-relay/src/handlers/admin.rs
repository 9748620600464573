//! Administrative instance management handlers.

use super::{parse_instance_id, ApiJson};
use crate::error::RelayError;
use crate::registry;
use crate::retention;
use crate::server::AppState;
use axum::extract::{Path, State};
use axum::Json;
use eckwms_core::models::{
    DeleteInstanceResponse, InstanceInfo, PurgeRequest, PurgeResponse, RegistrationResponse,
    SetTierRequest,
};

pub async fn set_tier(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<SetTierRequest>,
) -> Result<Json<InstanceInfo>, RelayError> {
    let instance_id = parse_instance_id(&id)?;
    let instance = registry::set_tier(&state.storage, &instance_id, req.tier)?;
    Ok(Json(instance.to_info()))
}

pub async fn rotate_key(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RegistrationResponse>, RelayError> {
    let instance_id = parse_instance_id(&id)?;
    Ok(Json(registry::rotate_api_key(&state.storage, &instance_id)?))
}

pub async fn purge(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<PurgeRequest>,
) -> Result<Json<PurgeResponse>, RelayError> {
    let instance_id = parse_instance_id(&id)?;
    let deleted = retention::purge_instance_scans(&state.storage, &instance_id, req.status)?;
    Ok(Json(PurgeResponse { deleted }))
}

pub async fn delete_instance(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeleteInstanceResponse>, RelayError> {
    let instance_id = parse_instance_id(&id)?;
    let deleted = registry::delete_instance(
        &state.storage,
        &instance_id,
        state.config.instance_delete_policy,
    )?;
    state.limiter.forget(&instance_id);
    Ok(Json(deleted))
}
