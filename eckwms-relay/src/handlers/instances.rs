//! Instance registration and heartbeat handlers.

use super::{current_instance, ApiJson};
use crate::auth::{credential_from_headers, tokens_match};
use crate::error::RelayError;
use crate::registry;
use crate::server::AppState;
use axum::extract::State;
use axum::http::{Extensions, HeaderMap, StatusCode};
use axum::Json;
use chrono::Utc;
use eckwms_core::models::{InstanceInfo, RegisterInstanceRequest, RegistrationResponse};
use eckwms_core::{Reachability, Tier};

pub const REGISTRATION_TOKEN_HEADER: &str = "x-registration-token";

/// Register a new instance.
///
/// A requested tier is only honoured when the admin token is presented as
/// the bearer credential. Everyone else starts on the free tier.
pub async fn register(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(mut req): ApiJson<RegisterInstanceRequest>,
) -> Result<(StatusCode, Json<RegistrationResponse>), RelayError> {
    if let Some(expected) = state.config.registration_token.as_deref() {
        let presented = headers
            .get(REGISTRATION_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or(RelayError::MissingCredential)?;
        if !tokens_match(presented, expected) {
            return Err(RelayError::InvalidCredential);
        }
    }

    if req.tier.is_some_and(|tier| tier != Tier::Free) && !is_admin(&state, &headers) {
        tracing::warn!(name = %req.name, "Ignoring tier requested without admin token");
        req.tier = None;
    }

    let registration = registry::register(&state.storage, &req, Utc::now())?;
    Ok((StatusCode::CREATED, Json(registration)))
}

fn is_admin(state: &AppState, headers: &HeaderMap) -> bool {
    match (
        state.config.admin_token.as_deref(),
        credential_from_headers(headers),
    ) {
        (Some(expected), Some(presented)) => tokens_match(presented, expected),
        _ => false,
    }
}

pub async fn heartbeat(
    State(state): State<AppState>,
    extensions: Extensions,
    ApiJson(reachability): ApiJson<Reachability>,
) -> Result<Json<InstanceInfo>, RelayError> {
    let instance = current_instance(&extensions)?;
    let updated = registry::heartbeat(
        &state.storage,
        &instance.instance_id,
        &reachability,
        Utc::now(),
    )?;
    Ok(Json(updated.to_info()))
}

pub async fn me(extensions: Extensions) -> Result<Json<InstanceInfo>, RelayError> {
    let instance = current_instance(&extensions)?;
    Ok(Json(instance.to_info()))
}
