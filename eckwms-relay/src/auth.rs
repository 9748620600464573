//! API key auth middleware for the relay server.

use crate::error::RelayError;
use crate::registry;
use crate::server::AppState;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, Request};
use axum::middleware::Next;
use axum::response::Response;
use sha2::{Digest, Sha256};

pub const API_KEY_HEADER: &str = "x-api-key";

/// Read the credential from `X-Api-Key`, falling back to `Authorization: Bearer`.
pub fn credential_from_headers(headers: &HeaderMap) -> Option<&str> {
    if let Some(key) = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok()) {
        return Some(key);
    }
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// Auth middleware: resolves the API key to an instance and stores it in
/// the request extensions.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, RelayError> {
    let instance = registry::authenticate(&state.storage, credential_from_headers(request.headers()))?;

    if !state.limiter.check(&instance.instance_id) {
        tracing::warn!(instance_id = %instance.instance_id, "Rate limit exceeded");
        return Err(RelayError::RateLimited);
    }

    request.extensions_mut().insert(instance);
    Ok(next.run(request).await)
}

/// Admin middleware: requires the configured admin token as bearer credential.
pub async fn admin_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, RelayError> {
    let Some(expected) = state.config.admin_token.as_deref() else {
        return Err(RelayError::InvalidCredential);
    };
    let presented =
        credential_from_headers(request.headers()).ok_or(RelayError::MissingCredential)?;

    if !tokens_match(presented, expected) {
        return Err(RelayError::InvalidCredential);
    }
    Ok(next.run(request).await)
}

/// Compare digests so the comparison time does not depend on the token prefix.
pub fn tokens_match(presented: &str, expected: &str) -> bool {
    Sha256::digest(presented.as_bytes()) == Sha256::digest(expected.as_bytes())
}
