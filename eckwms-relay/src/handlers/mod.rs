//! HTTP handlers.

pub mod admin;
pub mod instances;
pub mod scans;


use crate::error::RelayError;
use crate::storage::models::StoredInstance;
use axum::extract::FromRequest;
use axum::http::Extensions;
use uuid::Uuid;

/// JSON body extractor that reports malformed bodies as validation errors.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(RelayError))]
pub struct ApiJson<T>(pub T);

/// The instance resolved by the auth middleware.
fn current_instance(extensions: &Extensions) -> Result<&StoredInstance, RelayError> {
    extensions
        .get::<StoredInstance>()
        .ok_or(RelayError::MissingCredential)
}

fn parse_instance_id(raw: &str) -> Result<Uuid, RelayError> {
    Uuid::parse_str(raw)
        .map_err(|_| RelayError::Validation(format!("Invalid instance ID: {}", raw)))
}
