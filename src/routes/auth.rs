//! Request identity — principal and request id headers.
//!
//! An authenticating gateway sits in front of this service and forwards a
//! stable principal id per caller. This service trusts that header; a
//! request without one is rejected before any work happens.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use uuid::Uuid;

use crate::envelope::ApiError;

pub const HEADER_PRINCIPAL_ID: &str = "x-principal-id";
pub const HEADER_REQUEST_ID: &str = "x-request-id";

/// Caller identity attached to every chat request.
/// Use as a handler parameter to require an authenticated principal.
#[derive(Debug)]
pub struct RequestContext {
    pub request_id: Uuid,
    pub principal_id: String,
}

impl RequestContext {
    pub(crate) fn from_headers(headers: &HeaderMap) -> Result<Self, ApiError> {
        let principal_id = headers
            .get(HEADER_PRINCIPAL_ID)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(ToString::to_string)
            .ok_or_else(|| {
                ApiError::new(
                    StatusCode::UNAUTHORIZED,
                    "UNAUTHORIZED",
                    "missing authenticated principal",
                )
            })?;

        // A caller-supplied request id ties gateway and service logs
        // together; anything unusable gets a fresh one.
        let request_id = headers
            .get(HEADER_REQUEST_ID)
            .and_then(|value| value.to_str().ok())
            .and_then(|raw| Uuid::parse_str(raw.trim()).ok())
            .unwrap_or_else(Uuid::new_v4);

        Ok(Self { request_id, principal_id })
    }
}

impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Self::from_headers(&parts.headers)
    }
}

#[cfg(test)]
#[path = "auth_test.rs"]
mod tests;
