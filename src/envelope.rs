//! Error envelope — the one JSON error shape every route returns.
//!
//! DESIGN
//! ======
//! Failures surface to clients as
//! `{ "success": false, "error": { code, message, details?, suggestedAction? } }`.
//! Codes are stable and grepable; messages are written for humans and never
//! carry internals. Anything sensitive stays in the server log, keyed by
//! request id.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use serde_json::Value;

// =============================================================================
// ERROR CODES
// =============================================================================

/// Grepable error code and optional recovery hint for typed errors.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    fn suggested_action(&self) -> Option<&'static str> {
        None
    }
}

// =============================================================================
// ENVELOPE
// =============================================================================

/// The `error` object inside the envelope.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(rename = "suggestedAction", skip_serializing_if = "Option::is_none")]
    pub suggested_action: Option<String>,
}

/// A complete error response: HTTP status plus envelope body.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorBody,
}

impl ApiError {
    #[must_use]
    pub fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody { code: code.to_string(), message: message.into(), details: None, suggested_action: None },
        }
    }

    /// Build an envelope from a typed error. Code and hint come from the
    /// [`ErrorCode`] impl, the message from `Display`.
    #[must_use]
    pub fn from_error(status: StatusCode, err: &(impl ErrorCode + ?Sized)) -> Self {
        Self {
            status,
            body: ErrorBody {
                code: err.error_code().to_string(),
                message: err.to_string(),
                details: None,
                suggested_action: err.suggested_action().map(str::to_owned),
            },
        }
    }

    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.body.details = Some(details);
        self
    }

    #[must_use]
    pub fn with_suggested_action(mut self, action: &str) -> Self {
        self.body.suggested_action = Some(action.to_string());
        self
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let payload = serde_json::json!({ "success": false, "error": self.body });
        (self.status, Json(payload)).into_response()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("window exceeded")]
    struct Limited;

    impl ErrorCode for Limited {
        fn error_code(&self) -> &'static str {
            "RATE_LIMITED"
        }

        fn suggested_action(&self) -> Option<&'static str> {
            Some("retry_after_delay")
        }
    }

    #[test]
    fn envelope_shape() {
        let err = ApiError::new(StatusCode::BAD_REQUEST, "INVALID_INPUT", "message must not be empty");
        let json = serde_json::json!({ "success": false, "error": err.body });
        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["code"], "INVALID_INPUT");
        assert_eq!(json["error"]["message"], "message must not be empty");
        assert!(json["error"].get("details").is_none());
        assert!(json["error"].get("suggestedAction").is_none());
    }

    #[test]
    fn from_typed_error_carries_code_and_hint() {
        let err = ApiError::from_error(StatusCode::TOO_MANY_REQUESTS, &Limited);
        assert_eq!(err.status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(err.body.code, "RATE_LIMITED");
        assert_eq!(err.body.message, "window exceeded");
        assert_eq!(err.body.suggested_action.as_deref(), Some("retry_after_delay"));
    }

    #[test]
    fn details_serialize_under_camel_case_key() {
        let err = ApiError::new(StatusCode::PAYLOAD_TOO_LARGE, "PAYLOAD_TOO_LARGE", "too big")
            .with_details(serde_json::json!({ "maxBytes": 65536 }))
            .with_suggested_action("shorten_message");
        let json = serde_json::to_value(err.body).unwrap();
        assert_eq!(json["details"]["maxBytes"], 65536);
        assert_eq!(json["suggestedAction"], "shorten_message");
    }
}
