//! Request normalization — raw chat payloads into one validated shape.
//!
//! DESIGN
//! ======
//! The web client sends either a flat `message` string or a structured
//! `messages` array, depending on which UI path fired. Both reduce to a
//! single [`ChatRequest`] here, before anything downstream runs. Pure
//! functions, no I/O, so the rules are trivially testable.

use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::envelope::ErrorCode;
use crate::llm::catalog::MODEL_ID_DEFAULT;

/// Longest user message accepted, in characters.
pub const MESSAGE_MAX_CHARS: usize = 10_000;

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("request body is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("message must not be empty")]
    EmptyMessage,
    #[error("message exceeds {MESSAGE_MAX_CHARS} characters")]
    MessageTooLong { chars: usize },
    #[error("sessionId is not a valid UUID")]
    BadSessionId,
}

impl ErrorCode for NormalizeError {
    fn error_code(&self) -> &'static str {
        "INVALID_INPUT"
    }

    fn suggested_action(&self) -> Option<&'static str> {
        match self {
            Self::MessageTooLong { .. } => Some("shorten_message"),
            _ => Some("check_request"),
        }
    }
}

// =============================================================================
// WIRE SHAPES
// =============================================================================

/// Raw body of `POST /api/chat`. Every field is optional at the wire level;
/// validation happens in [`normalize_raw`].
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawChatRequest {
    pub session_id: Option<String>,
    pub message: Option<String>,
    pub messages: Option<Vec<RawMessage>>,
    pub selected_model: Option<String>,
    pub web_search_enabled: Option<bool>,
    pub byok_key: Option<String>,
}

/// One entry of a structured message list. `content` may be a plain string
/// or an array of typed parts; some client versions send `parts` instead.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct RawMessage {
    pub role: Option<String>,
    pub content: Option<Value>,
    pub parts: Option<Vec<Value>>,
}

// =============================================================================
// NORMALIZED SHAPE
// =============================================================================

/// A validated chat request, produced exactly once per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRequest {
    pub session_id: Option<Uuid>,
    /// Trimmed, non-empty, at most [`MESSAGE_MAX_CHARS`] characters.
    pub message: String,
    /// Public model id; unknown values are resolved downstream, never here.
    pub model: String,
    pub web_search: bool,
    pub byok_key: Option<String>,
}

/// Parse a raw JSON body and normalize it.
///
/// # Errors
///
/// Returns [`NormalizeError`] for malformed JSON or invalid fields.
pub fn normalize(body: &[u8]) -> Result<ChatRequest, NormalizeError> {
    let raw: RawChatRequest =
        serde_json::from_slice(body).map_err(|e| NormalizeError::InvalidJson(e.to_string()))?;
    normalize_raw(raw)
}

/// Normalize an already-parsed raw request. Idempotent: feeding a normalized
/// request back through produces the same value.
///
/// # Errors
///
/// Returns [`NormalizeError`] when no usable message text is found, the text
/// is too long, or the session id is not a well-formed UUID.
pub fn normalize_raw(raw: RawChatRequest) -> Result<ChatRequest, NormalizeError> {
    let session_id = match raw.session_id.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw_id) => Some(raw_id.parse::<Uuid>().map_err(|_| NormalizeError::BadSessionId)?),
    };

    // Flat `message` wins when it has content; otherwise the first
    // user-role entry of the structured list.
    let text = raw
        .message
        .filter(|message| !message.trim().is_empty())
        .or_else(|| first_user_text(raw.messages.as_deref().unwrap_or_default()));

    let message = text.map(|t| t.trim().to_string()).unwrap_or_default();
    if message.is_empty() {
        return Err(NormalizeError::EmptyMessage);
    }
    let chars = message.chars().count();
    if chars > MESSAGE_MAX_CHARS {
        return Err(NormalizeError::MessageTooLong { chars });
    }

    let model = raw
        .selected_model
        .map(|model| model.trim().to_string())
        .filter(|model| !model.is_empty())
        .unwrap_or_else(|| MODEL_ID_DEFAULT.to_string());

    let byok_key = raw.byok_key.map(|key| key.trim().to_string()).filter(|key| !key.is_empty());

    Ok(ChatRequest {
        session_id,
        message,
        model,
        web_search: raw.web_search_enabled.unwrap_or(false),
        byok_key,
    })
}

/// Text of the first `user`-role entry: plain string content, or the
/// concatenation of its `text` parts.
fn first_user_text(messages: &[RawMessage]) -> Option<String> {
    let entry = messages.iter().find(|m| m.role.as_deref() == Some("user"))?;

    if let Some(Value::String(text)) = &entry.content {
        return Some(text.clone());
    }

    let parts: &[Value] = match (&entry.content, &entry.parts) {
        (Some(Value::Array(parts)), _) => parts,
        (_, Some(parts)) => parts,
        _ => return None,
    };

    let mut text = String::new();
    for part in parts {
        if part.get("type").and_then(Value::as_str) == Some("text") {
            if let Some(t) = part.get("text").and_then(Value::as_str) {
                text.push_str(t);
            }
        }
    }
    Some(text)
}

#[cfg(test)]
#[path = "normalize_test.rs"]
mod tests;
