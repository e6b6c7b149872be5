//! Model call types — messages, options, stream events, and errors.
//!
//! Shared by every backend so the pipeline, the resolver, and the tests all
//! speak one vocabulary. Backends differ only in how they produce these
//! values from their wire formats.

use std::pin::Pin;

use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::envelope::ErrorCode;

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("config parse failed: {0}")]
    ConfigParse(String),
    #[error("API request failed: {0}")]
    ApiRequest(String),
    #[error("API response error: status {status}")]
    ApiResponse { status: u16, body: String },
    #[error("API response parse failed: {0}")]
    ApiParse(String),
    #[error("HTTP client build failed: {0}")]
    HttpClientBuild(String),
}

impl ErrorCode for LlmError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::ApiResponse { status: 401 | 403, .. } => "UNAUTHORIZED",
            Self::ApiRequest(_) | Self::ApiResponse { status: 429 | 500..=599, .. } => "SERVICE_UNAVAILABLE",
            Self::ApiResponse { .. } | Self::ApiParse(_) => "PROVIDER_ERROR",
            Self::ConfigParse(_) | Self::HttpClientBuild(_) => "INTERNAL_ERROR",
        }
    }

    fn suggested_action(&self) -> Option<&'static str> {
        match self {
            Self::ApiResponse { status: 401 | 403, .. } => Some("check_api_key"),
            Self::ApiRequest(_) | Self::ApiResponse { status: 429 | 500..=599, .. } => Some("retry_after_delay"),
            _ => None,
        }
    }
}

// =============================================================================
// MESSAGES
// =============================================================================

/// A structured part inside a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ContentPart {
    Text { text: String },
    /// Model reasoning carried in history; replayed as plain text.
    Reasoning { text: String },
    /// Output of an earlier tool call, fed back to the model.
    ToolResult {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        output: ToolOutput,
    },
    /// Anything a newer client sends that this build does not know.
    #[serde(other)]
    Unknown,
}

/// Payload kinds a tool result can carry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "kebab-case")]
pub enum ToolOutput {
    Text(String),
    ErrorText(String),
    Json(serde_json::Value),
}

/// Message content, either plain text or structured parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Parts(Vec<ContentPart>),
}

/// One prompt message. Roles are plain strings as the wire formats use them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: String,
    pub content: Content,
}

impl PromptMessage {
    #[must_use]
    pub fn text(role: &str, text: impl Into<String>) -> Self {
        Self { role: role.to_string(), content: Content::Text(text.into()) }
    }
}

// =============================================================================
// CALL OPTIONS
// =============================================================================

/// Whether the model may decide to call tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ToolChoice {
    #[default]
    None,
    Auto,
}

impl ToolChoice {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Auto => "auto",
        }
    }
}

/// Requested shape of the model output.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseFormat {
    Text,
    Json { schema: Option<serde_json::Value> },
}

/// Per-call generation settings. Backends pass through what they support and
/// attach a [`CallWarning`] for what they cannot.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
    pub stop: Vec<String>,
    pub seed: Option<u64>,
    pub tool_choice: ToolChoice,
    pub tools: Vec<serde_json::Value>,
    pub response_format: Option<ResponseFormat>,
}

/// A capability the chosen backend could not honor. The call still runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallWarning {
    pub feature: &'static str,
    pub detail: String,
}

// =============================================================================
// RESULTS
// =============================================================================

/// Why the model stopped producing output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    Error,
    Other,
}

impl FinishReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stop => "stop",
            Self::Length => "length",
            Self::ToolCalls => "tool-calls",
            Self::ContentFilter => "content-filter",
            Self::Error => "error",
            Self::Other => "other",
        }
    }
}

/// Token accounting as reported by the backend. Totals are only present when
/// both sides were reported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
}

impl TokenUsage {
    #[must_use]
    pub fn from_counts(input: Option<u64>, output: Option<u64>) -> Self {
        let total = match (input, output) {
            (Some(i), Some(o)) => Some(i + o),
            _ => None,
        };
        Self { input_tokens: input, output_tokens: output, total_tokens: total }
    }
}

/// Result of a non-streaming call.
#[derive(Debug, Clone)]
pub struct GenerateResult {
    pub text: String,
    pub finish_reason: FinishReason,
    pub usage: TokenUsage,
    pub warnings: Vec<CallWarning>,
}

// =============================================================================
// STREAMING
// =============================================================================

/// Normalized streaming events, identical across backends.
///
/// A well-formed stream is: optional `TextStart`, zero or more `TextDelta`,
/// `TextEnd` iff text started, then exactly one `Finish`. `Error` may appear
/// anywhere and does not end the stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    TextStart,
    TextDelta { text: String },
    TextEnd,
    Error { message: String },
    Finish { reason: FinishReason, usage: TokenUsage },
}

pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// A started streaming call: warnings are known up front, events arrive
/// as the backend produces them.
pub struct StreamHandle {
    pub events: EventStream,
    pub warnings: Vec<CallWarning>,
}

// =============================================================================
// TRAIT
// =============================================================================

/// Backend-neutral chat interface. Async trait so the pipeline can hold a
/// trait object and tests can substitute scripted models.
#[async_trait::async_trait]
pub trait ChatModel: Send + Sync {
    /// One-shot completion.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError`] when the request cannot be made or the response
    /// cannot be understood.
    async fn generate(&self, messages: &[PromptMessage], options: &CallOptions) -> Result<GenerateResult, LlmError>;

    /// Streaming completion. Failures after the stream opens surface as
    /// [`StreamEvent::Error`] items rather than an `Err`.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError`] when the stream cannot be opened.
    async fn stream(&self, messages: &[PromptMessage], options: &CallOptions) -> Result<StreamHandle, LlmError>;
}

#[cfg(test)]
#[path = "types_test.rs"]
mod tests;
