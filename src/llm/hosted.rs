//! Hosted model client — OpenAI-compatible chat completions.
//!
//! One client serves both the system-keyed deployment and BYOK callers; the
//! wire protocol is identical, only the bearer token differs. Responses are
//! parsed with `serde_json::Value` navigation since compatible providers
//! differ in which optional fields they send.

use std::time::Duration;

use futures::StreamExt;
use serde::Serialize;
use serde_json::Value;
use tokio_stream::wrappers::ReceiverStream;

use super::config::LlmTimeouts;
use super::types::{
    CallOptions, CallWarning, Content, ContentPart, FinishReason, GenerateResult, LlmError, PromptMessage,
    ResponseFormat, StreamEvent, StreamHandle, TokenUsage, ToolChoice, ToolOutput,
};

const STREAM_CHANNEL_CAPACITY: usize = 32;

// =============================================================================
// CLIENT
// =============================================================================

#[derive(Clone)]
pub struct HostedClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl HostedClient {
    /// Build a client for an OpenAI-compatible endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::HttpClientBuild`] when the HTTP client cannot be
    /// constructed.
    pub fn new(api_key: String, base_url: &str, timeouts: LlmTimeouts) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeouts.request_secs))
            .connect_timeout(Duration::from_secs(timeouts.connect_secs))
            .build()
            .map_err(|e| LlmError::HttpClientBuild(e.to_string()))?;
        Ok(Self { http, api_key, base_url: base_url.trim_end_matches('/').to_string() })
    }

    async fn post_completions(&self, body: &CcRequest<'_>) -> Result<reqwest::Response, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| LlmError::ApiRequest(e.to_string()))?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let body_text = response.text().await.unwrap_or_default();
            return Err(LlmError::ApiResponse { status, body: body_text });
        }
        Ok(response)
    }

    /// One-shot completion.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError`] on request or parse failure.
    pub async fn generate(
        &self,
        model: &str,
        messages: &[PromptMessage],
        options: &CallOptions,
    ) -> Result<GenerateResult, LlmError> {
        let warnings = unsupported_warnings(options);
        let cc_messages = build_cc_messages(messages);
        let body = CcRequest::build(model, &cc_messages, options, false);
        let response = self.post_completions(&body).await?;
        let text = response.text().await.map_err(|e| LlmError::ApiRequest(e.to_string()))?;
        parse_cc_response(&text, warnings)
    }

    /// Streaming completion over SSE.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError`] only when the stream cannot be opened.
    pub async fn stream(
        &self,
        model: &str,
        messages: &[PromptMessage],
        options: &CallOptions,
    ) -> Result<StreamHandle, LlmError> {
        let warnings = unsupported_warnings(options);
        let cc_messages = build_cc_messages(messages);
        let body = CcRequest::build(model, &cc_messages, options, true);
        let response = self.post_completions(&body).await?;

        let (tx, rx) = tokio::sync::mpsc::channel::<StreamEvent>(STREAM_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            let mut parser = SseParser::new();
            let mut bytes = response.bytes_stream();
            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        let event = parser.interrupt(format!("stream read failed: {e}"));
                        if tx.send(event).await.is_err() {
                            return;
                        }
                        break;
                    }
                };
                for event in parser.feed(&chunk) {
                    if tx.send(event).await.is_err() {
                        return;
                    }
                }
            }
            for event in parser.finish() {
                if tx.send(event).await.is_err() {
                    return;
                }
            }
        });

        Ok(StreamHandle { events: Box::pin(ReceiverStream::new(rx)), warnings })
    }
}

// =============================================================================
// WIRE TYPES
// =============================================================================

#[derive(Serialize)]
struct CcRequest<'a> {
    model: &'a str,
    messages: &'a [CcMessage],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<&'a [String]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
}

impl<'a> CcRequest<'a> {
    fn build(model: &'a str, messages: &'a [CcMessage], options: &'a CallOptions, stream: bool) -> Self {
        Self {
            model,
            messages,
            stream,
            max_tokens: options.max_tokens,
            temperature: options.temperature,
            top_p: options.top_p,
            stop: if options.stop.is_empty() { None } else { Some(&options.stop) },
            seed: options.seed,
            tool_choice: match options.tool_choice {
                ToolChoice::None => None,
                ToolChoice::Auto => Some("auto"),
            },
            response_format: match &options.response_format {
                Some(ResponseFormat::Json { .. }) => Some(serde_json::json!({ "type": "json_object" })),
                Some(ResponseFormat::Text) | None => None,
            },
        }
    }
}

#[derive(Debug, PartialEq, Serialize)]
struct CcMessage {
    role: String,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

/// Flatten prompt messages to the chat-completions shape. Same rules as the
/// local adapter: empty system messages dropped, text and reasoning parts
/// concatenated, tool results split into `tool`-role messages.
fn build_cc_messages(messages: &[PromptMessage]) -> Vec<CcMessage> {
    let mut out = Vec::new();
    for message in messages {
        match &message.content {
            Content::Text(text) => {
                if message.role == "system" && text.trim().is_empty() {
                    continue;
                }
                out.push(CcMessage { role: message.role.clone(), content: text.clone(), tool_call_id: None });
            }
            Content::Parts(parts) => {
                let mut text = String::new();
                let mut tool_messages = Vec::new();
                for part in parts {
                    match part {
                        ContentPart::Text { text: t } | ContentPart::Reasoning { text: t } => text.push_str(t),
                        ContentPart::ToolResult { tool_call_id, output } => {
                            let content = match output {
                                ToolOutput::Text(text) | ToolOutput::ErrorText(text) => text.clone(),
                                ToolOutput::Json(value) => value.to_string(),
                            };
                            tool_messages.push(CcMessage {
                                role: "tool".to_string(),
                                content,
                                tool_call_id: Some(tool_call_id.clone()),
                            });
                        }
                        ContentPart::Unknown => {}
                    }
                }
                if message.role == "system" && text.trim().is_empty() && tool_messages.is_empty() {
                    continue;
                }
                if !text.is_empty() {
                    out.push(CcMessage { role: message.role.clone(), content: text, tool_call_id: None });
                }
                out.extend(tool_messages);
            }
        }
    }
    out
}

/// The hosted wire has no `top_k`; everything else passes through.
fn unsupported_warnings(options: &CallOptions) -> Vec<CallWarning> {
    let mut warnings = Vec::new();
    if options.top_k.is_some() {
        warnings.push(CallWarning {
            feature: "top_k",
            detail: "hosted backend does not accept top_k".to_string(),
        });
    }
    warnings
}

// =============================================================================
// RESPONSE PARSING
// =============================================================================

pub(crate) fn parse_cc_response(json_text: &str, warnings: Vec<CallWarning>) -> Result<GenerateResult, LlmError> {
    let root: Value = serde_json::from_str(json_text).map_err(|e| LlmError::ApiParse(e.to_string()))?;

    let choice = root
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .ok_or_else(|| LlmError::ApiParse("response has no choices".to_string()))?;

    let text = choice
        .get("message")
        .and_then(|message| message.get("content"))
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();

    let finish_reason = choice
        .get("finish_reason")
        .and_then(Value::as_str)
        .map_or(FinishReason::Other, map_finish_reason);

    let usage = parse_usage(root.get("usage"));

    Ok(GenerateResult { text, finish_reason, usage, warnings })
}

fn map_finish_reason(raw: &str) -> FinishReason {
    match raw {
        "stop" => FinishReason::Stop,
        "length" => FinishReason::Length,
        "tool_calls" | "function_call" => FinishReason::ToolCalls,
        "content_filter" => FinishReason::ContentFilter,
        _ => FinishReason::Other,
    }
}

fn parse_usage(usage: Option<&Value>) -> TokenUsage {
    let Some(usage) = usage else {
        return TokenUsage::default();
    };
    TokenUsage::from_counts(
        usage.get("prompt_tokens").and_then(Value::as_u64),
        usage.get("completion_tokens").and_then(Value::as_u64),
    )
}

// =============================================================================
// STREAM STATE MACHINE
// =============================================================================

/// Incremental SSE parser for chat-completions streams.
///
/// Mirrors the local adapter's line parser: explicit `{text_started,
/// finish_reason, usage}` state, one error event per bad payload, and a
/// guaranteed `text-end`/`finish` tail.
pub(crate) struct SseParser {
    buffer: Vec<u8>,
    text_started: bool,
    finish_reason: FinishReason,
    usage: TokenUsage,
}

impl SseParser {
    pub(crate) fn new() -> Self {
        Self {
            buffer: Vec::new(),
            text_started: false,
            finish_reason: FinishReason::Other,
            usage: TokenUsage::default(),
        }
    }

    pub(crate) fn feed(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            self.parse_line(&line[..line.len() - 1], &mut events);
        }
        events
    }

    pub(crate) fn interrupt(&mut self, message: String) -> StreamEvent {
        self.finish_reason = FinishReason::Error;
        StreamEvent::Error { message }
    }

    pub(crate) fn finish(mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            self.parse_line(&line, &mut events);
        }
        if self.text_started {
            events.push(StreamEvent::TextEnd);
        }
        events.push(StreamEvent::Finish { reason: self.finish_reason, usage: self.usage });
        events
    }

    fn parse_line(&mut self, line: &[u8], events: &mut Vec<StreamEvent>) {
        let line = String::from_utf8_lossy(line);
        let line = line.trim_end_matches('\r');
        // SSE allows comments and other fields; only data lines matter here.
        let Some(payload) = line.strip_prefix("data:") else {
            return;
        };
        let payload = payload.trim();
        if payload.is_empty() || payload == "[DONE]" {
            return;
        }

        let root: Value = match serde_json::from_str(payload) {
            Ok(value) => value,
            Err(e) => {
                self.finish_reason = FinishReason::Error;
                events.push(StreamEvent::Error { message: format!("malformed stream payload: {e}") });
                return;
            }
        };

        if let Some(error) = root.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("provider reported an error")
                .to_string();
            self.finish_reason = FinishReason::Error;
            events.push(StreamEvent::Error { message });
            return;
        }

        if let Some(usage) = root.get("usage") {
            if !usage.is_null() {
                self.usage = parse_usage(Some(usage));
            }
        }

        let Some(choice) = root.get("choices").and_then(Value::as_array).and_then(|c| c.first()) else {
            return;
        };

        if let Some(text) = choice
            .get("delta")
            .and_then(|delta| delta.get("content"))
            .and_then(Value::as_str)
        {
            if !text.is_empty() {
                if !self.text_started {
                    self.text_started = true;
                    events.push(StreamEvent::TextStart);
                }
                events.push(StreamEvent::TextDelta { text: text.to_string() });
            }
        }

        if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
            self.finish_reason = map_finish_reason(reason);
        }
    }
}

#[cfg(test)]
#[path = "hosted_test.rs"]
mod tests;
