//! Local model adapter — line-delimited JSON chat protocol.
//!
//! DESIGN
//! ======
//! Talks to a local runner over `POST {base}/api/chat` (NDJSON body stream)
//! and `GET {base}/api/tags` (installed model list). Exposes the same
//! generate/stream contract as the hosted client so the resolver can swap
//! backends without the pipeline noticing.
//!
//! Streaming is parsed line by line with explicit state: each NDJSON line is
//! independent, so one malformed line produces one error event and parsing
//! continues with the next line. The stream always ends with `text-end`
//! (when any text was started) followed by exactly one `finish`.
//!
//! ERROR HANDLING
//! ==============
//! Non-2xx responses become `LlmError::ApiResponse` with the body captured
//! best-effort. Transport failures after the stream opens surface as error
//! events, never a panic or a hung stream.

use std::time::Duration;

use futures::StreamExt;
use serde::Serialize;
use serde_json::Value;
use tokio_stream::wrappers::ReceiverStream;

use super::config::LocalConfig;
use super::types::{
    CallOptions, CallWarning, Content, ContentPart, FinishReason, GenerateResult, LlmError, PromptMessage,
    ResponseFormat, StreamEvent, StreamHandle, TokenUsage, ToolChoice, ToolOutput,
};

const HEALTH_TIMEOUT_SECS: u64 = 5;
const STREAM_CHANNEL_CAPACITY: usize = 32;

// =============================================================================
// CLIENT
// =============================================================================

#[derive(Clone, Debug)]
pub struct LocalClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
}

impl LocalClient {
    /// Build a client for the configured runner.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::ConfigParse`] when the base URL is malformed and
    /// [`LlmError::HttpClientBuild`] when the HTTP client cannot be built.
    pub fn new(config: LocalConfig) -> Result<Self, LlmError> {
        reqwest::Url::parse(&config.base_url)
            .map_err(|e| LlmError::ConfigParse(format!("invalid local base URL '{}': {e}", config.base_url)))?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeouts.request_secs))
            .connect_timeout(Duration::from_secs(config.timeouts.connect_secs))
            .build()
            .map_err(|e| LlmError::HttpClientBuild(e.to_string()))?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model,
        })
    }

    async fn post_chat(&self, body: &NdRequest<'_>) -> Result<reqwest::Response, LlmError> {
        let url = format!("{}/api/chat", self.base_url);
        let response = self
            .http
            .post(url)
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

    /// One-shot completion against the runner.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError`] on request or parse failure.
    pub async fn generate(
        &self,
        messages: &[PromptMessage],
        options: &CallOptions,
    ) -> Result<GenerateResult, LlmError> {
        let warnings = unsupported_warnings(options);
        let nd_messages = build_messages(messages);
        let body = NdRequest {
            model: &self.model,
            messages: &nd_messages,
            options: NdOptions::from(options),
            stream: false,
        };
        let response = self.post_chat(&body).await?;
        let text = response.text().await.map_err(|e| LlmError::ApiRequest(e.to_string()))?;
        parse_generate_response(&text, warnings)
    }

    /// Streaming completion. The returned events follow the normalized
    /// sequence documented on [`StreamEvent`].
    ///
    /// # Errors
    ///
    /// Returns [`LlmError`] only when the stream cannot be opened.
    pub async fn stream(
        &self,
        messages: &[PromptMessage],
        options: &CallOptions,
    ) -> Result<StreamHandle, LlmError> {
        let warnings = unsupported_warnings(options);
        let nd_messages = build_messages(messages);
        let body = NdRequest {
            model: &self.model,
            messages: &nd_messages,
            options: NdOptions::from(options),
            stream: true,
        };
        let response = self.post_chat(&body).await?;

        let (tx, rx) = tokio::sync::mpsc::channel::<StreamEvent>(STREAM_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            let mut parser = LineParser::new();
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
                        // Receiver gone: drop the response so the connection
                        // is released upstream.
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

    /// Probe the runner: reachability plus presence of the configured model.
    /// Hard 5 second bound on the whole probe.
    pub async fn health_check(&self) -> LocalHealth {
        match tokio::time::timeout(Duration::from_secs(HEALTH_TIMEOUT_SECS), self.probe_tags()).await {
            Ok(health) => health,
            Err(_) => LocalHealth::Timeout,
        }
    }

    async fn probe_tags(&self) -> LocalHealth {
        let url = format!("{}/api/tags", self.base_url);
        let response = match self.http.get(url).send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => return LocalHealth::Timeout,
            Err(e) => return LocalHealth::Unreachable { message: e.to_string() },
        };

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            return LocalHealth::HttpError { status };
        }

        let root: Value = match response.json().await {
            Ok(root) => root,
            Err(e) => return LocalHealth::Unreachable { message: e.to_string() },
        };

        let available: Vec<String> = root
            .get("models")
            .and_then(Value::as_array)
            .map(|models| {
                models
                    .iter()
                    .filter_map(|model| model.get("name").and_then(Value::as_str))
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default();

        if available.iter().any(|name| model_matches(name, &self.model)) {
            LocalHealth::Ready { available }
        } else {
            LocalHealth::ModelMissing { model: self.model.clone(), available }
        }
    }
}

/// Health probe outcome for the local backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalHealth {
    Ready { available: Vec<String> },
    ModelMissing { model: String, available: Vec<String> },
    HttpError { status: u16 },
    Timeout,
    Unreachable { message: String },
}

impl LocalHealth {
    /// Stable status string for the health endpoint.
    #[must_use]
    pub fn status(&self) -> &'static str {
        match self {
            Self::Ready { .. } => "ok",
            Self::ModelMissing { .. } => "model_missing",
            Self::HttpError { .. } => "http_error",
            Self::Timeout => "timeout",
            Self::Unreachable { .. } => "network_error",
        }
    }
}

/// Runner model names carry tags (`llama3.2:latest`); match with and without.
fn model_matches(available: &str, wanted: &str) -> bool {
    available == wanted || available.split(':').next() == Some(wanted)
}

// =============================================================================
// WIRE TYPES
// =============================================================================

#[derive(Serialize)]
struct NdRequest<'a> {
    model: &'a str,
    messages: &'a [NdMessage],
    options: NdOptions<'a>,
    stream: bool,
}

#[derive(Debug, PartialEq, Serialize)]
struct NdMessage {
    role: String,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Serialize)]
struct NdOptions<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<&'a [String]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u64>,
}

impl<'a> From<&'a CallOptions> for NdOptions<'a> {
    fn from(options: &'a CallOptions) -> Self {
        Self {
            num_predict: options.max_tokens,
            temperature: options.temperature,
            top_p: options.top_p,
            top_k: options.top_k,
            stop: if options.stop.is_empty() { None } else { Some(&options.stop) },
            seed: options.seed,
        }
    }
}

/// Flatten prompt messages into the runner's `{role, content}` shape.
///
/// Empty system messages are dropped. Text and reasoning parts concatenate;
/// tool results become separate `tool`-role messages carrying their call id.
fn build_messages(messages: &[PromptMessage]) -> Vec<NdMessage> {
    let mut out = Vec::new();
    for message in messages {
        match &message.content {
            Content::Text(text) => {
                if message.role == "system" && text.trim().is_empty() {
                    continue;
                }
                out.push(NdMessage { role: message.role.clone(), content: text.clone(), tool_call_id: None });
            }
            Content::Parts(parts) => {
                let mut text = String::new();
                let mut tool_messages = Vec::new();
                for part in parts {
                    match part {
                        ContentPart::Text { text: t } | ContentPart::Reasoning { text: t } => text.push_str(t),
                        ContentPart::ToolResult { tool_call_id, output } => {
                            tool_messages.push(NdMessage {
                                role: "tool".to_string(),
                                content: serialize_tool_output(output),
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
                    out.push(NdMessage { role: message.role.clone(), content: text, tool_call_id: None });
                }
                out.extend(tool_messages);
            }
        }
    }
    out
}

fn serialize_tool_output(output: &ToolOutput) -> String {
    match output {
        ToolOutput::Text(text) | ToolOutput::ErrorText(text) => text.clone(),
        ToolOutput::Json(value) => value.to_string(),
    }
}

/// Capabilities the runner does not have; the call proceeds without them.
fn unsupported_warnings(options: &CallOptions) -> Vec<CallWarning> {
    let mut warnings = Vec::new();
    if !options.tools.is_empty() {
        warnings.push(CallWarning {
            feature: "tools",
            detail: format!("local backend ignores {} tool definition(s)", options.tools.len()),
        });
    }
    if options.tool_choice != ToolChoice::None {
        warnings.push(CallWarning {
            feature: "tool_choice",
            detail: format!("tool choice '{}' is not supported locally", options.tool_choice.as_str()),
        });
    }
    if matches!(options.response_format, Some(ResponseFormat::Json { .. })) {
        warnings.push(CallWarning {
            feature: "response_format",
            detail: "structured output is not supported locally".to_string(),
        });
    }
    warnings
}

// =============================================================================
// RESPONSE PARSING
// =============================================================================

pub(crate) fn parse_generate_response(
    json_text: &str,
    warnings: Vec<CallWarning>,
) -> Result<GenerateResult, LlmError> {
    let root: Value = serde_json::from_str(json_text).map_err(|e| LlmError::ApiParse(e.to_string()))?;

    let text = root
        .get("message")
        .and_then(|message| message.get("content"))
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();

    let finish_reason = root
        .get("done_reason")
        .and_then(Value::as_str)
        .map_or(FinishReason::Stop, map_done_reason);

    let usage = TokenUsage::from_counts(
        root.get("prompt_eval_count").and_then(Value::as_u64),
        root.get("eval_count").and_then(Value::as_u64),
    );

    Ok(GenerateResult { text, finish_reason, usage, warnings })
}

fn map_done_reason(raw: &str) -> FinishReason {
    match raw {
        "stop" => FinishReason::Stop,
        "length" => FinishReason::Length,
        "tool_call" | "tool_calls" => FinishReason::ToolCalls,
        "content_filter" => FinishReason::ContentFilter,
        _ => FinishReason::Other,
    }
}

// =============================================================================
// STREAM STATE MACHINE
// =============================================================================

/// Incremental NDJSON stream parser.
///
/// State is explicit: whether text has started, the last known finish
/// reason, and the usage from the terminal line. `feed` returns the events
/// each chunk completes; `finish` flushes a trailing unterminated line and
/// closes the stream.
pub(crate) struct LineParser {
    buffer: Vec<u8>,
    text_started: bool,
    finish_reason: FinishReason,
    usage: TokenUsage,
}

impl LineParser {
    pub(crate) fn new() -> Self {
        Self {
            buffer: Vec::new(),
            text_started: false,
            finish_reason: FinishReason::Other,
            usage: TokenUsage::default(),
        }
    }

    /// Consume one network chunk. Lines may span chunk boundaries.
    pub(crate) fn feed(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            self.parse_line(&line[..line.len() - 1], &mut events);
        }
        events
    }

    /// Record a transport failure. The caller should stop feeding and call
    /// [`LineParser::finish`].
    pub(crate) fn interrupt(&mut self, message: String) -> StreamEvent {
        self.finish_reason = FinishReason::Error;
        StreamEvent::Error { message }
    }

    /// Flush any trailing line, then close with `text-end` (iff text
    /// started) and exactly one `finish`.
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
        if line.iter().all(u8::is_ascii_whitespace) {
            return;
        }
        let root: Value = match serde_json::from_slice(line) {
            Ok(value) => value,
            Err(e) => {
                // One error event per malformed line; later lines still parse.
                self.finish_reason = FinishReason::Error;
                events.push(StreamEvent::Error { message: format!("malformed stream line: {e}") });
                return;
            }
        };

        if let Some(message) = root.get("error").and_then(Value::as_str) {
            self.finish_reason = FinishReason::Error;
            events.push(StreamEvent::Error { message: message.to_string() });
            return;
        }

        let content = root.get("message").and_then(|m| m.get("content")).and_then(Value::as_str);
        let done = root.get("done").and_then(Value::as_bool);

        if content.is_none() && done.is_none() {
            self.finish_reason = FinishReason::Error;
            events.push(StreamEvent::Error { message: "unrecognized stream payload".to_string() });
            return;
        }

        if let Some(text) = content {
            if !text.is_empty() {
                if !self.text_started {
                    self.text_started = true;
                    events.push(StreamEvent::TextStart);
                }
                events.push(StreamEvent::TextDelta { text: text.to_string() });
            }
        }

        if done == Some(true) {
            self.finish_reason = root
                .get("done_reason")
                .and_then(Value::as_str)
                .map_or(FinishReason::Stop, map_done_reason);
            self.usage = TokenUsage::from_counts(
                root.get("prompt_eval_count").and_then(Value::as_u64),
                root.get("eval_count").and_then(Value::as_u64),
            );
        }
    }
}

#[cfg(test)]
#[path = "local_test.rs"]
mod tests;
