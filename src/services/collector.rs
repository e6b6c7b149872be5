//! Reply collection — rebuild the assistant's reply from the observer branch.
//!
//! DESIGN
//! ======
//! The collector consumes the observer side of the split stream, extracts
//! the text out of each SSE payload it recognizes, and accumulates it up to
//! a character cap. When the branch ends it writes exactly one assistant
//! row, or skips the write when there is no owned session or nothing was
//! collected. Store failures are logged and swallowed; persistence must
//! never disturb the client stream.

use std::sync::Arc;

use futures::StreamExt;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::services::split::LineStream;
use crate::store::{MessageStore, NewAssistantMessage};

/// Accumulates reply text from observed SSE lines.
pub struct ReplyCollector {
    session_id: Option<Uuid>,
    model_id: String,
    cap_chars: usize,
    buffer: String,
    chars: usize,
    truncated: bool,
    finalized: bool,
}

impl ReplyCollector {
    pub fn new(session_id: Option<Uuid>, model_id: impl Into<String>, cap_chars: usize) -> Self {
        Self {
            session_id,
            model_id: model_id.into(),
            cap_chars,
            buffer: String::new(),
            chars: 0,
            truncated: false,
            finalized: false,
        }
    }

    /// Feed one observed line. Lines that carry no reply text are ignored.
    pub fn observe_line(&mut self, line: &str) {
        if let Some(text) = extract_text(line) {
            self.push_text(&text);
        }
    }

    fn push_text(&mut self, text: &str) {
        if self.finalized || self.truncated {
            return;
        }
        let remaining = self.cap_chars.saturating_sub(self.chars);
        if remaining == 0 {
            self.truncated = true;
            return;
        }
        let incoming = text.chars().count();
        if incoming <= remaining {
            self.buffer.push_str(text);
            self.chars += incoming;
            return;
        }
        // Cut on a char boundary so multibyte text cannot split a scalar.
        let cut = text
            .char_indices()
            .nth(remaining)
            .map_or(text.len(), |(index, _)| index);
        self.buffer.push_str(&text[..cut]);
        self.chars = self.cap_chars;
        self.truncated = true;
    }

    /// Write the collected reply, at most once.
    pub async fn finalize(&mut self, store: &dyn MessageStore) {
        if self.finalized {
            return;
        }
        self.finalized = true;
        let Some(session_id) = self.session_id else {
            tracing::debug!("no owned session, skipping reply persistence");
            return;
        };
        if self.buffer.is_empty() {
            tracing::debug!(%session_id, "empty reply, skipping persistence");
            return;
        }
        let message = NewAssistantMessage {
            session_id,
            content: std::mem::take(&mut self.buffer),
            model_used: self.model_id.clone(),
        };
        match store.append_assistant_message(&message).await {
            Ok(message_id) => {
                tracing::debug!(%session_id, %message_id, chars = self.chars, truncated = self.truncated, "assistant reply persisted");
            }
            Err(err) => {
                tracing::warn!(%session_id, error = %err, "failed to persist assistant reply");
            }
        }
    }
}

/// Drive a collector over the observer branch on its own task.
pub fn spawn_collector(
    mut collector: ReplyCollector,
    mut observer: LineStream,
    store: Arc<dyn MessageStore>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(line) = observer.next().await {
            collector.observe_line(&line);
        }
        collector.finalize(store.as_ref()).await;
    })
}

/// Pull reply text out of one SSE line, if it carries any.
///
/// Only `data:`-prefixed lines are considered. Recognized payload shapes, in
/// order: `{"text": ...}`, a `parts` array of text parts, and
/// `{"delta": {"text": ...}}`. Control lines and anything unparseable yield
/// nothing.
fn extract_text(line: &str) -> Option<String> {
    let payload = line.strip_prefix("data:")?.trim_start();
    if payload.is_empty() || payload == "[DONE]" {
        return None;
    }
    let value: serde_json::Value = serde_json::from_str(payload).ok()?;

    if let Some(text) = value.get("text").and_then(|t| t.as_str()) {
        return Some(text.to_string());
    }
    if let Some(parts) = value.get("parts").and_then(|p| p.as_array()) {
        let mut combined = String::new();
        for part in parts {
            if part.get("type").and_then(|t| t.as_str()) == Some("text")
                && let Some(text) = part.get("text").and_then(|t| t.as_str())
            {
                combined.push_str(text);
            }
        }
        if !combined.is_empty() {
            return Some(combined);
        }
        return None;
    }
    value
        .get("delta")
        .and_then(|d| d.get("text"))
        .and_then(|t| t.as_str())
        .map(ToString::to_string)
}

#[cfg(test)]
#[path = "collector_test.rs"]
mod tests;
