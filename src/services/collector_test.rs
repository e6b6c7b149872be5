use std::sync::Arc;

use super::{ReplyCollector, extract_text, spawn_collector};
use crate::services::split::LineStream;
use crate::state::test_helpers::MemoryStore;
use crate::store::MessageStore;

fn source_of(lines: &[&str]) -> LineStream {
    let owned: Vec<String> = lines.iter().map(|line| (*line).to_string()).collect();
    Box::pin(futures::stream::iter(owned))
}

// =============================================================================
// TEXT EXTRACTION
// =============================================================================

#[test]
fn extracts_delta_text_payloads() {
    assert_eq!(
        extract_text(r#"data: {"delta":{"text":"Hello"}}"#),
        Some("Hello".to_string())
    );
}

#[test]
fn extracts_flat_text_and_parts_payloads() {
    assert_eq!(
        extract_text(r#"data: {"text":"plain"}"#),
        Some("plain".to_string())
    );
    assert_eq!(
        extract_text(
            r#"data: {"parts":[{"type":"text","text":"one "},{"type":"image","url":"x"},{"type":"text","text":"two"}]}"#
        ),
        Some("one two".to_string())
    );
}

#[test]
fn control_and_unrecognized_lines_carry_no_text() {
    assert_eq!(extract_text("data: [DONE]"), None);
    assert_eq!(extract_text("data:"), None);
    assert_eq!(extract_text(": keep-alive"), None);
    assert_eq!(extract_text(r#"{"text":"missing the prefix"}"#), None);
    assert_eq!(extract_text(r#"data: {"finish":{"reason":"stop"}}"#), None);
    assert_eq!(extract_text(r#"data: {"parts":[]}"#), None);
    assert_eq!(extract_text("data: {not json"), None);
}

// =============================================================================
// ACCUMULATION AND THE CAP
// =============================================================================

#[test]
fn accumulates_across_lines_up_to_the_cap() {
    let mut collector = ReplyCollector::new(None, "default", 8);
    collector.observe_line(r#"data: {"delta":{"text":"hell"}}"#);
    collector.observe_line(r#"data: {"delta":{"text":"o wo"}}"#);
    assert_eq!(collector.buffer, "hello wo");
    assert_eq!(collector.chars, 8);

    // Nothing past the cap is kept.
    collector.observe_line(r#"data: {"delta":{"text":"rld"}}"#);
    assert_eq!(collector.buffer, "hello wo");
    assert!(collector.truncated);
}

#[test]
fn overflowing_line_is_cut_at_the_cap() {
    let mut collector = ReplyCollector::new(None, "default", 6);
    collector.observe_line(r#"data: {"delta":{"text":"overflowing"}}"#);
    assert_eq!(collector.buffer, "overfl");
    assert!(collector.truncated);
}

#[test]
fn exact_fit_is_not_marked_truncated_until_more_arrives() {
    let mut collector = ReplyCollector::new(None, "default", 5);
    collector.observe_line(r#"data: {"delta":{"text":"exact"}}"#);
    assert_eq!(collector.buffer, "exact");
    assert!(!collector.truncated);

    collector.observe_line(r#"data: {"delta":{"text":"!"}}"#);
    assert!(collector.truncated);
    assert_eq!(collector.buffer, "exact");
}

#[test]
fn cap_cuts_multibyte_text_on_char_boundaries() {
    let mut collector = ReplyCollector::new(None, "default", 2);
    collector.observe_line(r#"data: {"delta":{"text":"héllo"}}"#);
    assert_eq!(collector.buffer, "hé");
    assert!(collector.truncated);
}

// =============================================================================
// FINALIZATION
// =============================================================================

#[tokio::test]
async fn finalize_writes_one_assistant_row() {
    let (store, session_id) = MemoryStore::with_session("principal-1");
    let store = Arc::new(store);

    let mut collector = ReplyCollector::new(Some(session_id), "default", 100);
    collector.observe_line(r#"data: {"delta":{"text":"I hear you."}}"#);
    collector.finalize(store.as_ref()).await;

    assert_eq!(store.write_count(), 1);
    let messages = store.list_messages(session_id).await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].role, "assistant");
    assert_eq!(messages[0].content, "I hear you.");
    assert_eq!(messages[0].model_used.as_deref(), Some("default"));
}

#[tokio::test]
async fn finalize_is_idempotent() {
    let (store, session_id) = MemoryStore::with_session("principal-1");
    let store = Arc::new(store);

    let mut collector = ReplyCollector::new(Some(session_id), "default", 100);
    collector.observe_line(r#"data: {"delta":{"text":"once"}}"#);
    collector.finalize(store.as_ref()).await;
    collector.finalize(store.as_ref()).await;

    assert_eq!(store.write_count(), 1);
}

#[tokio::test]
async fn no_session_means_no_write() {
    let store = Arc::new(MemoryStore::new());
    let mut collector = ReplyCollector::new(None, "default", 100);
    collector.observe_line(r#"data: {"delta":{"text":"stateless"}}"#);
    collector.finalize(store.as_ref()).await;
    assert_eq!(store.write_count(), 0);
}

#[tokio::test]
async fn empty_reply_is_not_persisted() {
    let (store, session_id) = MemoryStore::with_session("principal-1");
    let store = Arc::new(store);

    let mut collector = ReplyCollector::new(Some(session_id), "default", 100);
    collector.observe_line("data: [DONE]");
    collector.finalize(store.as_ref()).await;
    assert_eq!(store.write_count(), 0);
}

#[tokio::test]
async fn store_failure_is_swallowed() {
    let (mut store, session_id) = MemoryStore::with_session("principal-1");
    store.fail_writes = true;
    let store = Arc::new(store);

    let mut collector = ReplyCollector::new(Some(session_id), "default", 100);
    collector.observe_line(r#"data: {"delta":{"text":"lost"}}"#);
    collector.finalize(store.as_ref()).await;

    assert_eq!(store.write_count(), 0);
}

// =============================================================================
// SPAWNED TASK
// =============================================================================

#[tokio::test]
async fn spawned_collector_drains_and_persists() {
    let (store, session_id) = MemoryStore::with_session("principal-1");
    let store = Arc::new(store);

    let observer = source_of(&[
        r#"data: {"delta":{"text":"first "}}"#,
        r#"data: {"delta":{"text":"second"}}"#,
        "data: [DONE]",
    ]);
    let collector = ReplyCollector::new(Some(session_id), "analytical", 100);
    let handle = spawn_collector(collector, observer, Arc::clone(&store) as Arc<dyn MessageStore>);
    handle.await.unwrap();

    let messages = store.list_messages(session_id).await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].content, "first second");
    assert_eq!(messages[0].model_used.as_deref(), Some("analytical"));
}
