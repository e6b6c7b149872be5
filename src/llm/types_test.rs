use super::*;

#[test]
fn content_deserializes_plain_string() {
    let message: PromptMessage = serde_json::from_value(serde_json::json!({
        "role": "user",
        "content": "hello there"
    }))
    .unwrap();
    assert_eq!(message.role, "user");
    assert_eq!(message.content, Content::Text("hello there".into()));
}

#[test]
fn content_deserializes_structured_parts() {
    let message: PromptMessage = serde_json::from_value(serde_json::json!({
        "role": "assistant",
        "content": [
            { "type": "text", "text": "part one" },
            { "type": "reasoning", "text": "thinking" },
            {
                "type": "tool-result",
                "toolCallId": "call-7",
                "output": { "type": "json", "value": { "answer": 42 } }
            }
        ]
    }))
    .unwrap();

    let Content::Parts(parts) = message.content else {
        panic!("expected structured parts");
    };
    assert_eq!(parts.len(), 3);
    assert_eq!(parts[0], ContentPart::Text { text: "part one".into() });
    assert_eq!(parts[1], ContentPart::Reasoning { text: "thinking".into() });
    assert_eq!(
        parts[2],
        ContentPart::ToolResult {
            tool_call_id: "call-7".into(),
            output: ToolOutput::Json(serde_json::json!({ "answer": 42 })),
        }
    );
}

#[test]
fn unknown_part_kinds_survive_deserialization() {
    let parts: Vec<ContentPart> = serde_json::from_value(serde_json::json!([
        { "type": "text", "text": "kept" },
        { "type": "file", "url": "https://example.test/a.png" }
    ]))
    .unwrap();
    assert_eq!(parts[0], ContentPart::Text { text: "kept".into() });
    assert_eq!(parts[1], ContentPart::Unknown);
}

#[test]
fn tool_output_error_text_round_trips() {
    let output: ToolOutput = serde_json::from_value(serde_json::json!({
        "type": "error-text",
        "value": "upstream 500"
    }))
    .unwrap();
    assert_eq!(output, ToolOutput::ErrorText("upstream 500".into()));
}

#[test]
fn usage_totals_only_when_both_sides_reported() {
    let both = TokenUsage::from_counts(Some(10), Some(5));
    assert_eq!(both.total_tokens, Some(15));

    let input_only = TokenUsage::from_counts(Some(10), None);
    assert_eq!(input_only.input_tokens, Some(10));
    assert_eq!(input_only.total_tokens, None);

    let neither = TokenUsage::from_counts(None, None);
    assert_eq!(neither, TokenUsage::default());
}

#[test]
fn finish_reason_strings_are_stable() {
    assert_eq!(FinishReason::Stop.as_str(), "stop");
    assert_eq!(FinishReason::ToolCalls.as_str(), "tool-calls");
    assert_eq!(FinishReason::ContentFilter.as_str(), "content-filter");
    assert_eq!(FinishReason::Error.as_str(), "error");
}

#[test]
fn error_codes_split_auth_from_availability() {
    use crate::envelope::ErrorCode;

    let auth = LlmError::ApiResponse { status: 401, body: String::new() };
    assert_eq!(auth.error_code(), "UNAUTHORIZED");
    assert_eq!(auth.suggested_action(), Some("check_api_key"));

    let overloaded = LlmError::ApiResponse { status: 529, body: String::new() };
    assert_eq!(overloaded.error_code(), "SERVICE_UNAVAILABLE");

    let transport = LlmError::ApiRequest("connection refused".into());
    assert_eq!(transport.error_code(), "SERVICE_UNAVAILABLE");
    assert_eq!(transport.suggested_action(), Some("retry_after_delay"));

    let weird = LlmError::ApiResponse { status: 404, body: String::new() };
    assert_eq!(weird.error_code(), "PROVIDER_ERROR");

    let parse = LlmError::ApiParse("no choices".into());
    assert_eq!(parse.error_code(), "PROVIDER_ERROR");
    assert_eq!(parse.suggested_action(), None);
}
