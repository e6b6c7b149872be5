use super::*;

use futures::StreamExt as _;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_client(base_url: &str) -> HostedClient {
    HostedClient::new("test-key".to_string(), base_url, LlmTimeouts::default()).unwrap()
}

// ===== request building =====

#[test]
fn request_omits_unset_options() {
    let messages = vec![CcMessage { role: "user".into(), content: "hi".into(), tool_call_id: None }];
    let options = CallOptions::default();
    let body = serde_json::to_value(CcRequest::build("gpt-4o-mini", &messages, &options, false)).unwrap();
    assert_eq!(body["model"], "gpt-4o-mini");
    assert_eq!(body["stream"], false);
    assert!(body.get("max_tokens").is_none());
    assert!(body.get("tool_choice").is_none());
    assert!(body.get("temperature").is_none());
    assert!(body.get("response_format").is_none());
}

#[test]
fn request_carries_auto_tool_choice() {
    let messages = vec![CcMessage { role: "user".into(), content: "hi".into(), tool_call_id: None }];
    let options = CallOptions { tool_choice: ToolChoice::Auto, max_tokens: Some(256), ..CallOptions::default() };
    let body = serde_json::to_value(CcRequest::build("gpt-4o-search-preview", &messages, &options, true)).unwrap();
    assert_eq!(body["tool_choice"], "auto");
    assert_eq!(body["max_tokens"], 256);
    assert_eq!(body["stream"], true);
}

#[test]
fn request_maps_json_response_format() {
    let messages = vec![CcMessage { role: "user".into(), content: "hi".into(), tool_call_id: None }];
    let options = CallOptions {
        response_format: Some(ResponseFormat::Json { schema: None }),
        ..CallOptions::default()
    };
    let body = serde_json::to_value(CcRequest::build("gpt-4o-mini", &messages, &options, false)).unwrap();
    assert_eq!(body["response_format"]["type"], "json_object");
}

#[test]
fn message_conversion_matches_local_rules() {
    let messages = vec![
        PromptMessage::text("system", ""),
        PromptMessage::text("system", "be kind"),
        PromptMessage {
            role: "user".into(),
            content: Content::Parts(vec![
                ContentPart::Text { text: "part a ".into() },
                ContentPart::Text { text: "part b".into() },
                ContentPart::ToolResult {
                    tool_call_id: "call-9".into(),
                    output: ToolOutput::Text("result".into()),
                },
            ]),
        },
    ];
    let out = build_cc_messages(&messages);
    assert_eq!(out.len(), 3);
    assert_eq!(out[0], CcMessage { role: "system".into(), content: "be kind".into(), tool_call_id: None });
    assert_eq!(out[1], CcMessage { role: "user".into(), content: "part a part b".into(), tool_call_id: None });
    assert_eq!(out[2], CcMessage { role: "tool".into(), content: "result".into(), tool_call_id: Some("call-9".into()) });
}

#[test]
fn top_k_is_flagged_as_unsupported() {
    let options = CallOptions { top_k: Some(40), ..CallOptions::default() };
    let warnings = unsupported_warnings(&options);
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].feature, "top_k");
}

// ===== response parsing =====

#[test]
fn parse_response_happy_path() {
    let raw = serde_json::json!({
        "choices": [
            { "message": { "role": "assistant", "content": "Here to listen." }, "finish_reason": "stop" }
        ],
        "usage": { "prompt_tokens": 40, "completion_tokens": 12 }
    })
    .to_string();
    let result = parse_cc_response(&raw, Vec::new()).unwrap();
    assert_eq!(result.text, "Here to listen.");
    assert_eq!(result.finish_reason, FinishReason::Stop);
    assert_eq!(result.usage.total_tokens, Some(52));
}

#[test]
fn parse_response_requires_choices() {
    let err = parse_cc_response("{\"choices\":[]}", Vec::new()).unwrap_err();
    assert!(matches!(err, LlmError::ApiParse(_)));
}

#[test]
fn finish_reasons_map_to_normalized_enum() {
    assert_eq!(map_finish_reason("stop"), FinishReason::Stop);
    assert_eq!(map_finish_reason("length"), FinishReason::Length);
    assert_eq!(map_finish_reason("tool_calls"), FinishReason::ToolCalls);
    assert_eq!(map_finish_reason("content_filter"), FinishReason::ContentFilter);
    assert_eq!(map_finish_reason("mystery"), FinishReason::Other);
}

// ===== sse parser =====

#[test]
fn sse_parses_delta_stream() {
    let mut parser = SseParser::new();
    let events = parser.feed(
        concat!(
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n",
            "\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n",
            "\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"},\"finish_reason\":null}]}\n",
            "\n",
            "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}],\"usage\":{\"prompt_tokens\":5,\"completion_tokens\":2}}\n",
            "\n",
            "data: [DONE]\n",
        )
        .as_bytes(),
    );
    assert_eq!(
        events,
        vec![
            StreamEvent::TextStart,
            StreamEvent::TextDelta { text: "Hel".into() },
            StreamEvent::TextDelta { text: "lo".into() },
        ]
    );

    let tail = parser.finish();
    assert_eq!(
        tail,
        vec![
            StreamEvent::TextEnd,
            StreamEvent::Finish {
                reason: FinishReason::Stop,
                usage: TokenUsage { input_tokens: Some(5), output_tokens: Some(2), total_tokens: Some(7) },
            },
        ]
    );
}

#[test]
fn sse_skips_comments_and_blank_lines() {
    let mut parser = SseParser::new();
    let events = parser.feed(b": keep-alive\n\nevent: ping\n\n");
    assert!(events.is_empty());
    let tail = parser.finish();
    assert_eq!(tail, vec![StreamEvent::Finish { reason: FinishReason::Other, usage: TokenUsage::default() }]);
}

#[test]
fn sse_malformed_payload_yields_one_error() {
    let mut parser = SseParser::new();
    let events = parser.feed(
        concat!(
            "data: {broken\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n",
        )
        .as_bytes(),
    );
    let errors: Vec<_> = events.iter().filter(|e| matches!(e, StreamEvent::Error { .. })).collect();
    assert_eq!(errors.len(), 1);
    assert!(events.contains(&StreamEvent::TextDelta { text: "ok".into() }));
}

#[test]
fn sse_error_payload_surfaces_provider_message() {
    let mut parser = SseParser::new();
    let events = parser.feed(b"data: {\"error\":{\"message\":\"rate limit exceeded\",\"code\":429}}\n");
    assert_eq!(events, vec![StreamEvent::Error { message: "rate limit exceeded".into() }]);
    let tail = parser.finish();
    assert!(matches!(tail.last(), Some(StreamEvent::Finish { reason: FinishReason::Error, .. })));
}

#[test]
fn sse_handles_crlf_lines() {
    let mut parser = SseParser::new();
    let events = parser.feed(b"data: {\"choices\":[{\"delta\":{\"content\":\"hi\"}}]}\r\n");
    assert_eq!(events, vec![StreamEvent::TextStart, StreamEvent::TextDelta { text: "hi".into() }]);
}

// ===== http round trips =====

#[tokio::test]
async fn generate_round_trip_sends_bearer_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(serde_json::json!({ "model": "gpt-4o-mini", "stream": false })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [
                { "message": { "role": "assistant", "content": "hello" }, "finish_reason": "stop" }
            ],
            "usage": { "prompt_tokens": 1, "completion_tokens": 1 }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server.uri());
    let result = client
        .generate("gpt-4o-mini", &[PromptMessage::text("user", "hi")], &CallOptions::default())
        .await
        .unwrap();
    assert_eq!(result.text, "hello");
}

#[tokio::test]
async fn generate_maps_provider_401() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_string("{\"error\":\"invalid key\"}"))
        .mount(&server)
        .await;

    let client = test_client(&server.uri());
    let err = client
        .generate("gpt-4o-mini", &[PromptMessage::text("user", "hi")], &CallOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, LlmError::ApiResponse { status: 401, .. }));
}

#[tokio::test]
async fn stream_round_trip() {
    let sse = concat!(
        "data: {\"choices\":[{\"delta\":{\"content\":\"streamed \"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"reply\"},\"finish_reason\":null}]}\n\n",
        "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
        "data: [DONE]\n\n",
    );
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(serde_json::json!({ "stream": true })))
        .respond_with(ResponseTemplate::new(200).set_body_raw(sse, "text/event-stream"))
        .mount(&server)
        .await;

    let client = test_client(&server.uri());
    let handle = client
        .stream("gpt-4o-mini", &[PromptMessage::text("user", "hi")], &CallOptions::default())
        .await
        .unwrap();
    let events: Vec<StreamEvent> = handle.events.collect().await;
    assert_eq!(
        events,
        vec![
            StreamEvent::TextStart,
            StreamEvent::TextDelta { text: "streamed ".into() },
            StreamEvent::TextDelta { text: "reply".into() },
            StreamEvent::TextEnd,
            StreamEvent::Finish { reason: FinishReason::Stop, usage: TokenUsage::default() },
        ]
    );
}
