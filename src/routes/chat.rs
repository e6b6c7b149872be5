//! Chat routes — the streaming turn endpoint and local model health.
//!
//! DESIGN
//! ======
//! The chat handler runs its gate checks in a fixed order: rate limit,
//! content type, body size, then JSON normalization. A request that fails a
//! gate never touches a model backend. Once the pipeline opens, the
//! response is SSE; pre-stream failures come back as the JSON error
//! envelope instead.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{ConnectInfo, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use futures::StreamExt;
use uuid::Uuid;

use crate::envelope::{ApiError, ErrorCode};
use crate::llm::local::LocalHealth;
use crate::llm::types::LlmError;
use crate::routes::auth::{HEADER_REQUEST_ID, RequestContext};
use crate::services::chat::{ChatCall, ChatError, ChatStream, run_chat};
use crate::services::normalize::{self, NormalizeError};
use crate::state::AppState;

pub const HEADER_MODEL_ID: &str = "x-model-id";
pub const HEADER_TOOL_CHOICE: &str = "x-tool-choice";

// =============================================================================
// CHAT
// =============================================================================

/// `POST /api/chat` — run one turn and stream the reply as SSE.
pub async fn chat(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ctx: RequestContext,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request_id = ctx.request_id;

    // Rate limit first; a blocked caller costs nothing else.
    if let Err(err) = state.rate_limiter.check_and_record(client_ip(&headers, addr)) {
        tracing::warn!(%request_id, error = %err, "rate limited");
        return ApiError::from_error(StatusCode::TOO_MANY_REQUESTS, &err)
            .with_details(serde_json::json!({ "retryAfterSecs": err.retry_after_secs() }))
            .into_response();
    }

    if !is_json_content_type(&headers) {
        return ApiError::new(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "INVALID_INPUT",
            "request body must be application/json",
        )
        .into_response();
    }

    // Size gate before any JSON parsing.
    if body.len() > state.limits.body_max_bytes {
        return ApiError::new(
            StatusCode::PAYLOAD_TOO_LARGE,
            "PAYLOAD_TOO_LARGE",
            "request body exceeds the size limit",
        )
        .with_details(serde_json::json!({ "maxBytes": state.limits.body_max_bytes }))
        .with_suggested_action("shorten_message")
        .into_response();
    }

    let request = match normalize::normalize(&body) {
        Ok(request) => request,
        Err(err) => return validation_response(&err),
    };

    let Some(resolved) =
        state.models.resolve(&request.model, request.web_search, request.byok_key.as_deref())
    else {
        return ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "SERVICE_UNAVAILABLE",
            "no model backend is configured",
        )
        .with_suggested_action("retry_after_delay")
        .into_response();
    };

    tracing::info!(
        %request_id,
        principal = %ctx.principal_id,
        model = %resolved.effective_model_id,
        web_search = resolved.has_web_search,
        session = ?request.session_id,
        "chat turn accepted"
    );

    let call = ChatCall {
        request_id,
        principal_id: ctx.principal_id,
        request,
        effective_model_id: resolved.effective_model_id,
        tool_choice: resolved.tool_choice,
    };

    match run_chat(Arc::clone(&state.store), Arc::new(resolved.model), call, state.limits).await {
        Ok(stream) => stream_response(stream, request_id),
        Err(err) => chat_error_response(&err, request_id),
    }
}

fn stream_response(stream: ChatStream, request_id: Uuid) -> Response {
    let ChatStream { model_id, tool_choice, client, persistence } = stream;
    // The collector finishes on its own task; the response does not wait.
    drop(persistence);

    let body = Body::from_stream(
        client.map(|line| Ok::<_, std::convert::Infallible>(format!("{line}\n\n"))),
    );

    (
        [(CONTENT_TYPE, "text/event-stream"), (CACHE_CONTROL, "no-cache")],
        [
            (HEADER_REQUEST_ID, request_id.to_string()),
            (HEADER_MODEL_ID, model_id),
            (HEADER_TOOL_CHOICE, tool_choice.as_str().to_string()),
        ],
        body,
    )
        .into_response()
}

fn validation_response(err: &NormalizeError) -> Response {
    let api = ApiError::from_error(StatusCode::BAD_REQUEST, err);
    match err {
        NormalizeError::MessageTooLong { chars } => api
            .with_details(serde_json::json!({
                "chars": chars,
                "maxChars": normalize::MESSAGE_MAX_CHARS,
            }))
            .into_response(),
        _ => api.into_response(),
    }
}

fn chat_error_response(err: &ChatError, request_id: Uuid) -> Response {
    tracing::warn!(%request_id, code = err.error_code(), error = %err, "chat turn failed before streaming");
    match err {
        ChatError::Store(_) => ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "SERVICE_UNAVAILABLE",
            "conversation storage is temporarily unavailable",
        )
        .with_suggested_action("retry_after_delay")
        .into_response(),
        ChatError::Model(model_err) => model_error_response(model_err).into_response(),
    }
}

/// Fixed client-facing message per failure class. Provider payloads stay in
/// the server log under the request id.
fn model_error_response(err: &LlmError) -> ApiError {
    match err {
        LlmError::ApiResponse { status: 401 | 403, .. } => ApiError::new(
            StatusCode::UNAUTHORIZED,
            "UNAUTHORIZED",
            "the model provider rejected the configured credentials",
        )
        .with_suggested_action("check_api_key"),
        LlmError::ApiRequest(_) | LlmError::ApiResponse { status: 429 | 500..=599, .. } => {
            ApiError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "SERVICE_UNAVAILABLE",
                "the model provider is temporarily unavailable",
            )
            .with_suggested_action("retry_after_delay")
        }
        LlmError::ApiResponse { .. } | LlmError::ApiParse(_) => ApiError::new(
            StatusCode::BAD_GATEWAY,
            "PROVIDER_ERROR",
            "the model provider returned an unexpected response",
        ),
        LlmError::ConfigParse(_) | LlmError::HttpClientBuild(_) => ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_ERROR",
            "internal configuration error",
        ),
    }
}

/// Prefer the first hop of `x-forwarded-for`; fall back to the socket peer.
fn client_ip(headers: &HeaderMap, fallback: SocketAddr) -> IpAddr {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|raw| raw.split(',').next())
        .and_then(|first| first.trim().parse::<IpAddr>().ok())
        .unwrap_or_else(|| fallback.ip())
}

fn is_json_content_type(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| {
            value
                .split(';')
                .next()
                .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("application/json"))
        })
}

// =============================================================================
// HEALTH
// =============================================================================

/// `GET /api/health/local-model` — probe the local runner.
pub async fn local_model_health(State(state): State<AppState>) -> Response {
    let Some(client) = state.models.local_client() else {
        let payload = serde_json::json!({ "status": "not_configured", "details": {} });
        return (StatusCode::SERVICE_UNAVAILABLE, Json(payload)).into_response();
    };

    let health = client.health_check().await;
    let code = if matches!(health, LocalHealth::Ready { .. }) {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(health_body(&health))).into_response()
}

fn health_body(health: &LocalHealth) -> serde_json::Value {
    let details = match health {
        LocalHealth::Ready { available } => serde_json::json!({ "available": available }),
        LocalHealth::ModelMissing { model, available } => {
            serde_json::json!({ "model": model, "available": available })
        }
        LocalHealth::HttpError { status } => serde_json::json!({ "status": status }),
        LocalHealth::Timeout => serde_json::json!({}),
        LocalHealth::Unreachable { message } => {
            // The failure detail is for operators, not clients.
            tracing::warn!(detail = %message, "local model unreachable");
            serde_json::json!({})
        }
    };
    serde_json::json!({ "status": health.status(), "details": details })
}

#[cfg(test)]
#[path = "chat_test.rs"]
mod tests;
