//! Failure classification — raw provider errors to user-safe sentences.
//!
//! Mid-stream failures cannot change the HTTP status, so they surface as a
//! short sentence inside the reply itself. Classification is ordered from
//! most to least specific, and every branch returns complete, calm wording
//! that never echoes provider internals.

/// User-safe sentence for a provider failure message.
#[must_use]
pub fn user_safe_message(raw: &str) -> &'static str {
    let lowered = raw.to_lowercase();

    if contains_any(&lowered, &["rate limit", "rate_limit", "too many requests", "429"]) {
        return "You're sending messages quickly. Please wait a moment and try again.";
    }
    if contains_any(&lowered, &["tool choice", "tool_choice", "tool-choice"]) {
        return "There was a configuration issue with the response tools. Please try again and I'll answer without them.";
    }
    if contains_any(&lowered, &["web search", "web_search", "search tool", "tool"]) {
        return "Web search ran into a problem. Please try again, and I can answer without it if this keeps happening.";
    }
    if contains_any(
        &lowered,
        &["unavailable", "timeout", "timed out", "overloaded", "connection", "network", "503", "502"],
    ) {
        return "I'm having trouble reaching the assistant right now. Please try again in a moment.";
    }
    "Something went wrong while I was responding. Please try again."
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_phrasings_classify_first() {
        assert_eq!(
            user_safe_message("Provider said: 429 Too Many Requests"),
            user_safe_message("rate_limit_exceeded")
        );
        assert!(user_safe_message("Rate limit hit").contains("wait a moment"));
    }

    #[test]
    fn rate_limit_beats_other_matches() {
        // Contains both "rate limit" and "tool"; the more specific class wins.
        let message = user_safe_message("rate limit while invoking web search tool");
        assert!(message.contains("wait a moment"));
    }

    #[test]
    fn tool_choice_conflict_is_distinct_from_generic_tool_failure() {
        let conflict = user_safe_message("tool_choice is not supported with this model");
        assert!(conflict.contains("configuration issue"));

        let tool = user_safe_message("the web search tool returned an error");
        assert!(tool.contains("Web search"));
    }

    #[test]
    fn availability_failures_suggest_retry() {
        for raw in ["connection refused", "upstream timed out", "503 Service Unavailable", "model overloaded"] {
            assert!(user_safe_message(raw).contains("try again in a moment"), "misclassified: {raw}");
        }
    }

    #[test]
    fn unknown_failures_get_generic_wording() {
        let message = user_safe_message("kernel panic in the flux capacitor");
        assert!(message.contains("Something went wrong"));
    }

    #[test]
    fn wording_never_echoes_the_raw_error() {
        let raw = "connect to 10.0.0.5:11434 failed: ECONNREFUSED";
        let message = user_safe_message(raw);
        assert!(!message.contains("10.0.0.5"));
        assert!(!message.contains("ECONNREFUSED"));
    }
}
