//! Chat pipeline tuning knobs, loaded once at startup from the environment.

use crate::services::split::SplitMode;

pub const DEFAULT_BODY_MAX_BYTES: usize = 64 * 1024;
pub const DEFAULT_REPLY_MAX_CHARS: usize = 16_000;
pub const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Limits and modes applied to every chat request.
#[derive(Debug, Clone, Copy)]
pub struct ChatLimits {
    /// Request body ceiling in bytes; larger posts are rejected with 413.
    pub body_max_bytes: usize,
    /// Hard cap on the characters accumulated for persistence.
    pub reply_max_chars: usize,
    /// Output token cap passed to the model on every call.
    pub max_tokens: u32,
    /// How the model stream is shared with the persistence collector.
    pub split_mode: SplitMode,
}

impl ChatLimits {
    /// Reads `CHAT_BODY_MAX_BYTES`, `CHAT_REPLY_MAX_CHARS`, `CHAT_MAX_TOKENS`
    /// and `STREAM_SPLIT_MODE`. Unset or unparseable values fall back to the
    /// defaults above.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            body_max_bytes: env_parse("CHAT_BODY_MAX_BYTES", DEFAULT_BODY_MAX_BYTES),
            reply_max_chars: env_parse("CHAT_REPLY_MAX_CHARS", DEFAULT_REPLY_MAX_CHARS),
            max_tokens: env_parse("CHAT_MAX_TOKENS", DEFAULT_MAX_TOKENS),
            split_mode: env_parse("STREAM_SPLIT_MODE", SplitMode::Tee),
        }
    }
}

impl Default for ChatLimits {
    fn default() -> Self {
        Self {
            body_max_bytes: DEFAULT_BODY_MAX_BYTES,
            reply_max_chars: DEFAULT_REPLY_MAX_CHARS,
            max_tokens: DEFAULT_MAX_TOKENS,
            split_mode: SplitMode::Tee,
        }
    }
}

/// Parse an environment variable, falling back to `default` when the variable
/// is unset or fails to parse.
pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.parse::<T>().ok())
        .unwrap_or(default)
}
