//! Model backend configuration, read from the environment at startup.

pub const DEFAULT_HOSTED_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_HOSTED_DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_HOSTED_ANALYTICAL_MODEL: &str = "gpt-4o-search-preview";
pub const DEFAULT_LOCAL_MODEL_ID: &str = "llama3.2";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// HTTP timeouts applied to every backend client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LlmTimeouts {
    /// Whole-request deadline. Generous because replies stream for a while.
    pub request_secs: u64,
    /// TCP connect deadline.
    pub connect_secs: u64,
}

impl LlmTimeouts {
    /// Reads `LLM_REQUEST_TIMEOUT_SECS` and `LLM_CONNECT_TIMEOUT_SECS`.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            request_secs: env_parse_u64("LLM_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS),
            connect_secs: env_parse_u64("LLM_CONNECT_TIMEOUT_SECS", DEFAULT_CONNECT_TIMEOUT_SECS),
        }
    }
}

impl Default for LlmTimeouts {
    fn default() -> Self {
        Self { request_secs: DEFAULT_REQUEST_TIMEOUT_SECS, connect_secs: DEFAULT_CONNECT_TIMEOUT_SECS }
    }
}

/// Hosted API surface: base URL, upstream model names, timeouts. Always
/// constructible; whether a system key exists is a separate question, and
/// BYOK requests use this config with the caller's own key.
#[derive(Debug, Clone)]
pub struct HostedApiConfig {
    pub base_url: String,
    pub default_model: String,
    pub analytical_model: String,
    pub timeouts: LlmTimeouts,
}

impl HostedApiConfig {
    /// Reads `HOSTED_BASE_URL`, `HOSTED_DEFAULT_MODEL` and
    /// `HOSTED_ANALYTICAL_MODEL`, plus the shared timeouts.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            base_url: env_string("HOSTED_BASE_URL", DEFAULT_HOSTED_BASE_URL),
            default_model: env_string("HOSTED_DEFAULT_MODEL", DEFAULT_HOSTED_DEFAULT_MODEL),
            analytical_model: env_string("HOSTED_ANALYTICAL_MODEL", DEFAULT_HOSTED_ANALYTICAL_MODEL),
            timeouts: LlmTimeouts::from_env(),
        }
    }
}

impl Default for HostedApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_HOSTED_BASE_URL.to_string(),
            default_model: DEFAULT_HOSTED_DEFAULT_MODEL.to_string(),
            analytical_model: DEFAULT_HOSTED_ANALYTICAL_MODEL.to_string(),
            timeouts: LlmTimeouts::default(),
        }
    }
}

/// Local runner endpoint and model.
#[derive(Debug, Clone)]
pub struct LocalConfig {
    pub base_url: String,
    pub model: String,
    pub timeouts: LlmTimeouts,
}

impl LocalConfig {
    /// Reads `LOCAL_MODEL_BASE_URL` and `LOCAL_MODEL_ID`. Returns `None` when
    /// no base URL is set, which disables the local backend entirely.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("LOCAL_MODEL_BASE_URL").ok()?;
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return None;
        }
        Some(Self {
            base_url,
            model: env_string("LOCAL_MODEL_ID", DEFAULT_LOCAL_MODEL_ID),
            timeouts: LlmTimeouts::from_env(),
        })
    }
}

fn env_string(key: &str, default: &str) -> String {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => value.trim().to_string(),
        _ => default.to_string(),
    }
}

fn env_parse_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.parse::<u64>().ok())
        .unwrap_or(default)
}
