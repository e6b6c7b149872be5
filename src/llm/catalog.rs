//! Model catalog — public model ids and backend resolution.
//!
//! DESIGN
//! ======
//! Clients pick models by stable public id (`default`, `analytical`,
//! `local`), never by upstream provider names; the mapping to concrete
//! models lives here and in the environment. Resolution is total: an
//! unknown id falls back to the default instead of erroring, and picking
//! the local model when no runner is configured falls back to the hosted
//! default. A request only fails to resolve when no backend exists at all.

use tracing::{debug, info, warn};

use super::ModelHandle;
use super::config::{HostedApiConfig, LocalConfig};
use super::hosted::HostedClient;
use super::local::LocalClient;
use super::types::ToolChoice;

/// Hosted default, used for everyday conversation.
pub const MODEL_ID_DEFAULT: &str = "default";
/// Hosted variant with web search capability.
pub const MODEL_ID_ANALYTICAL: &str = "analytical";
/// On-box runner, for fully private conversations.
pub const MODEL_ID_LOCAL: &str = "local";

/// Outcome of resolving one request's model pick.
pub struct ResolvedModel {
    pub model: ModelHandle,
    /// Public id actually served, after any fallback or upgrade.
    pub effective_model_id: String,
    /// Whether the chosen model can search the web.
    pub has_web_search: bool,
    /// Tool choice the call will carry.
    pub tool_choice: ToolChoice,
}

/// The backends constructed at startup. Missing backends disable their
/// public ids rather than failing the process.
pub struct ModelSet {
    hosted: Option<HostedClient>,
    local: Option<LocalClient>,
    api: HostedApiConfig,
}

impl ModelSet {
    #[must_use]
    pub fn new(hosted: Option<HostedClient>, local: Option<LocalClient>, api: HostedApiConfig) -> Self {
        Self { hosted, local, api }
    }

    /// Build every backend the environment configures. Failures disable the
    /// backend with a warning; the service starts regardless.
    #[must_use]
    pub fn from_env() -> Self {
        let api = HostedApiConfig::from_env();

        let hosted = match std::env::var("HOSTED_API_KEY") {
            Ok(key) if !key.trim().is_empty() => {
                match HostedClient::new(key.trim().to_string(), &api.base_url, api.timeouts) {
                    Ok(client) => {
                        info!(
                            base_url = %api.base_url,
                            default_model = %api.default_model,
                            analytical_model = %api.analytical_model,
                            "hosted models enabled"
                        );
                        Some(client)
                    }
                    Err(e) => {
                        warn!(error = %e, "hosted client build failed, hosted models disabled");
                        None
                    }
                }
            }
            _ => {
                warn!("HOSTED_API_KEY not set, hosted models disabled");
                None
            }
        };

        let local = LocalConfig::from_env().and_then(|config| {
            let base_url = config.base_url.clone();
            let model = config.model.clone();
            match LocalClient::new(config) {
                Ok(client) => {
                    info!(%base_url, %model, "local model enabled");
                    Some(client)
                }
                Err(e) => {
                    warn!(error = %e, "local client build failed, local model disabled");
                    None
                }
            }
        });

        Self::new(hosted, local, api)
    }

    /// The local client, when configured. Used by the health probe.
    #[must_use]
    pub fn local_client(&self) -> Option<&LocalClient> {
        self.local.as_ref()
    }

    /// Pick a backend for one request. Total over model ids; `None` only
    /// when no backend can serve the pick at all.
    #[must_use]
    pub fn resolve(&self, requested: &str, web_search: bool, byok_key: Option<&str>) -> Option<ResolvedModel> {
        if let Some(key) = byok_key {
            return self.resolve_byok(key, requested, web_search);
        }

        let registered = matches!(requested, MODEL_ID_DEFAULT | MODEL_ID_ANALYTICAL | MODEL_ID_LOCAL);
        if !registered {
            debug!(requested, "unknown model id, serving default");
        }
        let effective = if registered { requested } else { MODEL_ID_DEFAULT };

        // Web search needs a capable model; anything else upgrades.
        let (effective, tool_choice) = if web_search {
            let upgraded = if supports_web_search(effective) { effective } else { MODEL_ID_ANALYTICAL };
            (upgraded, ToolChoice::Auto)
        } else {
            (effective, ToolChoice::None)
        };

        if effective == MODEL_ID_LOCAL {
            if let Some(client) = &self.local {
                return Some(ResolvedModel {
                    model: ModelHandle::Local { client: client.clone() },
                    effective_model_id: MODEL_ID_LOCAL.to_string(),
                    has_web_search: false,
                    tool_choice,
                });
            }
            debug!("local model not configured, serving hosted default");
            return self.resolve_hosted(MODEL_ID_DEFAULT, tool_choice);
        }

        self.resolve_hosted(effective, tool_choice)
    }

    fn resolve_hosted(&self, public_id: &str, tool_choice: ToolChoice) -> Option<ResolvedModel> {
        let client = self.hosted.clone()?;
        let (upstream, has_web_search) = self.upstream_for(public_id);
        Some(ResolvedModel {
            model: ModelHandle::Hosted { client, model: upstream },
            effective_model_id: public_id.to_string(),
            has_web_search,
            tool_choice,
        })
    }

    /// BYOK always speaks the hosted protocol with the caller's key, even
    /// when no system key is configured.
    fn resolve_byok(&self, key: &str, requested: &str, web_search: bool) -> Option<ResolvedModel> {
        let client = match HostedClient::new(key.to_string(), &self.api.base_url, self.api.timeouts) {
            Ok(client) => client,
            Err(e) => {
                warn!(error = %e, "BYOK client build failed");
                return None;
            }
        };

        let registered = matches!(requested, MODEL_ID_DEFAULT | MODEL_ID_ANALYTICAL);
        let public_id = if registered { requested } else { MODEL_ID_DEFAULT };
        let (public_id, tool_choice) = if web_search {
            (MODEL_ID_ANALYTICAL, ToolChoice::Auto)
        } else {
            (public_id, ToolChoice::None)
        };

        let (upstream, has_web_search) = self.upstream_for(public_id);
        Some(ResolvedModel {
            model: ModelHandle::Byok { client, model: upstream },
            effective_model_id: public_id.to_string(),
            has_web_search,
            tool_choice,
        })
    }

    fn upstream_for(&self, public_id: &str) -> (String, bool) {
        if public_id == MODEL_ID_ANALYTICAL {
            (self.api.analytical_model.clone(), true)
        } else {
            (self.api.default_model.clone(), false)
        }
    }
}

fn supports_web_search(public_id: &str) -> bool {
    public_id == MODEL_ID_ANALYTICAL
}

#[cfg(test)]
#[path = "catalog_test.rs"]
mod tests;
