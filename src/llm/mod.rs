//! Model backends — hosted, local, and BYOK clients behind one interface.
//!
//! DESIGN
//! ======
//! The resolver in [`catalog`] maps public model ids onto [`ModelHandle`]
//! variants, a closed set: every variant answers the same generate/stream
//! contract, so the chat pipeline never knows which backend it is driving.
//! BYOK (bring-your-own-key) reuses the hosted client with the caller's
//! credentials.

pub mod catalog;
pub mod config;
pub mod hosted;
pub mod local;
pub mod types;

use types::{CallOptions, ChatModel, GenerateResult, LlmError, PromptMessage, StreamHandle};

// =============================================================================
// BACKEND DISPATCH
// =============================================================================

/// Concrete backend chosen for one request.
pub enum ModelHandle {
    /// System-keyed hosted model.
    Hosted { client: hosted::HostedClient, model: String },
    /// On-box runner speaking the NDJSON protocol.
    Local { client: local::LocalClient },
    /// Hosted protocol with the caller's own key.
    Byok { client: hosted::HostedClient, model: String },
}

#[async_trait::async_trait]
impl ChatModel for ModelHandle {
    async fn generate(
        &self,
        messages: &[PromptMessage],
        options: &CallOptions,
    ) -> Result<GenerateResult, LlmError> {
        match self {
            Self::Hosted { client, model } | Self::Byok { client, model } => {
                client.generate(model, messages, options).await
            }
            Self::Local { client } => client.generate(messages, options).await,
        }
    }

    async fn stream(&self, messages: &[PromptMessage], options: &CallOptions) -> Result<StreamHandle, LlmError> {
        match self {
            Self::Hosted { client, model } | Self::Byok { client, model } => {
                client.stream(model, messages, options).await
            }
            Self::Local { client } => client.stream(messages, options).await,
        }
    }
}
