//! Pluggable LLM provider traits.
//!
//! [`LlmProvider`] translates provider-agnostic requests into SDK calls for
//! one (model, credential) binding. [`ProviderFactory`] builds providers on
//! demand so the summarization workers can pair each call with the rotated
//! model and the acquired credential, and so tests can inject mock
//! providers without touching the network.

use async_trait::async_trait;

use super::message::{ChatRequest, ChatResponse};
use crate::config::ModelConfig;
use crate::error::AgentError;

/// Trait for LLM provider backends.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name (e.g., `"openai"`).
    fn name(&self) -> &'static str;

    /// Executes a chat completion request.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError`] on API failures, timeouts, or parse errors.
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, AgentError>;
}

impl std::fmt::Debug for dyn LlmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmProvider").field("name", &self.name()).finish()
    }
}

/// Builds an [`LlmProvider`] for one (model, credential) pair.
pub trait ProviderFactory: Send + Sync {
    /// Creates the provider bound to `credential` for the given model's
    /// provider backend.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::UnsupportedProvider`] for unknown backends.
    fn create(
        &self,
        model: &ModelConfig,
        credential: &str,
    ) -> Result<Box<dyn LlmProvider>, AgentError>;
}
