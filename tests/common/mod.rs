//! Shared test fixtures: a deterministic offline provider and a
//! char-per-token meter.

#![allow(clippy::expect_used, dead_code)]

use std::sync::Arc;

use async_trait::async_trait;

use rlm_tree::agent::message::{ChatRequest, ChatResponse, Role};
use rlm_tree::agent::provider::{LlmProvider, ProviderFactory};
use rlm_tree::{ModelConfig, ModelRotator, ServiceOptions, SummarizationService, TokenMeter};

/// One char = one token; lets tests pick exact chunk sizes.
pub struct CharMeter;

impl TokenMeter for CharMeter {
    fn count(&self, text: &str) -> usize {
        text.chars().count()
    }
}

/// Provider that answers with a digest of the user message.
struct EchoProvider;

#[async_trait]
impl LlmProvider for EchoProvider {
    fn name(&self) -> &'static str {
        "echo"
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, rlm_tree::error::AgentError> {
        let user = request
            .messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, Role::User))
            .map(|m| m.content.as_str())
            .unwrap_or_default();
        let digest: String = user.chars().filter(|c| !c.is_whitespace()).take(48).collect();
        Ok(ChatResponse {
            content: format!("summary[{digest}]"),
            tool_calls: Vec::new(),
            finish_reason: Some("stop".to_string()),
        })
    }
}

/// Factory for [`EchoProvider`].
pub struct EchoFactory;

impl ProviderFactory for EchoFactory {
    fn create(
        &self,
        _model: &ModelConfig,
        _credential: &str,
    ) -> Result<Box<dyn LlmProvider>, rlm_tree::error::AgentError> {
        Ok(Box::new(EchoProvider))
    }
}

/// Builds an offline service over the echo provider.
pub fn echo_service(workers: usize) -> SummarizationService {
    let rotator = ModelRotator::new(
        vec![ModelConfig {
            provider: "groq".to_string(),
            model_id: "echo-model".to_string(),
            temperature: 0.0,
            max_tokens: None,
        }],
        3,
    )
    .expect("non-empty pool");

    SummarizationService::new(
        Arc::new(EchoFactory),
        vec!["test-key".to_string()],
        rotator,
        "You summarize document text.".to_string(),
        "You answer one question from the provided context.".to_string(),
        ServiceOptions {
            workers,
            max_retries: 3,
        },
    )
    .expect("credentials provided")
}

/// 12 distinct 4-char runs: "aaaabbbb…llll".
pub fn twelve_chunk_text() -> String {
    (0..12)
        .map(|i| {
            let c = char::from(b'a' + u8::try_from(i).expect("small index"));
            c.to_string().repeat(4)
        })
        .collect()
}
