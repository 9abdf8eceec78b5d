//! Shared summarization service.
//!
//! Composes the credential pool, model rotator, and provider factory into
//! the one worker path every LLM-calling component uses: the ingester and
//! repairer for summaries, the boundary chunker for cut points, and the
//! navigator for sub-agent chunk reads. One call = one credential slot,
//! with retry and forced model rotation on provider failure.

use std::sync::Arc;

use tracing::{error, warn};

use super::pool::CredentialPool;
use super::rotator::ModelRotator;
use super::sanitize::{FAILED_SUMMARY, clean_summary_text, contains_provider_failure};
use crate::agent::message::{ChatRequest, system_message, user_message};
use crate::agent::provider::ProviderFactory;
use crate::config::ModelConfig;
use crate::error::AgentError;

/// Default worker parallelism (matches the pool size).
pub const DEFAULT_WORKERS: usize = 20;
/// Default retry budget per call.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Tuning options for [`SummarizationService`].
#[derive(Debug, Clone, Copy)]
pub struct ServiceOptions {
    /// Credential pool size; equals maximum concurrent LLM calls.
    pub workers: usize,
    /// Attempts per call before yielding a sentinel.
    pub max_retries: u32,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

/// The worker/rotator/pool triad shared by ingestion, repair, and
/// navigation.
pub struct SummarizationService {
    factory: Arc<dyn ProviderFactory>,
    credentials: Vec<String>,
    pool: CredentialPool,
    rotator: ModelRotator,
    summarizer_prompt: String,
    analyst_prompt: String,
    max_retries: u32,
}

impl SummarizationService {
    /// Creates the service.
    ///
    /// `summarizer_prompt` and `analyst_prompt` are the system instructions
    /// for summarization calls and sub-agent chunk reads respectively
    /// (normally the catalog entries for `summarization-agent` and
    /// `chunk-analyzer`).
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::ApiKeyMissing`] when `credentials` is empty.
    pub fn new(
        factory: Arc<dyn ProviderFactory>,
        credentials: Vec<String>,
        rotator: ModelRotator,
        summarizer_prompt: String,
        analyst_prompt: String,
        options: ServiceOptions,
    ) -> Result<Self, AgentError> {
        if credentials.is_empty() {
            return Err(AgentError::ApiKeyMissing);
        }
        Ok(Self {
            factory,
            credentials,
            pool: CredentialPool::new(options.workers),
            rotator,
            summarizer_prompt,
            analyst_prompt,
            max_retries: options.max_retries.max(1),
        })
    }

    /// Worker parallelism of this service.
    #[must_use]
    pub const fn worker_count(&self) -> usize {
        self.pool.capacity()
    }

    /// One attempt: build the provider for (model, credential) and call it.
    async fn attempt(
        &self,
        model: &ModelConfig,
        credential: &str,
        system: &str,
        user: &str,
    ) -> Result<String, AgentError> {
        let provider = self.factory.create(model, credential)?;
        let request = ChatRequest {
            model: model.model_id.clone(),
            messages: vec![system_message(system), user_message(user)],
            temperature: Some(model.temperature),
            max_tokens: model.max_tokens,
            json_mode: false,
            tools: Vec::new(),
        };
        let response = provider.chat(&request).await?;
        Ok(response.content)
    }

    /// Runs one completion with the full retry/rotation discipline.
    ///
    /// Acquires a credential slot for the whole call; the slot returns to
    /// the pool on every exit path. Each attempt takes the next model from
    /// the rotator; a provider failure (error or sentinel reply) forces a
    /// rotation before the retry.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::RetriesExhausted`] when every attempt failed.
    pub async fn complete_raw(&self, system: &str, user: &str) -> Result<String, AgentError> {
        let slot = self.pool.acquire().await?;
        let credential = self
            .credentials
            .get(slot.index() % self.credentials.len())
            .cloned()
            .unwrap_or_default();

        let mut last = String::new();
        for attempt in 0..self.max_retries {
            let model = self.rotator.next();
            match self.attempt(&model, &credential, system, user).await {
                Ok(content) if contains_provider_failure(&content) => {
                    warn!(
                        attempt,
                        provider = %model.provider,
                        model = %model.model_id,
                        "provider failure sentinel in reply, rotating"
                    );
                    self.rotator.force_rotate();
                    last = "provider returned an error reply".to_string();
                }
                Ok(content) => return Ok(content),
                Err(e) => {
                    warn!(
                        attempt,
                        provider = %model.provider,
                        model = %model.model_id,
                        error = %e,
                        "LLM call failed, rotating"
                    );
                    self.rotator.force_rotate();
                    last = e.to_string();
                }
            }
        }

        Err(AgentError::RetriesExhausted {
            attempts: self.max_retries,
            last,
        })
    }

    /// Summarizes one prompt; never raises.
    ///
    /// The reply passes through the sanitizer. After the retry budget is
    /// spent, the sentinel [`FAILED_SUMMARY`] comes back instead, for the
    /// validator to repair later.
    pub async fn summarize(&self, prompt: &str) -> String {
        match self.complete_raw(&self.summarizer_prompt, prompt).await {
            Ok(text) => clean_summary_text(&text),
            Err(e) => {
                error!(error = %e, "summarization failed after retries");
                FAILED_SUMMARY.to_string()
            }
        }
    }

    /// Spawns a disposable sub-agent that answers one question about one
    /// chunk.
    ///
    /// The chunk and question are delimited with `<context>` and
    /// `<question>` tags; the answer comes back wrapped in a `<subagent>`
    /// marker so the caller can recognise delegated output. Holds no state
    /// between calls.
    pub async fn answer_about_chunk(&self, chunk_text: &str, question: &str) -> String {
        let user = format!("<context>\n{chunk_text}\n</context>\n\n<question>{question}</question>");
        match self.complete_raw(&self.analyst_prompt, &user).await {
            Ok(content) => format!("<subagent>{content}</subagent>"),
            Err(e) => format!("Error in sub-agent execution: {e}"),
        }
    }
}

impl std::fmt::Debug for SummarizationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SummarizationService")
            .field("workers", &self.pool.capacity())
            .field("credentials", &self.credentials.len())
            .field("models", &self.rotator.len())
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}


#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::testing::{capturing_service, echo_service, mock_service};
    use super::*;

    #[tokio::test]
    async fn test_summarize_sanitizes_reply() {
        let service = mock_service(vec![Ok(
            "<think>reasoning</think>```\nA clean summary.\n```".to_string()
        )]);
        assert_eq!(service.summarize("some text").await, "A clean summary.");
    }

    #[tokio::test]
    async fn test_provider_failure_sentinel_rotates_and_retries() {
        let (service, requests) = capturing_service(vec![
            Ok("Provider returned error: rate limited".to_string()),
            Ok("Second model answered.".to_string()),
        ]);
        let result = service.summarize("prompt").await;
        assert_eq!(result, "Second model answered.");

        // The retry went to the next model in the pool.
        let models: Vec<String> = requests.lock().unwrap().iter().map(|r| r.model.clone()).collect();
        assert_eq!(models, vec!["mock-a", "mock-b"]);
    }

    #[tokio::test]
    async fn test_api_error_rotates_and_retries() {
        let (service, requests) = capturing_service(vec![
            Err("connection reset".to_string()),
            Ok("Recovered.".to_string()),
        ]);
        assert_eq!(service.summarize("prompt").await, "Recovered.");
        assert_eq!(requests.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_exhausted_retries_yield_sentinel() {
        let service = mock_service(vec![
            Err("down".to_string()),
            Err("down".to_string()),
            Err("down".to_string()),
        ]);
        assert_eq!(service.summarize("prompt").await, FAILED_SUMMARY);
    }

    #[tokio::test]
    async fn test_complete_raw_reports_exhaustion() {
        let service = mock_service(vec![
            Err("a".to_string()),
            Err("b".to_string()),
            Err("c".to_string()),
        ]);
        let err = service.complete_raw("sys", "user").await.unwrap_err();
        assert!(matches!(err, AgentError::RetriesExhausted { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn test_answer_about_chunk_contract() {
        let (service, requests) = capturing_service(vec![Ok("The answer.".to_string())]);
        let reply = service
            .answer_about_chunk("raw chunk body", "What is it?")
            .await;
        assert_eq!(reply, "<subagent>The answer.</subagent>");

        // The prompt carries both delimited sections.
        let captured = requests.lock().unwrap();
        let user = &captured[0].messages[1].content;
        assert!(user.contains("<context>\nraw chunk body\n</context>"));
        assert!(user.contains("<question>What is it?</question>"));
    }

    #[tokio::test]
    async fn test_answer_about_chunk_failure_is_content() {
        let service = mock_service(vec![
            Err("down".to_string()),
            Err("down".to_string()),
            Err("down".to_string()),
        ]);
        let reply = service.answer_about_chunk("chunk", "q").await;
        assert!(reply.starts_with("Error in sub-agent execution"));
        assert!(!reply.contains("<subagent>"));
    }

    #[tokio::test]
    async fn test_pool_reusable_after_failures() {
        // Worker pool of 1: a failed call must release its slot.
        let service = SummarizationService::new(
            std::sync::Arc::new(super::testing::ScriptedFactory::new(vec![
                Err("down".to_string()),
                Err("down".to_string()),
                Err("down".to_string()),
                Ok("later call works".to_string()),
            ])),
            vec!["key".to_string()],
            crate::summarize::rotator::ModelRotator::new(
                vec![crate::config::ModelConfig {
                    provider: "groq".to_string(),
                    model_id: "m".to_string(),
                    temperature: 0.0,
                    max_tokens: None,
                }],
                3,
            )
            .unwrap(),
            "s".to_string(),
            "a".to_string(),
            ServiceOptions {
                workers: 1,
                max_retries: 3,
            },
        )
        .unwrap();

        assert_eq!(service.summarize("first").await, FAILED_SUMMARY);
        assert_eq!(service.summarize("second").await, "later call works");
    }

    #[tokio::test]
    async fn test_echo_service_parallel_order_preserved() {
        let service = echo_service(4);
        let prompts: Vec<String> = (0..8).map(|i| format!("prompt number {i}")).collect();
        let futures = prompts.iter().map(|p| service.summarize(p));
        let results = futures_util::future::join_all(futures).await;
        for (i, result) in results.iter().enumerate() {
            assert!(result.contains(&format!("number{i}")), "result {i}: {result}");
        }
    }

    #[test]
    fn test_empty_credentials_rejected() {
        let result = SummarizationService::new(
            std::sync::Arc::new(super::testing::EchoFactory),
            Vec::new(),
            crate::summarize::rotator::ModelRotator::new(
                vec![crate::config::ModelConfig {
                    provider: "groq".to_string(),
                    model_id: "m".to_string(),
                    temperature: 0.0,
                    max_tokens: None,
                }],
                3,
            )
            .unwrap(),
            String::new(),
            String::new(),
            ServiceOptions::default(),
        );
        assert!(matches!(result, Err(AgentError::ApiKeyMissing)));
    }
}
