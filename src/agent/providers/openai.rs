//! `OpenAI`-compatible provider implementation using the `async-openai`
//! crate.
//!
//! The rotation pools mix providers that all speak the `OpenAI` chat
//! completion dialect (`OpenAI`, Groq, OpenRouter, Cerebras, local
//! proxies); the factory maps each provider name to its base URL and binds
//! the credential handed out by the pool.

use async_openai::Client;
use async_openai::config::OpenAIConfig;
use async_openai::types::{
    ChatCompletionMessageToolCall, ChatCompletionRequestAssistantMessage,
    ChatCompletionRequestAssistantMessageContent, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessage, ChatCompletionRequestSystemMessageContent,
    ChatCompletionRequestToolMessage, ChatCompletionRequestToolMessageContent,
    ChatCompletionRequestUserMessage, ChatCompletionRequestUserMessageContent,
    ChatCompletionTool, ChatCompletionToolType, CreateChatCompletionRequest, FunctionCall,
    FunctionObject, ResponseFormat,
};
use async_trait::async_trait;

use crate::agent::message::{ChatMessage, ChatRequest, ChatResponse, Role};
use crate::agent::provider::{LlmProvider, ProviderFactory};
use crate::agent::tool::{ToolCall, ToolDefinition};
use crate::config::ModelConfig;
use crate::error::AgentError;

/// `OpenAI`-compatible LLM provider bound to one credential.
pub struct OpenAiProvider {
    client: Client<OpenAIConfig>,
}

impl OpenAiProvider {
    /// Creates a provider for the given API key, optionally overriding the
    /// API base URL.
    #[must_use]
    pub fn new(api_key: &str, base_url: Option<&str>) -> Self {
        let mut config = OpenAIConfig::new().with_api_key(api_key);
        if let Some(base) = base_url {
            config = config.with_api_base(base);
        }
        Self {
            client: Client::with_config(config),
        }
    }

    /// Lowers one of our messages into the SDK's per-role message type.
    fn sdk_message(msg: &ChatMessage) -> ChatCompletionRequestMessage {
        match msg.role {
            Role::System => Self::sdk_system(msg),
            Role::User => Self::sdk_user(msg),
            Role::Assistant => Self::sdk_assistant(msg),
            Role::Tool => Self::sdk_tool_result(msg),
        }
    }

    fn sdk_system(msg: &ChatMessage) -> ChatCompletionRequestMessage {
        ChatCompletionRequestMessage::System(ChatCompletionRequestSystemMessage {
            content: ChatCompletionRequestSystemMessageContent::Text(msg.content.clone()),
            name: None,
        })
    }

    fn sdk_user(msg: &ChatMessage) -> ChatCompletionRequestMessage {
        ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
            content: ChatCompletionRequestUserMessageContent::Text(msg.content.clone()),
            name: None,
        })
    }

    /// Assistant turns may carry text, tool calls, or both; empty parts
    /// are elided rather than sent as empty strings.
    fn sdk_assistant(msg: &ChatMessage) -> ChatCompletionRequestMessage {
        let content = (!msg.content.is_empty())
            .then(|| ChatCompletionRequestAssistantMessageContent::Text(msg.content.clone()));
        let tool_calls = (!msg.tool_calls.is_empty())
            .then(|| msg.tool_calls.iter().map(Self::sdk_tool_call).collect());

        #[allow(deprecated)]
        ChatCompletionRequestMessage::Assistant(ChatCompletionRequestAssistantMessage {
            content,
            tool_calls,
            name: None,
            refusal: None,
            audio: None,
            function_call: None,
        })
    }

    fn sdk_tool_result(msg: &ChatMessage) -> ChatCompletionRequestMessage {
        ChatCompletionRequestMessage::Tool(ChatCompletionRequestToolMessage {
            content: ChatCompletionRequestToolMessageContent::Text(msg.content.clone()),
            tool_call_id: msg.tool_call_id.clone().unwrap_or_default(),
        })
    }

    fn sdk_tool_call(call: &ToolCall) -> ChatCompletionMessageToolCall {
        ChatCompletionMessageToolCall {
            id: call.id.clone(),
            r#type: ChatCompletionToolType::Function,
            function: FunctionCall {
                name: call.name.clone(),
                arguments: call.arguments.clone(),
            },
        }
    }

    fn sdk_tool_definition(def: &ToolDefinition) -> ChatCompletionTool {
        ChatCompletionTool {
            r#type: ChatCompletionToolType::Function,
            function: FunctionObject {
                name: def.name.clone(),
                description: Some(def.description.clone()),
                parameters: Some(def.parameters.clone()),
                strict: None,
            },
        }
    }

    /// Lowers our generic request into the SDK request.
    fn sdk_request(request: &ChatRequest) -> CreateChatCompletionRequest {
        let mut out = CreateChatCompletionRequest {
            model: request.model.clone(),
            messages: request.messages.iter().map(Self::sdk_message).collect(),
            ..CreateChatCompletionRequest::default()
        };
        out.max_completion_tokens = request.max_tokens;
        // Zero temperature is elided so provider defaults apply.
        out.temperature = request.temperature.filter(|&t| t != 0.0);
        if request.json_mode {
            out.response_format = Some(ResponseFormat::JsonObject);
        }
        if !request.tools.is_empty() {
            out.tools = Some(request.tools.iter().map(Self::sdk_tool_definition).collect());
        }
        out
    }
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("client", &"<async-openai::Client>")
            .finish()
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, AgentError> {
        let response = self
            .client
            .chat()
            .create(Self::sdk_request(request))
            .await
            .map_err(|e| AgentError::ApiRequest {
                message: e.to_string(),
            })?;

        // Take the first choice by value; a choiceless reply becomes an
        // empty response rather than an error (the worker's sentinel
        // handling treats it like any other unusable answer).
        let Some(choice) = response.choices.into_iter().next() else {
            return Ok(ChatResponse {
                content: String::new(),
                tool_calls: Vec::new(),
                finish_reason: None,
            });
        };

        let finish_reason = choice
            .finish_reason
            .map(|fr| format!("{fr:?}").to_lowercase());
        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| ToolCall {
                id: tc.id,
                name: tc.function.name,
                arguments: tc.function.arguments,
            })
            .collect();

        Ok(ChatResponse {
            content: choice.message.content.unwrap_or_default(),
            tool_calls,
            finish_reason,
        })
    }
}

/// Factory for `OpenAI`-dialect providers.
///
/// Maps provider names from the rotation pool to their API base URLs. An
/// explicit base-URL override (proxy, gateway) wins and accepts any
/// provider name.
#[derive(Debug, Clone, Default)]
pub struct OpenAiCompatFactory {
    base_url_override: Option<String>,
}

impl OpenAiCompatFactory {
    /// Creates a factory, optionally overriding every provider's base URL.
    #[must_use]
    pub const fn new(base_url_override: Option<String>) -> Self {
        Self { base_url_override }
    }

    /// Default base URL for a known `OpenAI`-compatible backend.
    fn default_base_url(provider: &str) -> Option<Option<&'static str>> {
        match provider {
            "openai" => Some(None),
            "groq" => Some(Some("https://api.groq.com/openai/v1")),
            "openrouter" => Some(Some("https://openrouter.ai/api/v1")),
            "cerebras" => Some(Some("https://api.cerebras.ai/v1")),
            _ => None,
        }
    }
}

impl ProviderFactory for OpenAiCompatFactory {
    fn create(
        &self,
        model: &ModelConfig,
        credential: &str,
    ) -> Result<Box<dyn LlmProvider>, AgentError> {
        if let Some(base) = self.base_url_override.as_deref() {
            return Ok(Box::new(OpenAiProvider::new(credential, Some(base))));
        }
        match Self::default_base_url(&model.provider) {
            Some(base) => Ok(Box::new(OpenAiProvider::new(credential, base))),
            None => Err(AgentError::UnsupportedProvider {
                name: model.provider.clone(),
            }),
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::agent::message;

    fn model(provider: &str) -> ModelConfig {
        ModelConfig {
            provider: provider.to_string(),
            model_id: "m".to_string(),
            temperature: 0.0,
            max_tokens: None,
        }
    }

    #[test]
    fn test_sdk_message_roles() {
        let lowered = OpenAiProvider::sdk_message(&message::system_message("test"));
        assert!(matches!(lowered, ChatCompletionRequestMessage::System(_)));

        let lowered = OpenAiProvider::sdk_message(&message::user_message("hi"));
        assert!(matches!(lowered, ChatCompletionRequestMessage::User(_)));

        let lowered = OpenAiProvider::sdk_message(&message::tool_message("call_1", "out"));
        assert!(matches!(lowered, ChatCompletionRequestMessage::Tool(_)));
    }

    #[test]
    fn test_sdk_assistant_elides_empty_parts() {
        let msg = message::assistant_tool_calls_message(vec![ToolCall {
            id: "call_1".to_string(),
            name: "search_summaries".to_string(),
            arguments: r#"{"query":"treaty"}"#.to_string(),
        }]);
        let ChatCompletionRequestMessage::Assistant(a) = OpenAiProvider::sdk_message(&msg) else {
            panic!("Expected Assistant message");
        };
        // Tool-call-only turn: no content field at all.
        assert!(a.content.is_none());
        assert_eq!(a.tool_calls.as_ref().map_or(0, Vec::len), 1);
    }

    #[test]
    fn test_sdk_request_json_mode() {
        let request = ChatRequest {
            model: "m".to_string(),
            messages: vec![message::user_message("test")],
            temperature: Some(0.0),
            max_tokens: Some(100),
            json_mode: true,
            tools: Vec::new(),
        };
        let built = OpenAiProvider::sdk_request(&request);
        assert!(built.response_format.is_some());
        assert!(built.tools.is_none());
        assert_eq!(built.max_completion_tokens, Some(100));
        // Zero temperature is elided (provider defaults apply).
        assert!(built.temperature.is_none());
    }

    #[test]
    fn test_sdk_request_with_tools() {
        let request = ChatRequest {
            model: "m".to_string(),
            messages: vec![message::user_message("test")],
            temperature: Some(0.3),
            max_tokens: Some(100),
            json_mode: false,
            tools: vec![ToolDefinition {
                name: "examine_summary_node".to_string(),
                description: "Examine a node".to_string(),
                parameters: serde_json::json!({"type": "object", "properties": {}}),
            }],
        };
        let built = OpenAiProvider::sdk_request(&request);
        assert_eq!(built.tools.as_ref().map_or(0, Vec::len), 1);
        assert_eq!(built.temperature, Some(0.3));
        assert!(built.response_format.is_none());
    }

    #[test]
    fn test_factory_known_providers() {
        let factory = OpenAiCompatFactory::default();
        for provider in ["openai", "groq", "openrouter", "cerebras"] {
            assert!(
                factory.create(&model(provider), "key").is_ok(),
                "provider {provider} should be supported"
            );
        }
    }

    #[test]
    fn test_factory_unknown_provider() {
        let factory = OpenAiCompatFactory::default();
        let err = factory.create(&model("anthropic"), "key").unwrap_err();
        assert!(matches!(err, AgentError::UnsupportedProvider { .. }));
    }

    #[test]
    fn test_factory_override_accepts_any_provider() {
        let factory = OpenAiCompatFactory::new(Some("http://localhost:8080/v1".to_string()));
        assert!(factory.create(&model("anything"), "key").is_ok());
    }
}
