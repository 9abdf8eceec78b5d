//! Agentic tool-calling loop for the `query` command.
//!
//! Alternates between the model and the navigator: every reply that
//! requests tools gets its calls executed and the results appended to the
//! conversation, and the next model call sees the grown transcript. The
//! loop ends when a reply carries plain text, or when the call budget is
//! spent.

use tracing::{debug, trace};

use super::executor::ToolExecutor;
use super::message::{ChatRequest, ChatResponse, assistant_tool_calls_message, tool_message};
use super::provider::LlmProvider;
use crate::error::AgentError;

/// Drives the model ⇄ navigator round-trip until a final text answer.
///
/// `request` is mutated in place: each round appends the assistant's tool
/// calls and one tool message per result, so the transcript the model sees
/// is the full navigation history. `max_iterations` bounds the number of
/// model calls.
///
/// # Errors
///
/// Returns [`AgentError::ToolLoopExceeded`] when the budget runs out with
/// the model still asking for tools. Provider errors propagate.
#[allow(clippy::future_not_send)]
pub async fn agentic_loop(
    provider: &dyn LlmProvider,
    request: &mut ChatRequest,
    executor: &ToolExecutor<'_>,
    max_iterations: usize,
) -> Result<ChatResponse, AgentError> {
    let mut calls_left = max_iterations;

    while calls_left > 0 {
        calls_left -= 1;
        let response = provider.chat(request).await?;

        if response.tool_calls.is_empty() {
            debug!(
                rounds = max_iterations - calls_left,
                "navigation finished with a text answer"
            );
            return Ok(response);
        }

        let tool_calls = response.tool_calls;
        debug!(
            requested = tool_calls.len(),
            calls_left, "model asked for navigation tools"
        );
        request
            .messages
            .push(assistant_tool_calls_message(tool_calls.clone()));

        for call in tool_calls {
            let result = executor.execute(&call).await;
            if result.is_error {
                debug!(tool = %call.name, "tool call rejected: {}", result.content);
            } else {
                trace!(tool = %call.name, id = %call.id, "tool call served");
            }
            request
                .messages
                .push(tool_message(&result.tool_call_id, &result.content));
        }
    }

    Err(AgentError::ToolLoopExceeded { max_iterations })
}
