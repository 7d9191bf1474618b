use anyhow::Result;
use tracing::{debug, warn};

use crate::llm::{Generation, LlmClient, LlmMessage, LlmRequest};
use crate::tools::ToolRegistry;

/// Generation rounds allowed before giving up on a final text answer.
pub const MAX_TOOL_ROUNDS: usize = 10;

/// Generates until the model answers with text, executing requested tools between rounds.
/// When the rounds run out the last text seen is returned, possibly empty.
pub async fn run_tool_loop(
    client: &dyn LlmClient,
    mut request: LlmRequest,
    tools: &ToolRegistry,
) -> Result<String> {
    let mut last_text = String::new();

    for round in 0..MAX_TOOL_ROUNDS {
        let (calls, text) = match client.generate(&request).await? {
            Generation::Text(text) => return Ok(text),
            Generation::ToolCalls { calls, text } => (calls, text),
        };
        if let Some(text) = text {
            last_text = text;
        }

        request.messages.push(LlmMessage::ToolCalls(calls.clone()));
        for call in calls {
            debug!(event_name = "tool.call", round, tool = %call.name, "dispatching tool call");
            let output = tools.dispatch(&call.name, call.arguments).await;
            request
                .messages
                .push(LlmMessage::ToolResult { call_id: call.id, content: output.to_string() });
        }
    }

    warn!(
        event_name = "tool.loop_exhausted",
        rounds = MAX_TOOL_ROUNDS,
        "model kept calling tools; using last text"
    );
    Ok(last_text)
}
