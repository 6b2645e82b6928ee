//! Tool-bridge helpers for argument validation and tool execution.

use std::{sync::Arc, time::Duration};

use forkchat_ai::{ToolCall, ToolDefinition};
use jsonschema::validator_for;
use serde_json::{json, Value};

use crate::{AgentTool, ToolExecutionResult};

pub(crate) async fn execute_tool_call(
    call: ToolCall,
    registered: Option<Arc<dyn AgentTool>>,
    tool_timeout: Option<Duration>,
) -> ToolExecutionResult {
    let Some(tool) = registered else {
        return ToolExecutionResult::error(json!({
            "error": format!("Tool '{}' is not registered", call.name)
        }));
    };

    let definition = tool.definition();
    if let Err(error) = validate_tool_arguments(&definition, &call.arguments) {
        return ToolExecutionResult::error(json!({ "error": error }));
    }

    match tool_timeout {
        Some(timeout) => match tokio::time::timeout(timeout, tool.execute(call.arguments)).await {
            Ok(result) => result,
            Err(_) => ToolExecutionResult::error(json!({
                "error": format!(
                    "tool '{}' timed out after {}ms",
                    definition.name,
                    timeout.as_millis()
                )
            })),
        },
        None => tool.execute(call.arguments).await,
    }
}

pub(crate) fn validate_tool_arguments(
    definition: &ToolDefinition,
    arguments: &Value,
) -> Result<(), String> {
    let validator = validator_for(&definition.parameters)
        .map_err(|error| format!("invalid JSON schema for '{}': {error}", definition.name))?;

    let mut errors = validator.iter_errors(arguments);
    if let Some(first) = errors.next() {
        return Err(format!(
            "invalid arguments for '{}': {}",
            definition.name, first
        ));
    }

    Ok(())
}
