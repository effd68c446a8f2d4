//! Agent-as-tool: building the nested call, starting the child workflow,
//! and adapting its `RunOutput` back into a `ToolResult`.
//!
//! Message-builder precedence (template > text > payload-to-string) is
//! grounded on the teacher's prompt-assembly helpers in
//! `crates/gateway/src/runtime/agent.rs::run_agent`, generalized from a
//! single fixed prompt shape to the registration-driven builders the
//! specification requires. `{{.field}}` substitution is hand-rolled with
//! `regex` since no templating crate is available in the workspace.

use ac_engine::{ChildRoute, ChildWorkflowFuture, WorkflowContext};
use ac_types::{
    nested_run_id_for_tool_call, AgentToolConfig, Error, Message, Result, RunInput, RunOutput,
    ToolRequest, ToolResult, ToolTelemetry, WorkflowOptions,
};
use regex::Regex;

use crate::registry::Registry;
use crate::HOOK_ACTIVITY_NAME;

/// Render a `{{.field}}` template against a JSON payload. Missing fields
/// render as empty; non-string values render via their JSON text form.
fn render_template(template: &str, payload: &serde_json::Value) -> String {
    let pattern = Regex::new(r"\{\{\s*\.([A-Za-z0-9_]+)\s*\}\}").expect("static pattern is valid");
    pattern
        .replace_all(template, |caps: &regex::Captures| field_to_string(payload, &caps[1]))
        .into_owned()
}

fn field_to_string(payload: &serde_json::Value, field: &str) -> String {
    match payload.get(field) {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

fn payload_to_string(payload: &serde_json::Value) -> String {
    match payload {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Render the user message for one agent-as-tool call: template keyed by
/// tool name, else text keyed by tool name, else the payload stringified.
fn render_user_message(config: &AgentToolConfig, tool_name: &str, payload: &serde_json::Value) -> String {
    if let Some(template) = config.templates.get(tool_name) {
        render_template(template, payload)
    } else if let Some(text) = config.texts.get(tool_name) {
        text.clone()
    } else {
        payload_to_string(payload)
    }
}

/// Build the nested message list: optional system prompt, then the
/// rendered user message.
pub fn build_messages(config: &AgentToolConfig, tool_name: &str, payload: &serde_json::Value) -> Vec<Message> {
    let mut messages = Vec::with_capacity(2);
    if let Some(system_prompt) = &config.system_prompt {
        messages.push(Message::system(system_prompt.clone()));
    }
    messages.push(Message::user(render_user_message(config, tool_name, payload)));
    messages
}

/// Start one agent-as-tool child workflow. Call sites launch every
/// concurrent agent-as-tool call in a batch before awaiting any of them
/// (the fan-out guarantee), so this only starts — it never awaits.
pub async fn start_child(
    ctx: &dyn WorkflowContext,
    registry: &Registry,
    parent: &RunInput,
    request: &ToolRequest,
    config: &AgentToolConfig,
) -> Result<ChildWorkflowFuture> {
    let nested_agent = registry
        .agent(&config.agent_id)
        .ok_or_else(|| Error::AgentNotFound(config.agent_id.to_string()))?;

    let messages = build_messages(config, &request.tool_name, &request.payload);
    let run_id = nested_run_id_for_tool_call(&parent.run_id, &request.tool_name, &request.tool_call_id);
    let task_queue = config
        .default_task_queue
        .clone()
        .or_else(|| Some(nested_agent.workflow.queue.clone()));

    let nested_input = RunInput {
        agent_id: config.agent_id.clone(),
        run_id,
        session_id: parent.session_id.clone(),
        turn_id: request.turn_id.clone(),
        parent_run_id: Some(parent.run_id.clone()),
        parent_agent_id: Some(parent.agent_id.clone()),
        parent_tool_call_id: Some(request.tool_call_id.clone()),
        messages,
        workflow_options: WorkflowOptions {
            task_queue: task_queue.clone(),
            ..WorkflowOptions::default()
        },
        policy: None,
    };

    let route = ChildRoute {
        workflow_name: config.workflow_name.clone(),
        task_queue,
        plan_activity_name: nested_agent.activity_names.plan.clone(),
        execute_tool_activity_name: nested_agent.activity_names.execute_tool.clone(),
        hook_activity_name: HOOK_ACTIVITY_NAME.to_string(),
    };

    ctx.start_child_workflow(nested_input, route).await
}

/// `JSONOnly` default aggregation: one nested tool event passes through its
/// raw result; several become an ordered array; none falls back to the
/// nested final message text. Error propagates only when every nested tool
/// failed.
fn adapt_json_only(request: &ToolRequest, run_output: &RunOutput) -> ToolResult {
    let events = &run_output.tool_events;
    let mut telemetry = ToolTelemetry::default();
    for event in events {
        telemetry.merge(&event.telemetry);
    }

    let (result, error) = if events.is_empty() {
        (
            serde_json::Value::String(run_output.r#final.content.extract_all_text()),
            None,
        )
    } else if events.len() == 1 {
        (events[0].result.clone(), events[0].error.clone())
    } else {
        let all_failed = events.iter().all(ToolResult::is_err);
        let array = serde_json::Value::Array(events.iter().map(|e| e.result.clone()).collect());
        let error = if all_failed {
            events.last().and_then(|e| e.error.clone())
        } else {
            None
        };
        (array, error)
    };

    ToolResult {
        tool_call_id: request.tool_call_id.clone(),
        tool_name: request.tool_name.clone(),
        result,
        bounds: None,
        artifacts: Default::default(),
        telemetry,
        error,
        retry_hint: None,
    }
}

/// Non-`JSONOnly` fallback: the nested run's final prose becomes the tool
/// result verbatim.
fn adapt_prose(request: &ToolRequest, run_output: &RunOutput) -> ToolResult {
    ToolResult::ok(
        request.tool_call_id.clone(),
        request.tool_name.clone(),
        serde_json::Value::String(run_output.r#final.content.extract_all_text()),
    )
}

/// Adapt a child workflow's outcome into the `ToolResult` for its parent
/// call: a registered custom aggregator first, falling back to the
/// `JSONOnly`/prose defaults on its absence or on the child run's failure.
pub fn adapt_result(
    registry: &Registry,
    toolset_name: &str,
    config: &AgentToolConfig,
    request: &ToolRequest,
    outcome: Result<RunOutput>,
) -> ToolResult {
    match outcome {
        Ok(run_output) => {
            if let Some(aggregator) = registry.aggregator(toolset_name) {
                if let Some(result) = aggregator(request, &run_output) {
                    return result;
                }
            }
            if config.json_only {
                adapt_json_only(request, &run_output)
            } else {
                adapt_prose(request, &run_output)
            }
        }
        Err(e) => ToolResult::failed(request.tool_call_id.clone(), request.tool_name.clone(), e.to_string(), None),
    }
}
