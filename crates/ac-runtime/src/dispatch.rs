//! The tool dispatch engine: normalize a batch, partition it by toolset
//! kind, launch everything concurrently, fan results in as they complete,
//! and merge back into call order.
//!
//! Grounded on the teacher's turn loop (`crates/gateway/src/runtime/turn.rs`,
//! the concurrent-dispatch-then-merge-in-call-order section) generalized
//! from a single flat tool registry to the toolset-partitioned (inline /
//! activity / agent-as-tool) shape the specification requires.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use futures_util::future::select_all;

use ac_engine::WorkflowContext;
use ac_types::{
    deterministic_tool_call_id, ArtifactsMode, ChildTracker, Event, PayloadValidation, Result,
    RetryHint, RetryReason, RunInput, ToolCallID, ToolRequest, ToolResult, ToolSpec, TurnID,
};

use crate::agent_tool;
use crate::confirmation::ConfirmationPolicy;
use crate::registry::Registry;
use crate::util::event_meta;

/// The runtime-owned toolset's single tool name, the rewrite target for
/// any call whose name isn't registered.
pub const TOOL_UNAVAILABLE_TOOL: &str = "tool_unavailable";

/// Per-batch context the dispatch engine needs beyond the calls themselves.
pub struct DispatchContext<'a> {
    pub run_input: &'a RunInput,
    pub turn_id: TurnID,
    pub attempt: u32,
    pub hard_deadline: DateTime<Utc>,
}

/// Rewrite any call naming an unregistered tool to `tool_unavailable`,
/// embedding the original request for the planner's retry hint (§4.5).
pub fn rewrite_unknown_tools(registry: &Registry, calls: Vec<ToolRequest>) -> Vec<ToolRequest> {
    calls
        .into_iter()
        .map(|mut call| {
            if registry.toolset_for_tool(&call.tool_name).is_none() {
                let requested_tool = call.tool_name.clone();
                let requested_payload = call.payload.clone();
                call.tool_name = TOOL_UNAVAILABLE_TOOL.to_string();
                call.payload = serde_json::json!({
                    "requested_tool": requested_tool,
                    "requested_payload": requested_payload,
                });
            }
            call
        })
        .collect()
}

/// Fill in missing `ToolCallID`s deterministically and default each call's
/// `ParentToolCallID` to the run's own parent link when unset (so a nested
/// run's tool events thread back to the call that spawned it).
fn normalize(dispatch_ctx: &DispatchContext<'_>, calls: Vec<ToolRequest>) -> Vec<ToolRequest> {
    calls
        .into_iter()
        .enumerate()
        .map(|(position, mut call)| {
            if call.tool_call_id.as_str().is_empty() {
                call.tool_call_id = deterministic_tool_call_id(
                    &dispatch_ctx.run_input.run_id,
                    &dispatch_ctx.turn_id,
                    dispatch_ctx.attempt,
                    &call.tool_name,
                    position,
                );
            }
            if call.parent_tool_call_id.is_none() {
                call.parent_tool_call_id = dispatch_ctx.run_input.parent_tool_call_id.clone();
            }
            call
        })
        .collect()
}

fn json_type_matches(value: &serde_json::Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true,
    }
}

/// Validate a payload against its tool spec's JSON Schema, synthesizing a
/// `RetryHint` the way a decode failure would (§4.3 "Retry hints"): a
/// missing required field or a type mismatch both surface as
/// `MissingFields`; an entirely absent payload surfaces as `$payload`
/// missing. Schema-less specs and specs without a `required` array accept
/// anything.
fn validate_payload(spec: &ToolSpec, payload: &serde_json::Value) -> Option<RetryHint> {
    let required = spec.payload_schema.get("required")?.as_array()?;
    if payload.is_null() {
        return Some(RetryHint {
            reason: RetryReason::MissingFields,
            tool: spec.name.clone(),
            missing_fields: vec!["$payload".into()],
            clarifying_question: Some("a payload is required".into()),
            example_input: Some(spec.example_payload.clone()),
            restrict_to_tool: None,
        });
    }
    let properties = spec.payload_schema.get("properties").and_then(|v| v.as_object());
    let object = payload.as_object()?;
    for field in required {
        let field_name = field.as_str()?;
        match object.get(field_name) {
            None => {
                return Some(RetryHint::missing_field(
                    spec.name.clone(),
                    field_name,
                    Some(spec.example_payload.clone()),
                ))
            }
            Some(value) => {
                let expected_type = properties
                    .and_then(|props| props.get(field_name))
                    .and_then(|p| p.get("type"))
                    .and_then(|t| t.as_str());
                if let Some(expected_type) = expected_type {
                    if !json_type_matches(value, expected_type) {
                        return Some(RetryHint::missing_field(
                            spec.name.clone(),
                            field_name,
                            Some(spec.example_payload.clone()),
                        ));
                    }
                }
            }
        }
    }
    None
}

/// Execute one tool call against the registry: validate at the activity
/// boundary (unless the toolset opted into `DecodeInExecutor`), run the
/// executor, and enforce the bounded-result contract. Shared by the
/// in-workflow inline path and the activity function the runtime registers
/// with the engine for activity-backed toolsets.
pub async fn execute_tool_request(registry: &Registry, request: ToolRequest) -> Result<ToolResult> {
    let spec = registry.tool_spec(&request.tool_name);
    if let Some(spec) = &spec {
        if matches!(spec.validation, PayloadValidation::AtActivityBoundary) {
            if let Some(hint) = validate_payload(spec, &request.payload) {
                let message = hint
                    .clarifying_question
                    .clone()
                    .unwrap_or_else(|| "invalid payload".to_string());
                return Ok(ToolResult::failed(
                    request.tool_call_id,
                    request.tool_name,
                    message,
                    Some(hint),
                ));
            }
        }
    }

    let executor = registry.executor_for_tool(&request.tool_name);
    let tool_call_id = request.tool_call_id.clone();
    let tool_name = request.tool_name.clone();
    let bounded = spec.as_ref().map(|s| s.bounded_result).unwrap_or(false);

    let result = executor
        .execute(request)
        .await
        .unwrap_or_else(|e| ToolResult::failed(tool_call_id.clone(), tool_name.clone(), e.to_string(), None));

    if !result.satisfies_bounded_contract(bounded) {
        return Ok(ToolResult::failed(
            tool_call_id,
            tool_name,
            "tool declared a bounded result but returned no bounds",
            None,
        ));
    }
    Ok(result)
}

type BoxToolResultFuture = Pin<Box<dyn Future<Output = Result<ToolResult>> + Send>>;

/// Launch, fan in, and merge one tool-call batch. `tracker` accumulates
/// this run's own discovered child tool-call IDs when this run is itself
/// an agent-as-tool child (growing the parent call's expected-children
/// count); unrelated to the nested child-workflow fan-out this function
/// performs for agent-as-tool calls within its own batch.
pub async fn dispatch_batch(
    ctx: &dyn WorkflowContext,
    registry: &Registry,
    dispatch_ctx: &DispatchContext<'_>,
    calls: Vec<ToolRequest>,
    tracker: &mut ChildTracker,
    confirmation: Option<&ConfirmationPolicy>,
) -> Result<Vec<ToolResult>> {
    let run_input = dispatch_ctx.run_input;
    let rewritten = rewrite_unknown_tools(registry, calls);
    let normalized = normalize(dispatch_ctx, rewritten);

    for request in &normalized {
        ctx.publish_hook(Event::ToolCallScheduled {
            meta: event_meta(ctx, &run_input.run_id, &run_input.agent_id, &run_input.session_id),
            tool_call_id: request.tool_call_id.clone(),
            parent_tool_call_id: request.parent_tool_call_id.clone(),
            tool_name: request.tool_name.clone(),
            payload: request.payload.clone(),
            queue: registry
                .toolset_for_tool(&request.tool_name)
                .and_then(|name| registry.toolset_registration(&name))
                .and_then(|toolset| toolset.task_queue),
            expected_children: tracker.expected_children(),
        })
        .await?;
    }

    tracker.register(normalized.iter().map(|r| r.tool_call_id.clone()));
    if tracker.take_dirty() {
        if let Some(parent_id) = &run_input.parent_tool_call_id {
            ctx.publish_hook(Event::ToolCallUpdated {
                meta: event_meta(ctx, &run_input.run_id, &run_input.agent_id, &run_input.session_id),
                tool_call_id: parent_id.clone(),
                expected_children: tracker.expected_children(),
            })
            .await?;
        }
    }

    let mut results: HashMap<ToolCallID, ToolResult> = HashMap::new();
    let mut activity_futures: Vec<(ToolCallID, BoxToolResultFuture)> = Vec::new();
    let mut child_calls: Vec<(ToolRequest, String, ac_types::AgentToolConfig, ac_engine::ChildWorkflowFuture)> =
        Vec::new();

    for request in normalized.iter().cloned() {
        if let Some(policy) = confirmation {
            if policy.requires_confirmation(&request.tool_name) {
                if let Some(denied) = policy.confirm(ctx, run_input, &request).await? {
                    ctx.publish_hook(Event::ToolResultReceived {
                        meta: event_meta(ctx, &run_input.run_id, &run_input.agent_id, &run_input.session_id),
                        result: denied.clone(),
                    })
                    .await?;
                    results.insert(request.tool_call_id.clone(), denied);
                    continue;
                }
            }
        }

        let toolset_name = registry.toolset_for_tool(&request.tool_name);
        let toolset = toolset_name.as_deref().and_then(|name| registry.toolset_registration(name));

        match toolset {
            Some(toolset) if toolset.agent_tool.is_some() => {
                let config = toolset.agent_tool.clone().expect("checked above");
                let future = agent_tool::start_child(ctx, registry, run_input, &request, &config).await?;
                child_calls.push((request, toolset.name.clone(), config, future));
            }
            Some(toolset) if toolset.inline => {
                let start = ctx.now();
                let mut result = execute_tool_request(registry, request.clone()).await?;
                result.telemetry.duration_ms = (ctx.now() - start).num_milliseconds().max(0) as u64;
                ctx.publish_hook(Event::ToolResultReceived {
                    meta: event_meta(ctx, &run_input.run_id, &run_input.agent_id, &run_input.session_id),
                    result: result.clone(),
                })
                .await?;
                results.insert(request.tool_call_id.clone(), result);
            }
            _ => {
                let tool_call_id = request.tool_call_id.clone();
                let future = ctx.execute_tool_activity_async(request);
                activity_futures.push((tool_call_id, Box::pin(future.get())));
            }
        }
    }

    // Collect activity-backed results as they complete (step 4).
    let mut ids: Vec<ToolCallID> = activity_futures.iter().map(|(id, _)| id.clone()).collect();
    let mut pending: Vec<BoxToolResultFuture> = activity_futures.into_iter().map(|(_, f)| f).collect();
    while !pending.is_empty() {
        let (outcome, index, remaining) = select_all(pending).await;
        let tool_call_id = ids.remove(index);
        let result = outcome.unwrap_or_else(|e| {
            ToolResult::failed(tool_call_id.clone(), "unknown".to_string(), e.to_string(), None)
        });
        ctx.publish_hook(Event::ToolResultReceived {
            meta: event_meta(ctx, &run_input.run_id, &run_input.agent_id, &run_input.session_id),
            result: result.clone(),
        })
        .await?;
        results.insert(tool_call_id, result);
        pending = remaining;
    }

    // Collect child-workflow results sequentially (step 5).
    for (request, toolset_name, config, future) in child_calls {
        let tool_call_id = request.tool_call_id.clone();
        let outcome = future.get().await;
        let result = agent_tool::adapt_result(registry, &toolset_name, &config, &request, outcome);
        ctx.publish_hook(Event::ToolResultReceived {
            meta: event_meta(ctx, &run_input.run_id, &run_input.agent_id, &run_input.session_id),
            result: result.clone(),
        })
        .await?;
        results.insert(tool_call_id, result);
    }

    // Merge in call order (step 6).
    let mut merged = Vec::with_capacity(normalized.len());
    for request in &normalized {
        let result = results.remove(&request.tool_call_id).ok_or_else(|| {
            ac_types::Error::Other(format!(
                "missing tool result for call '{}'",
                request.tool_call_id.as_str()
            ))
        })?;
        merged.push(result);
    }
    Ok(merged)
}

/// Whether `request.artifacts_mode` is satisfiable against a tool's
/// declared result schema. `Required` demands the spec declare a result
/// schema at all; `Requested`/`Off` never reject.
pub fn artifacts_mode_allowed(mode: ArtifactsMode, spec: Option<&ToolSpec>) -> bool {
    match mode {
        ArtifactsMode::Required => spec.map(|s| s.result_schema.is_some()).unwrap_or(false),
        ArtifactsMode::Requested | ArtifactsMode::Off => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Registry, ToolExecutor};
    use ac_types::{AgentID, SessionID, ToolsetRegistration};
    use async_trait::async_trait;
    use std::sync::Arc;

    fn run_input() -> RunInput {
        RunInput {
            agent_id: AgentID::new("svc.writer"),
            run_id: ac_types::RunID::new("run-1"),
            session_id: SessionID::new("sess-1"),
            turn_id: TurnID::new("turn-0"),
            parent_run_id: None,
            parent_agent_id: None,
            parent_tool_call_id: None,
            messages: vec![],
            workflow_options: Default::default(),
            policy: None,
        }
    }

    fn call(tool_name: &str) -> ToolRequest {
        ToolRequest {
            tool_call_id: ToolCallID::new(""),
            parent_tool_call_id: None,
            tool_name: tool_name.into(),
            payload: serde_json::json!({}),
            artifacts_mode: ArtifactsMode::Off,
            run_id: ac_types::RunID::new("run-1"),
            session_id: SessionID::new("sess-1"),
            turn_id: TurnID::new("turn-0"),
        }
    }

    #[test]
    fn rewrite_unknown_tool_embeds_original_request() {
        let registry = Registry::new();
        let calls = vec![call("svc.nonexistent")];
        let rewritten = rewrite_unknown_tools(&registry, calls);
        assert_eq!(rewritten[0].tool_name, TOOL_UNAVAILABLE_TOOL);
        assert_eq!(rewritten[0].payload["requested_tool"], "svc.nonexistent");
    }

    #[test]
    fn normalize_fills_missing_tool_call_ids_deterministically() {
        let input = run_input();
        let dispatch_ctx = DispatchContext {
            run_input: &input,
            turn_id: TurnID::new("turn-0"),
            attempt: 0,
            hard_deadline: Utc::now(),
        };
        let calls = vec![call("svc.a"), call("svc.b")];
        let normalized = normalize(&dispatch_ctx, calls);
        assert_ne!(normalized[0].tool_call_id, normalized[1].tool_call_id);
        assert!(!normalized[0].tool_call_id.as_str().is_empty());
    }

    #[test]
    fn validate_payload_flags_missing_required_field() {
        let mut spec = ToolSpec::new("svc.echo", "svc.tools");
        spec.payload_schema = serde_json::json!({
            "type": "object",
            "required": ["text"],
            "properties": {"text": {"type": "string"}}
        });
        spec.example_payload = serde_json::json!({"text": "hi"});
        let hint = validate_payload(&spec, &serde_json::json!({})).unwrap();
        assert_eq!(hint.reason, RetryReason::MissingFields);
        assert_eq!(hint.missing_fields, vec!["text".to_string()]);
    }

    #[test]
    fn validate_payload_flags_type_mismatch() {
        let mut spec = ToolSpec::new("svc.echo", "svc.tools");
        spec.payload_schema = serde_json::json!({
            "required": ["count"],
            "properties": {"count": {"type": "integer"}}
        });
        let hint = validate_payload(&spec, &serde_json::json!({"count": "not-a-number"}));
        assert!(hint.is_some());
    }

    #[test]
    fn validate_payload_accepts_matching_payload() {
        let mut spec = ToolSpec::new("svc.echo", "svc.tools");
        spec.payload_schema = serde_json::json!({
            "required": ["text"],
            "properties": {"text": {"type": "string"}}
        });
        assert!(validate_payload(&spec, &serde_json::json!({"text": "hi"})).is_none());
    }

    struct EchoExecutor;
    #[async_trait]
    impl ToolExecutor for EchoExecutor {
        async fn execute(&self, request: ToolRequest) -> Result<ToolResult> {
            Ok(ToolResult::ok(request.tool_call_id, request.tool_name, request.payload))
        }
    }

    #[tokio::test]
    async fn execute_tool_request_runs_registered_executor() {
        let registry = Registry::new();
        registry
            .register_toolset(
                ToolsetRegistration {
                    name: "svc.tools".into(),
                    inline: true,
                    task_queue: None,
                    specs: vec![ToolSpec::new("svc.echo", "svc.tools")],
                    agent_tool: None,
                },
                Arc::new(EchoExecutor),
            )
            .unwrap();
        let result = execute_tool_request(&registry, call("svc.echo")).await.unwrap();
        assert!(!result.is_err());
    }

    #[test]
    fn artifacts_required_rejects_spec_without_result_schema() {
        let spec = ToolSpec::new("svc.echo", "svc.tools");
        assert!(!artifacts_mode_allowed(ArtifactsMode::Required, Some(&spec)));
    }
}
