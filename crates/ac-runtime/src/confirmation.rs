//! Per-tool confirmation policy (§4.7): pause before executing a configured
//! tool, publish a confirmation request, and await the caller's decision.
//!
//! Grounded on the teacher's interactive-approval prompt in
//! `crates/gateway/src/runtime/agent.rs` (the "confirm before running a
//! destructive tool" branch), generalized to a registration-time policy
//! keyed by tool name instead of a single hardcoded prompt.

use std::collections::HashMap;

use ac_engine::WorkflowContext;
use ac_types::{Event, Result, RunInput, ToolCallID, ToolRequest, ToolResult};

use crate::util::event_meta;

/// One tool's confirmation handlers. Both builders are required: validation
/// panics on a handler registered with either missing, since a confirmation
/// entry with no denied-result builder has no way to synthesize the
/// "denied" `ToolResult` (§7's carve-out for programmer-error panics).
pub struct ConfirmationHandler {
    pub prompt: Box<dyn Fn(&ToolRequest) -> String + Send + Sync>,
    pub denied_result: Box<dyn Fn(&ToolRequest) -> serde_json::Value + Send + Sync>,
}

impl ConfirmationHandler {
    pub fn new(
        prompt: impl Fn(&ToolRequest) -> String + Send + Sync + 'static,
        denied_result: impl Fn(&ToolRequest) -> serde_json::Value + Send + Sync + 'static,
    ) -> Self {
        Self {
            prompt: Box::new(prompt),
            denied_result: Box::new(denied_result),
        }
    }
}

/// Tools requiring confirmation before execution, keyed by tool name.
#[derive(Default)]
pub struct ConfirmationPolicy {
    handlers: HashMap<String, ConfirmationHandler>,
}

impl ConfirmationPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool's confirmation handler. `ConfirmationHandler::new`
    /// requires both a prompt builder and a denied-result builder, so a
    /// handler with either missing cannot be constructed at all — the
    /// registration-time panic §7 describes for this case is enforced by
    /// the type itself rather than a runtime check here.
    pub fn register(&mut self, tool_name: impl Into<String>, handler: ConfirmationHandler) {
        self.handlers.insert(tool_name.into(), handler);
    }

    pub fn requires_confirmation(&self, tool_name: &str) -> bool {
        self.handlers.contains_key(tool_name)
    }

    /// Pause the run, publish the confirmation prompt, and await the
    /// caller's decision. On denial, synthesizes the configured
    /// denied-value `ToolResult` (no `Error`). On approval, returns `None`
    /// so the caller proceeds with normal dispatch.
    pub async fn confirm(
        &self,
        ctx: &dyn WorkflowContext,
        run_input: &RunInput,
        request: &ToolRequest,
    ) -> Result<Option<ToolResult>> {
        let Some(handler) = self.handlers.get(&request.tool_name) else {
            return Ok(None);
        };

        let prompt = (handler.prompt)(request);
        ctx.publish_hook(Event::AwaitRequested {
            meta: event_meta(ctx, &run_input.run_id, &run_input.agent_id, &run_input.session_id),
            reason: "confirmation".into(),
            prompt: Some(prompt),
        })
        .await?;
        ctx.publish_hook(Event::RunPaused {
            meta: event_meta(ctx, &run_input.run_id, &run_input.agent_id, &run_input.session_id),
        })
        .await?;

        let decision: Option<(ToolCallID, bool)> = ctx.confirmation_signals().lock().await.receive().await;
        ctx.publish_hook(Event::RunResumed {
            meta: event_meta(ctx, &run_input.run_id, &run_input.agent_id, &run_input.session_id),
        })
        .await?;

        match decision {
            Some((_, true)) | None => Ok(None),
            Some((_, false)) => Ok(Some(ToolResult::ok(
                request.tool_call_id.clone(),
                request.tool_name.clone(),
                (handler.denied_result)(request),
            ))),
        }
    }
}
