//! Tool specs, requests, and results — the data shapes flowing through the
//! dispatch engine. Distinct from [`crate::message::ToolCall`]/`ToolDefinition`,
//! which are the planner-facing wire shapes; these are the runtime's internal
//! contract for launching and fanning in a tool call.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::ids::{RunID, SessionID, ToolCallID, TurnID};

/// Where a tool call's payload is validated against its JSON schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PayloadValidation {
    #[default]
    AtActivityBoundary,
    DecodeInExecutor,
}

/// Static description of a single tool's payload/result codec.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub toolset: String,
    pub payload_schema: serde_json::Value,
    pub example_payload: serde_json::Value,
    pub result_schema: Option<serde_json::Value>,
    pub bounded_result: bool,
    pub is_agent_tool: bool,
    pub agent_id: Option<String>,
    #[serde(default)]
    pub validation: PayloadValidation,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, toolset: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            toolset: toolset.into(),
            payload_schema: serde_json::json!({}),
            example_payload: serde_json::Value::Null,
            result_schema: None,
            bounded_result: false,
            is_agent_tool: false,
            agent_id: None,
            validation: PayloadValidation::default(),
        }
    }
}

/// Whether artifacts should be requested/returned for a tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ArtifactsMode {
    #[default]
    Off,
    Requested,
    Required,
}

/// A single tool call queued for dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRequest {
    pub tool_call_id: ToolCallID,
    pub parent_tool_call_id: Option<ToolCallID>,
    pub tool_name: String,
    pub payload: serde_json::Value,
    pub artifacts_mode: ArtifactsMode,
    pub run_id: RunID,
    pub session_id: SessionID,
    pub turn_id: TurnID,
}

/// Numeric bounds a bounded-result tool must declare (e.g. a page range).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bounds {
    pub start: i64,
    pub end: i64,
    pub total: Option<i64>,
}

/// Per-call telemetry attached to a finished tool result.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ToolTelemetry {
    pub duration_ms: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl ToolTelemetry {
    pub fn merge(&mut self, other: &ToolTelemetry) {
        self.duration_ms += other.duration_ms;
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
    }
}

/// Reason a [`RetryHint`] is being offered to the planner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryReason {
    MissingFields,
    InvalidArguments,
    ToolUnavailable,
    ToolRejected,
}

/// Structured guidance from the runtime to the planner about how to amend a
/// failed call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryHint {
    pub reason: RetryReason,
    pub tool: String,
    #[serde(default)]
    pub missing_fields: Vec<String>,
    pub clarifying_question: Option<String>,
    pub example_input: Option<serde_json::Value>,
    pub restrict_to_tool: Option<String>,
}

impl RetryHint {
    pub fn tool_unavailable(tool: impl Into<String>) -> Self {
        let tool = tool.into();
        Self {
            reason: RetryReason::ToolUnavailable,
            clarifying_question: Some(format!(
                "\"{tool}\" is not a registered tool; choose one of the registered tools instead."
            )),
            tool,
            missing_fields: Vec::new(),
            example_input: None,
            restrict_to_tool: None,
        }
    }

    pub fn missing_field(
        tool: impl Into<String>,
        field: impl Into<String>,
        example_input: Option<serde_json::Value>,
    ) -> Self {
        let field = field.into();
        Self {
            reason: RetryReason::MissingFields,
            clarifying_question: Some(format!("the \"{field}\" field is required")),
            tool: tool.into(),
            missing_fields: vec![field],
            example_input,
            restrict_to_tool: None,
        }
    }
}

/// Result of executing one tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: ToolCallID,
    pub tool_name: String,
    pub result: serde_json::Value,
    pub bounds: Option<Bounds>,
    pub artifacts: HashMap<String, serde_json::Value>,
    pub telemetry: ToolTelemetry,
    pub error: Option<String>,
    pub retry_hint: Option<RetryHint>,
}

impl ToolResult {
    pub fn ok(tool_call_id: ToolCallID, tool_name: impl Into<String>, result: serde_json::Value) -> Self {
        Self {
            tool_call_id,
            tool_name: tool_name.into(),
            result,
            bounds: None,
            artifacts: HashMap::new(),
            telemetry: ToolTelemetry::default(),
            error: None,
            retry_hint: None,
        }
    }

    pub fn failed(
        tool_call_id: ToolCallID,
        tool_name: impl Into<String>,
        error: impl Into<String>,
        retry_hint: Option<RetryHint>,
    ) -> Self {
        Self {
            tool_call_id,
            tool_name: tool_name.into(),
            result: serde_json::Value::Null,
            bounds: None,
            artifacts: HashMap::new(),
            telemetry: ToolTelemetry::default(),
            error: Some(error.into()),
            retry_hint,
        }
    }

    pub fn is_err(&self) -> bool {
        self.error.is_some()
    }

    /// Enforces `BoundedResult = true ∧ Error = nil ⇒ Bounds ≠ nil`.
    pub fn satisfies_bounded_contract(&self, bounded_result: bool) -> bool {
        if bounded_result && self.error.is_none() {
            self.bounds.is_some()
        } else {
            true
        }
    }
}
