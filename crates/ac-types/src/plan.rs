//! `PlanResult` — the sum type a planner returns each turn.
//!
//! Modelled as a struct of optional fields rather than a tagged enum because
//! the valid combinations are not mutually exclusive: tool calls and an
//! await can both be present (run the batch, then pause).

use serde::{Deserialize, Serialize};

use crate::message::Message;
use crate::tool::ToolRequest;

/// Planner's decision for this turn.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PlanResult {
    /// Terminate the run with this assistant message.
    pub final_response: Option<Message>,
    /// Continue with this batch of tool calls.
    #[serde(default)]
    pub tool_calls: Vec<ToolRequest>,
    /// Pause and await external input.
    pub r#await: Option<AwaitSpec>,
}

impl PlanResult {
    pub fn final_response(message: Message) -> Self {
        Self {
            final_response: Some(message),
            ..Default::default()
        }
    }

    pub fn tool_calls(calls: Vec<ToolRequest>) -> Self {
        Self {
            tool_calls: calls,
            ..Default::default()
        }
    }

    pub fn is_await_only(&self) -> bool {
        self.r#await.is_some() && self.tool_calls.is_empty() && self.final_response.is_none()
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// What the planner is waiting on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwaitSpec {
    pub reason: String,
    pub prompt: Option<String>,
}
