//! Hook events — the closed sum of everything the runtime publishes to the
//! hook bus. Every variant carries `run_id`/`agent_id`/`session_id` and a
//! millisecond timestamp so subscribers never need to look anything up.

use serde::{Deserialize, Serialize};

use crate::ids::{AgentID, RunID, SessionID, ToolCallID};
use crate::message::Message;
use crate::run::RunCompleted;
use crate::tool::ToolResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMeta {
    pub run_id: RunID,
    pub agent_id: AgentID,
    pub session_id: SessionID,
    pub ts_ms: i64,
}

/// One entry in the hook event stream. Tagged by `kind` so subscribers can
/// match on the discriminator without downcasting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Event {
    RunStarted {
        meta: EventMeta,
    },
    RunPaused {
        meta: EventMeta,
    },
    RunResumed {
        meta: EventMeta,
    },
    RunCompleted {
        meta: EventMeta,
        completed: RunCompleted,
    },
    ToolCallScheduled {
        meta: EventMeta,
        tool_call_id: ToolCallID,
        parent_tool_call_id: Option<ToolCallID>,
        tool_name: String,
        payload: serde_json::Value,
        queue: Option<String>,
        expected_children: usize,
    },
    ToolCallUpdated {
        meta: EventMeta,
        tool_call_id: ToolCallID,
        expected_children: usize,
    },
    ToolResultReceived {
        meta: EventMeta,
        result: ToolResult,
    },
    AgentRunStarted {
        meta: EventMeta,
        child_agent_id: AgentID,
        child_run_id: RunID,
        parent_tool_call_id: ToolCallID,
    },
    AssistantMessage {
        meta: EventMeta,
        message: Message,
    },
    ThinkingBlock {
        meta: EventMeta,
        text: String,
    },
    PlannerNote {
        meta: EventMeta,
        note: String,
    },
    PolicyDecision {
        meta: EventMeta,
        description: String,
        allowed: bool,
    },
    AwaitRequested {
        meta: EventMeta,
        reason: String,
        prompt: Option<String>,
    },
}

impl Event {
    pub fn meta(&self) -> &EventMeta {
        match self {
            Event::RunStarted { meta }
            | Event::RunPaused { meta }
            | Event::RunResumed { meta }
            | Event::RunCompleted { meta, .. }
            | Event::ToolCallScheduled { meta, .. }
            | Event::ToolCallUpdated { meta, .. }
            | Event::ToolResultReceived { meta, .. }
            | Event::AgentRunStarted { meta, .. }
            | Event::AssistantMessage { meta, .. }
            | Event::ThinkingBlock { meta, .. }
            | Event::PlannerNote { meta, .. }
            | Event::PolicyDecision { meta, .. }
            | Event::AwaitRequested { meta, .. } => meta,
        }
    }

    /// The `ParentToolCallID` a memory subscriber checks against the
    /// suppression set, if this event kind carries one.
    pub fn parent_tool_call_id(&self) -> Option<&ToolCallID> {
        match self {
            Event::ToolCallScheduled {
                parent_tool_call_id,
                ..
            } => parent_tool_call_id.as_ref(),
            Event::AgentRunStarted {
                parent_tool_call_id,
                ..
            } => Some(parent_tool_call_id),
            _ => None,
        }
    }
}
