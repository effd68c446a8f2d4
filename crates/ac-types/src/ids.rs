//! Stable string identifiers and their deterministic derivation rules.
//!
//! Every identifier in the system is a thin newtype over `String` rather than
//! a UUID: run and tool-call IDs must be reproducible under workflow replay,
//! so they are derived from parent context rather than minted randomly where
//! determinism matters (`nested_run_id`, `deterministic_tool_call_id`).

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! string_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(AgentID, "`service.agent` — the registered name of an agent.");
string_id!(ToolID, "`service.toolset.tool` — the fully-qualified name of a tool.");
string_id!(RunID, "Unique identifier of a single run (one child-workflow instance).");
string_id!(SessionID, "Identifier of the durable container a run belongs to.");
string_id!(TurnID, "Identifier of one planner invocation plus its tool batch.");
string_id!(ToolCallID, "Identifier of one scheduled tool call within a run.");

/// Generate a fresh top-level `RunID` for a newly submitted run.
///
/// Mirrors `generateRunID(agentID) = agentID + "-" + uniqueSuffix` — the
/// suffix is random because a top-level run has no deterministic parent
/// context to derive from.
pub fn generate_run_id(agent_id: &AgentID) -> RunID {
    RunID::new(format!("{}-{}", agent_id.as_str(), Uuid::new_v4().simple()))
}

/// Derive a nested `RunID` for an agent-as-tool child workflow.
///
/// Deterministic: replaying the same parent run, tool name, and parent
/// tool-call must always yield the same child `RunID`.
pub fn nested_run_id(parent_run_id: &RunID, tool_name: &str) -> RunID {
    RunID::new(format!("{}/child/{}", parent_run_id.as_str(), tool_name))
}

/// Derive a nested `RunID` scoped to one specific parent tool call, for when
/// several agent-as-tool calls to the same tool occur within a run.
pub fn nested_run_id_for_tool_call(
    parent_run_id: &RunID,
    tool_name: &str,
    parent_tool_call_id: &ToolCallID,
) -> RunID {
    RunID::new(format!(
        "{}/child/{}/{}",
        parent_run_id.as_str(),
        tool_name,
        parent_tool_call_id.as_str()
    ))
}

/// Derive a deterministic `ToolCallID` when the planner omits one.
///
/// `f(runID, turnID, attempt, toolName, positionInBatch)` — stable under
/// replay because every input is itself deterministic.
pub fn deterministic_tool_call_id(
    run_id: &RunID,
    turn_id: &TurnID,
    attempt: u32,
    tool_name: &str,
    position_in_batch: usize,
) -> ToolCallID {
    ToolCallID::new(format!(
        "{}:{}:{}:{}:{}",
        run_id.as_str(),
        turn_id.as_str(),
        attempt,
        tool_name,
        position_in_batch
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_run_id_is_deterministic() {
        let parent = RunID::new("agent-abc123");
        let a = nested_run_id(&parent, "svc.research");
        let b = nested_run_id(&parent, "svc.research");
        assert_eq!(a, b);
    }

    #[test]
    fn nested_run_id_for_tool_call_differs_per_call() {
        let parent = RunID::new("agent-abc123");
        let call_a = ToolCallID::new("call-1");
        let call_b = ToolCallID::new("call-2");
        let a = nested_run_id_for_tool_call(&parent, "svc.research", &call_a);
        let b = nested_run_id_for_tool_call(&parent, "svc.research", &call_b);
        assert_ne!(a, b);
    }

    #[test]
    fn deterministic_tool_call_id_is_stable_under_replay() {
        let run_id = RunID::new("agent-abc123");
        let turn_id = TurnID::new("turn-0");
        let a = deterministic_tool_call_id(&run_id, &turn_id, 0, "exec", 2);
        let b = deterministic_tool_call_id(&run_id, &turn_id, 0, "exec", 2);
        assert_eq!(a, b);
    }

    #[test]
    fn deterministic_tool_call_id_varies_by_position() {
        let run_id = RunID::new("agent-abc123");
        let turn_id = TurnID::new("turn-0");
        let first = deterministic_tool_call_id(&run_id, &turn_id, 0, "exec", 0);
        let second = deterministic_tool_call_id(&run_id, &turn_id, 0, "exec", 1);
        assert_ne!(first, second);
    }

    #[test]
    fn generate_run_id_prefixes_with_agent_id() {
        let agent_id = AgentID::new("svc.writer");
        let run_id = generate_run_id(&agent_id);
        assert!(run_id.as_str().starts_with("svc.writer-"));
    }
}
