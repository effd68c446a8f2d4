//! Run-level data: inputs, outputs, status, caps, and usage accounting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::ids::{AgentID, RunID, SessionID, ToolCallID, TurnID};
use crate::message::Message;
use crate::tool::ToolResult;

/// Options carried on `WorkflowOptions` (task queue, memo, search attrs, retry).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WorkflowOptions {
    pub task_queue: Option<String>,
    #[serde(default)]
    pub memo: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub search_attributes: HashMap<String, serde_json::Value>,
    pub retry: Option<crate::retry::RetryPolicy>,
}

/// Per-run policy overrides layered over agent-level defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunPolicy {
    pub per_turn_max_tool_calls: Option<u32>,
    pub run_max_tool_calls: Option<u32>,
    pub run_max_consecutive_failed_tool_calls: Option<u32>,
    pub run_time_budget: Option<chrono::Duration>,
    pub run_finalizer_grace: Option<chrono::Duration>,
    pub run_interrupts_allowed: bool,
    pub restrict_to_tool: Option<String>,
    pub allowed_tags: Vec<String>,
    pub denied_tags: Vec<String>,
}

impl Default for RunPolicy {
    fn default() -> Self {
        Self {
            per_turn_max_tool_calls: None,
            run_max_tool_calls: None,
            run_max_consecutive_failed_tool_calls: None,
            run_time_budget: Some(chrono::Duration::minutes(10)),
            run_finalizer_grace: Some(chrono::Duration::seconds(20)),
            run_interrupts_allowed: true,
            restrict_to_tool: None,
            allowed_tags: Vec::new(),
            denied_tags: Vec::new(),
        }
    }
}

/// The input to a single run (top-level or nested agent-as-tool).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunInput {
    pub agent_id: AgentID,
    pub run_id: RunID,
    pub session_id: SessionID,
    pub turn_id: TurnID,
    pub parent_run_id: Option<RunID>,
    pub parent_agent_id: Option<AgentID>,
    pub parent_tool_call_id: Option<ToolCallID>,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub workflow_options: WorkflowOptions,
    pub policy: Option<RunPolicy>,
}

/// Aggregated token usage for a run (or nested child, once rolled up).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl Usage {
    pub fn merge(&mut self, other: &Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
    }
}

/// The output of a completed run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutput {
    pub r#final: Message,
    pub tool_events: Vec<ToolResult>,
    pub agg_usage: Usage,
}

/// Status of a run, mirrored in `RunMeta` and used by the session projector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Canceled,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Canceled
        )
    }
}

/// Why a run terminated (carried on the `RunCompleted` hook event).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    PlannerFinalized,
    TimeBudget,
    ToolCallsCap,
    ConsecutiveFailures,
    Canceled,
}

/// User-visible payload of a terminal `RunCompleted` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunCompleted {
    pub status: RunOutcome,
    pub public_error: Option<String>,
    pub provider: Option<String>,
    pub operation: Option<String>,
    pub kind: Option<String>,
    pub code: Option<String>,
    pub http_status: Option<u16>,
    pub retryable: bool,
    pub reason: Option<TerminationReason>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Success,
    Failed,
    Canceled,
}

/// Metadata upserted into the session store's `RunMeta` record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMeta {
    pub agent_id: AgentID,
    pub run_id: RunID,
    pub session_id: SessionID,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub labels: HashMap<String, String>,
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Per-run mutable counters evaluated by the consecutive-failure breaker and
/// the tool-call cap.
#[derive(Debug, Clone, Copy)]
pub struct CapsState {
    pub remaining_tool_calls: Option<u32>,
    pub consecutive_failed_tool_calls: u32,
}

impl CapsState {
    pub fn from_policy(policy: &RunPolicy) -> Self {
        Self {
            remaining_tool_calls: policy.run_max_tool_calls,
            consecutive_failed_tool_calls: 0,
        }
    }

    /// Deduct `n` from the remaining budget; returns `false` if the cap is
    /// already exhausted (caller must finalize instead of dispatching).
    pub fn try_consume(&mut self, n: u32) -> bool {
        match self.remaining_tool_calls {
            None => true,
            Some(remaining) => {
                if remaining == 0 {
                    false
                } else {
                    self.remaining_tool_calls = Some(remaining.saturating_sub(n));
                    true
                }
            }
        }
    }

    /// Apply the outcome of one tool-batch: reset the streak on any success,
    /// otherwise increment. Returns `true` if the consecutive-failure cap
    /// (when configured) has now been exceeded.
    pub fn record_batch_outcome(&mut self, any_success: bool, max_consecutive_failures: Option<u32>) -> bool {
        if any_success {
            self.consecutive_failed_tool_calls = 0;
        } else {
            self.consecutive_failed_tool_calls += 1;
        }
        match max_consecutive_failures {
            Some(max) if max > 0 => self.consecutive_failed_tool_calls > max,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caps_state_exhausts_at_zero() {
        let policy = RunPolicy {
            run_max_tool_calls: Some(1),
            ..RunPolicy::default()
        };
        let mut caps = CapsState::from_policy(&policy);
        assert!(caps.try_consume(1));
        assert!(!caps.try_consume(1));
    }

    #[test]
    fn caps_state_unbounded_when_no_cap_set() {
        let policy = RunPolicy::default();
        let mut caps = CapsState::from_policy(&policy);
        assert!(caps.try_consume(100));
    }

    #[test]
    fn consecutive_failure_breaker_trips_past_max() {
        let mut caps = CapsState {
            remaining_tool_calls: None,
            consecutive_failed_tool_calls: 0,
        };
        assert!(!caps.record_batch_outcome(false, Some(1)));
        assert!(caps.record_batch_outcome(false, Some(1)));
    }

    #[test]
    fn success_resets_consecutive_failure_streak() {
        let mut caps = CapsState {
            remaining_tool_calls: None,
            consecutive_failed_tool_calls: 3,
        };
        caps.record_batch_outcome(true, Some(1));
        assert_eq!(caps.consecutive_failed_tool_calls, 0);
    }

    #[test]
    fn run_status_terminal_set() {
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Canceled.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(!RunStatus::Paused.is_terminal());
    }

    #[test]
    fn usage_merge_sums_tokens() {
        let mut a = Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
        };
        a.merge(&Usage {
            prompt_tokens: 2,
            completion_tokens: 1,
        });
        assert_eq!(a.prompt_tokens, 12);
        assert_eq!(a.completion_tokens, 6);
    }
}
