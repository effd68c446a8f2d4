//! The abstract `Engine` + `WorkflowContext` adaptation layer.
//!
//! This is the seam a production durable-workflow backend (Temporal-like)
//! plugs into. Rather than mirror the spec's generic `Future[T]`/`Receiver[T]`
//! literally — which has no idiomatic object-safe Rust shape — the two
//! concrete future kinds the runtime actually needs (tool activities, child
//! workflows) are modelled as their own handle types, and signal payloads as
//! a closed `Signal` enum received through a generic `Receiver<Signal>`.
//! Recorded as an Open Question resolution in `DESIGN.md`.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ac_types::{
    AgentID, ActivityOptions, Event, PlanResult, RunID, RunInput, RunOutput, ToolCallID,
    ToolRequest, ToolResult,
};

/// Input to a planner activity invocation: the messages accumulated so far
/// plus whatever resumption payload a prior `Await`/tool-batch produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerActivityInput {
    pub run_input: RunInput,
    pub resume_payload: Option<serde_json::Value>,
    pub prior_tool_results: Vec<ToolResult>,
}

/// Where to route a workflow start (top-level or child), plus the activity
/// names its registration resolved.
#[derive(Debug, Clone)]
pub struct ChildRoute {
    pub workflow_name: String,
    pub task_queue: Option<String>,
    pub plan_activity_name: String,
    pub execute_tool_activity_name: String,
    pub hook_activity_name: String,
}

/// Signal payloads deliverable into a running workflow by `RunID`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Signal {
    Pause,
    Resume { payload: Option<serde_json::Value> },
    ProvideClarification { payload: serde_json::Value },
    ProvideToolResults { results: Vec<ToolResult> },
    ProvideConfirmation { tool_call_id: ToolCallID, approved: bool },
}

/// A handle to an asynchronously-scheduled tool activity.
pub struct ActivityFuture {
    pub(crate) task_call_id: ToolCallID,
    pub(crate) inner: tokio::task::JoinHandle<ac_types::Result<ToolResult>>,
}

impl ActivityFuture {
    pub fn tool_call_id(&self) -> &ToolCallID {
        &self.task_call_id
    }

    pub fn is_ready(&self) -> bool {
        self.inner.is_finished()
    }

    pub async fn get(self) -> ac_types::Result<ToolResult> {
        match self.inner.await {
            Ok(result) => result,
            Err(join_err) => Err(ac_types::Error::Other(format!(
                "activity task panicked: {join_err}"
            ))),
        }
    }
}

/// A handle to a started child workflow (agent-as-tool).
pub struct ChildWorkflowFuture {
    pub(crate) tool_call_id: ToolCallID,
    pub(crate) inner: tokio::task::JoinHandle<ac_types::Result<RunOutput>>,
}

impl ChildWorkflowFuture {
    pub fn tool_call_id(&self) -> &ToolCallID {
        &self.tool_call_id
    }

    pub fn is_ready(&self) -> bool {
        self.inner.is_finished()
    }

    pub async fn get(self) -> ac_types::Result<RunOutput> {
        match self.inner.await {
            Ok(result) => result,
            Err(join_err) => Err(ac_types::Error::Other(format!(
                "child workflow task panicked: {join_err}"
            ))),
        }
    }
}

/// Replay-safe typed receiver over a signal-delivery channel.
pub struct Receiver<T> {
    inner: tokio::sync::mpsc::UnboundedReceiver<T>,
}

impl<T> Receiver<T> {
    pub fn new(inner: tokio::sync::mpsc::UnboundedReceiver<T>) -> Self {
        Self { inner }
    }

    pub async fn receive(&mut self) -> Option<T> {
        self.inner.recv().await
    }

    pub async fn receive_with_timeout(&mut self, timeout: Duration) -> Option<T> {
        tokio::time::timeout(timeout, self.inner.recv())
            .await
            .ok()
            .flatten()
    }

    pub fn receive_async(&mut self) -> Option<T> {
        self.inner.try_recv().ok()
    }
}

/// A replay-safe timer handle.
pub struct TimerHandle {
    inner: tokio::time::Sleep,
}

impl TimerHandle {
    pub async fn fire(self) {
        self.inner.await
    }
}

/// Abstract durable-workflow engine. A production implementation backs this
/// with a real workflow service; [`crate::memory_engine::MemoryEngine`] is
/// the in-process default used for development and tests.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Register a workflow handler under a name (idempotent for the
    /// in-memory engine; a production engine typically requires this at
    /// worker start-up).
    fn register_workflow(&self, name: &str);

    fn register_planner_activity(&self, name: &str);
    fn register_execute_tool_activity(&self, name: &str);
    fn register_hook_activity(&self, name: &str);

    /// Start a new top-level or nested workflow execution.
    async fn start_workflow(&self, input: RunInput, route: ChildRoute) -> ac_types::Result<()>;

    /// Deliver a signal to a running workflow by `RunID`. Engines without
    /// signal support may return `EngineNotConfigured`.
    async fn signal_by_id(&self, run_id: &RunID, signal: Signal) -> ac_types::Result<()>;

    /// Cancel a running workflow by `RunID`. Idempotent: not-found is `Ok(())`.
    async fn cancel_by_id(&self, run_id: &RunID) -> ac_types::Result<()>;

    /// Default activity options registered per activity name.
    fn activity_defaults(&self, activity_name: &str) -> Option<ActivityOptions>;
}

/// Per-run workflow execution context — the single-threaded, deterministic
/// side of the two-layer scheduling model.
#[async_trait]
pub trait WorkflowContext: Send + Sync {
    /// Workflow-deterministic wall-clock time (never `SystemTime::now()`
    /// directly — replay must observe the same value every time).
    fn now(&self) -> DateTime<Utc>;

    /// Block until `predicate` returns `true`, re-evaluated whenever new
    /// signals or completions arrive. Replay-safe.
    async fn r#await(&self, predicate: &dyn Fn() -> bool);

    async fn new_timer(&self, duration: chrono::Duration) -> TimerHandle;

    async fn execute_planner_activity(
        &self,
        agent_id: &AgentID,
        input: PlannerActivityInput,
    ) -> ac_types::Result<PlanResult>;

    fn execute_tool_activity_async(&self, request: ToolRequest) -> ActivityFuture;

    async fn start_child_workflow(
        &self,
        input: RunInput,
        route: ChildRoute,
    ) -> ac_types::Result<ChildWorkflowFuture>;

    async fn publish_hook(&self, event: Event) -> ac_types::Result<()>;

    /// The five signal receivers exposed to the workflow loop.
    fn pause_signals(&self) -> &tokio::sync::Mutex<Receiver<()>>;
    fn resume_signals(&self) -> &tokio::sync::Mutex<Receiver<Option<serde_json::Value>>>;
    fn clarification_signals(&self) -> &tokio::sync::Mutex<Receiver<serde_json::Value>>;
    fn tool_result_signals(&self) -> &tokio::sync::Mutex<Receiver<Vec<ToolResult>>>;
    fn confirmation_signals(&self) -> &tokio::sync::Mutex<Receiver<(ToolCallID, bool)>>;

    /// Per-activity-name default options, merged by the runtime with
    /// per-call overrides and the dynamic deadline-derived timeout.
    fn activity_defaults(&self, activity_name: &str) -> Option<ActivityOptions>;

    /// A context detached from the parent's cancellation scope (used for
    /// best-effort work that must outlive the parent's own cancellation,
    /// e.g. flushing a final hook event).
    fn detached(&self) -> std::sync::Arc<dyn WorkflowContext>;
}

/// Accounting helper: merges a map of named activity defaults the way both
/// `Engine::activity_defaults` and `WorkflowContext::activity_defaults`
/// implementations are expected to be backed by.
#[derive(Debug, Clone, Default)]
pub struct ActivityDefaultsTable(pub HashMap<String, ActivityOptions>);

impl ActivityDefaultsTable {
    pub fn get(&self, name: &str) -> Option<ActivityOptions> {
        self.0.get(name).copied()
    }

    pub fn set(&mut self, name: impl Into<String>, options: ActivityOptions) {
        self.0.insert(name.into(), options);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn receiver_receive_async_is_non_blocking() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let mut receiver = Receiver::new(rx);
        assert!(receiver.receive_async().is_none());
        tx.send(Signal::Pause).unwrap();
        assert!(matches!(receiver.receive_async(), Some(Signal::Pause)));
    }

    #[test]
    fn activity_defaults_table_round_trips() {
        let mut table = ActivityDefaultsTable::default();
        table.set(
            "plan",
            ActivityOptions {
                schedule_to_start_ms: None,
                start_to_close_ms: Some(30_000),
            },
        );
        assert_eq!(
            table.get("plan").unwrap().start_to_close_ms,
            Some(30_000)
        );
        assert!(table.get("resume").is_none());
    }
}
