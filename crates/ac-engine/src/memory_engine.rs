//! `MemoryEngine` — the in-process default `Engine` implementation.
//!
//! Runs workflows and activities as plain tokio tasks on the current
//! process. Useful for development, tests, and embedders who don't need
//! cross-process durability. A production deployment swaps this out for an
//! `Engine` implementation backed by a real durable-workflow service; this
//! crate never assumes one exists.
//!
//! Grounded on the teacher's `CancelMap`/`CancelToken` pattern
//! (`crates/gateway/src/runtime/cancel.rs`) for signal/cancellation routing,
//! generalized from a single cancel-bool to the five typed signal channels
//! the specification requires.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::{mpsc, Mutex};

use ac_types::{
    ActivityOptions, AgentID, Event, PlanResult, RunID, RunInput, RunOutput, ToolCallID,
    ToolRequest, ToolResult,
};

use crate::context::{
    ActivityFuture, ChildRoute, ChildWorkflowFuture, Engine, PlannerActivityInput, Receiver,
    Signal, TimerHandle, WorkflowContext,
};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub type WorkflowFn =
    Arc<dyn Fn(RunInput, Arc<dyn WorkflowContext>) -> BoxFuture<'static, ac_types::Result<RunOutput>> + Send + Sync>;
pub type PlannerActivityFn =
    Arc<dyn Fn(PlannerActivityInput) -> BoxFuture<'static, ac_types::Result<PlanResult>> + Send + Sync>;
pub type ExecuteToolActivityFn =
    Arc<dyn Fn(ToolRequest) -> BoxFuture<'static, ac_types::Result<ToolResult>> + Send + Sync>;
pub type HookActivityFn = Arc<dyn Fn(Event) -> BoxFuture<'static, ac_types::Result<()>> + Send + Sync>;

struct RunHandle {
    pause_tx: mpsc::UnboundedSender<()>,
    resume_tx: mpsc::UnboundedSender<Option<serde_json::Value>>,
    clarification_tx: mpsc::UnboundedSender<serde_json::Value>,
    tool_results_tx: mpsc::UnboundedSender<Vec<ToolResult>>,
    confirmation_tx: mpsc::UnboundedSender<(ToolCallID, bool)>,
    cancel: Arc<tokio::sync::Notify>,
    cancelled: Arc<std::sync::atomic::AtomicBool>,
    join: tokio::task::JoinHandle<ac_types::Result<RunOutput>>,
}

#[derive(Default)]
struct Registry {
    workflows: HashMap<String, WorkflowFn>,
    planner_activities: HashMap<String, PlannerActivityFn>,
    execute_tool_activities: HashMap<String, ExecuteToolActivityFn>,
    hook_activities: HashMap<String, HookActivityFn>,
    activity_defaults: HashMap<String, ActivityOptions>,
}

/// In-process, non-durable default engine.
pub struct MemoryEngine {
    registry: RwLock<Registry>,
    runs: RwLock<HashMap<RunID, RunHandle>>,
    self_ref: std::sync::Weak<MemoryEngine>,
}

impl Default for Arc<MemoryEngine> {
    fn default() -> Self {
        MemoryEngine::new()
    }
}

impl MemoryEngine {
    /// Constructs the engine behind an `Arc`, wiring a weak self-reference
    /// so `&self` methods (as required by the `Engine` trait) can still
    /// hand out an owned `Arc<MemoryEngine>` to child contexts.
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            registry: RwLock::new(Registry::default()),
            runs: RwLock::new(HashMap::new()),
            self_ref: weak.clone(),
        })
    }

    fn arc(&self) -> Arc<Self> {
        self.self_ref
            .upgrade()
            .expect("MemoryEngine dropped while still in use")
    }

    pub fn register_workflow_fn(&self, name: &str, f: WorkflowFn) {
        self.registry.write().workflows.insert(name.to_string(), f);
    }

    pub fn register_planner_activity_fn(&self, name: &str, f: PlannerActivityFn) {
        self.registry
            .write()
            .planner_activities
            .insert(name.to_string(), f);
    }

    pub fn register_execute_tool_activity_fn(&self, name: &str, f: ExecuteToolActivityFn) {
        self.registry
            .write()
            .execute_tool_activities
            .insert(name.to_string(), f);
    }

    pub fn register_hook_activity_fn(&self, name: &str, f: HookActivityFn) {
        self.registry
            .write()
            .hook_activities
            .insert(name.to_string(), f);
    }

    pub fn set_activity_defaults(&self, name: &str, options: ActivityOptions) {
        self.registry
            .write()
            .activity_defaults
            .insert(name.to_string(), options);
    }

    fn planner_fn(&self, name: &str) -> Option<PlannerActivityFn> {
        self.registry.read().planner_activities.get(name).cloned()
    }

    fn execute_tool_fn(&self, name: &str) -> Option<ExecuteToolActivityFn> {
        self.registry
            .read()
            .execute_tool_activities
            .get(name)
            .cloned()
    }

    fn hook_fn(&self, name: &str) -> Option<HookActivityFn> {
        self.registry.read().hook_activities.get(name).cloned()
    }

    /// Build a `WorkflowContext` for a run, wired to this engine and
    /// carrying the four activity names the run's `AgentRegistration`
    /// resolved (plan/resume share one activity slot in-memory; resume is
    /// modelled as a planner-activity invocation carrying a resume payload).
    pub fn new_context(
        &self,
        run_id: RunID,
        agent_id: AgentID,
        plan_activity_name: String,
        execute_tool_activity_name: String,
        hook_activity_name: String,
    ) -> (Arc<dyn WorkflowContext>, RunSignalSenders) {
        let (pause_tx, pause_rx) = mpsc::unbounded_channel();
        let (resume_tx, resume_rx) = mpsc::unbounded_channel();
        let (clarification_tx, clarification_rx) = mpsc::unbounded_channel();
        let (tool_results_tx, tool_results_rx) = mpsc::unbounded_channel();
        let (confirmation_tx, confirmation_rx) = mpsc::unbounded_channel();

        let ctx = MemoryWorkflowContext {
            engine: self.arc(),
            run_id,
            agent_id,
            plan_activity_name,
            execute_tool_activity_name,
            hook_activity_name,
            pause_rx: Mutex::new(Receiver::new(pause_rx)),
            resume_rx: Mutex::new(Receiver::new(resume_rx)),
            clarification_rx: Mutex::new(Receiver::new(clarification_rx)),
            tool_results_rx: Mutex::new(Receiver::new(tool_results_rx)),
            confirmation_rx: Mutex::new(Receiver::new(confirmation_rx)),
            cancel_notify: Arc::new(tokio::sync::Notify::new()),
            cancelled: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        };

        let senders = RunSignalSenders {
            pause_tx,
            resume_tx,
            clarification_tx,
            tool_results_tx,
            confirmation_tx,
            cancel: ctx.cancel_notify.clone(),
            cancelled: ctx.cancelled.clone(),
        };

        (Arc::new(ctx), senders)
    }

    /// Register a running workflow's signal senders/cancel handle/join
    /// handle so `signal_by_id`/`cancel_by_id` can address it.
    pub fn track_run(
        &self,
        run_id: RunID,
        senders: RunSignalSenders,
        join: tokio::task::JoinHandle<ac_types::Result<RunOutput>>,
    ) {
        self.runs.write().insert(
            run_id,
            RunHandle {
                pause_tx: senders.pause_tx,
                resume_tx: senders.resume_tx,
                clarification_tx: senders.clarification_tx,
                tool_results_tx: senders.tool_results_tx,
                confirmation_tx: senders.confirmation_tx,
                cancel: senders.cancel,
                cancelled: senders.cancelled,
                join,
            },
        );
    }

    pub fn forget_run(&self, run_id: &RunID) {
        self.runs.write().remove(run_id);
    }

    /// Await a tracked run's completion and remove it from the tracking
    /// table. Used by the runtime's blocking `Run` entry point, which needs
    /// the output `start_workflow` itself doesn't return.
    pub async fn join_run(&self, run_id: &RunID) -> ac_types::Result<RunOutput> {
        let join = {
            let mut runs = self.runs.write();
            runs.remove(run_id).map(|handle| handle.join)
        };
        let Some(join) = join else {
            return Err(ac_types::Error::Other(format!(
                "no tracked run '{}'",
                run_id.as_str()
            )));
        };
        join.await
            .unwrap_or_else(|e| Err(ac_types::Error::Other(format!("run task panicked: {e}"))))
    }
}

pub struct RunSignalSenders {
    pause_tx: mpsc::UnboundedSender<()>,
    resume_tx: mpsc::UnboundedSender<Option<serde_json::Value>>,
    clarification_tx: mpsc::UnboundedSender<serde_json::Value>,
    tool_results_tx: mpsc::UnboundedSender<Vec<ToolResult>>,
    confirmation_tx: mpsc::UnboundedSender<(ToolCallID, bool)>,
    cancel: Arc<tokio::sync::Notify>,
    cancelled: Arc<std::sync::atomic::AtomicBool>,
}

#[async_trait]
impl Engine for MemoryEngine {
    fn register_workflow(&self, _name: &str) {
        // In-memory engine resolves workflows lazily by name at start time;
        // nothing to pre-register beyond `register_workflow_fn`.
    }

    fn register_planner_activity(&self, _name: &str) {}
    fn register_execute_tool_activity(&self, _name: &str) {}
    fn register_hook_activity(&self, _name: &str) {}

    async fn start_workflow(&self, input: RunInput, route: ChildRoute) -> ac_types::Result<()> {
        let workflow_fn = {
            let registry = self.registry.read();
            registry.workflows.get(&route.workflow_name).cloned()
        };
        let workflow_fn = workflow_fn.ok_or_else(|| {
            ac_types::Error::WorkflowStartFailed(format!(
                "no workflow registered under '{}'",
                route.workflow_name
            ))
        })?;
        let (ctx, senders) = self.new_context(
            input.run_id.clone(),
            input.agent_id.clone(),
            route.plan_activity_name.clone(),
            route.execute_tool_activity_name.clone(),
            route.hook_activity_name.clone(),
        );
        let run_id = input.run_id.clone();
        let join = tokio::spawn(async move { workflow_fn(input, ctx).await });
        self.track_run(run_id, senders, join);
        Ok(())
    }

    async fn signal_by_id(&self, run_id: &RunID, signal: Signal) -> ac_types::Result<()> {
        let runs = self.runs.read();
        let Some(handle) = runs.get(run_id) else {
            return Ok(());
        };
        match signal {
            Signal::Pause => {
                let _ = handle.pause_tx.send(());
            }
            Signal::Resume { payload } => {
                let _ = handle.resume_tx.send(payload);
            }
            Signal::ProvideClarification { payload } => {
                let _ = handle.clarification_tx.send(payload);
            }
            Signal::ProvideToolResults { results } => {
                let _ = handle.tool_results_tx.send(results);
            }
            Signal::ProvideConfirmation {
                tool_call_id,
                approved,
            } => {
                let _ = handle.confirmation_tx.send((tool_call_id, approved));
            }
        }
        Ok(())
    }

    async fn cancel_by_id(&self, run_id: &RunID) -> ac_types::Result<()> {
        let runs = self.runs.read();
        if let Some(handle) = runs.get(run_id) {
            handle
                .cancelled
                .store(true, std::sync::atomic::Ordering::SeqCst);
            handle.cancel.notify_waiters();
        }
        // Idempotent: not-found is not an error.
        Ok(())
    }

    fn activity_defaults(&self, activity_name: &str) -> Option<ActivityOptions> {
        self.registry
            .read()
            .activity_defaults
            .get(activity_name)
            .copied()
    }
}

struct MemoryWorkflowContext {
    engine: Arc<MemoryEngine>,
    run_id: RunID,
    agent_id: AgentID,
    plan_activity_name: String,
    execute_tool_activity_name: String,
    hook_activity_name: String,
    pause_rx: Mutex<Receiver<()>>,
    resume_rx: Mutex<Receiver<Option<serde_json::Value>>>,
    clarification_rx: Mutex<Receiver<serde_json::Value>>,
    tool_results_rx: Mutex<Receiver<Vec<ToolResult>>>,
    confirmation_rx: Mutex<Receiver<(ToolCallID, bool)>>,
    cancel_notify: Arc<tokio::sync::Notify>,
    cancelled: Arc<std::sync::atomic::AtomicBool>,
}

#[async_trait]
impl WorkflowContext for MemoryWorkflowContext {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn r#await(&self, predicate: &dyn Fn() -> bool) {
        while !predicate() {
            if self.cancelled.load(std::sync::atomic::Ordering::SeqCst) {
                return;
            }
            tokio::select! {
                _ = self.cancel_notify.notified() => return,
                _ = tokio::time::sleep(std::time::Duration::from_millis(10)) => {}
            }
        }
    }

    async fn new_timer(&self, duration: chrono::Duration) -> TimerHandle {
        let std_duration = duration.to_std().unwrap_or(std::time::Duration::ZERO);
        TimerHandle {
            inner: tokio::time::sleep(std_duration),
        }
    }

    async fn execute_planner_activity(
        &self,
        _agent_id: &AgentID,
        input: PlannerActivityInput,
    ) -> ac_types::Result<PlanResult> {
        let planner_fn = self
            .engine
            .planner_fn(&self.plan_activity_name)
            .ok_or_else(|| {
                ac_types::Error::EngineNotConfigured
            })?;
        planner_fn(input).await
    }

    fn execute_tool_activity_async(&self, request: ToolRequest) -> ActivityFuture {
        let tool_call_id = request.tool_call_id.clone();
        let execute_fn = self.engine.execute_tool_fn(&self.execute_tool_activity_name);
        let inner = tokio::spawn(async move {
            match execute_fn {
                Some(f) => f(request).await,
                None => Err(ac_types::Error::EngineNotConfigured),
            }
        });
        ActivityFuture {
            task_call_id: tool_call_id,
            inner,
        }
    }

    async fn start_child_workflow(
        &self,
        input: RunInput,
        route: ChildRoute,
    ) -> ac_types::Result<ChildWorkflowFuture> {
        let workflow_fn = {
            let registry = self.engine.registry.read();
            registry.workflows.get(&route.workflow_name).cloned()
        };
        let workflow_fn = workflow_fn.ok_or_else(|| {
            ac_types::Error::WorkflowStartFailed(format!(
                "no workflow registered under '{}'",
                route.workflow_name
            ))
        })?;
        let tool_call_id = input
            .parent_tool_call_id
            .clone()
            .unwrap_or_else(|| ToolCallID::new(input.run_id.as_str()));

        let (child_ctx, senders) = self.engine.new_context(
            input.run_id.clone(),
            input.agent_id.clone(),
            route.plan_activity_name.clone(),
            route.execute_tool_activity_name.clone(),
            route.hook_activity_name.clone(),
        );
        let run_id_for_tracking = input.run_id.clone();
        let join = tokio::spawn({
            let input = input.clone();
            async move { workflow_fn(input, child_ctx).await }
        });
        self.engine.track_run(run_id_for_tracking, senders, join);

        // The join handle above is now owned by `track_run`'s registry; the
        // caller awaits completion through a second spawn that polls the
        // tracked run so `ChildWorkflowFuture::get` observes the same
        // result without taking ownership of the original handle twice.
        let run_id = input.run_id.clone();
        let engine = self.engine.clone();
        let waiter = tokio::spawn(async move {
            loop {
                let finished = {
                    let runs = engine.runs.read();
                    runs.get(&run_id).map(|h| h.join.is_finished())
                };
                match finished {
                    Some(true) | None => break,
                    _ => tokio::time::sleep(std::time::Duration::from_millis(5)).await,
                }
            }
            let mut runs = engine.runs.write();
            if let Some(handle) = runs.remove(&run_id) {
                handle.join.await.unwrap_or_else(|e| {
                    Err(ac_types::Error::Other(format!(
                        "child workflow task panicked: {e}"
                    )))
                })
            } else {
                Err(ac_types::Error::Other("child workflow run lost".into()))
            }
        });

        Ok(ChildWorkflowFuture {
            tool_call_id,
            inner: waiter,
        })
    }

    async fn publish_hook(&self, event: Event) -> ac_types::Result<()> {
        if let Some(hook_fn) = self.engine.hook_fn(&self.hook_activity_name) {
            hook_fn(event).await
        } else {
            Ok(())
        }
    }

    fn pause_signals(&self) -> &Mutex<Receiver<()>> {
        &self.pause_rx
    }

    fn resume_signals(&self) -> &Mutex<Receiver<Option<serde_json::Value>>> {
        &self.resume_rx
    }

    fn clarification_signals(&self) -> &Mutex<Receiver<serde_json::Value>> {
        &self.clarification_rx
    }

    fn tool_result_signals(&self) -> &Mutex<Receiver<Vec<ToolResult>>> {
        &self.tool_results_rx
    }

    fn confirmation_signals(&self) -> &Mutex<Receiver<(ToolCallID, bool)>> {
        &self.confirmation_rx
    }

    fn activity_defaults(&self, activity_name: &str) -> Option<ActivityOptions> {
        self.engine.activity_defaults(activity_name)
    }

    fn detached(&self) -> Arc<dyn WorkflowContext> {
        let (ctx, _senders) = self.engine.new_context(
            self.run_id.clone(),
            self.agent_id.clone(),
            self.plan_activity_name.clone(),
            self.execute_tool_activity_name.clone(),
            self.hook_activity_name.clone(),
        );
        ctx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ac_types::{Message, RunInput, SessionID, TurnID, WorkflowOptions};

    fn run_input() -> RunInput {
        RunInput {
            agent_id: AgentID::new("svc.writer"),
            run_id: RunID::new("run-1"),
            session_id: SessionID::new("sess-1"),
            turn_id: TurnID::new("turn-0"),
            parent_run_id: None,
            parent_agent_id: None,
            parent_tool_call_id: None,
            messages: vec![Message::user("hi")],
            workflow_options: WorkflowOptions::default(),
            policy: None,
        }
    }

    #[tokio::test]
    async fn execute_tool_activity_runs_registered_fn() {
        let engine = MemoryEngine::new();
        engine.register_execute_tool_activity_fn(
            "execute_tool",
            Arc::new(|req: ToolRequest| {
                Box::pin(async move {
                    Ok(ToolResult::ok(req.tool_call_id, req.tool_name, serde_json::json!("ok")))
                })
            }),
        );
        let (ctx, _senders) = engine.new_context(
            RunID::new("run-1"),
            AgentID::new("svc.writer"),
            "plan".into(),
            "execute_tool".into(),
            "hook".into(),
        );
        let request = ToolRequest {
            tool_call_id: ToolCallID::new("call-1"),
            parent_tool_call_id: None,
            tool_name: "svc.echo".into(),
            payload: serde_json::json!({}),
            artifacts_mode: ac_types::ArtifactsMode::Off,
            run_id: RunID::new("run-1"),
            session_id: SessionID::new("sess-1"),
            turn_id: TurnID::new("turn-0"),
        };
        let result = ctx.execute_tool_activity_async(request).get().await.unwrap();
        assert!(!result.is_err());
    }

    #[tokio::test]
    async fn signal_by_id_is_noop_for_unknown_run() {
        let engine = MemoryEngine::new();
        let result = engine
            .signal_by_id(&RunID::new("missing"), Signal::Pause)
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn cancel_by_id_is_idempotent_for_unknown_run() {
        let engine = MemoryEngine::new();
        assert!(engine.cancel_by_id(&RunID::new("missing")).await.is_ok());
        assert!(engine.cancel_by_id(&RunID::new("missing")).await.is_ok());
    }

    #[tokio::test]
    async fn planner_activity_without_registration_errors() {
        let engine = MemoryEngine::new();
        let (ctx, _senders) = engine.new_context(
            RunID::new("run-1"),
            AgentID::new("svc.writer"),
            "plan".into(),
            "execute_tool".into(),
            "hook".into(),
        );
        let result = ctx
            .execute_planner_activity(
                &AgentID::new("svc.writer"),
                PlannerActivityInput {
                    run_input: run_input(),
                    resume_payload: None,
                    prior_tool_results: vec![],
                },
            )
            .await;
        assert!(result.is_err());
    }
}
