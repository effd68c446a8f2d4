//! The caller-facing client surface (§6): construct a runtime, register
//! agents/toolsets/models, and start or run a turn.
//!
//! Grounded on the chained, consuming-`self` builder in
//! `crates/node-sdk/src/builder.rs` (`NodeClientBuilder`) for the
//! builder-plus-functional-options shape, generalized from a single
//! hardcoded provider/session pair to the agent/toolset/model registry this
//! runtime owns.

use std::collections::HashMap;
use std::sync::Arc;

use ac_engine::{ChildRoute, Engine, MemoryEngine, Signal, WorkflowContext};
use ac_types::{
    generate_run_id, AgentID, AgentRegistration, Error, Event, Message, Result, RunID, RunInput,
    RunMeta, RunOutcome, RunOutput, RunPolicy, RunStatus, SessionID, ToolCallID, ToolResult,
    ToolSpec, ToolsetRegistration, TurnID, WorkflowOptions,
};

use crate::confirmation::ConfirmationPolicy;
use crate::dispatch;
use crate::hooks::{HookBus, HookSubscriber, InMemorySessionStore, RunLog, SessionStore};
use crate::registry::{Aggregator, ModelClient, OverridePolicy, Planner, Registry, ToolExecutor};
use crate::workflow;

/// The search attribute key every run's `SessionID` is forced into (§6
/// "Reserved search attribute"). A caller-supplied value under this key
/// must agree with the run's actual session id.
pub const SESSION_ID_SEARCH_ATTRIBUTE: &str = "SessionID";

/// Construction-time options for [`Runtime`]. A caller who needs a durable
/// session store or a confirmation policy supplies them here; both default
/// to in-process, no-op-friendly implementations.
#[derive(Default)]
pub struct RuntimeOptions {
    pub session_store: Option<Arc<dyn SessionStore>>,
    pub confirmation_policy: Option<Arc<ConfirmationPolicy>>,
}

/// Functional options for one [`Runtime::start`]/[`Runtime::run`] call.
/// Built up with the `with_*` methods rather than named constants, mirroring
/// the teacher's client-call option pattern.
#[derive(Default, Clone)]
pub struct RunOptions {
    run_id: Option<RunID>,
    turn_id: Option<TurnID>,
    labels: HashMap<String, String>,
    metadata: HashMap<String, serde_json::Value>,
    task_queue: Option<String>,
    memo: HashMap<String, serde_json::Value>,
    search_attributes: HashMap<String, serde_json::Value>,
    workflow_options: Option<WorkflowOptions>,
    policy: Option<RunPolicy>,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_run_id(mut self, run_id: RunID) -> Self {
        self.run_id = Some(run_id);
        self
    }

    pub fn with_turn_id(mut self, turn_id: TurnID) -> Self {
        self.turn_id = Some(turn_id);
        self
    }

    pub fn with_labels(mut self, labels: HashMap<String, String>) -> Self {
        self.labels = labels;
        self
    }

    pub fn with_metadata(mut self, metadata: HashMap<String, serde_json::Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_task_queue(mut self, queue: impl Into<String>) -> Self {
        self.task_queue = Some(queue.into());
        self
    }

    pub fn with_memo(mut self, memo: HashMap<String, serde_json::Value>) -> Self {
        self.memo = memo;
        self
    }

    pub fn with_search_attributes(mut self, attributes: HashMap<String, serde_json::Value>) -> Self {
        self.search_attributes = attributes;
        self
    }

    pub fn with_workflow_options(mut self, options: WorkflowOptions) -> Self {
        self.workflow_options = Some(options);
        self
    }

    pub fn with_run_time_budget(mut self, budget: chrono::Duration) -> Self {
        self.policy_mut().run_time_budget = Some(budget);
        self
    }

    pub fn with_run_finalizer_grace(mut self, grace: chrono::Duration) -> Self {
        self.policy_mut().run_finalizer_grace = Some(grace);
        self
    }

    pub fn with_per_turn_max_tool_calls(mut self, n: u32) -> Self {
        self.policy_mut().per_turn_max_tool_calls = Some(n);
        self
    }

    pub fn with_run_max_tool_calls(mut self, n: u32) -> Self {
        self.policy_mut().run_max_tool_calls = Some(n);
        self
    }

    pub fn with_run_max_consecutive_failed_tool_calls(mut self, n: u32) -> Self {
        self.policy_mut().run_max_consecutive_failed_tool_calls = Some(n);
        self
    }

    pub fn with_run_interrupts_allowed(mut self, allowed: bool) -> Self {
        self.policy_mut().run_interrupts_allowed = allowed;
        self
    }

    pub fn with_restrict_to_tool(mut self, tool_name: impl Into<String>) -> Self {
        self.policy_mut().restrict_to_tool = Some(tool_name.into());
        self
    }

    pub fn with_allowed_tags(mut self, tags: Vec<String>) -> Self {
        self.policy_mut().allowed_tags = tags;
        self
    }

    pub fn with_denied_tags(mut self, tags: Vec<String>) -> Self {
        self.policy_mut().denied_tags = tags;
        self
    }

    fn policy_mut(&mut self) -> &mut RunPolicy {
        self.policy.get_or_insert_with(RunPolicy::default)
    }
}

/// The runtime: registry, in-process engine, hook bus, canonical run log,
/// and session guard, bundled behind the entry points §6 describes. A
/// production deployment would construct the registry/hook wiring the same
/// way and swap `MemoryEngine` for a durable backend (see `DESIGN.md`).
pub struct Runtime {
    registry: Arc<Registry>,
    engine: Arc<MemoryEngine>,
    hooks: Arc<HookBus>,
    run_log: Arc<RunLog>,
    sessions: Arc<dyn SessionStore>,
    confirmation: Option<Arc<ConfirmationPolicy>>,
}

impl Runtime {
    pub fn new(options: RuntimeOptions) -> Arc<Self> {
        let registry = Registry::new();
        let engine = MemoryEngine::new();
        let hooks = Arc::new(HookBus::new());
        let run_log = RunLog::new();
        hooks.subscribe(run_log.clone());
        let sessions = options
            .session_store
            .unwrap_or_else(|| Arc::new(InMemorySessionStore::default()));

        let hook_bus = hooks.clone();
        engine.register_hook_activity_fn(
            crate::HOOK_ACTIVITY_NAME,
            Arc::new(move |event: Event| {
                let hook_bus = hook_bus.clone();
                Box::pin(async move { hook_bus.publish(&event) })
            }),
        );

        Arc::new(Self {
            registry,
            engine,
            hooks,
            run_log,
            sessions,
            confirmation: options.confirmation_policy,
        })
    }

    /// Add a hook subscriber (a memory projector, a stream forwarder, ...)
    /// beyond the always-installed [`RunLog`].
    pub fn subscribe_hook(&self, subscriber: Arc<dyn HookSubscriber>) {
        self.hooks.subscribe(subscriber);
    }

    pub fn confirmation_policy(&self) -> Option<&Arc<ConfirmationPolicy>> {
        self.confirmation.as_ref()
    }

    pub fn register_agent(
        &self,
        registration: AgentRegistration,
        planner: Arc<dyn Planner>,
        override_policy: OverridePolicy,
    ) -> Result<()> {
        let workflow_name = registration.workflow.name.clone();
        let plan_name = registration.activity_names.plan.clone();
        let execute_tool_name = registration.activity_names.execute_tool.clone();
        let plan_options = registration.plan_activity_options;
        let execute_tool_options = registration.execute_tool_activity_options;

        self.registry.register_agent(registration, planner, override_policy)?;

        let registry = self.registry.clone();
        let confirmation = self.confirmation.clone();
        self.engine.register_workflow_fn(
            &workflow_name,
            Arc::new(move |run_input: RunInput, ctx: Arc<dyn WorkflowContext>| {
                let registry = registry.clone();
                let confirmation = confirmation.clone();
                Box::pin(async move {
                    workflow::run(ctx.as_ref(), &registry, run_input, confirmation.as_deref()).await
                })
            }),
        );

        let registry = self.registry.clone();
        self.engine.register_execute_tool_activity_fn(
            &execute_tool_name,
            Arc::new(move |request: ac_types::ToolRequest| {
                let registry = registry.clone();
                Box::pin(async move { dispatch::execute_tool_request(&registry, request).await })
            }),
        );

        self.engine.set_activity_defaults(&plan_name, plan_options);
        self.engine.set_activity_defaults(&execute_tool_name, execute_tool_options);
        Ok(())
    }

    pub fn register_toolset(&self, registration: ToolsetRegistration, executor: Arc<dyn ToolExecutor>) -> Result<()> {
        self.registry.register_toolset(registration, executor)
    }

    pub fn register_model(&self, client: Arc<dyn ModelClient>) -> Result<()> {
        self.registry.register_model(client)
    }

    pub fn register_aggregator(&self, toolset_name: impl Into<String>, aggregator: Aggregator) -> Result<()> {
        self.registry.register_aggregator(toolset_name, aggregator)
    }

    /// Start a run without waiting for it to finish; returns the `RunID` the
    /// caller addresses with signals and `ListRunEvents`/`GetRunSnapshot`.
    pub async fn start(
        &self,
        agent_id: &AgentID,
        session_id: SessionID,
        messages: Vec<Message>,
        options: RunOptions,
    ) -> Result<RunID> {
        if session_id.as_str().trim().is_empty() {
            return Err(Error::MissingSessionID);
        }
        // A session must already exist in the store (created by whatever
        // sanctioned session-bootstrap process owns that lifecycle) — an
        // unknown session is rejected, never silently created here.
        if !self.sessions.exists(&session_id) {
            return Err(Error::MissingSessionID);
        }
        if !self.sessions.is_active(&session_id) {
            return Err(Error::SessionEnded(session_id.to_string()));
        }

        // First submission to any agent closes the registry to further
        // registration (§3's registration/run-lifecycle invariant).
        self.registry.close();

        let registration = self
            .registry
            .agent(agent_id)
            .ok_or_else(|| Error::AgentNotFound(agent_id.to_string()))?;

        let run_id = options.run_id.clone().unwrap_or_else(|| generate_run_id(agent_id));
        let turn_id = options
            .turn_id
            .clone()
            .unwrap_or_else(|| TurnID::new(format!("{}/turn/seed", run_id.as_str())));

        let mut workflow_options = options.workflow_options.clone().unwrap_or_default();
        if let Some(task_queue) = &options.task_queue {
            workflow_options.task_queue = Some(task_queue.clone());
        }
        if !options.memo.is_empty() {
            workflow_options.memo = options.memo.clone();
        }
        if !options.search_attributes.is_empty() {
            workflow_options.search_attributes = options.search_attributes.clone();
        }

        let session_id_attr = serde_json::Value::String(session_id.to_string());
        if let Some(existing) = workflow_options.search_attributes.get(SESSION_ID_SEARCH_ATTRIBUTE) {
            if existing != &session_id_attr {
                return Err(Error::InvalidConfig(format!(
                    "search attribute '{SESSION_ID_SEARCH_ATTRIBUTE}' ({existing}) does not match session id '{session_id}'"
                )));
            }
        }
        workflow_options
            .search_attributes
            .insert(SESSION_ID_SEARCH_ATTRIBUTE.to_string(), session_id_attr);

        let run_input = RunInput {
            agent_id: agent_id.clone(),
            run_id: run_id.clone(),
            session_id,
            turn_id,
            parent_run_id: None,
            parent_agent_id: None,
            parent_tool_call_id: None,
            messages,
            workflow_options,
            policy: options.policy,
        };

        let route = ChildRoute {
            workflow_name: registration.workflow.name.clone(),
            task_queue: options.task_queue.clone().or_else(|| Some(registration.workflow.queue.clone())),
            plan_activity_name: registration.activity_names.plan.clone(),
            execute_tool_activity_name: registration.activity_names.execute_tool.clone(),
            hook_activity_name: crate::HOOK_ACTIVITY_NAME.to_string(),
        };

        self.engine.start_workflow(run_input, route).await?;
        Ok(run_id)
    }

    /// Start a run and block until it reaches a terminal state.
    pub async fn run(
        &self,
        agent_id: &AgentID,
        session_id: SessionID,
        messages: Vec<Message>,
        options: RunOptions,
    ) -> Result<RunOutput> {
        let run_id = self.start(agent_id, session_id, messages, options).await?;
        self.engine.join_run(&run_id).await
    }

    pub async fn cancel_run(&self, run_id: &RunID) -> Result<()> {
        self.engine.cancel_by_id(run_id).await
    }

    pub async fn pause_run(&self, run_id: &RunID) -> Result<()> {
        self.engine.signal_by_id(run_id, Signal::Pause).await
    }

    pub async fn resume_run(&self, run_id: &RunID, payload: Option<serde_json::Value>) -> Result<()> {
        self.engine.signal_by_id(run_id, Signal::Resume { payload }).await
    }

    pub async fn provide_clarification(&self, run_id: &RunID, payload: serde_json::Value) -> Result<()> {
        self.engine
            .signal_by_id(run_id, Signal::ProvideClarification { payload })
            .await
    }

    pub async fn provide_tool_results(&self, run_id: &RunID, results: Vec<ToolResult>) -> Result<()> {
        self.engine
            .signal_by_id(run_id, Signal::ProvideToolResults { results })
            .await
    }

    pub async fn provide_confirmation(&self, run_id: &RunID, tool_call_id: ToolCallID, approved: bool) -> Result<()> {
        self.engine
            .signal_by_id(
                run_id,
                Signal::ProvideConfirmation {
                    tool_call_id,
                    approved,
                },
            )
            .await
    }

    /// A page of this run's canonical event log (§6 `ListRunEvents`).
    pub fn list_run_events(&self, run_id: &RunID, cursor: usize, limit: usize) -> (Vec<Event>, usize) {
        self.run_log.page(run_id, cursor, limit)
    }

    /// Derive a point-in-time status snapshot from the canonical log, since
    /// no separate persisted `RunMeta` store is wired up in-process (§6
    /// `GetRunSnapshot`). `None` if the run has published no events at all.
    pub fn get_run_snapshot(&self, run_id: &RunID) -> Option<RunMeta> {
        let (events, _) = self.run_log.page(run_id, 0, usize::MAX);
        let first_meta = events.first()?.meta().clone();
        let last_meta = events.last()?.meta().clone();

        let mut status = RunStatus::Running;
        for event in &events {
            match event {
                Event::RunPaused { .. } => status = RunStatus::Paused,
                Event::RunResumed { .. } => status = RunStatus::Running,
                Event::RunCompleted { completed, .. } => {
                    status = match completed.status {
                        RunOutcome::Success => RunStatus::Completed,
                        RunOutcome::Failed => RunStatus::Failed,
                        RunOutcome::Canceled => RunStatus::Canceled,
                    };
                }
                _ => {}
            }
        }

        Some(RunMeta {
            agent_id: first_meta.agent_id,
            run_id: run_id.clone(),
            session_id: first_meta.session_id,
            status,
            started_at: chrono::DateTime::from_timestamp_millis(first_meta.ts_ms).unwrap_or_else(chrono::Utc::now),
            updated_at: chrono::DateTime::from_timestamp_millis(last_meta.ts_ms).unwrap_or_else(chrono::Utc::now),
            labels: HashMap::new(),
            metadata: HashMap::new(),
        })
    }

    pub fn list_agents(&self) -> Vec<AgentID> {
        self.registry.list_agents()
    }

    pub fn list_toolsets(&self) -> Vec<String> {
        self.registry.list_toolsets()
    }

    pub fn list_models(&self) -> Vec<String> {
        self.registry.list_models()
    }

    pub fn tool_spec(&self, tool_name: &str) -> Option<ToolSpec> {
        self.registry.tool_spec(tool_name)
    }

    pub fn tool_specs_for_agent(&self, agent_id: &AgentID) -> Vec<ToolSpec> {
        self.registry.tool_specs_for_agent(agent_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::PlannerContext;
    use ac_types::{ActivityNames, PlanResult, WorkflowHandler};
    use async_trait::async_trait;

    fn registration(id: &str) -> AgentRegistration {
        AgentRegistration {
            agent_id: AgentID::new(id),
            workflow: WorkflowHandler {
                name: format!("{id}-workflow"),
                queue: "default".into(),
            },
            activity_names: ActivityNames {
                plan: format!("{id}-plan"),
                resume: format!("{id}-resume"),
                execute_tool: format!("{id}-execute_tool"),
            },
            plan_activity_options: Default::default(),
            resume_activity_options: Default::default(),
            execute_tool_activity_options: Default::default(),
            run_policy: RunPolicy::default(),
            tool_specs: vec![ToolSpec::new("svc.echo", "svc.tools")],
        }
    }

    struct FinalResponsePlanner;
    #[async_trait]
    impl Planner for FinalResponsePlanner {
        async fn plan(&self, _ctx: PlannerContext) -> Result<PlanResult> {
            Ok(PlanResult::final_response(Message::assistant("done")))
        }
    }

    struct EchoExecutor;
    #[async_trait]
    impl ToolExecutor for EchoExecutor {
        async fn execute(&self, request: ac_types::ToolRequest) -> Result<ToolResult> {
            Ok(ToolResult::ok(request.tool_call_id, request.tool_name, request.payload))
        }
    }

    #[tokio::test]
    async fn run_rejects_empty_session_id() {
        let runtime = Runtime::new(RuntimeOptions::default());
        runtime
            .register_agent(registration("svc.writer"), Arc::new(FinalResponsePlanner), OverridePolicy::Allow)
            .unwrap();
        let result = runtime
            .run(
                &AgentID::new("svc.writer"),
                SessionID::new(""),
                vec![Message::user("hi")],
                RunOptions::new(),
            )
            .await;
        assert!(matches!(result, Err(Error::MissingSessionID)));
    }

    #[tokio::test]
    async fn run_rejects_unknown_session() {
        let runtime = Runtime::new(RuntimeOptions::default());
        runtime
            .register_agent(registration("svc.writer"), Arc::new(FinalResponsePlanner), OverridePolicy::Allow)
            .unwrap();
        let result = runtime
            .run(
                &AgentID::new("svc.writer"),
                SessionID::new("never-created"),
                vec![Message::user("hi")],
                RunOptions::new(),
            )
            .await;
        assert!(matches!(result, Err(Error::MissingSessionID)));
    }

    #[tokio::test]
    async fn run_rejects_ended_session() {
        let runtime = Runtime::new(RuntimeOptions::default());
        runtime
            .register_agent(registration("svc.writer"), Arc::new(FinalResponsePlanner), OverridePolicy::Allow)
            .unwrap();
        let session_id = SessionID::new("sess-1");
        runtime.sessions.create(&session_id);
        runtime.sessions.end(&session_id);
        let result = runtime
            .run(&AgentID::new("svc.writer"), session_id, vec![Message::user("hi")], RunOptions::new())
            .await;
        assert!(matches!(result, Err(Error::SessionEnded(_))));
    }

    #[tokio::test]
    async fn run_rejects_mismatched_session_id_search_attribute() {
        let runtime = Runtime::new(RuntimeOptions::default());
        runtime
            .register_agent(registration("svc.writer"), Arc::new(FinalResponsePlanner), OverridePolicy::Allow)
            .unwrap();
        let session_id = SessionID::new("sess-1");
        runtime.sessions.create(&session_id);
        let mut attributes = HashMap::new();
        attributes.insert(
            SESSION_ID_SEARCH_ATTRIBUTE.to_string(),
            serde_json::Value::String("some-other-session".into()),
        );
        let result = runtime
            .run(
                &AgentID::new("svc.writer"),
                session_id,
                vec![Message::user("hi")],
                RunOptions::new().with_search_attributes(attributes),
            )
            .await;
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn run_completes_end_to_end_through_the_registered_engine() {
        let runtime = Runtime::new(RuntimeOptions::default());
        runtime
            .register_agent(registration("svc.writer"), Arc::new(FinalResponsePlanner), OverridePolicy::Allow)
            .unwrap();
        runtime
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

        let session_id = SessionID::new("sess-1");
        runtime.sessions.create(&session_id);
        let output = runtime
            .run(&AgentID::new("svc.writer"), session_id, vec![Message::user("hi")], RunOptions::new())
            .await
            .unwrap();
        assert_eq!(output.r#final.content.extract_all_text(), "done");
    }

    #[tokio::test]
    async fn list_run_events_reflects_the_completed_run() {
        let runtime = Runtime::new(RuntimeOptions::default());
        runtime
            .register_agent(registration("svc.writer"), Arc::new(FinalResponsePlanner), OverridePolicy::Allow)
            .unwrap();
        let run_id = RunID::new("fixed-run-1");
        runtime.sessions.create(&SessionID::new("sess-1"));
        runtime
            .run(
                &AgentID::new("svc.writer"),
                SessionID::new("sess-1"),
                vec![Message::user("hi")],
                RunOptions::new().with_run_id(run_id.clone()),
            )
            .await
            .unwrap();

        let (events, _) = runtime.list_run_events(&run_id, 0, 100);
        assert!(events.iter().any(|e| matches!(e, Event::RunStarted { .. })));
        assert!(events.iter().any(|e| matches!(e, Event::RunCompleted { .. })));

        let snapshot = runtime.get_run_snapshot(&run_id).unwrap();
        assert_eq!(snapshot.status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn cancel_run_on_unknown_run_id_is_a_noop() {
        let runtime = Runtime::new(RuntimeOptions::default());
        assert!(runtime.cancel_run(&RunID::new("missing")).await.is_ok());
    }
}
