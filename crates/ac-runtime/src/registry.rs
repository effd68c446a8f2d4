//! The runtime's registry: agents, toolsets, and model clients.
//!
//! Grounded on the teacher's tool registry (`crates/gateway/src/runtime/tools.rs`,
//! a flat set of definitions plus a dispatch match) generalized to the
//! multi-agent, multi-toolset shape the orchestration core needs, with
//! registration locked down the moment the first run is submitted.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use ac_types::{
    AgentID, AgentRegistration, AgentToolConfig, Error, PlanResult, Result, RunPolicy, ToolRequest,
    ToolResult, ToolSpec, ToolsetRegistration,
};

use crate::context::PlannerContext;

/// Custom result-aggregation callback for an agent-as-tool toolset, the
/// escape hatch mentioned alongside the `JSONOnly` default. Stored
/// separately from `ac_types::AgentToolConfig` (which is a plain
/// `Clone`-able data struct) because a callback needs `Arc<dyn Fn>`.
pub type Aggregator =
    Arc<dyn Fn(&ToolRequest, &ac_types::RunOutput) -> Option<ToolResult> + Send + Sync>;

/// Name of the runtime-owned toolset installed at construction. Its single
/// tool always fails with a `ToolUnavailable` retry hint — the dispatch
/// engine routes any call naming an unregistered tool here rather than
/// failing the whole batch.
pub const TOOL_UNAVAILABLE_TOOLSET: &str = "tool_unavailable";

/// Planner invocation, abstracted behind a trait so the registry never
/// depends on a concrete LLM client.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, ctx: PlannerContext) -> Result<PlanResult>;
}

/// Executes one tool call. Toolsets backed by a local function, a remote
/// queue, or an agent-as-tool child workflow all implement this the same
/// way from the dispatch engine's point of view.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, request: ToolRequest) -> Result<ToolResult>;
}

/// An opaque, named model client. The registry only tracks identity and
/// existence; a `Planner` implementation looks clients up by name when it
/// needs one.
pub trait ModelClient: Send + Sync {
    fn name(&self) -> &str;
}

struct BuiltinUnavailableExecutor;

#[async_trait]
impl ToolExecutor for BuiltinUnavailableExecutor {
    async fn execute(&self, request: ToolRequest) -> Result<ToolResult> {
        Ok(ToolResult::failed(
            request.tool_call_id,
            request.tool_name.clone(),
            format!("\"{}\" is not a registered tool", request.tool_name),
            Some(ac_types::RetryHint::tool_unavailable(request.tool_name)),
        ))
    }
}

/// An agent's full registration: its declared shape plus the planner that
/// drives it.
pub struct AgentEntry {
    pub registration: AgentRegistration,
    pub planner: Arc<dyn Planner>,
}

/// A toolset's full registration: its declared shape plus the executor that
/// runs its calls. Agent-as-tool toolsets carry `agent_tool` on the
/// registration and their executor is installed by [`crate::agent_tool`].
pub struct ToolsetEntry {
    pub registration: ToolsetRegistration,
    pub executor: Arc<dyn ToolExecutor>,
}

/// Whether a per-run [`RunPolicy`] override may replace an agent's default
/// policy, or is rejected outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverridePolicy {
    Allow,
    Deny,
}

impl Default for OverridePolicy {
    fn default() -> Self {
        OverridePolicy::Allow
    }
}

/// Resolve the effective [`RunPolicy`] for one run: the agent's registered
/// default, optionally replaced wholesale by a caller-supplied override.
///
/// Coarse-grained by design: a `RunPolicy` override arrives as a single
/// `Option<RunPolicy>` on `RunInput`, not a sparse per-field patch, so
/// `Allow` substitutes it in full rather than merging field by field.
pub fn resolve_run_policy(
    default_policy: &RunPolicy,
    override_policy: OverridePolicy,
    per_run: Option<RunPolicy>,
) -> RunPolicy {
    match (override_policy, per_run) {
        (OverridePolicy::Allow, Some(policy)) => policy,
        _ => default_policy.clone(),
    }
}

/// Agents, toolsets, and model clients, closed to further registration the
/// moment the first run starts.
pub struct Registry {
    agents: RwLock<HashMap<AgentID, AgentEntry>>,
    toolsets: RwLock<HashMap<String, ToolsetEntry>>,
    tool_index: RwLock<HashMap<String, String>>,
    models: RwLock<HashMap<String, Arc<dyn ModelClient>>>,
    override_policies: RwLock<HashMap<AgentID, OverridePolicy>>,
    aggregators: RwLock<HashMap<String, Aggregator>>,
    closed: AtomicBool,
}

impl Registry {
    pub fn new() -> Arc<Self> {
        let registry = Arc::new(Self {
            agents: RwLock::new(HashMap::new()),
            toolsets: RwLock::new(HashMap::new()),
            tool_index: RwLock::new(HashMap::new()),
            models: RwLock::new(HashMap::new()),
            override_policies: RwLock::new(HashMap::new()),
            aggregators: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
        });
        registry
            .register_toolset(
                ToolsetRegistration {
                    name: TOOL_UNAVAILABLE_TOOLSET.into(),
                    inline: true,
                    task_queue: None,
                    specs: vec![ToolSpec::new("tool_unavailable", TOOL_UNAVAILABLE_TOOLSET)],
                    agent_tool: None,
                },
                Arc::new(BuiltinUnavailableExecutor),
            )
            .expect("builtin toolset registration cannot fail");
        registry
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(Error::RegistrationClosed)
        } else {
            Ok(())
        }
    }

    /// Close the registry to further registration. Idempotent: called once
    /// by the client on the first run submission.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn register_agent(
        &self,
        registration: AgentRegistration,
        planner: Arc<dyn Planner>,
        override_policy: OverridePolicy,
    ) -> Result<()> {
        self.ensure_open()?;
        let registration = registration.validate()?;
        let agent_id = registration.agent_id.clone();
        self.agents.write().insert(
            agent_id.clone(),
            AgentEntry {
                registration,
                planner,
            },
        );
        self.override_policies.write().insert(agent_id, override_policy);
        Ok(())
    }

    pub fn register_toolset(
        &self,
        registration: ToolsetRegistration,
        executor: Arc<dyn ToolExecutor>,
    ) -> Result<()> {
        self.ensure_open()?;
        let registration = registration.validate()?;
        let toolset_name = registration.name.clone();
        for spec in &registration.specs {
            self.tool_index
                .write()
                .insert(spec.name.clone(), toolset_name.clone());
        }
        self.toolsets.write().insert(
            toolset_name,
            ToolsetEntry {
                registration,
                executor,
            },
        );
        Ok(())
    }

    pub fn register_model(&self, client: Arc<dyn ModelClient>) -> Result<()> {
        self.ensure_open()?;
        self.models.write().insert(client.name().to_string(), client);
        Ok(())
    }

    /// Install a custom result-aggregation callback for an agent-as-tool
    /// toolset, overriding the `JSONOnly` default for that toolset.
    pub fn register_aggregator(&self, toolset_name: impl Into<String>, aggregator: Aggregator) -> Result<()> {
        self.ensure_open()?;
        self.aggregators.write().insert(toolset_name.into(), aggregator);
        Ok(())
    }

    pub fn aggregator(&self, toolset_name: &str) -> Option<Aggregator> {
        self.aggregators.read().get(toolset_name).cloned()
    }

    pub fn toolset_registration(&self, toolset_name: &str) -> Option<ToolsetRegistration> {
        self.toolsets.read().get(toolset_name).map(|entry| entry.registration.clone())
    }

    pub fn agent(&self, agent_id: &AgentID) -> Option<Arc<AgentRegistration>> {
        self.agents
            .read()
            .get(agent_id)
            .map(|entry| Arc::new(entry.registration.clone()))
    }

    pub fn planner(&self, agent_id: &AgentID) -> Option<Arc<dyn Planner>> {
        self.agents.read().get(agent_id).map(|entry| entry.planner.clone())
    }

    pub fn override_policy(&self, agent_id: &AgentID) -> OverridePolicy {
        self.override_policies
            .read()
            .get(agent_id)
            .copied()
            .unwrap_or_default()
    }

    pub fn toolset_for_tool(&self, tool_name: &str) -> Option<String> {
        self.tool_index.read().get(tool_name).cloned()
    }

    pub fn executor_for_tool(&self, tool_name: &str) -> Arc<dyn ToolExecutor> {
        let toolset_name = self.toolset_for_tool(tool_name);
        let toolsets = self.toolsets.read();
        match toolset_name.and_then(|name| toolsets.get(&name)) {
            Some(entry) => entry.executor.clone(),
            None => toolsets
                .get(TOOL_UNAVAILABLE_TOOLSET)
                .expect("builtin toolset always registered")
                .executor
                .clone(),
        }
    }

    pub fn tool_spec(&self, tool_name: &str) -> Option<ToolSpec> {
        let toolset_name = self.toolset_for_tool(tool_name)?;
        self.toolsets
            .read()
            .get(&toolset_name)
            .and_then(|entry| entry.registration.specs.iter().find(|spec| spec.name == tool_name))
            .cloned()
    }

    pub fn agent_tool_config(&self, toolset_name: &str) -> Option<AgentToolConfig> {
        self.toolsets
            .read()
            .get(toolset_name)
            .and_then(|entry| entry.registration.agent_tool.clone())
    }

    pub fn list_agents(&self) -> Vec<AgentID> {
        self.agents.read().keys().cloned().collect()
    }

    pub fn list_toolsets(&self) -> Vec<String> {
        self.toolsets.read().keys().cloned().collect()
    }

    pub fn list_models(&self) -> Vec<String> {
        self.models.read().keys().cloned().collect()
    }

    /// Tool specs for every toolset declared on an agent's registration,
    /// plus the runtime-owned `tool_unavailable` fallback — the full set of
    /// tool definitions a planner invocation should see.
    pub fn tool_specs_for_agent(&self, agent_id: &AgentID) -> Vec<ToolSpec> {
        self.agents
            .read()
            .get(agent_id)
            .map(|entry| entry.registration.tool_specs.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ac_types::{ActivityNames, RunPolicy, WorkflowHandler};

    fn agent_registration(id: &str) -> AgentRegistration {
        AgentRegistration {
            agent_id: AgentID::new(id),
            workflow: WorkflowHandler {
                name: format!("{id}-workflow"),
                queue: "default".into(),
            },
            activity_names: ActivityNames {
                plan: "plan".into(),
                resume: "resume".into(),
                execute_tool: "execute_tool".into(),
            },
            plan_activity_options: Default::default(),
            resume_activity_options: Default::default(),
            execute_tool_activity_options: Default::default(),
            run_policy: RunPolicy::default(),
            tool_specs: vec![ToolSpec::new("svc.echo", "svc.tools")],
        }
    }

    struct NoopPlanner;
    #[async_trait]
    impl Planner for NoopPlanner {
        async fn plan(&self, _ctx: PlannerContext) -> Result<PlanResult> {
            Ok(PlanResult::default())
        }
    }

    struct EchoExecutor;
    #[async_trait]
    impl ToolExecutor for EchoExecutor {
        async fn execute(&self, request: ToolRequest) -> Result<ToolResult> {
            Ok(ToolResult::ok(request.tool_call_id, request.tool_name, request.payload))
        }
    }

    #[test]
    fn builtin_toolset_is_installed_at_construction() {
        let registry = Registry::new();
        assert!(registry.list_toolsets().contains(&TOOL_UNAVAILABLE_TOOLSET.to_string()));
    }

    #[test]
    fn registering_after_close_is_rejected() {
        let registry = Registry::new();
        registry.close();
        let result = registry.register_agent(
            agent_registration("svc.writer"),
            Arc::new(NoopPlanner),
            OverridePolicy::Allow,
        );
        assert!(matches!(result, Err(Error::RegistrationClosed)));
    }

    #[test]
    fn unregistered_tool_dispatches_to_unavailable_executor() {
        let registry = Registry::new();
        let executor = registry.executor_for_tool("svc.nonexistent");
        let request = ToolRequest {
            tool_call_id: ac_types::ToolCallID::new("call-1"),
            parent_tool_call_id: None,
            tool_name: "svc.nonexistent".into(),
            payload: serde_json::json!({}),
            artifacts_mode: ac_types::ArtifactsMode::Off,
            run_id: ac_types::RunID::new("run-1"),
            session_id: ac_types::SessionID::new("sess-1"),
            turn_id: ac_types::TurnID::new("turn-0"),
        };
        let result = tokio_test_block_on(executor.execute(request));
        assert!(result.unwrap().is_err());
    }

    #[test]
    fn resolve_run_policy_denies_override_when_configured() {
        let default_policy = RunPolicy {
            run_max_tool_calls: Some(5),
            ..RunPolicy::default()
        };
        let override_attempt = RunPolicy {
            run_max_tool_calls: Some(50),
            ..RunPolicy::default()
        };
        let resolved = resolve_run_policy(&default_policy, OverridePolicy::Deny, Some(override_attempt));
        assert_eq!(resolved.run_max_tool_calls, Some(5));
    }

    #[test]
    fn resolve_run_policy_allows_override_when_configured() {
        let default_policy = RunPolicy::default();
        let override_attempt = RunPolicy {
            run_max_tool_calls: Some(50),
            ..RunPolicy::default()
        };
        let resolved = resolve_run_policy(&default_policy, OverridePolicy::Allow, Some(override_attempt));
        assert_eq!(resolved.run_max_tool_calls, Some(50));
    }

    #[test]
    fn registering_agent_and_toolset_populates_introspection() {
        let registry = Registry::new();
        registry
            .register_agent(agent_registration("svc.writer"), Arc::new(NoopPlanner), OverridePolicy::Allow)
            .unwrap();
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

        assert!(registry.list_agents().contains(&AgentID::new("svc.writer")));
        assert_eq!(registry.toolset_for_tool("svc.echo"), Some("svc.tools".into()));
        assert!(registry.tool_spec("svc.echo").is_some());
    }

    /// Tests here run tool executors synchronously via a tiny ad hoc
    /// current-thread runtime rather than `#[tokio::test]`, since most of
    /// this module's assertions are synchronous registry lookups.
    fn tokio_test_block_on<F: std::future::Future>(future: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
            .block_on(future)
    }
}
