//! The agent orchestration runtime: registry, workflow loop, tool dispatch,
//! agent-as-tool, hooks, and the caller-facing client surface.

pub mod agent_tool;
pub mod client;
pub mod confirmation;
pub mod context;
pub mod dispatch;
pub mod hooks;
pub mod registry;
pub mod util;
pub mod workflow;

/// Name the in-process engine (and any durable backend) registers the hook
/// activity under. A single global name, not per-agent, since every run —
/// top-level or nested — republishes through the same durable activity.
pub const HOOK_ACTIVITY_NAME: &str = "hook";

pub use client::{RunOptions, Runtime, RuntimeOptions, SESSION_ID_SEARCH_ATTRIBUTE};
pub use confirmation::{ConfirmationHandler, ConfirmationPolicy};
pub use context::PlannerContext;
pub use dispatch::{DispatchContext, TOOL_UNAVAILABLE_TOOL};
pub use hooks::{
    HookBus, HookSubscriber, InMemorySessionStore, MemorySink, MemorySubscriber, RunLog,
    SessionStore, StreamSink, StreamSubscriber, SuppressionRegistry,
};
pub use registry::{Aggregator, ModelClient, OverridePolicy, Planner, Registry, ToolExecutor, TOOL_UNAVAILABLE_TOOLSET};
