pub mod context;
pub mod memory_engine;

pub use context::{
    ActivityDefaultsTable, ActivityFuture, ChildRoute, ChildWorkflowFuture, Engine,
    PlannerActivityInput, Receiver, Signal, TimerHandle, WorkflowContext,
};
pub use memory_engine::{
    ExecuteToolActivityFn, HookActivityFn, MemoryEngine, PlannerActivityFn, RunSignalSenders,
    WorkflowFn,
};
