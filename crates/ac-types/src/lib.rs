pub mod child_tracker;
pub mod error;
pub mod events;
pub mod ids;
pub mod message;
pub mod plan;
pub mod registration;
pub mod retry;
pub mod run;
pub mod tool;

pub use child_tracker::ChildTracker;
pub use error::{Error, Result};
pub use events::{Event, EventMeta};
pub use ids::{
    deterministic_tool_call_id, generate_run_id, nested_run_id, nested_run_id_for_tool_call,
    AgentID, RunID, SessionID, ToolCallID, ToolID, TurnID,
};
pub use message::{ContentPart, Message, MessageContent, Role};
pub use plan::{AwaitSpec, PlanResult};
pub use registration::{
    ActivityNames, AgentRegistration, AgentToolConfig, ToolsetRegistration, WorkflowHandler,
};
pub use retry::{ActivityOptions, RetryPolicy};
pub use run::{
    CapsState, RunCompleted, RunInput, RunMeta, RunOutcome, RunOutput, RunPolicy, RunStatus,
    TerminationReason, Usage, WorkflowOptions,
};
pub use tool::{
    ArtifactsMode, Bounds, PayloadValidation, RetryHint, RetryReason, ToolRequest, ToolResult,
    ToolSpec, ToolTelemetry,
};
