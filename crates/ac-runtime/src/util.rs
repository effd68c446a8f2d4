//! Small helpers shared by the workflow loop and the dispatch engine.

use ac_engine::WorkflowContext;
use ac_types::{AgentID, EventMeta, RunID, SessionID};

pub fn event_meta(
    ctx: &dyn WorkflowContext,
    run_id: &RunID,
    agent_id: &AgentID,
    session_id: &SessionID,
) -> EventMeta {
    EventMeta {
        run_id: run_id.clone(),
        agent_id: agent_id.clone(),
        session_id: session_id.clone(),
        ts_ms: ctx.now().timestamp_millis(),
    }
}
