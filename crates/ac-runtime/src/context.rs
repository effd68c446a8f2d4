//! Planner-facing context: everything a [`crate::registry::Planner`]
//! implementation needs to produce a [`PlanResult`] for one turn, beyond
//! the raw activity input.

use ac_engine::PlannerActivityInput;
use ac_types::{AgentID, ToolSpec, TurnID};

/// Input handed to a registered planner for one turn.
#[derive(Debug, Clone)]
pub struct PlannerContext {
    pub agent_id: AgentID,
    pub turn_id: TurnID,
    pub attempt: u32,
    pub activity_input: PlannerActivityInput,
    pub tool_specs: Vec<ToolSpec>,
}
