//! Registration-time data: `AgentRegistration`, `ToolsetRegistration`, and
//! the opinionated activity-timeout defaults applied when a registration
//! omits them.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::ids::AgentID;
use crate::retry::ActivityOptions;
use crate::run::RunPolicy;
use crate::tool::ToolSpec;

/// Default activity timeouts applied when a registration doesn't specify
/// its own: plan ~30s, resume ~30s, execute-tool ~2min.
pub const DEFAULT_PLAN_ACTIVITY_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_RESUME_ACTIVITY_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_EXECUTE_TOOL_ACTIVITY_TIMEOUT_MS: u64 = 120_000;

#[derive(Debug, Clone)]
pub struct ActivityNames {
    pub plan: String,
    pub resume: String,
    pub execute_tool: String,
}

#[derive(Debug, Clone)]
pub struct WorkflowHandler {
    pub name: String,
    pub queue: String,
}

/// An agent's registration: immutable once the registry closes on first run.
#[derive(Debug, Clone)]
pub struct AgentRegistration {
    pub agent_id: AgentID,
    pub workflow: WorkflowHandler,
    pub activity_names: ActivityNames,
    pub plan_activity_options: ActivityOptions,
    pub resume_activity_options: ActivityOptions,
    pub execute_tool_activity_options: ActivityOptions,
    pub run_policy: RunPolicy,
    pub tool_specs: Vec<ToolSpec>,
}

impl AgentRegistration {
    /// Validate the required fields, filling opinionated defaults for any
    /// activity options left unset.
    pub fn validate(mut self) -> Result<Self> {
        if self.agent_id.as_str().trim().is_empty() {
            return Err(Error::InvalidConfig("agent id must not be empty".into()));
        }
        if self.workflow.name.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "agent registration requires a workflow handler".into(),
            ));
        }
        for (name, label) in [
            (&self.activity_names.plan, "plan"),
            (&self.activity_names.resume, "resume"),
            (&self.activity_names.execute_tool, "execute-tool"),
        ] {
            if name.trim().is_empty() {
                return Err(Error::InvalidConfig(format!(
                    "agent registration requires a {label} activity name"
                )));
            }
        }

        if self.plan_activity_options.start_to_close_ms.is_none() {
            self.plan_activity_options.start_to_close_ms = Some(DEFAULT_PLAN_ACTIVITY_TIMEOUT_MS);
        }
        if self.resume_activity_options.start_to_close_ms.is_none() {
            self.resume_activity_options.start_to_close_ms =
                Some(DEFAULT_RESUME_ACTIVITY_TIMEOUT_MS);
        }
        if self.execute_tool_activity_options.start_to_close_ms.is_none() {
            self.execute_tool_activity_options.start_to_close_ms =
                Some(DEFAULT_EXECUTE_TOOL_ACTIVITY_TIMEOUT_MS);
        }

        Ok(self)
    }
}

/// Message-builder precedence for an agent-as-tool call: template > text >
/// prompt builder > `PayloadToString`.
#[derive(Debug, Clone, Default)]
pub struct AgentToolConfig {
    pub agent_id: AgentID,
    pub workflow_name: String,
    pub default_task_queue: Option<String>,
    pub system_prompt: Option<String>,
    pub templates: HashMap<String, String>,
    pub texts: HashMap<String, String>,
    pub json_only: bool,
}

impl AgentToolConfig {
    pub fn new(agent_id: AgentID, workflow_name: impl Into<String>) -> Self {
        Self {
            agent_id,
            workflow_name: workflow_name.into(),
            default_task_queue: None,
            system_prompt: None,
            templates: HashMap::new(),
            texts: HashMap::new(),
            json_only: true,
        }
    }
}

/// A named collection of tools sharing a task queue and executor.
#[derive(Debug, Clone)]
pub struct ToolsetRegistration {
    pub name: String,
    pub inline: bool,
    pub task_queue: Option<String>,
    pub specs: Vec<ToolSpec>,
    pub agent_tool: Option<AgentToolConfig>,
}

impl ToolsetRegistration {
    /// Agent-as-tool toolsets must supply tool specs, else `InvalidConfig`.
    pub fn validate(self) -> Result<Self> {
        if self.agent_tool.is_some() && self.specs.is_empty() {
            return Err(Error::InvalidConfig(format!(
                "agent-as-tool toolset '{}' must declare at least one tool spec",
                self.name
            )));
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_registration() -> AgentRegistration {
        AgentRegistration {
            agent_id: AgentID::new("svc.writer"),
            workflow: WorkflowHandler {
                name: "writer-workflow".into(),
                queue: "default".into(),
            },
            activity_names: ActivityNames {
                plan: "plan".into(),
                resume: "resume".into(),
                execute_tool: "execute_tool".into(),
            },
            plan_activity_options: ActivityOptions::default(),
            resume_activity_options: ActivityOptions::default(),
            execute_tool_activity_options: ActivityOptions::default(),
            run_policy: RunPolicy::default(),
            tool_specs: Vec::new(),
        }
    }

    #[test]
    fn validate_fills_opinionated_defaults() {
        let reg = base_registration().validate().unwrap();
        assert_eq!(
            reg.plan_activity_options.start_to_close_ms,
            Some(DEFAULT_PLAN_ACTIVITY_TIMEOUT_MS)
        );
        assert_eq!(
            reg.execute_tool_activity_options.start_to_close_ms,
            Some(DEFAULT_EXECUTE_TOOL_ACTIVITY_TIMEOUT_MS)
        );
    }

    #[test]
    fn validate_rejects_empty_agent_id() {
        let mut reg = base_registration();
        reg.agent_id = AgentID::new("");
        assert!(reg.validate().is_err());
    }

    #[test]
    fn validate_rejects_missing_workflow_name() {
        let mut reg = base_registration();
        reg.workflow.name = "".into();
        assert!(reg.validate().is_err());
    }

    #[test]
    fn agent_tool_toolset_without_specs_rejected() {
        let toolset = ToolsetRegistration {
            name: "svc.sub_agent".into(),
            inline: false,
            task_queue: None,
            specs: Vec::new(),
            agent_tool: Some(AgentToolConfig::new(AgentID::new("svc.sub"), "sub-workflow")),
        };
        assert!(toolset.validate().is_err());
    }

    #[test]
    fn plain_toolset_without_specs_is_allowed() {
        let toolset = ToolsetRegistration {
            name: "svc.exec".into(),
            inline: true,
            task_queue: None,
            specs: Vec::new(),
            agent_tool: None,
        };
        assert!(toolset.validate().is_ok());
    }
}
