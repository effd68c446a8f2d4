//! Shared error type for the orchestration core.
//!
//! Variants mirror the error kinds enumerated in the error-handling design:
//! configuration/registration failures surface eagerly, tool-layer failures
//! are captured on `ToolResult.Error` rather than raised here, and run
//! termination reasons are carried as data (see `crate::run::RunCompleted`)
//! rather than as `Error` variants.

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("agent not found: {0}")]
    AgentNotFound(String),

    #[error("engine not configured")]
    EngineNotConfigured,

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("missing session id")]
    MissingSessionID,

    #[error("session ended: {0}")]
    SessionEnded(String),

    #[error("workflow start failed: {0}")]
    WorkflowStartFailed(String),

    #[error("registration closed")]
    RegistrationClosed,

    #[error("tool error: {message}")]
    Tool {
        message: String,
        cause: Option<String>,
    },

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn tool(message: impl Into<String>) -> Self {
        Error::Tool {
            message: message.into(),
            cause: None,
        }
    }

    pub fn tool_with_cause(message: impl Into<String>, cause: impl Into<String>) -> Self {
        Error::Tool {
            message: message.into(),
            cause: Some(cause.into()),
        }
    }

    /// True for errors that are meaningful to retry (vs. programmer/config errors).
    pub fn retryable(&self) -> bool {
        matches!(self, Error::Tool { .. } | Error::Io(_))
    }
}
