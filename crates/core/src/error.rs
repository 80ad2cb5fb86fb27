//! Session error taxonomy.

use crate::engine::ExecutionError;
use crate::session::SessionId;
use skillgate_policy::PolicyError;
use thiserror::Error;

/// Errors reported to the caller of a session operation.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Skill not found: {0}")]
    SkillNotFound(String),

    #[error("Tool {tool_name} is not allowed for skill {skill_id}: {reason}")]
    PermissionDenied {
        skill_id: String,
        tool_name: String,
        reason: String,
    },

    #[error("Session already finished: {0}")]
    SessionAlreadyFinished(SessionId),

    #[error("Session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("Active session limit reached: {0}")]
    SessionLimitReached(usize),

    /// Sandbox failure, passed through unchanged.
    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<PolicyError> for SessionError {
    fn from(err: PolicyError) -> Self {
        match err {
            PolicyError::SkillNotFound(id) => SessionError::SkillNotFound(id),
            PolicyError::PermissionDenied {
                skill_id,
                tool_name,
                reason,
            } => SessionError::PermissionDenied {
                skill_id,
                tool_name,
                reason,
            },
            PolicyError::Config(msg) => SessionError::Config(msg),
            PolicyError::Io(e) => SessionError::Io(e),
        }
    }
}
