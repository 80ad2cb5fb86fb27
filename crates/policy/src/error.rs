use thiserror::Error;

/// Errors raised while resolving skill policy or gating a tool call.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("Skill not found: {0}")]
    SkillNotFound(String),

    #[error("Tool {tool_name} is not allowed for skill {skill_id}: {reason}")]
    PermissionDenied {
        skill_id: String,
        tool_name: String,
        reason: String,
    },

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PolicyError {
    pub(crate) fn not_in_allow_list(skill_id: &str, tool_name: &str) -> Self {
        PolicyError::PermissionDenied {
            skill_id: skill_id.to_string(),
            tool_name: tool_name.to_string(),
            reason: "not in allowed tools".to_string(),
        }
    }

    /// True for the two denial outcomes a caller is expected to handle.
    pub fn is_denial(&self) -> bool {
        matches!(
            self,
            PolicyError::PermissionDenied { .. } | PolicyError::SkillNotFound(_)
        )
    }
}
