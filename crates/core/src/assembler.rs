//! Caller-visible result of a finished session.
//!
//! [`assemble_result`] is the only place where a forked context's data
//! crosses back to the caller, and it does so exclusively through
//! [`ExecutionContext::summarize`].

use crate::context::ExecutionContext;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Everything the caller hands over when finishing a session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionOutcome {
    pub final_output: Value,
    pub stdout: String,
    pub stderr: String,
}

impl SessionOutcome {
    pub fn new(final_output: Value, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            final_output,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }
}

/// Distilled output of a forked session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForkedOutput {
    is_forked: bool,
    summary: String,
}

impl ForkedOutput {
    fn new(summary: String) -> Self {
        Self {
            is_forked: true,
            summary,
        }
    }

    pub fn summary(&self) -> &str {
        &self.summary
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SessionOutput {
    /// `{ "is_forked": true, "summary": ... }`
    Forked(ForkedOutput),
    /// The caller's final output, unchanged.
    Direct(Value),
}

impl SessionOutput {
    pub fn is_forked(&self) -> bool {
        matches!(self, SessionOutput::Forked(_))
    }

    pub fn summary(&self) -> Option<&str> {
        match self {
            SessionOutput::Forked(forked) => Some(forked.summary()),
            SessionOutput::Direct(_) => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            SessionOutput::Forked(forked) => json!({
                "is_forked": true,
                "summary": forked.summary,
            }),
            SessionOutput::Direct(value) => value.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditSummary {
    /// Distinct tools actually exercised, in first-use order.
    pub permissions_used: Vec<String>,
}

/// Final result of a skill invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionResult {
    pub output: SessionOutput,
    pub stdout: String,
    pub stderr: String,
    pub audit: AuditSummary,
}

impl SessionResult {
    pub fn to_json(&self) -> Value {
        json!({
            "output": self.output.to_value(),
            "stdout": self.stdout,
            "stderr": self.stderr,
            "audit": { "permissions_used": self.audit.permissions_used },
        })
    }
}

/// Build the caller-visible result.
///
/// Forked: the output is the context summary and `final_output` is dropped.
/// Non-forked: `final_output` is passed through verbatim. Streams are copied
/// in both cases.
pub fn assemble_result(
    forked: bool,
    context: &ExecutionContext,
    permissions_used: &[String],
    outcome: SessionOutcome,
) -> SessionResult {
    let output = if forked {
        SessionOutput::Forked(ForkedOutput::new(context.summarize()))
    } else {
        SessionOutput::Direct(outcome.final_output)
    };

    SessionResult {
        output,
        stdout: outcome.stdout,
        stderr: outcome.stderr,
        audit: AuditSummary {
            permissions_used: permissions_used.to_vec(),
        },
    }
}
