//! Sandboxed execution engine interface.
//!
//! The engine that instantiates and runs a skill artifact lives outside this
//! crate. Sessions only scope a run by handing over their context id.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Failures reported by the sandbox. Never retried here.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("Invalid artifact: {0}")]
    InvalidArtifact(String),

    #[error("Execution timed out after {0:?}")]
    Timeout(Duration),

    #[error("Execution crashed: {0}")]
    Crashed(String),
}

/// One sandboxed run.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub artifact: String,
    pub input: serde_json::Value,
    pub timeout: Duration,
    /// Context id of the session the run belongs to.
    pub context_id: String,
}

/// Raw streams and output of a completed run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineOutput {
    pub stdout: String,
    pub stderr: String,
    pub output: serde_json::Value,
}

#[async_trait]
pub trait SandboxEngine: Send + Sync {
    async fn run(&self, request: ExecutionRequest) -> Result<EngineOutput, ExecutionError>;
}
