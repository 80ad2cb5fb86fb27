//! Skill sessions: isolated execution contexts, permission-gated tool calls
//! and result assembly for forked and inline skills.

pub mod assembler;
pub mod audit;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod runtime;
pub mod session;

pub use assembler::{
    assemble_result, AuditSummary, ForkedOutput, SessionOutcome, SessionOutput, SessionResult,
};
pub use audit::{AuditError, AuditRecord, AuditSink, ExecutionStatus, JsonlAuditSink, NoopAuditSink};
pub use config::RuntimeConfig;
pub use context::{ContextEntry, ExecutionContext, OutputKind, EMPTY_SUMMARY};
pub use engine::{EngineOutput, ExecutionError, ExecutionRequest, SandboxEngine};
pub use error::SessionError;
pub use runtime::SkillRuntime;
pub use session::{SessionId, SessionOptions, SessionPhase, SkillSession};

pub use skillgate_policy::{
    load_catalog, parse_catalog, ApprovalDecision, ApprovalPolicy, ApprovalRequest, ContextMode,
    DenyAll, PermissionGuard, PolicyError, RiskLevel, SkillCatalog, StaticCatalog,
};
