//! Skill tool policy: catalog lookup, allow-list enforcement and the
//! per-session permission audit.

pub mod catalog;
pub mod error;
pub mod permissions;

pub use catalog::{
    load_catalog, parse_catalog, ContextMode, SkillCatalog, SkillPermissions, SkillPolicy,
    StaticCatalog,
};
pub use error::PolicyError;
pub use permissions::{
    check_tool_permission, is_risky_tool, risk_level, ApprovalDecision, ApprovalPolicy,
    ApprovalRequest, DenyAll, PermissionGuard, RiskLevel,
};
