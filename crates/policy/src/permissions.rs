use crate::catalog::SkillCatalog;
use crate::error::PolicyError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Risk classification of a tool name.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

pub fn risk_level(tool_name: &str) -> RiskLevel {
    match tool_name {
        "Read" | "Grep" | "Glob" | "LS" => RiskLevel::Low,
        "Write" | "Edit" | "MultiEdit" => RiskLevel::Medium,
        "Bash" | "Terminal" | "WebSearch" | "Fetch" => RiskLevel::High,
        _ => RiskLevel::Medium,
    }
}

/// Tools that go through the approval policy, when one is configured.
/// Anything above `Low`, including unknown tools.
pub fn is_risky_tool(tool_name: &str) -> bool {
    risk_level(tool_name) != RiskLevel::Low
}

/// Ask-before-act request for a risky tool that passed the allow-list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub skill_id: String,
    pub tool_name: String,
    pub risk_level: RiskLevel,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApprovalDecision {
    AllowOnce,
    /// Allow this tool for the remainder of the session.
    AllowAlways,
    Deny,
}

/// Host-supplied approval hook (CLI prompt, GUI dialog, fixed policy).
pub trait ApprovalPolicy: Send + Sync {
    fn decide(&self, request: &ApprovalRequest) -> ApprovalDecision;
}

/// Strict mode: every risky tool is denied.
pub struct DenyAll;

impl ApprovalPolicy for DenyAll {
    fn decide(&self, _request: &ApprovalRequest) -> ApprovalDecision {
        ApprovalDecision::Deny
    }
}

/// Per-session tool gate.
///
/// Checks every tool use against the skill's allow-list and keeps the audit
/// of permissions actually exercised, in first-use order. A denied attempt
/// never enters `permissions_used`; it is kept in `denied_attempts` for the
/// operator audit only.
pub struct PermissionGuard {
    catalog: Arc<dyn SkillCatalog>,
    approval: Option<Arc<dyn ApprovalPolicy>>,
    permissions_used: Vec<String>,
    denied_attempts: Vec<String>,
    always_allowed: HashSet<String>,
}

impl PermissionGuard {
    pub fn new(catalog: Arc<dyn SkillCatalog>) -> Self {
        Self {
            catalog,
            approval: None,
            permissions_used: Vec::new(),
            denied_attempts: Vec::new(),
            always_allowed: HashSet::new(),
        }
    }

    pub fn with_approval(mut self, policy: Arc<dyn ApprovalPolicy>) -> Self {
        self.approval = Some(policy);
        self
    }

    /// Gate one tool use.
    ///
    /// On success the tool is added to `permissions_used` (first use only).
    ///
    /// # Errors
    /// `SkillNotFound` for an unknown skill, `PermissionDenied` when the tool
    /// is outside the allow-list or the approval policy refuses it.
    pub fn check(&mut self, skill_id: &str, tool_name: &str) -> Result<(), PolicyError> {
        let outcome = authorize(
            self.catalog.as_ref(),
            self.approval.as_deref(),
            Some(&mut self.always_allowed),
            skill_id,
            tool_name,
        );

        match outcome {
            Ok(()) => {
                if !self.permissions_used.iter().any(|t| t == tool_name) {
                    self.permissions_used.push(tool_name.to_string());
                }
                Ok(())
            }
            Err(e) => {
                if matches!(e, PolicyError::PermissionDenied { .. }) {
                    self.denied_attempts.push(tool_name.to_string());
                }
                Err(e)
            }
        }
    }

    /// Distinct tool names used so far, in first-use order.
    pub fn permissions_used(&self) -> &[String] {
        &self.permissions_used
    }

    /// Denied tool names, in attempt order (repeats kept).
    pub fn denied_attempts(&self) -> &[String] {
        &self.denied_attempts
    }
}

impl std::fmt::Debug for PermissionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionGuard")
            .field("has_approval", &self.approval.is_some())
            .field("permissions_used", &self.permissions_used)
            .field("denied_attempts", &self.denied_attempts)
            .finish()
    }
}

/// Standalone check, usable without a session. Nothing is recorded.
pub fn check_tool_permission(
    catalog: &dyn SkillCatalog,
    approval: Option<&dyn ApprovalPolicy>,
    skill_id: &str,
    tool_name: &str,
) -> Result<bool, PolicyError> {
    authorize(catalog, approval, None, skill_id, tool_name)?;
    Ok(true)
}

fn authorize(
    catalog: &dyn SkillCatalog,
    approval: Option<&dyn ApprovalPolicy>,
    always_allowed: Option<&mut HashSet<String>>,
    skill_id: &str,
    tool_name: &str,
) -> Result<(), PolicyError> {
    let allowed = catalog.get_allowed_tools(skill_id)?;
    if !allowed.contains(tool_name) {
        warn!("Tool {} denied for skill {}: not in allow-list", tool_name, skill_id);
        return Err(PolicyError::not_in_allow_list(skill_id, tool_name));
    }

    let Some(policy) = approval else {
        return Ok(());
    };
    if !is_risky_tool(tool_name) {
        return Ok(());
    }

    if let Some(granted) = always_allowed.as_deref() {
        if granted.contains(tool_name) {
            return Ok(());
        }
    }

    let request = ApprovalRequest {
        skill_id: skill_id.to_string(),
        tool_name: tool_name.to_string(),
        risk_level: risk_level(tool_name),
        description: format!("Execute {} operations", tool_name),
    };

    match policy.decide(&request) {
        ApprovalDecision::AllowOnce => {
            debug!("Approval granted once: {} for {}", tool_name, skill_id);
            Ok(())
        }
        ApprovalDecision::AllowAlways => {
            debug!("Approval granted for session: {} for {}", tool_name, skill_id);
            if let Some(granted) = always_allowed {
                granted.insert(tool_name.to_string());
            }
            Ok(())
        }
        ApprovalDecision::Deny => {
            warn!("Tool {} denied for skill {} by approval policy", tool_name, skill_id);
            Err(PolicyError::PermissionDenied {
                skill_id: skill_id.to_string(),
                tool_name: tool_name.to_string(),
                reason: "denied by approval policy".to_string(),
            })
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::catalog::{ContextMode, StaticCatalog};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn catalog() -> Arc<dyn SkillCatalog> {
        Arc::new(
            StaticCatalog::new()
                .with_skill("code-review", ["Read", "Grep", "Glob", "LS"], ContextMode::Fork)
                .with_skill("editor", ["Read", "Write", "Bash", "Deploy"], ContextMode::Inline),
        )
    }

    struct CountingPolicy {
        decision: ApprovalDecision,
        calls: AtomicUsize,
    }

    impl ApprovalPolicy for CountingPolicy {
        fn decide(&self, _request: &ApprovalRequest) -> ApprovalDecision {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.decision
        }
    }

    #[test]
    fn test_allowed_tool_recorded_once() {
        let mut guard = PermissionGuard::new(catalog());
        guard.check("code-review", "Read").unwrap();
        guard.check("code-review", "Grep").unwrap();
        guard.check("code-review", "Read").unwrap();
        assert_eq!(guard.permissions_used(), ["Read", "Grep"]);
    }

    #[test]
    fn test_denied_tool_not_recorded() {
        let mut guard = PermissionGuard::new(catalog());
        guard.check("code-review", "Read").unwrap();

        let err = guard.check("code-review", "Write").unwrap_err();
        match err {
            PolicyError::PermissionDenied {
                skill_id,
                tool_name,
                ..
            } => {
                assert_eq!(skill_id, "code-review");
                assert_eq!(tool_name, "Write");
            }
            other => panic!("Expected PermissionDenied, got {other:?}"),
        }
        assert_eq!(guard.permissions_used(), ["Read"]);
        assert_eq!(guard.denied_attempts(), ["Write"]);
    }

    #[test]
    fn test_unknown_skill() {
        let mut guard = PermissionGuard::new(catalog());
        let err = guard.check("ghost", "Read").unwrap_err();
        assert!(matches!(err, PolicyError::SkillNotFound(_)));
        assert!(guard.permissions_used().is_empty());
        assert!(guard.denied_attempts().is_empty());
    }

    #[test]
    fn test_error_message_mentions_not_allowed() {
        let err = check_tool_permission(catalog().as_ref(), None, "code-review", "Write")
            .unwrap_err();
        assert!(err.to_string().contains("not allowed"));
    }

    #[test]
    fn test_standalone_check() {
        let catalog = catalog();
        assert!(check_tool_permission(catalog.as_ref(), None, "code-review", "Glob").unwrap());
        assert!(check_tool_permission(catalog.as_ref(), None, "code-review", "Bash").is_err());
    }

    #[test]
    fn test_low_risk_tool_skips_approval() {
        let policy = Arc::new(CountingPolicy {
            decision: ApprovalDecision::Deny,
            calls: AtomicUsize::new(0),
        });
        let mut guard = PermissionGuard::new(catalog()).with_approval(policy.clone());
        guard.check("editor", "Read").unwrap();
        assert_eq!(policy.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_deny_all_blocks_risky_tool() {
        let mut guard = PermissionGuard::new(catalog()).with_approval(Arc::new(DenyAll));
        let err = guard.check("editor", "Write").unwrap_err();
        assert!(err.to_string().contains("denied by approval policy"));
        assert!(guard.permissions_used().is_empty());
        assert_eq!(guard.denied_attempts(), ["Write"]);
    }

    #[test]
    fn test_allow_always_is_remembered_for_session() {
        let policy = Arc::new(CountingPolicy {
            decision: ApprovalDecision::AllowAlways,
            calls: AtomicUsize::new(0),
        });
        let mut guard = PermissionGuard::new(catalog()).with_approval(policy.clone());
        guard.check("editor", "Bash").unwrap();
        guard.check("editor", "Bash").unwrap();
        assert_eq!(policy.calls.load(Ordering::SeqCst), 1);
        assert_eq!(guard.permissions_used(), ["Bash"]);
    }

    #[test]
    fn test_allow_once_asks_every_time() {
        let policy = Arc::new(CountingPolicy {
            decision: ApprovalDecision::AllowOnce,
            calls: AtomicUsize::new(0),
        });
        let mut guard = PermissionGuard::new(catalog()).with_approval(policy.clone());
        guard.check("editor", "Write").unwrap();
        guard.check("editor", "Write").unwrap();
        assert_eq!(policy.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_allow_list_checked_before_approval() {
        let policy = Arc::new(CountingPolicy {
            decision: ApprovalDecision::AllowAlways,
            calls: AtomicUsize::new(0),
        });
        let mut guard = PermissionGuard::new(catalog()).with_approval(policy.clone());
        assert!(guard.check("code-review", "Bash").is_err());
        assert_eq!(policy.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_risk_levels() {
        assert_eq!(risk_level("Read"), RiskLevel::Low);
        assert_eq!(risk_level("Edit"), RiskLevel::Medium);
        assert_eq!(risk_level("Bash"), RiskLevel::High);
        assert_eq!(risk_level("SomethingElse"), RiskLevel::Medium);
        assert!(is_risky_tool("Fetch"));
        assert!(is_risky_tool("SomethingElse"));
        assert!(!is_risky_tool("Glob"));
    }

    #[test]
    fn test_deny_all_blocks_unknown_tool() {
        let mut guard = PermissionGuard::new(catalog()).with_approval(Arc::new(DenyAll));
        let err = guard.check("editor", "Deploy").unwrap_err();
        assert!(err.to_string().contains("denied by approval policy"));
        assert!(guard.permissions_used().is_empty());
        assert_eq!(guard.denied_attempts(), ["Deploy"]);

        assert!(check_tool_permission(catalog().as_ref(), None, "editor", "Deploy").unwrap());
    }
}
