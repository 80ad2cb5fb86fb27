//! One skill invocation: context, permission guard and lifecycle.
//!
//! `Started -> Recording -> Finished`. Finishing releases the context and the
//! guard; every later call fails with `SessionAlreadyFinished`.

use crate::assembler::{assemble_result, SessionOutcome, SessionResult};
use crate::audit::{hash_json, AuditRecord, ExecutionStatus};
use crate::context::{ExecutionContext, OutputKind};
use crate::error::SessionError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use skillgate_policy::{ApprovalPolicy, PermissionGuard, SkillCatalog};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Registry key of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0.simple())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    Started,
    Recording,
    Finished,
}

/// Options for [`SkillSession::start`].
#[derive(Clone, Default)]
pub struct SessionOptions<'a> {
    /// Context to fork from when the skill is fork-required.
    /// Ignored for non-forked skills.
    pub parent: Option<&'a ExecutionContext>,
    /// Sandbox timeout for runs scoped to this session.
    pub timeout: Option<Duration>,
    /// Ask-before-act hook for risky tools.
    pub approval: Option<Arc<dyn ApprovalPolicy>>,
}

impl<'a> SessionOptions<'a> {
    pub fn with_parent(mut self, parent: &'a ExecutionContext) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_approval(mut self, policy: Arc<dyn ApprovalPolicy>) -> Self {
        self.approval = Some(policy);
        self
    }
}

/// State that lives exactly as long as the session is open.
struct LiveState {
    input: Value,
    context: ExecutionContext,
    guard: PermissionGuard,
}

pub struct SkillSession {
    id: SessionId,
    skill_id: String,
    forked: bool,
    timeout: Option<Duration>,
    context_id: String,
    parent_context_id: Option<String>,
    started_at: DateTime<Utc>,
    start_instant: Instant,
    phase: SessionPhase,
    live: Option<LiveState>,
}

impl SkillSession {
    /// Open a session for `skill_id`.
    ///
    /// Fork-required skills get a child context, forked from
    /// `options.parent` or from a transient root. Other skills get a plain
    /// root context. The sandbox is not invoked here.
    ///
    /// # Errors
    /// `SkillNotFound` if the catalog does not know the skill.
    pub fn start(
        catalog: Arc<dyn SkillCatalog>,
        skill_id: &str,
        input: Value,
        options: SessionOptions<'_>,
    ) -> Result<Self, SessionError> {
        let forked = catalog.is_fork_required(skill_id)?;

        let context = if forked {
            match options.parent {
                Some(parent) => parent.fork(),
                None => ExecutionContext::new().fork(),
            }
        } else {
            ExecutionContext::new()
        };

        let mut guard = PermissionGuard::new(catalog);
        if let Some(policy) = options.approval {
            guard = guard.with_approval(policy);
        }

        let session = Self {
            id: SessionId::new(),
            skill_id: skill_id.to_string(),
            forked,
            timeout: options.timeout,
            context_id: context.id().to_string(),
            parent_context_id: context.parent_id().map(str::to_string),
            started_at: Utc::now(),
            start_instant: Instant::now(),
            phase: SessionPhase::Started,
            live: Some(LiveState {
                input,
                context,
                guard,
            }),
        };

        info!(
            "Started session {} for skill {} (forked: {}, context: {})",
            session.id, session.skill_id, session.forked, session.context_id
        );
        crate::metrics::record_session_started(forked);
        Ok(session)
    }

    /// Gate and record a tool invocation.
    ///
    /// A denied call fails with `PermissionDenied` and leaves both the log
    /// and the permission audit untouched.
    pub fn record_tool_call(&mut self, tool_name: &str, details: &Value) -> Result<(), SessionError> {
        let rendered = format!("{}: {}", tool_name, serde_json::to_string(details)?);
        let (skill_id, live) = self.live_parts()?;

        if let Err(e) = live.guard.check(skill_id, tool_name) {
            crate::metrics::record_permission_denial();
            return Err(e.into());
        }
        live.context.record_output(OutputKind::ToolCall, rendered);

        debug!("Session {} recorded tool call {}", self.id, tool_name);
        crate::metrics::record_tool_call();
        self.phase = SessionPhase::Recording;
        Ok(())
    }

    /// Record a result. Results are not permission-gated.
    pub fn record_result(&mut self, content: impl Into<String>) -> Result<(), SessionError> {
        self.record(OutputKind::Result, content.into())
    }

    /// Record a structured result: strings verbatim, other values as JSON.
    pub fn record_result_json(&mut self, result: &Value) -> Result<(), SessionError> {
        let content = match result.as_str() {
            Some(text) => text.to_string(),
            None => serde_json::to_string(result)?,
        };
        self.record(OutputKind::Result, content)
    }

    /// Record captured stdout. Empty input is ignored.
    pub fn record_stdout(&mut self, stdout: &str) -> Result<(), SessionError> {
        if stdout.is_empty() {
            self.live_parts()?;
            return Ok(());
        }
        self.record(OutputKind::Stdout, stdout.to_string())
    }

    /// Record captured stderr. Empty input is ignored.
    pub fn record_stderr(&mut self, stderr: &str) -> Result<(), SessionError> {
        if stderr.is_empty() {
            self.live_parts()?;
            return Ok(());
        }
        self.record(OutputKind::Stderr, stderr.to_string())
    }

    /// Terminal transition; see [`assemble_result`] for the output rule.
    pub fn finish(
        &mut self,
        final_output: Value,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) -> Result<SessionResult, SessionError> {
        let outcome = SessionOutcome::new(final_output, stdout, stderr);
        let (result, _record) = self.finish_with_status(outcome, ExecutionStatus::Success)?;
        Ok(result)
    }

    /// Finish and also produce the operator audit record.
    pub fn finish_with_status(
        &mut self,
        outcome: SessionOutcome,
        status: ExecutionStatus,
    ) -> Result<(SessionResult, AuditRecord), SessionError> {
        let Some(live) = self.live.take() else {
            warn!("Session {} finished twice", self.id);
            return Err(SessionError::SessionAlreadyFinished(self.id));
        };
        self.phase = SessionPhase::Finished;

        let duration_ms = self.start_instant.elapsed().as_millis() as u64;
        let output_hash = hash_json(&outcome.final_output);
        let permissions_used = live.guard.permissions_used().to_vec();

        let result = assemble_result(self.forked, &live.context, &permissions_used, outcome);

        let record = AuditRecord {
            session_id: self.id.to_string(),
            skill_id: self.skill_id.clone(),
            context_id: self.context_id.clone(),
            parent_context_id: self.parent_context_id.clone(),
            forked: self.forked,
            input_hash: hash_json(&live.input),
            output_hash,
            started_at: self.started_at,
            duration_ms,
            permissions_used,
            denied_attempts: live.guard.denied_attempts().to_vec(),
            status,
        };

        info!(
            "Finished session {} for skill {} in {}ms ({} tools used)",
            self.id,
            self.skill_id,
            duration_ms,
            record.permissions_used.len()
        );
        crate::metrics::record_session_finished();
        crate::metrics::record_session_duration(duration_ms as f64);

        Ok((result, record))
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn skill_id(&self) -> &str {
        &self.skill_id
    }

    pub fn is_forked(&self) -> bool {
        self.forked
    }

    /// The caller's input; `None` once finished.
    pub fn input(&self) -> Option<&Value> {
        self.live.as_ref().map(|live| &live.input)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Id of the context this session records into. Stable after finish.
    pub fn context_id(&self) -> &str {
        &self.context_id
    }

    pub fn parent_context_id(&self) -> Option<&str> {
        self.parent_context_id.as_deref()
    }

    /// The live context; `None` once finished.
    pub fn context(&self) -> Option<&ExecutionContext> {
        self.live.as_ref().map(|live| &live.context)
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn is_finished(&self) -> bool {
        self.phase == SessionPhase::Finished
    }

    /// Tools used so far; empty once finished.
    pub fn permissions_used(&self) -> &[String] {
        self.live
            .as_ref()
            .map(|live| live.guard.permissions_used())
            .unwrap_or(&[])
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    fn record(&mut self, kind: OutputKind, content: String) -> Result<(), SessionError> {
        let (_, live) = self.live_parts()?;
        live.context.record_output(kind.clone(), content);
        debug!("Session {} recorded {} entry", self.id, kind);
        self.phase = SessionPhase::Recording;
        Ok(())
    }

    fn live_parts(&mut self) -> Result<(&str, &mut LiveState), SessionError> {
        match self.live.as_mut() {
            Some(live) => Ok((self.skill_id.as_str(), live)),
            None => {
                warn!("Session {} used after finish", self.id);
                Err(SessionError::SessionAlreadyFinished(self.id))
            }
        }
    }
}

impl fmt::Debug for SkillSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SkillSession")
            .field("id", &self.id)
            .field("skill_id", &self.skill_id)
            .field("forked", &self.forked)
            .field("context_id", &self.context_id)
            .field("parent_context_id", &self.parent_context_id)
            .field("phase", &self.phase)
            .finish()
    }
}
