//! Session registry and the operations callers drive sessions through.

use crate::assembler::{SessionOutcome, SessionResult};
use crate::audit::{AuditError, AuditRecord, AuditSink, ExecutionStatus, NoopAuditSink};
use crate::config::RuntimeConfig;
use crate::engine::{ExecutionError, ExecutionRequest, SandboxEngine};
use crate::error::SessionError;
use crate::metrics::{MetricTimer, EXECUTION_LATENCY};
use crate::session::{SessionId, SessionOptions, SkillSession};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use skillgate_policy::{ApprovalPolicy, SkillCatalog};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Registry entry. `finished` mirrors the session phase so registry-wide
/// bookkeeping never has to take a session's mutex.
struct SessionSlot {
    session: Mutex<SkillSession>,
    finished: AtomicBool,
}

type SharedSlot = Arc<SessionSlot>;

/// Owns every session it started, keyed by [`SessionId`].
///
/// Finished sessions stay registered as tombstones so that a repeated
/// finish reports `SessionAlreadyFinished` rather than `SessionNotFound`.
/// A tombstone holds ids and timestamps only. Once more than
/// `max_finished_sessions` accumulate they are all pruned; call
/// [`SkillRuntime::prune_finished`] to drop them earlier.
///
/// The registry lock is never held while a session's mutex is waited on,
/// so a session blocked in an approval prompt does not stall others.
pub struct SkillRuntime {
    catalog: Arc<dyn SkillCatalog>,
    approval: Option<Arc<dyn ApprovalPolicy>>,
    audit_sink: Arc<dyn AuditSink>,
    config: RuntimeConfig,
    sessions: RwLock<HashMap<SessionId, SharedSlot>>,
    active: AtomicUsize,
    tombstones: AtomicUsize,
}

impl SkillRuntime {
    pub fn new(catalog: Arc<dyn SkillCatalog>) -> Self {
        Self::with_config(catalog, RuntimeConfig::default())
    }

    pub fn with_config(catalog: Arc<dyn SkillCatalog>, config: RuntimeConfig) -> Self {
        Self {
            catalog,
            approval: None,
            audit_sink: Arc::new(NoopAuditSink),
            config,
            sessions: RwLock::new(HashMap::new()),
            active: AtomicUsize::new(0),
            tombstones: AtomicUsize::new(0),
        }
    }

    /// Sink for operator audit records.
    ///
    /// Sinks may block. Synchronous finishes call the sink on the caller's
    /// thread; [`SkillRuntime::execute_skill`] calls it on tokio's blocking
    /// pool.
    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit_sink = sink;
        self
    }

    /// Default approval policy for sessions that do not bring their own.
    pub fn with_approval(mut self, policy: Arc<dyn ApprovalPolicy>) -> Self {
        self.approval = Some(policy);
        self
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<dyn SkillCatalog> {
        &self.catalog
    }

    /// Open a session and register it.
    ///
    /// # Errors
    /// - `SkillNotFound` for an unknown skill
    /// - `SessionLimitReached` when `max_active_sessions` are open
    pub fn start_skill_session(
        &self,
        skill_id: &str,
        input: Value,
        mut options: SessionOptions<'_>,
    ) -> Result<SessionId, SessionError> {
        if options.approval.is_none() {
            options.approval = self.approval.clone();
        }

        self.reserve_active(skill_id)?;
        let session = match SkillSession::start(self.catalog.clone(), skill_id, input, options) {
            Ok(session) => session,
            Err(e) => {
                self.active.fetch_sub(1, Ordering::SeqCst);
                return Err(e);
            }
        };

        let id = session.id();
        let slot = Arc::new(SessionSlot {
            session: Mutex::new(session),
            finished: AtomicBool::new(false),
        });
        self.sessions.write().insert(id, slot);
        Ok(id)
    }

    pub fn record_tool_call(
        &self,
        id: SessionId,
        tool_name: &str,
        details: &Value,
    ) -> Result<(), SessionError> {
        self.slot(id)?.session.lock().record_tool_call(tool_name, details)
    }

    pub fn record_result(&self, id: SessionId, content: impl Into<String>) -> Result<(), SessionError> {
        self.slot(id)?.session.lock().record_result(content)
    }

    pub fn record_result_json(&self, id: SessionId, result: &Value) -> Result<(), SessionError> {
        self.slot(id)?.session.lock().record_result_json(result)
    }

    pub fn record_stdout(&self, id: SessionId, stdout: &str) -> Result<(), SessionError> {
        self.slot(id)?.session.lock().record_stdout(stdout)
    }

    pub fn record_stderr(&self, id: SessionId, stderr: &str) -> Result<(), SessionError> {
        self.slot(id)?.session.lock().record_stderr(stderr)
    }

    /// Finish a session and emit its audit record.
    ///
    /// Exactly one finish per session succeeds.
    pub fn finish_skill_session(
        &self,
        id: SessionId,
        final_output: Value,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) -> Result<SessionResult, SessionError> {
        let outcome = SessionOutcome::new(final_output, stdout, stderr);
        let (result, record) = self.close_session(id, outcome, ExecutionStatus::Success)?;
        log_audit_outcome(&record, self.audit_sink.record(&record));
        Ok(result)
    }

    /// Allow-list check with nothing recorded.
    pub fn check_tool_permission(&self, skill_id: &str, tool_name: &str) -> Result<bool, SessionError> {
        Ok(skillgate_policy::check_tool_permission(
            self.catalog.as_ref(),
            self.approval.as_deref(),
            skill_id,
            tool_name,
        )?)
    }

    /// Run a skill artifact end to end inside a fresh session.
    ///
    /// On success the engine's streams and output are recorded and the
    /// session is finished with them. On failure the session is finished
    /// with a failed status and the engine error is returned unchanged.
    pub async fn execute_skill(
        &self,
        engine: &dyn SandboxEngine,
        skill_id: &str,
        artifact: &str,
        input: Value,
        options: SessionOptions<'_>,
    ) -> Result<SessionResult, SessionError> {
        let id = self.start_skill_session(skill_id, input.clone(), options)?;
        let (timeout, context_id) = {
            let slot = self.slot(id)?;
            let session = slot.session.lock();
            (
                session.timeout().unwrap_or_else(|| self.config.default_timeout()),
                session.context_id().to_string(),
            )
        };

        let request = ExecutionRequest {
            artifact: artifact.to_string(),
            input,
            timeout,
            context_id,
        };

        debug!("Executing skill {} in session {}", skill_id, id);
        let run = {
            let _timer = MetricTimer::new(EXECUTION_LATENCY);
            match tokio::time::timeout(timeout, engine.run(request)).await {
                Ok(result) => result,
                Err(_) => Err(ExecutionError::Timeout(timeout)),
            }
        };

        match run {
            Ok(output) => {
                {
                    let slot = self.slot(id)?;
                    let mut session = slot.session.lock();
                    session.record_stdout(&output.stdout)?;
                    session.record_stderr(&output.stderr)?;
                    session.record_result_json(&output.output)?;
                }
                let outcome = SessionOutcome::new(output.output, output.stdout, output.stderr);
                let (result, record) = self.close_session(id, outcome, ExecutionStatus::Success)?;
                self.emit_audit_blocking(record).await;
                Ok(result)
            }
            Err(e) => {
                error!("Skill {} failed in session {}: {}", skill_id, id, e);
                crate::metrics::record_execution_failure();

                let status = match &e {
                    ExecutionError::Timeout(_) => ExecutionStatus::Timeout,
                    other => ExecutionStatus::Failed(other.to_string()),
                };
                match self.close_session(id, SessionOutcome::default(), status) {
                    Ok((_, record)) => self.emit_audit_blocking(record).await,
                    Err(finish_err) => {
                        warn!("Could not close failed session {}: {}", id, finish_err)
                    }
                }
                Err(SessionError::Execution(e))
            }
        }
    }

    /// Read-only access to a registered session.
    pub fn with_session<R>(
        &self,
        id: SessionId,
        f: impl FnOnce(&SkillSession) -> R,
    ) -> Result<R, SessionError> {
        let slot = self.slot(id)?;
        let guard = slot.session.lock();
        Ok(f(&*guard))
    }

    pub fn active_sessions(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Drop finished sessions. Returns how many were removed.
    pub fn prune_finished(&self) -> usize {
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, slot| !slot.finished.load(Ordering::SeqCst));
        let removed = before - sessions.len();
        drop(sessions);

        if removed > 0 {
            self.tombstones.fetch_sub(removed, Ordering::SeqCst);
            debug!("Pruned {} finished sessions", removed);
        }
        removed
    }

    fn reserve_active(&self, skill_id: &str) -> Result<(), SessionError> {
        let max = self.config.max_active_sessions;
        self.active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < max).then_some(n + 1)
            })
            .map(|_| ())
            .map_err(|active| {
                warn!(
                    "Rejecting session for skill {}: {} sessions active",
                    skill_id, active
                );
                SessionError::SessionLimitReached(max)
            })
    }

    fn close_session(
        &self,
        id: SessionId,
        outcome: SessionOutcome,
        status: ExecutionStatus,
    ) -> Result<(SessionResult, AuditRecord), SessionError> {
        let slot = self.slot(id)?;
        let finished = slot.session.lock().finish_with_status(outcome, status)?;

        // Counted before flagged, so a concurrent prune never removes an
        // uncounted tombstone.
        let tombstones = self.tombstones.fetch_add(1, Ordering::SeqCst) + 1;
        slot.finished.store(true, Ordering::SeqCst);
        self.active.fetch_sub(1, Ordering::SeqCst);

        if tombstones > self.config.max_finished_sessions {
            self.prune_finished();
        }
        Ok(finished)
    }

    async fn emit_audit_blocking(&self, record: AuditRecord) {
        let sink = self.audit_sink.clone();
        let task = tokio::task::spawn_blocking(move || {
            let outcome = sink.record(&record);
            (record, outcome)
        });
        match task.await {
            Ok((record, outcome)) => log_audit_outcome(&record, outcome),
            Err(e) => warn!("Audit task failed: {}", e),
        }
    }

    fn slot(&self, id: SessionId) -> Result<SharedSlot, SessionError> {
        self.sessions
            .read()
            .get(&id)
            .cloned()
            .ok_or(SessionError::SessionNotFound(id))
    }
}

fn log_audit_outcome(record: &AuditRecord, outcome: Result<(), AuditError>) {
    match outcome {
        Ok(()) => info!(
            "Audit: skill={} session={} status={:?}",
            record.skill_id, record.session_id, record.status
        ),
        Err(e) => warn!("Failed to write audit record for {}: {}", record.session_id, e),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;
    use skillgate_policy::{ContextMode, StaticCatalog};

    fn runtime(max_active_sessions: usize) -> SkillRuntime {
        runtime_with(RuntimeConfig {
            max_active_sessions,
            ..RuntimeConfig::default()
        })
    }

    fn runtime_with(config: RuntimeConfig) -> SkillRuntime {
        let catalog = StaticCatalog::new()
            .with_skill("code-review", ["Read", "Grep"], ContextMode::Fork)
            .with_skill("explaining-code", ["Read"], ContextMode::Inline);
        SkillRuntime::with_config(Arc::new(catalog), config)
    }

    #[test]
    fn test_unknown_session_id() {
        let rt = runtime(4);
        let id = SessionId::new();
        assert!(matches!(
            rt.record_result(id, "x"),
            Err(SessionError::SessionNotFound(got)) if got == id
        ));
    }

    #[test]
    fn test_session_limit_counts_only_open_sessions() {
        let rt = runtime(1);
        let first = rt
            .start_skill_session("explaining-code", json!(null), SessionOptions::default())
            .unwrap();
        assert!(matches!(
            rt.start_skill_session("explaining-code", json!(null), SessionOptions::default()),
            Err(SessionError::SessionLimitReached(1))
        ));

        rt.finish_skill_session(first, json!(null), "", "").unwrap();
        assert!(rt
            .start_skill_session("explaining-code", json!(null), SessionOptions::default())
            .is_ok());
    }

    #[test]
    fn test_unknown_skill_is_not_registered() {
        let rt = runtime(4);
        let err = rt
            .start_skill_session("ghost", json!(null), SessionOptions::default())
            .unwrap_err();
        assert!(matches!(err, SessionError::SkillNotFound(_)));
        assert_eq!(rt.session_count(), 0);
    }

    #[test]
    fn test_prune_keeps_open_sessions() {
        let rt = runtime(4);
        let open = rt
            .start_skill_session("code-review", json!(null), SessionOptions::default())
            .unwrap();
        let done = rt
            .start_skill_session("code-review", json!(null), SessionOptions::default())
            .unwrap();
        rt.finish_skill_session(done, json!(null), "", "").unwrap();

        assert_eq!(rt.active_sessions(), 1);
        assert_eq!(rt.prune_finished(), 1);
        assert_eq!(rt.session_count(), 1);
        assert!(rt.with_session(open, |s| s.is_forked()).unwrap());
        assert!(matches!(
            rt.finish_skill_session(done, json!(null), "", ""),
            Err(SessionError::SessionNotFound(_))
        ));
    }

    #[test]
    fn test_check_tool_permission() {
        let rt = runtime(4);
        assert!(rt.check_tool_permission("code-review", "Read").unwrap());
        assert!(matches!(
            rt.check_tool_permission("code-review", "Write"),
            Err(SessionError::PermissionDenied { .. })
        ));
        assert!(matches!(
            rt.check_tool_permission("ghost", "Read"),
            Err(SessionError::SkillNotFound(_))
        ));
    }

    #[test]
    fn test_with_session_reads_state() {
        let rt = runtime(4);
        let id = rt
            .start_skill_session("code-review", json!(null), SessionOptions::default())
            .unwrap();
        rt.record_tool_call(id, "Grep", &json!({"pattern": "fn"})).unwrap();

        let used = rt.with_session(id, |s| s.permissions_used().to_vec()).unwrap();
        assert_eq!(used, vec!["Grep"]);
    }

    #[test]
    fn test_failed_start_releases_reserved_slot() {
        let rt = runtime(1);
        assert!(rt
            .start_skill_session("ghost", json!(null), SessionOptions::default())
            .is_err());
        assert_eq!(rt.active_sessions(), 0);
        assert!(rt
            .start_skill_session("code-review", json!(null), SessionOptions::default())
            .is_ok());
    }

    #[test]
    fn test_finished_session_drops_input() {
        let rt = runtime(4);
        let id = rt
            .start_skill_session(
                "explaining-code",
                json!({"payload": "large document"}),
                SessionOptions::default(),
            )
            .unwrap();
        assert!(rt.with_session(id, |s| s.input().is_some()).unwrap());

        rt.finish_skill_session(id, json!(null), "", "").unwrap();
        assert!(rt.with_session(id, |s| s.input().is_none()).unwrap());
    }

    #[test]
    fn test_tombstones_are_bounded() {
        let rt = runtime_with(RuntimeConfig {
            max_finished_sessions: 2,
            ..RuntimeConfig::default()
        });
        let open = rt
            .start_skill_session("code-review", json!(null), SessionOptions::default())
            .unwrap();

        for _ in 0..2 {
            let id = rt
                .start_skill_session("code-review", json!(null), SessionOptions::default())
                .unwrap();
            rt.finish_skill_session(id, json!(null), "", "").unwrap();
        }
        assert_eq!(rt.session_count(), 3);

        let third = rt
            .start_skill_session("code-review", json!(null), SessionOptions::default())
            .unwrap();
        rt.finish_skill_session(third, json!(null), "", "").unwrap();

        assert_eq!(rt.session_count(), 1);
        assert_eq!(rt.active_sessions(), 1);
        assert!(rt.with_session(open, |s| !s.is_finished()).unwrap());
    }
}
