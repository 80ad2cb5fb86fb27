//! Execution contexts and their append-only output log.
//!
//! Contexts form a tree through `parent_id` back-references only; a parent
//! never tracks its children. A fork starts with an empty log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Summary returned for a context that recorded no results.
pub const EMPTY_SUMMARY: &str = "Execution completed with no outputs.";

/// Separator between result entries in a summary.
const SUMMARY_SEPARATOR: &str = "\n\n";

/// Kind tag of a recorded entry.
///
/// Unrecognized kinds are kept as `Other` so they remain visible in audit
/// dumps. Only `Result` entries ever reach a summary.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum OutputKind {
    ToolCall,
    Result,
    Stdout,
    Stderr,
    Other(String),
}

impl OutputKind {
    pub fn as_str(&self) -> &str {
        match self {
            OutputKind::ToolCall => "toolcall",
            OutputKind::Result => "result",
            OutputKind::Stdout => "stdout",
            OutputKind::Stderr => "stderr",
            OutputKind::Other(kind) => kind,
        }
    }
}

impl From<&str> for OutputKind {
    fn from(kind: &str) -> Self {
        match kind {
            "toolcall" => OutputKind::ToolCall,
            "result" => OutputKind::Result,
            "stdout" => OutputKind::Stdout,
            "stderr" => OutputKind::Stderr,
            other => OutputKind::Other(other.to_string()),
        }
    }
}

impl From<String> for OutputKind {
    fn from(kind: String) -> Self {
        OutputKind::from(kind.as_str())
    }
}

impl From<OutputKind> for String {
    fn from(kind: OutputKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for OutputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded `(kind, content)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub kind: OutputKind,
    pub content: String,
    pub recorded_at: DateTime<Utc>,
}

/// A node in the execution tree.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    id: String,
    parent_id: Option<String>,
    is_forked: bool,
    entries: Vec<ContextEntry>,
}

impl ExecutionContext {
    /// Create a root context.
    pub fn new() -> Self {
        Self {
            id: generate_context_id(),
            parent_id: None,
            is_forked: false,
            entries: Vec::new(),
        }
    }

    /// Create a child of this context with an empty log.
    ///
    /// The parent is not modified.
    pub fn fork(&self) -> Self {
        Self {
            id: generate_context_id(),
            parent_id: Some(self.id.clone()),
            is_forked: true,
            entries: Vec::new(),
        }
    }

    /// Append an entry. Order of calls is the order of `entries()`.
    pub fn record_output(&mut self, kind: impl Into<OutputKind>, content: impl Into<String>) {
        self.entries.push(ContextEntry {
            kind: kind.into(),
            content: content.into(),
            recorded_at: Utc::now(),
        });
    }

    /// Project the log onto its `Result` entries, joined in call order.
    ///
    /// No other entry kind contributes any content. An empty projection
    /// yields [`EMPTY_SUMMARY`].
    pub fn summarize(&self) -> String {
        let results: Vec<&str> = self
            .entries
            .iter()
            .filter(|entry| entry.kind == OutputKind::Result)
            .map(|entry| entry.content.as_str())
            .collect();

        if results.is_empty() {
            return EMPTY_SUMMARY.to_string();
        }
        results.join(SUMMARY_SEPARATOR)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn parent_id(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }

    pub fn is_forked(&self) -> bool {
        self.is_forked
    }

    /// Full log, including tool calls. Operator/debug use only.
    pub fn entries(&self) -> &[ContextEntry] {
        &self.entries
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

fn generate_context_id() -> String {
    format!("ctx_{}", Uuid::new_v4().simple())
}
