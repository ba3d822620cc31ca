//! Core types for the orchestrator.
//!
//! The data model shared by the router, handoff coordinator, skill
//! invoker, and cache store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use uuid::Uuid;

/// Unique identifier for sessions, events, and listeners.
/// Uses `UUIDv7` for time-ordered lexicographic sorting.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id(pub String);

impl Id {
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }
}

impl Default for Id {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Id {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// --- Enumerations ---

/// Kind tag for a cache store entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// Terminal orchestration result persisted for session priming.
    Context,
    /// Cached skill output keyed by (skill, input hash).
    Cache,
    /// Ingested document chunk.
    Document,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Context => "context",
            Self::Cache => "cache",
            Self::Document => "document",
        }
    }

    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "cache" => Self::Cache,
            "document" => Self::Document,
            _ => Self::Context,
        }
    }
}

/// Auxiliary service lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    #[default]
    Stopped,
    Starting,
    Running,
    Error,
}

impl ServiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Error => "error",
        }
    }
}

// --- Core Types ---

/// Project-scoped context supplied by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectContext {
    /// Stable project identifier; also names the cache collection.
    pub project_id: String,
    /// Working directory for handler and service execution.
    pub working_dir: PathBuf,
    /// Current branch, if the caller is inside a repository.
    pub branch: Option<String>,
    /// Files the caller considers relevant to the task.
    pub files: Vec<String>,
}

impl Default for ProjectContext {
    fn default() -> Self {
        Self {
            project_id: "default".to_string(),
            working_dir: PathBuf::from("."),
            branch: None,
            files: Vec::new(),
        }
    }
}

/// Execution context handed to a handler for one step of a chain.
///
/// Each handoff builds a *new* derived context; a context is never
/// mutated after construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentContext {
    /// The free-text task being routed.
    pub task: String,
    pub project: ProjectContext,
    /// Output of the previous handler in the chain, if any.
    pub previous_output: Option<serde_json::Value>,
    /// Cache collection this chain reads and writes.
    pub collection_id: String,
    pub session_id: Id,
    /// Number of handoff transitions performed before this step.
    pub depth: u32,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl AgentContext {
    /// Build the initial context for a freshly routed task.
    pub fn new(task: impl Into<String>, project: ProjectContext, session_id: Id) -> Self {
        let collection_id = project.project_id.clone();
        Self {
            task: task.into(),
            project,
            previous_output: None,
            collection_id,
            session_id,
            depth: 0,
            metadata: HashMap::new(),
        }
    }

    /// Derive the context for the next step after a handoff.
    ///
    /// Carries the previous handler's output forward, increments the
    /// depth, and annotates metadata with the handoff details. The
    /// original context is left untouched.
    pub fn derive_for_handoff(&self, result: &AgentResult) -> Self {
        let mut next = self.clone();
        next.previous_output = Some(result.output.clone());
        next.depth = self.depth + 1;
        next.metadata.insert(
            "handoff_depth".to_string(),
            serde_json::Value::from(next.depth),
        );
        if let Some(handoff) = &result.handoff {
            next.metadata.insert(
                "handoff_reason".to_string(),
                serde_json::Value::from(handoff.reason.clone()),
            );
            next.metadata
                .insert("handoff_context".to_string(), handoff.context.clone());
        }
        next
    }
}

/// A typed artifact produced by a handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentArtifact {
    pub name: String,
    /// Kind of artifact (e.g., `patch`, `report`, `notes`).
    pub kind: String,
    pub content: String,
}

/// Result of executing one handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResult {
    pub success: bool,
    /// Opaque output payload; `{"error": ...}` on failure.
    pub output: serde_json::Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<AgentArtifact>,
    /// Handler the coordinator should run next, if a handoff is requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_handler: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handoff: Option<HandoffRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl AgentResult {
    /// Successful result with the given output payload.
    pub fn ok(output: serde_json::Value) -> Self {
        Self {
            success: true,
            output,
            artifacts: Vec::new(),
            next_handler: None,
            handoff: None,
            duration_ms: None,
        }
    }

    /// Failed result carrying `{"error": message}`.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            output: serde_json::json!({ "error": message.into() }),
            artifacts: Vec::new(),
            next_handler: None,
            handoff: None,
            duration_ms: None,
        }
    }

    /// Request a handoff to `target` after this result.
    pub fn with_handoff(mut self, request: HandoffRequest) -> Self {
        self.next_handler = Some(request.target.clone());
        self.handoff = Some(request);
        self
    }
}

/// A handler's request to hand the chain off to another handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandoffRequest {
    /// Name of the handler that should run next.
    pub target: String,
    pub reason: String,
    /// Opaque context forwarded to the next handler.
    pub context: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,
}

impl HandoffRequest {
    pub fn new(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            reason: reason.into(),
            context: serde_json::Value::Null,
            priority: None,
        }
    }
}

/// A single entry retrieved from the cache store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEntry {
    pub id: String,
    pub kind: EntryKind,
    pub source: String,
    pub text: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub ttl_sec: Option<u64>,
}

impl StoredEntry {
    /// Whether this entry is past its TTL at `now`.
    ///
    /// Entries without a TTL never expire. Readers must check this
    /// themselves; writers do not proactively delete expired siblings.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.ttl_sec {
            Some(ttl) => {
                let age_ms = now.timestamp_millis() - self.created_at.timestamp_millis();
                age_ms > (ttl as i64).saturating_mul(1000)
            }
            None => false,
        }
    }
}
