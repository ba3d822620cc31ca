//! Lifecycle event types delivered through the event bus.
//!
//! The event set is fixed and closed: external collaborators (audit,
//! cleanup) subscribe to these six names and nothing else.

use crate::types::Id;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle event names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    SessionStart,
    SessionEnd,
    PreHandoff,
    PostSkillCall,
    Error,
    FileUpload,
}

impl EventKind {
    pub const ALL: [EventKind; 6] = [
        Self::SessionStart,
        Self::SessionEnd,
        Self::PreHandoff,
        Self::PostSkillCall,
        Self::Error,
        Self::FileUpload,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SessionStart => "session_start",
            Self::SessionEnd => "session_end",
            Self::PreHandoff => "pre_handoff",
            Self::PostSkillCall => "post_skill_call",
            Self::Error => "error",
            Self::FileUpload => "file_upload",
        }
    }
}

/// Payload for `session_start`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStartPayload {
    pub task: String,
    /// Handler selected by routing (or by explicit override).
    pub handler: String,
}

/// Payload for `session_end`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEndPayload {
    pub success: bool,
    /// Number of handler executions performed in the chain.
    pub steps: u32,
    pub duration_ms: u64,
}

/// Payload for `pre_handoff`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreHandoffPayload {
    pub from_handler: String,
    pub to_handler: String,
    pub reason: String,
    /// Depth of the step about to run.
    pub depth: u32,
}

/// Payload for `post_skill_call`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostSkillCallPayload {
    pub skill: String,
    pub handler: String,
    /// True when the result was served from the cache.
    pub cached: bool,
    pub duration_ms: u64,
}

/// Payload for `error`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Component where the failure surfaced (e.g., `listener`, `handler`).
    pub scope: String,
    pub message: String,
}

/// Payload for `file_upload`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileUploadPayload {
    pub path: String,
    pub format: String,
    pub chunks: u64,
}

/// Union type for all event payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventPayload {
    SessionStart(SessionStartPayload),
    SessionEnd(SessionEndPayload),
    PreHandoff(PreHandoffPayload),
    PostSkillCall(PostSkillCallPayload),
    Error(ErrorPayload),
    FileUpload(FileUploadPayload),
}

impl EventPayload {
    pub fn event_kind(&self) -> EventKind {
        match self {
            Self::SessionStart(_) => EventKind::SessionStart,
            Self::SessionEnd(_) => EventKind::SessionEnd,
            Self::PreHandoff(_) => EventKind::PreHandoff,
            Self::PostSkillCall(_) => EventKind::PostSkillCall,
            Self::Error(_) => EventKind::Error,
            Self::FileUpload(_) => EventKind::FileUpload,
        }
    }

    pub fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

/// Envelope delivered to every listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event: EventKind,
    pub timestamp: DateTime<Utc>,
    pub session_id: Id,
    pub project_id: String,
    /// Event-specific opaque data.
    pub data: serde_json::Value,
}

impl EventEnvelope {
    /// Build an envelope from a typed payload, stamping the current time.
    pub fn new(payload: &EventPayload, session_id: Id, project_id: impl Into<String>) -> Self {
        Self {
            event: payload.event_kind(),
            timestamp: Utc::now(),
            session_id,
            project_id: project_id.into(),
            data: payload.to_json().unwrap_or(serde_json::Value::Null),
        }
    }
}
