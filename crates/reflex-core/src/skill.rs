//! Skill contract: named capabilities with declared schemas and an
//! optional caching policy.
//!
//! The orchestrator treats skill payloads as opaque serializable values
//! behind the declared schema boundary; it serializes them for hashing
//! and storage but never interprets their contents.

use crate::types::Id;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

/// Error returned by a skill execution function.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SkillError {
    #[error("invalid skill input: {0}")]
    InvalidInput(String),
    #[error("skill execution failed: {0}")]
    Execution(String),
}

/// Context passed to every skill execution.
#[derive(Debug, Clone)]
pub struct SkillContext {
    /// Cache collection the invocation reads and writes.
    pub collection_id: String,
    pub session_id: Id,
    pub project_id: String,
    /// Name of the handler performing the invocation.
    pub handler: String,
}

/// Boxed future returned by a skill execution function.
pub type SkillFuture = Pin<Box<dyn Future<Output = Result<Value, SkillError>> + Send>>;

/// A skill's execution function: `(input, context) -> output`.
pub type SkillFn = Arc<dyn Fn(Value, SkillContext) -> SkillFuture + Send + Sync>;

/// A registered skill.
#[derive(Clone)]
pub struct Skill {
    /// Unique name; re-registration replaces in place.
    pub name: String,
    pub description: String,
    /// Declared input schema (opaque JSON schema value).
    pub input_schema: Value,
    /// Declared output schema (opaque JSON schema value).
    pub output_schema: Value,
    /// Whether successful outputs may be cached.
    pub cacheable: bool,
    /// Cache TTL in seconds; `None` means cached outputs never expire.
    pub ttl_sec: Option<u64>,
    pub run: SkillFn,
}

impl Skill {
    /// Build a skill from a name, description, and execution function.
    /// Schemas default to permissive empty objects; caching is off.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        run: SkillFn,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: serde_json::json!({}),
            output_schema: serde_json::json!({}),
            cacheable: false,
            ttl_sec: None,
            run,
        }
    }

    /// Enable caching with an optional TTL.
    pub fn cacheable(mut self, ttl_sec: Option<u64>) -> Self {
        self.cacheable = true;
        self.ttl_sec = ttl_sec;
        self
    }

    /// Attach declared input/output schemas.
    pub fn with_schemas(mut self, input: Value, output: Value) -> Self {
        self.input_schema = input;
        self.output_schema = output;
        self
    }
}

impl std::fmt::Debug for Skill {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Skill")
            .field("name", &self.name)
            .field("cacheable", &self.cacheable)
            .field("ttl_sec", &self.ttl_sec)
            .finish_non_exhaustive()
    }
}

/// Wrap a plain async closure as a [`SkillFn`].
pub fn skill_fn<F, Fut>(f: F) -> SkillFn
where
    F: Fn(Value, SkillContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, SkillError>> + Send + 'static,
{
    Arc::new(move |input, ctx| Box::pin(f(input, ctx)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo_skill() -> Skill {
        Skill::new(
            "echo",
            "Returns its input unchanged.",
            skill_fn(|input, _ctx| async move { Ok(input) }),
        )
    }

    #[test]
    fn skill_defaults_to_uncacheable() {
        let skill = echo_skill();
        assert!(!skill.cacheable);
        assert!(skill.ttl_sec.is_none());
    }

    #[test]
    fn cacheable_sets_ttl() {
        let skill = echo_skill().cacheable(Some(3600));
        assert!(skill.cacheable);
        assert_eq!(skill.ttl_sec, Some(3600));
    }

    #[test]
    fn debug_does_not_require_fn_debug() {
        let skill = echo_skill();
        let rendered = format!("{skill:?}");
        assert!(rendered.contains("echo"));
    }

    #[tokio::test]
    async fn skill_fn_executes() {
        let skill = echo_skill();
        let ctx = SkillContext {
            collection_id: "proj".to_string(),
            session_id: Id::new(),
            project_id: "proj".to_string(),
            handler: "coder".to_string(),
        };
        let output = (skill.run)(serde_json::json!({"x": 1}), ctx).await.unwrap();
        assert_eq!(output, serde_json::json!({"x": 1}));
    }
}
