//! Skill registry and cached invocation.
//!
//! The invoker resolves a skill by name, consults the project's cache
//! collection for cacheable skills, executes on a miss, and re-caches
//! the result. Caching is best-effort: storage failures are logged and
//! the invocation proceeds without the cache benefit. Execution errors
//! propagate to the caller unmodified; retry policy belongs to the
//! caller. Concurrent identical invocations are not deduplicated
//! in-flight, so execution is at-least-once under contention.
//!
//! Authorization against a handler's allow-list is enforced one layer
//! above, by [`SkillClient`]; the invoker itself is authorization-
//! agnostic.

use reflex_core::events::{EventPayload, PostSkillCallPayload};
use reflex_core::{Skill, SkillContext, SkillError};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, warn};

use crate::bus::EventBus;
use crate::storage::{skill_input_hash, CacheStore};

#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("skill not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Skill(#[from] SkillError),
}

pub type Result<T> = std::result::Result<T, InvokeError>;

/// Registry of skills plus the caching layer in front of execution.
pub struct SkillInvoker {
    skills: RwLock<HashMap<String, Skill>>,
    store: Arc<CacheStore>,
    bus: Arc<EventBus>,
}

impl std::fmt::Debug for SkillInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SkillInvoker").finish_non_exhaustive()
    }
}

impl SkillInvoker {
    pub fn new(store: Arc<CacheStore>, bus: Arc<EventBus>) -> Self {
        Self {
            skills: RwLock::new(HashMap::new()),
            store,
            bus,
        }
    }

    /// Register a skill; replaces any existing skill with the same name.
    pub fn register(&self, skill: Skill) {
        let mut skills = self.skills.write().unwrap_or_else(|e| e.into_inner());
        if skills.insert(skill.name.clone(), skill.clone()).is_some() {
            warn!(skill = %skill.name, "skill re-registered, replacing previous definition");
        }
    }

    /// Whether a skill is registered.
    pub fn contains(&self, name: &str) -> bool {
        let skills = self.skills.read().unwrap_or_else(|e| e.into_inner());
        skills.contains_key(name)
    }

    /// Registered skill names, sorted.
    pub fn names(&self) -> Vec<String> {
        let skills = self.skills.read().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = skills.keys().cloned().collect();
        names.sort();
        names
    }

    /// Invoke a skill, consulting and populating the cache.
    pub async fn invoke(&self, name: &str, input: Value, ctx: SkillContext) -> Result<Value> {
        let skill = {
            let skills = self.skills.read().unwrap_or_else(|e| e.into_inner());
            skills
                .get(name)
                .cloned()
                .ok_or_else(|| InvokeError::NotFound(name.to_string()))?
        };

        let started = Instant::now();
        let input_hash = if skill.cacheable {
            Some(skill_input_hash(&skill.name, &input))
        } else {
            None
        };

        // Cache lookup; a store failure degrades to a miss.
        if let Some(hash) = &input_hash {
            match self
                .store
                .check_cache(&ctx.collection_id, &skill.name, hash)
                .await
            {
                Ok(Some(hit)) => {
                    debug!(
                        skill = %skill.name,
                        stored_at = %hit.stored_at,
                        "skill cache hit"
                    );
                    self.emit_post_skill_call(&skill.name, &ctx, true, started)
                        .await;
                    return Ok(hit.payload);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(skill = %skill.name, error = %e, "cache lookup failed, executing skill");
                }
            }
        }

        // Execute; errors propagate unmodified, no retries here.
        let output = match (skill.run)(input, ctx.clone()).await {
            Ok(output) => output,
            Err(e) => {
                warn!(skill = %skill.name, handler = %ctx.handler, error = %e, "skill execution failed");
                return Err(e.into());
            }
        };

        // Re-cache; failures are swallowed after logging.
        if let Some(hash) = &input_hash {
            if let Err(e) = self
                .store
                .cache_result_hashed(&ctx.collection_id, &skill.name, hash, &output, skill.ttl_sec)
                .await
            {
                warn!(skill = %skill.name, error = %e, "failed to cache skill result");
            }
        }

        self.emit_post_skill_call(&skill.name, &ctx, false, started)
            .await;
        Ok(output)
    }

    async fn emit_post_skill_call(
        &self,
        skill: &str,
        ctx: &SkillContext,
        cached: bool,
        started: Instant,
    ) {
        let payload = EventPayload::PostSkillCall(PostSkillCallPayload {
            skill: skill.to_string(),
            handler: ctx.handler.clone(),
            cached,
            duration_ms: started.elapsed().as_millis() as u64,
        });
        self.bus
            .publish(&payload, ctx.session_id.clone(), &ctx.project_id)
            .await;
    }
}

// --- Handler-facing client ---

#[derive(Debug, Error)]
pub enum SkillClientError {
    #[error("handler {handler} is not authorized to invoke skill {skill}")]
    Unauthorized { handler: String, skill: String },
    #[error(transparent)]
    Invoke(#[from] InvokeError),
}

/// Per-handler skill invocation wrapper.
///
/// Enforces the handler's statically declared allow-list at invocation
/// time; an unauthorized call never reaches the invoker, so the skill's
/// execution function is never run.
#[derive(Clone)]
pub struct SkillClient {
    handler: String,
    allowed: Arc<HashSet<String>>,
    invoker: Arc<SkillInvoker>,
    collection_id: String,
    session_id: reflex_core::Id,
    project_id: String,
}

impl std::fmt::Debug for SkillClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SkillClient")
            .field("handler", &self.handler)
            .field("allowed", &self.allowed)
            .finish_non_exhaustive()
    }
}

impl SkillClient {
    pub fn new(
        handler: impl Into<String>,
        allowed: impl IntoIterator<Item = String>,
        invoker: Arc<SkillInvoker>,
        collection_id: impl Into<String>,
        session_id: reflex_core::Id,
        project_id: impl Into<String>,
    ) -> Self {
        Self {
            handler: handler.into(),
            allowed: Arc::new(allowed.into_iter().collect()),
            invoker,
            collection_id: collection_id.into(),
            session_id,
            project_id: project_id.into(),
        }
    }

    /// Invoke a skill on behalf of the handler.
    pub async fn invoke(
        &self,
        name: &str,
        input: Value,
    ) -> std::result::Result<Value, SkillClientError> {
        if !self.allowed.contains(name) {
            warn!(
                handler = %self.handler,
                skill = name,
                "skill invocation denied: not in handler allow-list"
            );
            return Err(SkillClientError::Unauthorized {
                handler: self.handler.clone(),
                skill: name.to_string(),
            });
        }

        let ctx = SkillContext {
            collection_id: self.collection_id.clone(),
            session_id: self.session_id.clone(),
            project_id: self.project_id.clone(),
            handler: self.handler.clone(),
        };
        Ok(self.invoker.invoke(name, input, ctx).await?)
    }

    pub fn handler(&self) -> &str {
        &self.handler
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reflex_core::skill::skill_fn;
    use reflex_core::Id;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct TestInvoker {
        invoker: Arc<SkillInvoker>,
        _dir: TempDir,
    }

    async fn create_test_invoker() -> TestInvoker {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::new(&dir.path().join("test.db")).await.unwrap();
        store.migrate_embedded().await.unwrap();
        let invoker = Arc::new(SkillInvoker::new(
            Arc::new(store),
            Arc::new(EventBus::new()),
        ));
        TestInvoker {
            invoker,
            _dir: dir,
        }
    }

    fn test_ctx() -> SkillContext {
        SkillContext {
            collection_id: "proj".to_string(),
            session_id: Id::new(),
            project_id: "proj".to_string(),
            handler: "coder".to_string(),
        }
    }

    fn counting_skill(name: &str, calls: Arc<AtomicUsize>) -> Skill {
        Skill::new(
            name,
            "Counts executions and echoes input.",
            skill_fn(move |input, _ctx| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(serde_json::json!({"echo": input}))
                }
            }),
        )
    }

    #[tokio::test]
    async fn invoke_unknown_skill_fails() {
        let ti = create_test_invoker().await;
        let result = ti
            .invoker
            .invoke("ghost", serde_json::json!({}), test_ctx())
            .await;
        assert!(matches!(result, Err(InvokeError::NotFound(_))));
    }

    #[tokio::test]
    async fn cacheable_skill_executes_once_for_identical_input() {
        let ti = create_test_invoker().await;
        let calls = Arc::new(AtomicUsize::new(0));
        ti.invoker
            .register(counting_skill("lookup", Arc::clone(&calls)).cacheable(Some(3600)));

        let input = serde_json::json!({"q": "rust"});
        let first = ti
            .invoker
            .invoke("lookup", input.clone(), test_ctx())
            .await
            .unwrap();
        let second = ti
            .invoker
            .invoke("lookup", input, test_ctx())
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn uncacheable_skill_executes_every_time() {
        let ti = create_test_invoker().await;
        let calls = Arc::new(AtomicUsize::new(0));
        ti.invoker
            .register(counting_skill("probe", Arc::clone(&calls)));

        let input = serde_json::json!({"q": 1});
        ti.invoker
            .invoke("probe", input.clone(), test_ctx())
            .await
            .unwrap();
        ti.invoker
            .invoke("probe", input, test_ctx())
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn different_inputs_miss_the_cache() {
        let ti = create_test_invoker().await;
        let calls = Arc::new(AtomicUsize::new(0));
        ti.invoker
            .register(counting_skill("lookup", Arc::clone(&calls)).cacheable(None));

        ti.invoker
            .invoke("lookup", serde_json::json!({"q": 1}), test_ctx())
            .await
            .unwrap();
        ti.invoker
            .invoke("lookup", serde_json::json!({"q": 2}), test_ctx())
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn execution_error_propagates() {
        let ti = create_test_invoker().await;
        ti.invoker.register(Skill::new(
            "flaky",
            "Always fails.",
            skill_fn(|_input, _ctx| async {
                Err(SkillError::Execution("backend unavailable".to_string()))
            }),
        ));

        let result = ti
            .invoker
            .invoke("flaky", serde_json::json!({}), test_ctx())
            .await;
        assert!(matches!(
            result,
            Err(InvokeError::Skill(SkillError::Execution(_)))
        ));
    }

    #[tokio::test]
    async fn failed_execution_is_not_cached() {
        let ti = create_test_invoker().await;
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        ti.invoker.register(
            Skill::new(
                "sometimes",
                "Fails on the first call.",
                skill_fn(move |_input, _ctx| {
                    let counter = Arc::clone(&counter);
                    async move {
                        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                            Err(SkillError::Execution("cold start".to_string()))
                        } else {
                            Ok(serde_json::json!("warm"))
                        }
                    }
                }),
            )
            .cacheable(Some(3600)),
        );

        let input = serde_json::json!({"q": 1});
        assert!(ti
            .invoker
            .invoke("sometimes", input.clone(), test_ctx())
            .await
            .is_err());
        let second = ti
            .invoker
            .invoke("sometimes", input, test_ctx())
            .await
            .unwrap();
        assert_eq!(second, serde_json::json!("warm"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn re_registration_replaces_in_place() {
        let ti = create_test_invoker().await;
        ti.invoker.register(Skill::new(
            "greet",
            "v1",
            skill_fn(|_i, _c| async { Ok(serde_json::json!("hello")) }),
        ));
        ti.invoker.register(Skill::new(
            "greet",
            "v2",
            skill_fn(|_i, _c| async { Ok(serde_json::json!("hi")) }),
        ));

        let output = ti
            .invoker
            .invoke("greet", serde_json::json!({}), test_ctx())
            .await
            .unwrap();
        assert_eq!(output, serde_json::json!("hi"));
        assert_eq!(ti.invoker.names(), vec!["greet"]);
    }

    #[tokio::test]
    async fn client_rejects_skill_outside_allow_list() {
        let ti = create_test_invoker().await;
        let calls = Arc::new(AtomicUsize::new(0));
        ti.invoker
            .register(counting_skill("forbidden", Arc::clone(&calls)));

        let client = SkillClient::new(
            "coder",
            vec!["diff-summary".to_string()],
            Arc::clone(&ti.invoker),
            "proj",
            Id::new(),
            "proj",
        );

        let result = client.invoke("forbidden", serde_json::json!({})).await;
        assert!(matches!(
            result,
            Err(SkillClientError::Unauthorized { .. })
        ));
        // The execution function was never called.
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn client_allows_declared_skill() {
        let ti = create_test_invoker().await;
        let calls = Arc::new(AtomicUsize::new(0));
        ti.invoker
            .register(counting_skill("allowed", Arc::clone(&calls)));

        let client = SkillClient::new(
            "coder",
            vec!["allowed".to_string()],
            Arc::clone(&ti.invoker),
            "proj",
            Id::new(),
            "proj",
        );

        client
            .invoke("allowed", serde_json::json!({"x": 1}))
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
