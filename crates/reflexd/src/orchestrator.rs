//! Orchestrator: handler router + handoff coordinator.
//!
//! Resolves a task to a handler and runs a bounded chain of handler
//! executions. Each step may request a handoff to another handler;
//! the chain loops until no handoff is requested or the depth limit is
//! reached. Every step gets a fresh derived context and a hard
//! wall-clock budget; exceeding the budget abandons the step
//! non-cooperatively and fails the chain. Only a successful terminal
//! result is persisted into the project's cache collection.
//!
//! Failures never escape `route_task`: every path returns a structured
//! `AgentResult`, with `{"error": message}` output on failure.

use reflex_core::events::{
    EventPayload, PreHandoffPayload, SessionEndPayload, SessionStartPayload,
};
use reflex_core::{AgentContext, AgentResult, Config, EntryKind, Id, ProjectContext};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::bus::EventBus;
use crate::invoker::{SkillClient, SkillInvoker};
use crate::registry::HandlerRegistry;
use crate::router::RouteTable;
use crate::services::ServiceManager;
use crate::storage::{CacheStore, NewEntry};

/// Chain execution limits.
#[derive(Debug, Clone)]
pub struct ChainConfig {
    /// Maximum handoff transitions per chain (executions = depth + 1).
    pub max_depth: u32,
    /// Wall-clock budget per handler execution.
    pub step_timeout: Duration,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            max_depth: 3,
            step_timeout: Duration::from_secs(300),
        }
    }
}

impl ChainConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_depth: config.max_handoff_depth,
            step_timeout: Duration::from_secs(u64::from(config.step_timeout_sec)),
        }
    }
}

/// The handler router and handoff coordinator.
///
/// All collaborators are injected at construction; `Engine` provides
/// the convenience wiring for a default instance.
pub struct Orchestrator {
    registry: Arc<HandlerRegistry>,
    invoker: Arc<SkillInvoker>,
    store: Arc<CacheStore>,
    bus: Arc<EventBus>,
    services: Arc<ServiceManager>,
    table: RouteTable,
    chain: ChainConfig,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("chain", &self.chain)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    pub fn new(
        registry: Arc<HandlerRegistry>,
        invoker: Arc<SkillInvoker>,
        store: Arc<CacheStore>,
        bus: Arc<EventBus>,
        services: Arc<ServiceManager>,
        table: RouteTable,
        chain: ChainConfig,
    ) -> Self {
        Self {
            registry,
            invoker,
            store,
            bus,
            services,
            table,
            chain,
        }
    }

    /// Route a task to a handler and run the handoff chain to completion.
    pub async fn route_task(
        &self,
        task: &str,
        handler_override: Option<&str>,
        project: Option<ProjectContext>,
    ) -> AgentResult {
        let session_id = Id::new();
        let project = project.unwrap_or_default();
        let project_id = project.project_id.clone();
        let session_started = Instant::now();

        // Resolve the initial handler. The routing table always returns
        // a name; only an explicit override can be unresolvable.
        let initial = match handler_override {
            Some(name) => {
                if self.registry.contains(name) {
                    name.to_string()
                } else {
                    let message = format!("no handler registered for '{name}'");
                    self.bus
                        .publish_error("routing", message.clone(), session_id, &project_id)
                        .await;
                    return AgentResult::failure(message);
                }
            }
            None => self.table.resolve(task).to_string(),
        };

        info!(
            session_id = %session_id,
            handler = %initial,
            task_len = task.len(),
            "routing task"
        );
        self.bus
            .publish(
                &EventPayload::SessionStart(SessionStartPayload {
                    task: task.to_string(),
                    handler: initial.clone(),
                }),
                session_id.clone(),
                &project_id,
            )
            .await;

        let mut ctx = AgentContext::new(task, project, session_id.clone());
        let mut handler_name = initial;
        let mut steps = 0u32;

        let final_result = loop {
            let Some(registered) = self.registry.get(&handler_name) else {
                let message = format!("no handler registered for '{handler_name}'");
                self.bus
                    .publish_error("routing", message.clone(), session_id.clone(), &project_id)
                    .await;
                break AgentResult::failure(message);
            };

            // Best-effort service startup; failures never block the step.
            for service in &registered.spec.services {
                self.services.ensure_started(service).await;
            }

            let skills = SkillClient::new(
                handler_name.clone(),
                registered.spec.skills.clone(),
                Arc::clone(&self.invoker),
                ctx.collection_id.clone(),
                session_id.clone(),
                project_id.clone(),
            );

            steps += 1;
            debug!(
                session_id = %session_id,
                handler = %handler_name,
                depth = ctx.depth,
                "executing handler"
            );

            let step_started = Instant::now();
            let step_ctx = ctx.clone();
            let handler = Arc::clone(&registered.handler);
            let handle = tokio::spawn(async move { handler.execute(step_ctx, skills).await });

            // Hard wall-clock budget. On expiry the join handle is
            // dropped: no cancellation signal reaches the handler and a
            // late completion is simply never awaited.
            let mut result = match timeout(self.chain.step_timeout, handle).await {
                Err(_) => {
                    let message = format!(
                        "handler '{}' timed out after {}s",
                        handler_name,
                        self.chain.step_timeout.as_secs()
                    );
                    self.bus
                        .publish_error("handler", message.clone(), session_id.clone(), &project_id)
                        .await;
                    break AgentResult::failure(message);
                }
                Ok(Err(join_error)) => {
                    let message = format!("handler '{handler_name}' aborted: {join_error}");
                    self.bus
                        .publish_error("handler", message.clone(), session_id.clone(), &project_id)
                        .await;
                    break AgentResult::failure(message);
                }
                Ok(Ok(result)) => result,
            };
            if result.duration_ms.is_none() {
                result.duration_ms = Some(step_started.elapsed().as_millis() as u64);
            }

            // Handoff decision.
            match result.next_handler.clone() {
                Some(next) if ctx.depth < self.chain.max_depth => {
                    let reason = result
                        .handoff
                        .as_ref()
                        .map(|h| h.reason.clone())
                        .unwrap_or_default();
                    self.bus
                        .publish(
                            &EventPayload::PreHandoff(PreHandoffPayload {
                                from_handler: handler_name.clone(),
                                to_handler: next.clone(),
                                reason,
                                depth: ctx.depth + 1,
                            }),
                            session_id.clone(),
                            &project_id,
                        )
                        .await;
                    ctx = ctx.derive_for_handoff(&result);
                    handler_name = next;
                }
                Some(next) => {
                    // Depth limit reached: not an error; the chain stops
                    // with the last produced result.
                    debug!(
                        session_id = %session_id,
                        requested = %next,
                        max_depth = self.chain.max_depth,
                        "handoff depth limit reached"
                    );
                    break result;
                }
                None => break result,
            }
        };

        // Persist only a successful terminal result for future session
        // priming; caching is best-effort.
        if final_result.success {
            let entry = NewEntry {
                text: serde_json::json!({
                    "task": task,
                    "handler": handler_name,
                    "output": final_result.output.clone(),
                })
                .to_string(),
                kind: EntryKind::Context,
                source: "orchestrator".to_string(),
                metadata: serde_json::json!({
                    "handler": handler_name,
                    "session_id": session_id.as_ref(),
                    "steps": steps,
                }),
                ttl_sec: None,
            };
            if let Err(e) = self.store.store(&project_id, &entry).await {
                warn!(session_id = %session_id, error = %e, "failed to persist session context");
            }
        }

        self.bus
            .publish(
                &EventPayload::SessionEnd(SessionEndPayload {
                    success: final_result.success,
                    steps,
                    duration_ms: session_started.elapsed().as_millis() as u64,
                }),
                session_id,
                &project_id,
            )
            .await;

        final_result
    }
}
