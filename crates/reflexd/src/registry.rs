//! Handler registry.
//!
//! Handler bodies are external collaborators; the registry only pairs a
//! manifest declaration (keywords, skill allow-list, services) with an
//! execution trait object supplied by the host.

use async_trait::async_trait;
use reflex_core::{AgentContext, AgentResult, HandlerSpec};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::warn;

use crate::invoker::SkillClient;

/// A named unit of work able to invoke its allowed skills and suggest
/// the next handler in a chain.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Execute one step of a chain.
    ///
    /// Skill and routing failures are expected to be converted into a
    /// failed [`AgentResult`] rather than escaping as panics.
    async fn execute(&self, ctx: AgentContext, skills: SkillClient) -> AgentResult;
}

/// A registered handler: its manifest declaration plus its body.
#[derive(Clone)]
pub struct RegisteredHandler {
    pub spec: HandlerSpec,
    pub handler: Arc<dyn Handler>,
}

impl std::fmt::Debug for RegisteredHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredHandler")
            .field("spec", &self.spec)
            .finish_non_exhaustive()
    }
}

/// Registry of handlers by name.
#[derive(Debug, Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, RegisteredHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler; replaces any existing handler with the same
    /// name, with a warning.
    pub fn register(&self, spec: HandlerSpec, handler: Arc<dyn Handler>) {
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        let name = spec.name.clone();
        if handlers
            .insert(name.clone(), RegisteredHandler { spec, handler })
            .is_some()
        {
            warn!(handler = %name, "handler re-registered, replacing previous definition");
        }
    }

    pub fn get(&self, name: &str) -> Option<RegisteredHandler> {
        let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
        handlers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
        handlers.contains_key(name)
    }

    /// Registered handler names, sorted.
    pub fn names(&self) -> Vec<String> {
        let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = handlers.keys().cloned().collect();
        names.sort();
        names
    }
}
