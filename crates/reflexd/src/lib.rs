//! reflexd - Task Orchestrator Engine
//!
//! Routes free-text tasks to handlers, coordinates handoffs between
//! them, and backs skill execution with a persistent, semantically
//! searchable cache.

pub mod bus;
pub mod embedding;
pub mod ingest;
pub mod invoker;
pub mod orchestrator;
pub mod registry;
pub mod router;
pub mod services;
pub mod storage;

use std::path::Path;
use std::sync::Arc;

use reflex_core::manifest::{self, HandlerManifest};
use reflex_core::{AgentResult, Config, Id, ProjectContext, Skill};
use thiserror::Error;
use tracing::info;

use bus::EventBus;
use ingest::{FileReport, IngestOptions};
use invoker::SkillInvoker;
use orchestrator::{ChainConfig, Orchestrator};
use registry::{Handler, HandlerRegistry};
use router::RouteTable;
use services::ServiceManager;
use storage::CacheStore;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Storage(#[from] storage::StorageError),
    #[error("failed to read manifest: {0}")]
    ManifestRead(#[from] std::io::Error),
    #[error(transparent)]
    Manifest(#[from] manifest::ManifestError),
}

/// Convenience factory wiring the store, registry, bus, and
/// orchestrator together.
///
/// The orchestrator itself takes every collaborator as an explicit
/// constructor argument; hosts that need custom wiring can build the
/// pieces directly and skip this type.
pub struct Engine {
    config: Config,
    manifest: HandlerManifest,
    store: Arc<CacheStore>,
    bus: Arc<EventBus>,
    invoker: Arc<SkillInvoker>,
    registry: Arc<HandlerRegistry>,
    services: Arc<ServiceManager>,
    orchestrator: Orchestrator,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Build an engine from configuration.
    ///
    /// Opens (and migrates) the cache database and loads the handler
    /// manifest, falling back to the built-in table when the config
    /// names none.
    pub async fn new(config: Config) -> Result<Self, EngineError> {
        let manifest = match &config.manifest_path {
            Some(path) => {
                let content = std::fs::read_to_string(path)?;
                manifest::parse_manifest(&content)?
            }
            None => HandlerManifest::builtin(),
        };

        let store = Arc::new(CacheStore::new(&config.db_path).await?);
        store.migrate_embedded().await?;

        let bus = Arc::new(EventBus::new());
        let invoker = Arc::new(SkillInvoker::new(Arc::clone(&store), Arc::clone(&bus)));
        let registry = Arc::new(HandlerRegistry::new());
        let services = Arc::new(ServiceManager::new(manifest.services.clone()));
        let table = RouteTable::from_manifest(&manifest);
        let chain = ChainConfig::from_config(&config);

        let orchestrator = Orchestrator::new(
            Arc::clone(&registry),
            Arc::clone(&invoker),
            Arc::clone(&store),
            Arc::clone(&bus),
            Arc::clone(&services),
            table,
            chain,
        );

        info!(
            db = %config.db_path.display(),
            handlers = manifest.handlers.len(),
            "engine initialized"
        );

        Ok(Self {
            config,
            manifest,
            store,
            bus,
            invoker,
            registry,
            services,
            orchestrator,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn manifest(&self) -> &HandlerManifest {
        &self.manifest
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn invoker(&self) -> &Arc<SkillInvoker> {
        &self.invoker
    }

    pub fn services(&self) -> &Arc<ServiceManager> {
        &self.services
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Register a skill with the invoker.
    pub fn register_skill(&self, skill: Skill) {
        self.invoker.register(skill);
    }

    /// Register a handler body under a name declared in the manifest.
    ///
    /// Unknown names get an empty declaration (no keywords, no skills,
    /// no services); routing can still reach them via explicit
    /// override or handoff.
    pub fn register_handler(&self, name: &str, handler: Arc<dyn Handler>) {
        let spec = self.manifest.handler(name).cloned().unwrap_or_else(|| {
            reflex_core::HandlerSpec {
                name: name.to_string(),
                keywords: Vec::new(),
                skills: Vec::new(),
                services: Vec::new(),
                description: None,
            }
        });
        self.registry.register(spec, handler);
    }

    /// Route a task through the orchestrator.
    pub async fn route_task(
        &self,
        task: &str,
        handler_override: Option<&str>,
        project: Option<ProjectContext>,
    ) -> AgentResult {
        self.orchestrator
            .route_task(task, handler_override, project)
            .await
    }

    /// Ingest a file or directory into a project's collection.
    pub async fn ingest(
        &self,
        project_id: &str,
        path: &Path,
        opts: &IngestOptions,
    ) -> Result<Vec<FileReport>, ingest::IngestError> {
        ingest::ingest_path(&self.store, &self.bus, project_id, &Id::new(), path, opts).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use invoker::SkillClient;
    use reflex_core::AgentContext;
    use tempfile::TempDir;

    struct EchoHandler;

    #[async_trait]
    impl Handler for EchoHandler {
        async fn execute(&self, ctx: AgentContext, _skills: SkillClient) -> AgentResult {
            AgentResult::ok(serde_json::json!({"task": ctx.task}))
        }
    }

    fn test_config(dir: &TempDir) -> Config {
        Config {
            db_path: dir.path().join("engine.db"),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn engine_routes_with_builtin_manifest() {
        let dir = TempDir::new().unwrap();
        let engine = Engine::new(test_config(&dir)).await.unwrap();
        engine.register_handler("coder", Arc::new(EchoHandler));

        let result = engine.route_task("implement parsing", None, None).await;
        assert!(result.success);
        assert_eq!(result.output["task"], "implement parsing");
    }

    #[tokio::test]
    async fn engine_loads_manifest_from_file() {
        let dir = TempDir::new().unwrap();
        let manifest_path = dir.path().join("handlers.yaml");
        std::fs::write(
            &manifest_path,
            r#"
default_handler: solo
handlers:
  - name: solo
    keywords: [anything]
"#,
        )
        .unwrap();

        let mut config = test_config(&dir);
        config.manifest_path = Some(manifest_path);
        let engine = Engine::new(config).await.unwrap();

        assert_eq!(engine.manifest().default_handler, "solo");
        assert_eq!(engine.manifest().handlers.len(), 1);
    }

    #[tokio::test]
    async fn engine_rejects_invalid_manifest() {
        let dir = TempDir::new().unwrap();
        let manifest_path = dir.path().join("handlers.yaml");
        std::fs::write(&manifest_path, "default_handler: x\nhandlers: []\n").unwrap();

        let mut config = test_config(&dir);
        config.manifest_path = Some(manifest_path);
        let result = Engine::new(config).await;
        assert!(matches!(result, Err(EngineError::Manifest(_))));
    }

    #[tokio::test]
    async fn engine_ingests_into_store() {
        let dir = TempDir::new().unwrap();
        let engine = Engine::new(test_config(&dir)).await.unwrap();

        let doc = dir.path().join("doc.md");
        std::fs::write(&doc, "Content worth indexing.\n").unwrap();

        let reports = engine
            .ingest("proj", &doc, &IngestOptions::default())
            .await
            .unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(engine.store().count_entries("proj").await.unwrap(), 1);
    }
}
