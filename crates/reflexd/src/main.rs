//! reflexd - Task Orchestrator CLI
//!
//! Thin command surface over the engine: route a task, ingest
//! documents, sweep expired cache entries, and show collection stats.

use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use reflex_core::{AgentContext, AgentResult, Config, ProjectContext};
use reflexd::ingest::IngestOptions;
use reflexd::invoker::SkillClient;
use reflexd::registry::Handler;
use reflexd::Engine;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "reflexd", about = "Task Orchestrator", version)]
struct Cli {
    /// Path to a key=value config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the database path
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Route a task and print the chain's result as JSON
    Route {
        /// Free-text task description
        task: String,
        /// Explicit handler override (skips routing)
        #[arg(long)]
        handler: Option<String>,
        /// Project id (names the cache collection)
        #[arg(long, default_value = "default")]
        project: String,
        /// Working directory for the project context
        #[arg(long)]
        workdir: Option<PathBuf>,
    },
    /// Ingest a file or directory into a project's collection
    Ingest {
        path: PathBuf,
        #[arg(long, default_value = "default")]
        project: String,
        /// Target words per chunk
        #[arg(long)]
        chunk_size: Option<usize>,
        /// Words carried over between chunks
        #[arg(long)]
        overlap: Option<usize>,
        /// Recurse into subdirectories
        #[arg(long)]
        recursive: bool,
    },
    /// Delete expired cache entries for a project
    Sweep {
        #[arg(long, default_value = "default")]
        project: String,
    },
    /// Show entry counts for a project's collection
    Stats {
        #[arg(long, default_value = "default")]
        project: String,
    },
}

/// Default handler body: reports the routing decision.
///
/// Handler bodies are host-supplied; the CLI registers this stand-in
/// for every manifest entry so `route` demonstrates the chain.
struct ReportingHandler {
    name: String,
}

#[async_trait]
impl Handler for ReportingHandler {
    async fn execute(&self, ctx: AgentContext, _skills: SkillClient) -> AgentResult {
        AgentResult::ok(serde_json::json!({
            "handler": self.name,
            "task": ctx.task,
            "depth": ctx.depth,
        }))
    }
}

fn main() -> eyre::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing.
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    if let Some(db) = cli.db {
        config.db_path = db;
    }

    // Run the async main.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let engine = Engine::new(config).await?;

        match cli.command {
            Command::Route {
                task,
                handler,
                project,
                workdir,
            } => {
                let names: Vec<String> = engine
                    .manifest()
                    .handlers
                    .iter()
                    .map(|h| h.name.clone())
                    .collect();
                for name in names {
                    engine.register_handler(
                        &name,
                        Arc::new(ReportingHandler { name: name.clone() }),
                    );
                }

                let project_ctx = ProjectContext {
                    project_id: project,
                    working_dir: workdir.unwrap_or_else(|| PathBuf::from(".")),
                    branch: None,
                    files: Vec::new(),
                };
                let result = engine
                    .route_task(&task, handler.as_deref(), Some(project_ctx))
                    .await;
                println!("{}", serde_json::to_string_pretty(&result)?);
            }
            Command::Ingest {
                path,
                project,
                chunk_size,
                overlap,
                recursive,
            } => {
                let defaults = engine.config();
                let opts = IngestOptions {
                    chunk_size_words: chunk_size.unwrap_or(defaults.chunk_size_words),
                    overlap_words: overlap.unwrap_or(defaults.chunk_overlap_words),
                    recursive,
                };
                let reports = engine.ingest(&project, &path, &opts).await?;
                println!("{}", serde_json::to_string_pretty(&reports)?);
            }
            Command::Sweep { project } => {
                let removed = engine.store().sweep_expired(&project).await?;
                println!("removed {removed} expired entries");
            }
            Command::Stats { project } => {
                let stats = engine.store().stats(&project).await?;
                println!("{}", serde_json::to_string_pretty(&stats)?);
            }
        }

        Ok(())
    })
}
