use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;

use modelhub::archive::HttpArchiveSource;
use modelhub::config::Settings;
use modelhub::file_manager::{self, FileManager};
use modelhub::inference::{self, InferenceService};
use modelhub::server::ApiServer;
use modelhub::store::{ModelStore, RedisStore};
use modelhub::workers::{Backoff, ModelAddWorker, ModelRemoveWorker, QueueWorker, Supervisor, TensorRemoveWorker};

#[derive(Parser)]
#[command(name = "modelhub", version, about = "Model file management, inference and store workers")]
struct Cli {
    /// Directory holding default.toml and an optional local.toml
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the model file management API
    FileManager,
    /// Serve the inference API
    Inference,
    /// Drain one command queue into the store
    Worker {
        #[command(subcommand)]
        kind: WorkerKind,
    },
}

#[derive(Subcommand, Clone, Copy)]
enum WorkerKind {
    /// Register queued model versions
    AddModel,
    /// Remove queued models from the store
    RemoveModel,
    /// Remove tensors left by inference calls
    RemoveTensor,
}

impl Command {
    /// Process role, also the log file prefix
    fn role(&self) -> &'static str {
        match self {
            Command::FileManager => "file-manager",
            Command::Inference => "inference",
            Command::Worker { kind: WorkerKind::AddModel } => "model-add",
            Command::Worker { kind: WorkerKind::RemoveModel } => "model-remove",
            Command::Worker { kind: WorkerKind::RemoveTensor } => "tensor-remove",
        }
    }
}

/// Installs the global subscriber.
///
/// `RUST_LOG` wins over the configured level. With `logging.file` set, logs
/// go to a daily file named after the role; the guard must be held until exit.
fn init_tracing(settings: &Settings, role: &str) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.logging.level))
        .context("Invalid log filter")?;

    match &settings.logging.file {
        Some(dir) => {
            let appender = RollingFileAppender::new(Rotation::DAILY, dir, role);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(non_blocking)
                // Disable ANSI colors for cleaner log files
                .with_ansi(false)
                .with_line_number(true)
                .with_file(true)
                .with_thread_ids(true)
                .with_target(false)
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
            Ok(None)
        }
    }
}

/// Connects to the store, retrying while it is unreachable
async fn connect_store(settings: &Settings) -> Result<Arc<dyn ModelStore>> {
    let mut backoff = Backoff::default();
    loop {
        match RedisStore::connect(&settings.store.host, settings.store.port).await {
            Ok(store) => {
                info!("Connected to store at {}:{}", settings.store.host, settings.store.port);
                return Ok(Arc::new(store));
            }
            Err(e) if e.is_transient() => {
                let delay = backoff.next_delay();
                warn!("Store unavailable ({}), retrying in {:?}", e, delay);
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e).context("Could not connect to store"),
        }
    }
}

async fn serve(server: ApiServer) -> Result<()> {
    tokio::select! {
        result = server.start() => result.map_err(|e| anyhow!("Server error: {}", e)),
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
            Ok(())
        }
    }
}

async fn run_worker<W: QueueWorker>(settings: &Settings, store: Arc<dyn ModelStore>, queue: &str, worker: W) -> Result<()> {
    let supervisor = Supervisor::new(
        store,
        queue.to_string(),
        settings.queues.dead_letter_for(queue),
        Duration::from_secs(settings.store.pop_timeout_secs),
    );

    tokio::select! {
        _ = supervisor.run(Arc::new(worker)) => Ok(()),
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
            Ok(())
        }
    }
}

/// Main entry point for modelhub
///
/// The subcommand selects the process role: one of the two HTTP services or
/// one of the three queue workers. All roles share the same configuration.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = match &cli.config_dir {
        Some(dir) => Settings::load(dir),
        None => Settings::new(),
    }
    .context("Failed to load settings")?;

    let role = cli.command.role();
    let _guard = init_tracing(&settings, role)?;
    info!("modelhub {} starting up", role);

    let models_path = std::fs::canonicalize(&settings.models.directory)
        .with_context(|| format!("Models directory {} is unusable", settings.models.directory.display()))?;
    info!("Models directory: {}", models_path.display());

    let store = connect_store(&settings).await?;

    match cli.command {
        Command::FileManager => {
            let archive = Arc::new(HttpArchiveSource::new(settings.archive.url_template.clone()));
            let manager = FileManager::new(models_path, store, settings.queues.clone(), archive);
            let server = ApiServer::new(
                "file manager",
                file_manager::router(manager),
                settings.file_manager.host.clone(),
                settings.file_manager.port,
            );
            serve(server).await
        }
        Command::Inference => {
            let service = InferenceService::new(models_path, store, settings.queues.clone());
            let server = ApiServer::new(
                "inference",
                inference::router(service),
                settings.inference.host.clone(),
                settings.inference.port,
            );
            serve(server).await
        }
        Command::Worker { kind } => {
            let queues = settings.queues.clone();
            match kind {
                WorkerKind::AddModel => {
                    let worker = ModelAddWorker::new(models_path, store.clone(), settings.store.device.clone());
                    run_worker(&settings, store, &queues.add_model, worker).await
                }
                WorkerKind::RemoveModel => {
                    let worker = ModelRemoveWorker::new(store.clone());
                    run_worker(&settings, store, &queues.delete_model, worker).await
                }
                WorkerKind::RemoveTensor => {
                    let worker = TensorRemoveWorker::new(store.clone());
                    run_worker(&settings, store, &queues.delete_tensor, worker).await
                }
            }
        }
    }
}
