//! queuebridge server
//!
//! Runs the queue gateway REST API backed by the in-process provisioner.
//! Deployments with a real orchestrator swap the provisioner and transports
//! behind their seams; the wiring here is the embedded/single-node mode.

use clap::Parser;
use queuebridge::config::BridgeConfig;
use queuebridge::directory::QueueDirectory;
use queuebridge::gateway::api::{create_queue_api_router, QueueApiState};
use queuebridge::gateway::{InMemoryTenantCatalog, QueueService, TokenIssuer};
use queuebridge::ledger::AuditLedger;
use queuebridge::lifecycle::{LifecycleEngine, WorkflowExecutor, WorkflowLauncher};
use queuebridge::provision::SimulatedProvisioner;
use queuebridge::{BridgeError, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "queuebridge", about = "Tenant queue provisioning and event relay")]
struct ServerArgs {
    /// Address the HTTP API listens on
    #[arg(long, default_value = "127.0.0.1:8080")]
    listen: SocketAddr,

    /// Path to a JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory ledger and directory snapshots are persisted to
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Allow tenants unknown to the catalog to provision under the
    /// development client
    #[arg(long)]
    allow_unregistered: bool,

    /// Log filter when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> ExitCode {
    if let Err(e) = run() {
        eprintln!("queuebridge failed to start: {e}");
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn load_config(args: &ServerArgs) -> Result<BridgeConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let json = std::fs::read_to_string(path)?;
            serde_json::from_str(&json)?
        }
        None => BridgeConfig::default(),
    };

    // CLI flags take precedence over the file.
    if let Some(data_dir) = &args.data_dir {
        config.data_dir = data_dir.clone();
    }
    if args.allow_unregistered {
        config.allow_unregistered_tenants = true;
    }

    config.validate()?;
    Ok(config)
}

fn run() -> Result<()> {
    let args = ServerArgs::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = load_config(&args)?;
    if args.config.is_some() {
        info!("Configuration loaded from file");
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| BridgeError::Internal(format!("failed to create runtime: {e}")))?;

    runtime.block_on(serve(args.listen, config))
}

async fn serve(listen: SocketAddr, config: BridgeConfig) -> Result<()> {
    let config = Arc::new(config);

    let ledger = Arc::new(AuditLedger::new(
        config.data_dir.clone(),
        config.schema_version.clone(),
    ));
    ledger.load()?;

    let directory = Arc::new(QueueDirectory::new(config.clone()));
    directory.load()?;

    let provisioner = Arc::new(SimulatedProvisioner::new(
        directory.clone(),
        config.stack_name.clone(),
        config.schema_version.clone(),
    ));
    let engine = Arc::new(LifecycleEngine::new(
        ledger.clone(),
        directory.clone(),
        provisioner,
        config.clone(),
    ));
    let executor = Arc::new(WorkflowExecutor::new(engine, config.clone()));
    let launcher = Arc::new(WorkflowLauncher::new(executor));

    let service = Arc::new(QueueService::new(
        directory.clone(),
        ledger.clone(),
        launcher,
        Arc::new(InMemoryTenantCatalog::new()),
        Arc::new(TokenIssuer::new()),
        config.clone(),
    ));

    let router = create_queue_api_router(QueueApiState::new(service));

    info!(listen = %listen, "queuebridge listening");
    let listener = tokio::net::TcpListener::bind(listen).await?;
    let result = axum::serve(listener, router).await;

    // Best-effort snapshot on shutdown.
    if let Err(e) = ledger.save() {
        error!(error = %e, "Failed to save audit ledger");
    }
    if let Err(e) = directory.save() {
        error!(error = %e, "Failed to save queue directory");
    }

    result.map_err(|e| BridgeError::Internal(format!("server error: {e}")))
}
