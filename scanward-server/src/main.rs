use std::{path::PathBuf, sync::Arc};

use anyhow::Context;
use clap::{Args as ClapArgs, Parser, Subcommand};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use scanward_config::{Config, ConfigLoad, ConfigLoader};
use scanward_core::{
    JobStore, MasscanRunner, ScanOrchestrator, SqliteJobStore,
    retention_cutoff, spawn_retention_worker,
};
use scanward_server::{AppState, create_app};

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "scanward-server")]
#[command(about = "Scan job orchestrator with an HTTP API and live events")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    serve: ServeArgs,
}

#[derive(ClapArgs, Debug, Clone)]
struct ServeArgs {
    /// Configuration file (overrides SCANWARD_CONFIG and the default lookup)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Environment file to load before reading the environment
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,

    /// Server port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Server host (overrides config)
    #[arg(long)]
    host: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Delete scan records older than the given age and exit
    Cleanup {
        /// Age such as `30days` or `12h`; defaults to the retention max age
        #[arg(long)]
        older_than: Option<humantime::Duration>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_runtime_config(&cli.serve)?;

    match cli.command {
        Some(Command::Cleanup { older_than }) => {
            run_cleanup(config, older_than.map(Into::into)).await
        }
        None => run_server(config).await,
    }
}

fn load_runtime_config(args: &ServeArgs) -> anyhow::Result<Arc<Config>> {
    let mut loader = ConfigLoader::new();
    if let Some(path) = &args.config {
        loader = loader.with_config_path(path);
    }
    if let Some(path) = &args.env_file {
        loader = loader.with_env_file(path);
    }

    let ConfigLoad {
        mut config,
        warnings,
    } = loader.load().context("failed to load configuration")?;

    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(host) = args.host.clone() {
        config.server.host = host;
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(
                |_| "info,scanward=info,tower_http=warn,sqlx=warn".into(),
            ),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if config.metadata.env_file_loaded {
        info!("loaded .env file");
    }
    if let Some(path) = &config.metadata.config_path {
        info!(path = %path.display(), "configuration file loaded");
    }

    for warning in &warnings.items {
        match &warning.hint {
            Some(hint) => {
                warn!(message = %warning.message, hint = %hint, "configuration warning")
            }
            None => warn!(message = %warning.message, "configuration warning"),
        }
    }

    let orchestrator = &config.orchestrator;
    info!(
        orchestrator.workers = orchestrator.workers,
        orchestrator.queue_capacity = orchestrator.queue_capacity,
        orchestrator.min_rate = orchestrator.rates.min,
        orchestrator.max_rate = orchestrator.rates.max,
        scanner.program = %config.scanner.program,
        scanner.output_dir = %config.scanner.output_dir.display(),
        "orchestrator configuration in effect"
    );

    Ok(Arc::new(config))
}

async fn connect_store(config: &Config) -> anyhow::Result<SqliteJobStore> {
    SqliteJobStore::connect(
        &config.database.url,
        config.database.max_connections,
    )
    .await
    .with_context(|| {
        format!("failed to open scan database {}", config.database.url)
    })
}

async fn run_cleanup(
    config: Arc<Config>,
    older_than: Option<std::time::Duration>,
) -> anyhow::Result<()> {
    let store = connect_store(&config).await?;
    let max_age = older_than.unwrap_or(config.retention.max_age);
    let cutoff =
        retention_cutoff(max_age).context("invalid retention age")?;

    let removed = store
        .delete_started_before(cutoff)
        .await
        .context("retention cleanup failed")?;
    info!(
        removed,
        older_than = %humantime::format_duration(max_age),
        "retention cleanup finished"
    );
    Ok(())
}

async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    let store = connect_store(&config).await?;
    let runner = MasscanRunner::from_settings(&config.scanner);
    let shutdown = CancellationToken::new();

    let orchestrator = Arc::new(
        ScanOrchestrator::start(
            config.orchestrator.clone(),
            &config.scanner,
            Arc::new(store),
            Arc::new(runner),
            shutdown.clone(),
        )
        .await
        .context("failed to start scan orchestrator")?,
    );

    let retention = if config.retention.enabled {
        Some(spawn_retention_worker(
            Arc::clone(&orchestrator),
            config.retention.clone(),
            shutdown.clone(),
        ))
    } else {
        info!("retention cleanup disabled");
        None
    };

    let app = create_app(AppState::new(
        Arc::clone(&orchestrator),
        Arc::clone(&config),
    ));

    let address = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {address}"))?;
    info!(address = %address, "scanward server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await
        .context("http server failed")?;

    info!("http server stopped; waiting for running scans");
    orchestrator.shutdown().await;

    if let Some(handle) = retention
        && let Err(err) = handle.await
    {
        error!(error = %err, "retention worker task failed");
    }

    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM and cancels `shutdown` so background
/// workers and open event streams stop with the listener.
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(
            tokio::signal::unix::SignalKind::terminate(),
        ) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl-C"),
        _ = terminate => info!("received SIGTERM"),
        _ = shutdown.cancelled() => {}
    }

    shutdown.cancel();
}
