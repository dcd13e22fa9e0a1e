use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use microgrid_sentinel::api::{self, AppState};
use microgrid_sentinel::config::Config;
use microgrid_sentinel::service::MonitorService;

#[derive(Parser, Debug)]
#[command(name = "microgrid-sentinel", about = "Microgrid energy monitoring and alerting service")]
struct Cli {
    /// Path to configuration file; built-in defaults when omitted
    #[arg(short, long)]
    config: Option<String>,

    /// Validate config and exit
    #[arg(long)]
    check: bool,

    /// Print version and exit
    #[arg(short, long)]
    version: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.version {
        println!("microgrid-sentinel {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    if cli.check {
        println!("Configuration is valid.");
        return Ok(());
    }

    init_logging(&config)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        bind = %config.server.bind,
        rules = config.rules.len(),
        "Starting microgrid sentinel"
    );

    if let Err(e) = run(config).await {
        error!(error = %e, "Server terminated with error");
        return Err(e);
    }

    Ok(())
}

fn init_logging(config: &Config) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.server.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    Ok(())
}

async fn run(config: Config) -> Result<()> {
    let bind = config.server.bind.clone();
    let service = MonitorService::new(config)?;
    let app = api::router(AppState::new(service));

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind {}", bind))?;
    info!(addr = %bind, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal, exiting");
}
