use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use statuswatch::monitoring::{EngineState, IncidentManager, MonitorScheduler};
use statuswatch::server::config::EngineConfig;
use statuswatch::server::event_broadcaster::EventBroadcaster;
use statuswatch::web;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<String>,
}

fn init_logging(log_dir: &str) {
    // Log to a file: JSON format, daily rotation
    let file_appender = rolling::daily(log_dir, "server.log");
    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false) // No ANSI colors in file
        .json(); // Log as JSON

    // Log to stdout: human-readable format
    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    // Combine layers and filter based on RUST_LOG
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sea_orm=warn,sqlx::query=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();

    let config = match EngineConfig::load(args.config.as_deref()) {
        Ok(config) => Arc::new(config),
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return Err(e.into());
        }
    };

    init_logging(&config.log_dir);
    info!("Starting statuswatch engine.");

    // --- Database Setup ---
    let mut opt = ConnectOptions::new(config.database_url.clone());
    opt.max_connections(10);
    let db: DatabaseConnection = Database::connect(opt).await?;

    // --- Broadcast + Engine State ---
    let broadcaster = EventBroadcaster::new(config.event_buffer);
    let state = EngineState::new(config.max_concurrent_probes);
    let incident_manager = Arc::new(IncidentManager::new(
        db.clone(),
        broadcaster.clone(),
        config.confirmation_checks,
    ));

    // --- Scheduler Task ---
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = MonitorScheduler::new(
        db.clone(),
        state.clone(),
        broadcaster.clone(),
        incident_manager.clone(),
    );
    let scheduler_task = tokio::spawn(scheduler.run(shutdown_rx));

    // --- HTTP Server ---
    let router = web::create_router(db, broadcaster);
    let addr: SocketAddr = config.listen_addr.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(address = %addr, "HTTP server listening.");

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal.");
            }
        })
        .await?;

    // Stop dispatching and let in-flight probes drain before exiting.
    info!("Shutdown signal received; stopping scheduler.");
    let _ = shutdown_tx.send(true);
    let _ = scheduler_task.await;
    info!("Shutdown complete.");

    Ok(())
}
