mod api;
mod bulk;
mod cli;
mod db;
mod import;
mod router;
mod startup;
mod state;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tabload_core::Config;

use crate::cli::{Cli, Command};

fn load_config() -> Config {
    tabload_core::config::load_dotenv();
    Config::from_env()
}

async fn serve(mut config: Config, port: Option<u16>) -> anyhow::Result<()> {
    if let Some(port) = port {
        config.server.port = port;
    }
    config.log_summary();

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = startup::build_app_state(config).await?;
    let app = router::build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on http://{}", addr);
    info!("API docs at http://{}/docs", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_level(true)
        .init();

    let cli = Cli::parse();
    let config = load_config();

    match cli.command() {
        Command::Serve { port } => serve(config, port).await,
        Command::Import { file, batch_size } => import::import_file(config, &file, batch_size).await,
    }
}
