//! Thin HTTP shell. Boots the engine registry, one pool/queue/auth triple per
//! configured database, then serves the four auth routes over axum.
//!
//! Everything process-wide lives in one [`Context`], built once at launch
//! in the fixed order engines → pools → queues → auth and dropped in
//! reverse when the process exits.

mod context;
mod routes;

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use hydrogen_config::AppConfig;

#[derive(Debug, Parser)]
#[command(name = "hydrogen-server", about = "Hydrogen DQM + auth HTTP server")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, env = "HYDROGEN_CONFIG", default_value = "hydrogen.toml")]
    config: PathBuf,

    /// Address to bind the HTTP listener to.
    #[arg(long, env = "HYDROGEN_BIND", default_value = "0.0.0.0:8080")]
    bind: SocketAddr,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load(&cli.config)?;

    let ctx = context::Context::bootstrap(config).await?;
    let app = routes::router(ctx);

    tracing::info!(bind = %cli.bind, "listening");
    let listener = tokio::net::TcpListener::bind(cli.bind).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
