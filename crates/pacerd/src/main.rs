//! pacerd — the pacer daemon.
//!
//! Single binary that assembles the generator subsystems:
//! - Worker pool (backend dispatch with retry)
//! - Concurrency tuner
//! - Perf store (redb, optional)
//! - Reporting API (metrics, status, SSE events, job submission)
//!
//! Configuration comes from environment variables (`LLM_ENDPOINT`,
//! `MODEL_ID`, `CONCURRENCY_*`, `TARGET_*`, `PERF_DB_URL`, …) with CLI
//! overrides for the common ones.
//!
//! # Usage
//!
//! ```text
//! pacerd run --metrics-port 8088
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;

use pacer_core::Config;
use pacer_gen::Generator;

#[derive(Parser)]
#[command(name = "pacerd", about = "pacer daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the generator and the reporting server.
    Run {
        /// Backend chat-completion endpoint (overrides LLM_ENDPOINT).
        #[arg(long)]
        endpoint: Option<String>,

        /// Reporting server port (overrides METRICS_PORT).
        #[arg(long)]
        metrics_port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,pacerd=debug,pacer=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            endpoint,
            metrics_port,
        } => run(endpoint, metrics_port).await,
    }
}

async fn run(endpoint: Option<String>, metrics_port: Option<u16>) -> anyhow::Result<()> {
    info!("pacer daemon starting");

    let mut config = Config::from_env();
    if let Some(endpoint) = endpoint {
        config.endpoint = endpoint;
    }
    if let Some(port) = metrics_port {
        config.metrics_port = port;
    }

    let generator = Arc::new(Generator::new(config.clone())?);
    generator.start().await;

    let router = pacer_api::build_router(generator.clone());
    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));

    info!(%addr, "reporting server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    let server = axum::serve(listener, router).with_graceful_shutdown(async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C handler");
        info!("shutdown signal received");
    });

    server.await?;

    generator.shutdown().await;

    info!("pacer daemon stopped");
    Ok(())
}
