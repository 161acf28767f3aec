#![doc = include_str!("../README.md")]

mod server;

use clap::Parser;
use core::time::Duration;
use redraft::JobService;
use server::config::{CliArgs, ServerConfig};
use server::service::backend::OpenAiCompatGenerator;
use server::service::handler::{AppState, router};
use server::telemetry::init_telemetry;
use tokio::net::TcpListener;
use tokio::signal;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    let providers = init_telemetry()?;

    let generator = OpenAiCompatGenerator::new(config.backend.clone())?;
    let service = JobService::new(config.job.clone(), generator)?;
    let state = AppState::new(service);

    let listener = TcpListener::bind(&config.server_addr).await?;
    log_startup_info(&config);

    axum::serve(listener, router(state.clone()))
        .with_graceful_shutdown(shutdown_signal(state, config.shutdown_timeout))
        .await?;

    providers.shutdown();
    tracing::info!("Service shut down successfully");
    Ok(())
}

fn log_startup_info(config: &ServerConfig) {
    if cfg!(debug_assertions) {
        tracing::info!(
            "Starting rewrite service on {} with full config: {:#?}",
            config.server_addr,
            config
        );
    } else {
        tracing::info!(
            "Starting rewrite service on {} (model {}, concurrency {})",
            config.server_addr,
            config.backend.model,
            config.job.concurrency
        );
    }
}

async fn shutdown_signal(state: AppState, drain_timeout: Duration) {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {e}");
                core::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = core::future::pending::<()>();

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {e}");
            core::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        () = terminate => tracing::info!("Received SIGTERM signal"),
    }

    tracing::info!("Shutdown signal received, terminating gracefully...");

    // 1. Abort running jobs; idle sessions close on their own
    state.service().shutdown();

    // 2. Give sessions time to deliver their terminal events
    let drained = tokio::time::timeout(drain_timeout, async {
        while state.sessions_inflight() > 0 {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await;

    if drained.is_err() {
        tracing::warn!(
            "{} sessions still open after {:?}",
            state.sessions_inflight(),
            drain_timeout
        );
    }
}
