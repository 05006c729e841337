//! Story Fan-out Main Entry Point
//!
//! Serves the fan-out HTTP API and delivers published stories to follower
//! inboxes in the background.

use dotenv::dotenv;
use std::env;
use story_fanout::server::{create_app, run_server};
use story_fanout::{Dependencies, ServiceError};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing/logging.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("story_fanout=info,story_fanout_repository=info"));

    let json_logs = env::var("LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(true),
            )
            .init();

        info!(
            service_name = "story-fanout",
            service_version = env!("CARGO_PKG_VERSION"),
            "Tracing initialized with JSON format"
        );
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_target(true).pretty())
            .init();

        info!(
            service_name = "story-fanout",
            service_version = env!("CARGO_PKG_VERSION"),
            "Tracing initialized with console output"
        );
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for ctrl-c");
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<(), ServiceError> {
    // Load environment variables from .env file
    dotenv().ok();

    init_tracing();

    info!("Starting Story Fan-out");

    let deps = match Dependencies::new().await {
        Ok(deps) => {
            info!("Dependencies initialized successfully");
            deps
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize dependencies");
            return Err(e);
        }
    };

    match deps.service.resume_incomplete().await {
        Ok(0) => {}
        Ok(resumed) => info!(resumed, "Resumed unfinished jobs"),
        Err(e) => warn!(error = %e, "Failed to resume unfinished jobs"),
    }
    let reporter = deps.service.spawn_progress_reporter();

    let addr = deps.server.socket_addr()?;
    let app = create_app(deps.service.clone());
    let served = run_server(app, addr, shutdown_signal()).await;

    deps.service.shutdown().await;
    if let Err(e) = reporter.await {
        warn!(error = %e, "Progress reporter ended abnormally");
    }
    deps.close().await;

    match served {
        Ok(()) => {
            info!("Story fan-out stopped");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Server failed");
            Err(e.into())
        }
    }
}
