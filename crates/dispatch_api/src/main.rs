//! dispatch-api entry point: load configuration, install logging, start the
//! scheduler and serve HTTP until ctrl-c.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use dispatch_api::config::AppConfig;
use dispatch_api::logging::init_logging;
use dispatch_api::routes::build_router;
use dispatch_api::state::AppState;
use dispatch_core::DispatchService;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{info, Level};

#[derive(Debug, Parser)]
#[command(name = "dispatch-api", about = "Vehicle dispatch and tracking service")]
struct Cli {
    /// TOML configuration file. Environment variables prefixed with
    /// `DISPATCH__` override its values.
    #[arg(long, env = "DISPATCH_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref()).context("loading configuration")?;
    init_logging(&config.logging);

    let service = Arc::new(
        DispatchService::in_memory(config.dispatch.clone())
            .context("building dispatch service")?,
    );
    let scheduler = Arc::new(service.scheduler()).spawn();

    let app = build_router(AppState::new(service)).layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.server.bind_addr))?;
    info!(addr = %config.server.bind_addr, "dispatch-api listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server crashed")?;

    scheduler.abort();
    info!("dispatch-api stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "ctrl-c handler failed; shutting down");
    }
}
