//! Autoflow CLI and webhook server entry point.
//!
//! Binary name: `autoflow`
//!
//! Parses CLI arguments, loads `config.toml` from the data directory, wires
//! the services, then dispatches to a command handler or starts the server.

mod cli;
mod http;
mod state;

use std::future::IntoFuture;

use anyhow::Context;
use clap::Parser;
use console::style;
use tracing::Instrument;

use autoflow_infra::config::{load_engine_config, resolve_data_dir};
use autoflow_observe::attrs;
use autoflow_observe::tracing_setup::{TracingOptions, init_tracing, shutdown_tracing};

use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let data_dir = cli.data_dir.clone().unwrap_or_else(resolve_data_dir);
    let config = load_engine_config(&data_dir).await;

    let directive = match cli.verbose {
        0 => config.telemetry.log_level.clone(),
        1 => "info,autoflow_core=debug,autoflow_infra=debug,autoflow=debug".to_string(),
        _ => "trace".to_string(),
    };
    init_tracing(&TracingOptions {
        default_directive: directive,
        json: config.telemetry.json_logs,
        enable_otel: config.telemetry.otel,
    })
    .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let state = AppState::init(data_dir, config).await?;
    let result = dispatch(cli, state).await;

    shutdown_tracing();
    result
}

async fn dispatch(cli: Cli, state: AppState) -> anyhow::Result<()> {
    match cli.command {
        Commands::Serve { port, host } => serve(state, host, port).await,
        Commands::Validate { file } => cli::automation::validate(&state, &file, cli.json).await,
        Commands::Import { file } => cli::automation::import(&state, &file, cli.json).await,
        Commands::List => cli::automation::list(&state, cli.json).await,
        Commands::Run { id, input } => cli::automation::run(&state, id, input.as_deref(), cli.json).await,
        Commands::Schedule { action } => cli::trigger::handle_schedule_command(action, &state, cli.json).await,
        Commands::Webhook { action } => cli::trigger::handle_webhook_command(action, &state, cli.json).await,
        Commands::Execution { action } => {
            cli::execution::handle_execution_command(action, &state, cli.json).await
        }
    }
}

async fn serve(state: AppState, host: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    let host = host.unwrap_or_else(|| state.config.server.host.clone());
    let port = port.unwrap_or(state.config.server.port);
    let addr = format!("{host}:{port}");

    state.browser_pool.start();
    let summary = state.scheduler.start().await.context("failed to start scheduler")?;

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    println!(
        "  {} Autoflow listening on {}",
        style("⚡").bold(),
        style(format!("http://{addr}")).cyan()
    );
    println!(
        "  {} schedules armed, {} webhooks routed",
        summary.schedules, summary.webhooks
    );
    println!("  {}", style("Press Ctrl+C to stop").dim());

    let router = http::router::build_router(state.clone());
    let served = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .into_future()
        .instrument(tracing::info_span!(attrs::SPAN_SERVE, %addr))
        .await;

    tracing::info!("shutting down");
    if let Err(e) = state.scheduler.stop().await {
        tracing::warn!("scheduler stop failed: {e}");
    }
    state.browser_pool.stop().await;

    println!("\n  Server stopped.");
    served.map_err(Into::into)
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
