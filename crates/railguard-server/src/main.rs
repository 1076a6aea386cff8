use anyhow::Result;
use clap::Parser;
use railguard_server::cli::{Cli, Commands, ServeArgs};
use railguard_server::telemetry::{init_metrics, init_tracing, shutdown_signal};
use railguard_server::{build_app, client, AppConfig, AppState};
use std::net::SocketAddr;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    let mut config = AppConfig::load(&cli.config)?;
    match cli.command {
        Commands::Serve(args) => serve(&mut config, &args).await,
        Commands::Connect(args) => client::run(args, config.transport.client()).await,
    }
}

async fn serve(config: &mut AppConfig, args: &ServeArgs) -> Result<()> {
    config.apply_cli(args)?;
    info!("Starting Railguard");
    info!("Backend: {:?} ({})", config.backend.kind, config.backend.base_url);
    info!("Input detectors: {}", config.rail.input_detectors.join(", "));
    info!("Output detectors: {}", config.rail.output_detectors.join(", "));

    let metrics_handle = init_metrics()?;
    let state = AppState::from_config(config, metrics_handle)?;

    if !state.rail.generator().health_check().await {
        warn!(
            backend = state.rail.generator().name(),
            "Generation backend is not reachable yet; messages will fail until it is"
        );
    }

    let reaper = state.rail.sessions().spawn_reaper();
    let app = build_app(state, &config.server);

    let addr: SocketAddr = format!("{}:{}", config.server.address, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on http://{}", addr);

    let shutdown = async {
        shutdown_signal().await;
        warn!("Shutdown signal received, stopping server...");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    reaper.abort();
    info!("Server shutdown complete");
    Ok(())
}
