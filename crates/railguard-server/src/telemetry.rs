//! Logging, metrics and shutdown plumbing for the binary

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::signal;
use tracing::{error, info};

/// Initialize tracing/logging
pub fn init_tracing(verbose: bool, json: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("railguard=debug,tower_http=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("railguard=info"))
    };

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Install the Prometheus recorder and return the handle used by `/metrics`
pub fn init_metrics() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install metrics: {}", e))?;

    metrics::describe_counter!(
        "railguard_messages_total",
        "Messages processed by terminal outcome"
    );
    metrics::describe_histogram!(
        "railguard_phase_latency_us",
        metrics::Unit::Microseconds,
        "Detector phase latency in microseconds by phase"
    );
    metrics::describe_histogram!(
        "railguard_detector_latency_us",
        metrics::Unit::Microseconds,
        "Single detector evaluation latency in microseconds"
    );
    metrics::describe_counter!(
        "railguard_generation_failures_total",
        "Generation calls that failed or timed out"
    );
    metrics::describe_gauge!("railguard_active_sessions", "Sessions currently held");
    metrics::describe_counter!(
        "railguard_sessions_evicted_total",
        "Sessions evicted after idling past the TTL"
    );

    info!("Metrics exporter initialized");
    Ok(handle)
}

/// Resolves on SIGINT or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
