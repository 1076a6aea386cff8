//! Shared application state

use crate::config::{AppConfig, BackendKind};
use metrics_exporter_prometheus::PrometheusHandle;
use railguard_detectors::{DetectorRegistry, Orchestrator};
use railguard_pipeline::{
    EventHub, GenerationPort, MockBackend, OllamaBackend, Rail, SessionManager,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Services handed to every handler. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub rail: Arc<Rail>,
    pub metrics: PrometheusHandle,
}

impl AppState {
    pub fn new(rail: Arc<Rail>, metrics: PrometheusHandle) -> Self {
        Self { rail, metrics }
    }

    /// Build every service from configuration: detectors, orchestrator,
    /// generation backend, sessions, event hub, rail
    pub fn from_config(config: &AppConfig, metrics: PrometheusHandle) -> anyhow::Result<Self> {
        let registry = Arc::new(DetectorRegistry::builtin());
        let orchestrator = Arc::new(Orchestrator::new(registry, config.detector_config()?));

        let generator: Arc<dyn GenerationPort> = match config.backend.kind {
            BackendKind::Ollama => Arc::new(OllamaBackend::new(config.backend.ollama())?),
            BackendKind::Mock => Arc::new(
                MockBackend::new()
                    .with_latency(Duration::from_millis(config.backend.mock_latency_ms)),
            ),
        };
        info!(backend = generator.name(), "Generation backend ready");

        let sessions = Arc::new(SessionManager::new(config.sessions.settings()));
        let hub = Arc::new(EventHub::new(config.transport.event_buffer));
        let rail = Rail::new(
            orchestrator,
            generator,
            sessions,
            hub,
            config.rail.clone(),
        );

        Ok(Self::new(Arc::new(rail), metrics))
    }
}
