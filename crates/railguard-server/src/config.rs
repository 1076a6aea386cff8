//! Server configuration
//!
//! Layered with the `config` crate, later layers winning:
//! built-in defaults, the YAML file, `RAILGUARD__*` environment variables,
//! then command-line flags.

use crate::cli::ServeArgs;
use railguard_core::{DetectorSettings, Error};
use railguard_detectors::{DetectorConfig, DetectorKind};
use railguard_pipeline::{OllamaConfig, RailSettings, SessionSettings};
use railguard_transport::TransportConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

const ENV_PREFIX: &str = "RAILGUARD";
const ENV_SEPARATOR: &str = "__";

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub backend: BackendConfig,

    /// Per-detector defaults; names left out keep the built-in values
    pub detectors: BTreeMap<String, DetectorSettings>,
    pub rail: RailSettings,
    pub sessions: SessionsConfig,
    pub transport: TransportSection,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            backend: BackendConfig::default(),
            detectors: DetectorConfig::default().detectors,
            rail: RailSettings::default(),
            sessions: SessionsConfig::default(),
            transport: TransportSection::default(),
        }
    }
}

/// Listener settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub address: String,
    pub port: u16,

    /// Allowed browser origins; `*` allows any
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 8080,
            cors_origins: vec![
                "http://localhost:5173".to_string(),
                "http://127.0.0.1:5173".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Ollama,
    Mock,
}

impl std::str::FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "mock" => Ok(Self::Mock),
            other => Err(Error::config(format!(
                "unknown backend '{other}', expected ollama or mock"
            ))),
        }
    }
}

/// Generation backend settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub kind: BackendKind,
    pub base_url: String,
    pub model: String,
    pub request_timeout_ms: u64,
    pub temperature: f32,
    pub system_prompt: String,

    /// Simulated latency of the mock backend
    pub mock_latency_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        let ollama = OllamaConfig::default();
        Self {
            kind: BackendKind::default(),
            base_url: ollama.base_url,
            model: ollama.model,
            request_timeout_ms: ollama.request_timeout_ms,
            temperature: ollama.temperature,
            system_prompt: ollama.system_prompt,
            mock_latency_ms: 0,
        }
    }
}

impl BackendConfig {
    pub fn ollama(&self) -> OllamaConfig {
        OllamaConfig {
            base_url: self.base_url.clone(),
            model: self.model.clone(),
            request_timeout_ms: self.request_timeout_ms,
            temperature: self.temperature,
            system_prompt: self.system_prompt.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    pub idle_ttl_secs: u64,
    pub max_history: usize,
    pub reap_interval_secs: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        let defaults = SessionSettings::default();
        Self {
            idle_ttl_secs: defaults.idle_ttl.as_secs(),
            max_history: defaults.max_history,
            reap_interval_secs: defaults.reap_interval.as_secs(),
        }
    }
}

impl SessionsConfig {
    pub fn settings(&self) -> SessionSettings {
        SessionSettings {
            idle_ttl: Duration::from_secs(self.idle_ttl_secs),
            max_history: self.max_history,
            reap_interval: Duration::from_secs(self.reap_interval_secs),
        }
    }
}

/// Event delivery settings for both ends of the duplex channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSection {
    /// Client side: events held while disconnected
    pub queue_capacity: usize,

    /// Server side: events buffered per session for slow subscribers
    pub event_buffer: usize,

    pub reconnect_base_ms: u64,
    pub reconnect_max_ms: u64,
    pub max_attempts: u32,
}

impl Default for TransportSection {
    fn default() -> Self {
        let defaults = TransportConfig::default();
        Self {
            queue_capacity: defaults.queue_capacity,
            event_buffer: 1024,
            reconnect_base_ms: defaults.base_delay.as_millis() as u64,
            reconnect_max_ms: defaults.max_delay.as_millis() as u64,
            max_attempts: defaults.max_attempts,
        }
    }
}

impl TransportSection {
    pub fn client(&self) -> TransportConfig {
        TransportConfig {
            base_delay: Duration::from_millis(self.reconnect_base_ms),
            max_delay: Duration::from_millis(self.reconnect_max_ms),
            max_attempts: self.max_attempts,
            queue_capacity: self.queue_capacity,
            ..TransportConfig::default()
        }
    }
}

impl AppConfig {
    /// Load from `path` (optional) and the process environment
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        Self::load_with_env(path, None)
    }

    /// Load with an explicit environment instead of the process one
    pub fn load_with_env(
        path: impl AsRef<Path>,
        env: Option<config::Map<String, String>>,
    ) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let file = config::File::from(path)
            .format(config::FileFormat::Yaml)
            .required(false);
        let environment = config::Environment::with_prefix(ENV_PREFIX)
            .separator(ENV_SEPARATOR)
            .list_separator(",")
            .with_list_parse_key("server.cors_origins")
            .with_list_parse_key("rail.input_detectors")
            .with_list_parse_key("rail.output_detectors")
            .try_parsing(true)
            .source(env);

        let layered = config::Config::builder()
            .add_source(config::Config::try_from(&Self::default())?)
            .add_source(file)
            .add_source(environment)
            .build()?;

        let config: Self = layered.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply command-line overrides and re-validate
    pub fn apply_cli(&mut self, args: &ServeArgs) -> railguard_core::Result<()> {
        if let Some(listen) = &args.listen {
            self.server.address = listen.clone();
        }
        if let Some(port) = args.port {
            self.server.port = port;
        }
        if let Some(backend) = &args.backend {
            self.backend.kind = backend.parse()?;
        }
        if let Some(url) = &args.backend_url {
            self.backend.base_url = url.clone();
        }
        if let Some(model) = &args.model {
            self.backend.model = model.clone();
        }
        self.validate()
    }

    /// Detector defaults layered over the built-ins
    pub fn detector_config(&self) -> railguard_core::Result<DetectorConfig> {
        DetectorConfig::from_partial(self.detectors.clone())
    }

    /// Reject anything the services would refuse or misbehave on
    pub fn validate(&self) -> railguard_core::Result<()> {
        self.detector_config()?;

        for name in self
            .rail
            .input_detectors
            .iter()
            .chain(&self.rail.output_detectors)
        {
            if DetectorKind::from_name(name).is_none() {
                return Err(Error::config(format!("rail: unknown detector '{name}'")));
            }
        }
        if self.rail.message_timeout.is_zero() {
            return Err(Error::config("rail.message_timeout_ms must be positive"));
        }
        if self.rail.detector_timeout.is_zero() {
            return Err(Error::config("rail.detector_timeout_ms must be positive"));
        }
        if self.rail.max_message_length == 0 {
            return Err(Error::config("rail.max_message_length must be positive"));
        }
        if self.sessions.max_history == 0 {
            return Err(Error::config("sessions.max_history must be positive"));
        }
        if self.sessions.reap_interval_secs == 0 {
            return Err(Error::config("sessions.reap_interval_secs must be positive"));
        }
        if self.transport.queue_capacity == 0 || self.transport.event_buffer == 0 {
            return Err(Error::config(
                "transport.queue_capacity and transport.event_buffer must be positive",
            ));
        }
        if self.backend.base_url.trim().is_empty() {
            return Err(Error::config("backend.base_url must not be empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> Option<config::Map<String, String>> {
        Some(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_defaults_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load_with_env(dir.path().join("missing.yaml"), env(&[])).unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.rail.message_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_yaml_file_layers_over_defaults() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            r#"
server:
  port: 9000
backend:
  kind: mock
detectors:
  toxicity:
    threshold: 0.4
rail:
  message_timeout_ms: 5000
  detector_timeout_ms: 750
  output_detectors: [toxicity]
sessions:
  max_history: 20
"#
        )
        .unwrap();

        let config = AppConfig::load_with_env(file.path(), env(&[])).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.address, "127.0.0.1");
        assert_eq!(config.backend.kind, BackendKind::Mock);
        assert_eq!(config.rail.message_timeout, Duration::from_secs(5));
        assert_eq!(config.rail.detector_timeout, Duration::from_millis(750));
        assert_eq!(config.rail.output_detectors, vec!["toxicity".to_string()]);
        assert_eq!(config.sessions.max_history, 20);

        let detectors = config.detector_config().unwrap();
        assert_eq!(detectors.settings("toxicity").threshold, 0.4);
        assert_eq!(detectors.settings("pii").threshold, 0.8);
    }

    #[test]
    fn test_environment_overrides_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "server:\n  port: 9000\n").unwrap();

        let config = AppConfig::load_with_env(
            file.path(),
            env(&[
                ("RAILGUARD__SERVER__PORT", "9100"),
                ("RAILGUARD__BACKEND__MODEL", "mistral:latest"),
            ]),
        )
        .unwrap();
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.backend.model, "mistral:latest");
    }

    #[test]
    fn test_cli_overrides_everything() {
        let mut config = AppConfig::default();
        let args = ServeArgs {
            port: Some(7000),
            backend: Some("mock".into()),
            ..ServeArgs::default()
        };
        config.apply_cli(&args).unwrap();
        assert_eq!(config.server.port, 7000);
        assert_eq!(config.backend.kind, BackendKind::Mock);

        let bad = ServeArgs {
            backend: Some("gpt".into()),
            ..ServeArgs::default()
        };
        assert!(matches!(
            config.apply_cli(&bad),
            Err(Error::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_unknown_detector_rejected() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "detectors:\n  sentiment:\n    threshold: 0.5\n").unwrap();
        assert!(AppConfig::load_with_env(file.path(), env(&[])).is_err());

        let mut config = AppConfig::default();
        config.rail.input_detectors.push("sentiment".into());
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_out_of_range_threshold_rejected() {
        let mut config = AppConfig::default();
        config
            .detectors
            .insert("pii".into(), DetectorSettings::new(1.5));
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_zero_sizes_rejected() {
        let mut config = AppConfig::default();
        config.transport.event_buffer = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.rail.message_timeout = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.rail.detector_timeout = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_client_transport_settings() {
        let section = TransportSection {
            queue_capacity: 8,
            reconnect_base_ms: 250,
            ..TransportSection::default()
        };
        let client = section.client();
        assert_eq!(client.queue_capacity, 8);
        assert_eq!(client.base_delay, Duration::from_millis(250));
        assert_eq!(client.max_attempts, 5);
    }
}
