//! Shared fixtures for server tests

#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use metrics_exporter_prometheus::PrometheusBuilder;
use railguard_core::{ChatMessage, DetectorResult, DetectorSettings, Error, Result};
use railguard_detectors::{Detector, DetectorConfig, DetectorRegistry, Orchestrator};
use railguard_pipeline::{EventHub, GenerationPort, Rail, RailSettings, SessionManager};
use railguard_server::config::ServerConfig;
use railguard_server::{build_app, AppState};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

/// How the test backend answers
#[derive(Clone, Copy)]
pub enum Reply {
    Fixed(&'static str),
    Delayed(Duration, &'static str),
    Fail,
    Hang,
}

pub struct TestBackend {
    reply: Reply,
}

#[async_trait]
impl GenerationPort for TestBackend {
    async fn generate(&self, _prompt: &str, _history: &[ChatMessage]) -> Result<String> {
        match self.reply {
            Reply::Fixed(text) => Ok(text.to_string()),
            Reply::Delayed(delay, text) => {
                tokio::time::sleep(delay).await;
                Ok(text.to_string())
            }
            Reply::Fail => Err(Error::generation("connection refused")),
            Reply::Hang => std::future::pending().await,
        }
    }

    fn name(&self) -> &str {
        "test"
    }
}

/// Passes every text after `delay`
pub struct SlowDetector {
    name: String,
    delay: Duration,
}

impl SlowDetector {
    pub fn new(name: &str, delay: Duration) -> Self {
        Self {
            name: name.into(),
            delay,
        }
    }
}

#[async_trait]
impl Detector for SlowDetector {
    async fn evaluate(&self, _text: &str, settings: &DetectorSettings) -> DetectorResult {
        tokio::time::sleep(self.delay).await;
        DetectorResult::scored(&self.name, 0.0, settings.threshold, None)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

pub fn state(reply: Reply) -> AppState {
    state_with(reply, RailSettings::default())
}

pub fn state_with(reply: Reply, settings: RailSettings) -> AppState {
    state_with_registry(DetectorRegistry::builtin(), reply, settings)
}

pub fn state_with_registry(
    registry: DetectorRegistry,
    reply: Reply,
    settings: RailSettings,
) -> AppState {
    let registry = Arc::new(registry);
    let orchestrator = Arc::new(Orchestrator::new(registry, DetectorConfig::default()));
    let rail = Rail::new(
        orchestrator,
        Arc::new(TestBackend { reply }),
        Arc::new(SessionManager::default()),
        Arc::new(EventHub::default()),
        settings,
    );
    AppState::new(
        Arc::new(rail),
        PrometheusBuilder::new().build_recorder().handle(),
    )
}

pub fn app(state: AppState) -> Router {
    build_app(state, &ServerConfig::default())
}

pub fn short_timeout() -> RailSettings {
    RailSettings {
        message_timeout: Duration::from_millis(200),
        ..RailSettings::default()
    }
}

/// Send one request and decode the JSON body (Null when empty or not JSON)
pub async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let (status, bytes) = call_raw(app, method, uri, body).await;
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

pub async fn call_raw(
    app: &Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Vec<u8>) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, bytes.to_vec())
}
