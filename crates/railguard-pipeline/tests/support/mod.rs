//! Scripted ports for driving the rail in tests

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use railguard_core::{ChatMessage, DetectorResult, DetectorSettings, Error, Result};
use railguard_detectors::{
    Detector, DetectorConfig, DetectorRegistry, Orchestrator, UnavailableDetector,
};
use railguard_pipeline::{
    EventHub, GenerationPort, Rail, RailSettings, SessionManager, SessionSettings,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Scores `confidence` when `trigger` appears in the text, 0.0 otherwise
pub struct KeywordDetector {
    name: String,
    trigger: String,
    confidence: f32,
}

impl KeywordDetector {
    pub fn new(name: &str, trigger: &str, confidence: f32) -> Self {
        Self {
            name: name.into(),
            trigger: trigger.into(),
            confidence,
        }
    }
}

#[async_trait]
impl Detector for KeywordDetector {
    async fn evaluate(&self, text: &str, settings: &DetectorSettings) -> DetectorResult {
        let score = if text.contains(&self.trigger) {
            self.confidence
        } else {
            0.0
        };
        DetectorResult::scored(&self.name, score, settings.threshold, None)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Never finishes an evaluation
pub struct HangingDetector {
    name: String,
}

impl HangingDetector {
    pub fn new(name: &str) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Detector for HangingDetector {
    async fn evaluate(&self, _text: &str, _settings: &DetectorSettings) -> DetectorResult {
        std::future::pending().await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// What the backend does for a given prompt
#[derive(Clone)]
pub enum Script {
    Reply(String),
    Delayed(Duration, String),
    Fail(String),
    Hang,
}

/// Backend answering from a per-prompt script, echoing by default
#[derive(Default)]
pub struct ScriptedBackend {
    scripts: Mutex<HashMap<String, Script>>,
    calls: AtomicUsize,
    histories: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on(&self, prompt: &str, script: Script) {
        self.scripts.lock().insert(prompt.to_string(), script);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// History passed on each call, in call order
    pub fn histories(&self) -> Vec<Vec<ChatMessage>> {
        self.histories.lock().clone()
    }
}

#[async_trait]
impl GenerationPort for ScriptedBackend {
    async fn generate(&self, prompt: &str, history: &[ChatMessage]) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.histories.lock().push(history.to_vec());

        let script = self.scripts.lock().get(prompt).cloned();
        match script {
            Some(Script::Reply(text)) => Ok(text),
            Some(Script::Delayed(delay, text)) => {
                tokio::time::sleep(delay).await;
                Ok(text)
            }
            Some(Script::Fail(reason)) => Err(Error::generation(reason)),
            Some(Script::Hang) => std::future::pending().await,
            None => Ok(format!("Echo: {prompt}")),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// toxicity fires on "TOXIC" at 0.9, pii on "@" at 0.95, fact_check on "FACT" at 0.6
pub fn registry() -> DetectorRegistry {
    let mut registry = DetectorRegistry::new();
    registry.register(
        "toxicity",
        Arc::new(KeywordDetector::new("toxicity", "TOXIC", 0.9)),
    );
    registry.register("pii", Arc::new(KeywordDetector::new("pii", "@", 0.95)));
    registry.register(
        "fact_check",
        Arc::new(KeywordDetector::new("fact_check", "FACT", 0.6)),
    );
    registry
}

/// Same as [`registry`] but fact_check failed to load
pub fn registry_without_fact_check() -> DetectorRegistry {
    let mut registry = registry();
    registry.register(
        "fact_check",
        Arc::new(UnavailableDetector::new("fact_check", "model failed to load")),
    );
    registry
}

/// Same as [`registry`] but fact_check never answers
pub fn registry_with_hanging_fact_check() -> DetectorRegistry {
    let mut registry = registry();
    registry.register("fact_check", Arc::new(HangingDetector::new("fact_check")));
    registry
}

pub fn settings() -> RailSettings {
    RailSettings {
        message_timeout: Duration::from_secs(5),
        input_detectors: vec!["toxicity".into(), "pii".into(), "fact_check".into()],
        output_detectors: vec!["toxicity".into(), "fact_check".into()],
        ..RailSettings::default()
    }
}

pub fn rail(registry: DetectorRegistry, backend: Arc<ScriptedBackend>, settings: RailSettings) -> Rail {
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(registry),
        DetectorConfig::default(),
    ));
    Rail::new(
        orchestrator,
        backend,
        Arc::new(SessionManager::new(SessionSettings::default())),
        Arc::new(EventHub::default()),
        settings,
    )
}
