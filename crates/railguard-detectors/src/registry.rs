//! Detector registry initialization and health

use crate::{
    detector::{Detector, DetectorKind},
    fact_check::FactCheckDetector,
    pii::PiiDetector,
    prompt_injection::PromptInjectionDetector,
    spam::SpamDetector,
    topic::TopicDetector,
    toxicity::ToxicityDetector,
    unavailable::UnavailableDetector,
};
use railguard_core::Result;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Builds one detector instance
pub type Constructor = fn() -> Result<Arc<dyn Detector>>;

/// Static table of built-in detectors, in registration order
pub const BUILTIN: &[(DetectorKind, Constructor)] = &[
    (DetectorKind::Toxicity, toxicity),
    (DetectorKind::Pii, pii),
    (DetectorKind::PromptInjection, prompt_injection),
    (DetectorKind::Topic, topic),
    (DetectorKind::FactCheck, fact_check),
    (DetectorKind::Spam, spam),
];

fn toxicity() -> Result<Arc<dyn Detector>> {
    Ok(Arc::new(ToxicityDetector::new()))
}

fn pii() -> Result<Arc<dyn Detector>> {
    Ok(Arc::new(PiiDetector::new()?))
}

fn prompt_injection() -> Result<Arc<dyn Detector>> {
    Ok(Arc::new(PromptInjectionDetector::new()?))
}

fn topic() -> Result<Arc<dyn Detector>> {
    Ok(Arc::new(TopicDetector::new()?))
}

fn fact_check() -> Result<Arc<dyn Detector>> {
    Ok(Arc::new(FactCheckDetector::new()?))
}

fn spam() -> Result<Arc<dyn Detector>> {
    Ok(Arc::new(SpamDetector::new()?))
}

/// Availability of one registered detector
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectorHealth {
    pub name: String,
    pub loaded: bool,
}

/// Registry of instantiated detectors.
///
/// Built once at startup and shared read-only afterwards.
#[derive(Default)]
pub struct DetectorRegistry {
    order: Vec<String>,
    detectors: HashMap<String, Arc<dyn Detector>>,
}

impl DetectorRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in detector
    pub fn builtin() -> Self {
        Self::from_table(BUILTIN)
    }

    /// Construct from a table. A constructor that fails leaves an
    /// unavailable stand-in under that name.
    pub fn from_table(table: &[(DetectorKind, Constructor)]) -> Self {
        info!("Initializing detectors");

        let mut registry = Self::new();
        for (kind, build) in table {
            match build() {
                Ok(detector) => registry.register(kind.name(), detector),
                Err(e) => {
                    warn!(detector = kind.name(), error = %e, "Detector failed to load");
                    registry.register(
                        kind.name(),
                        Arc::new(UnavailableDetector::new(kind.name(), e.to_string())),
                    );
                }
            }
        }

        info!(
            "Initialized {} detectors ({} loaded)",
            registry.len(),
            registry.health().iter().filter(|h| h.loaded).count()
        );
        registry
    }

    /// Register or replace a detector under `name`
    pub fn register(&mut self, name: impl Into<String>, detector: Arc<dyn Detector>) {
        let name = name.into();
        if self.detectors.insert(name.clone(), detector).is_none() {
            self.order.push(name);
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Detector>> {
        self.detectors.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.detectors.contains_key(name)
    }

    /// Registered names in registration order
    pub fn names(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Per-detector availability, in registration order
    pub fn health(&self) -> Vec<DetectorHealth> {
        self.order
            .iter()
            .filter_map(|name| {
                self.detectors.get(name).map(|d| DetectorHealth {
                    name: name.clone(),
                    loaded: d.is_loaded(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use railguard_core::Error;

    #[test]
    fn test_builtin_registry_loads_all() {
        let registry = DetectorRegistry::builtin();

        assert_eq!(registry.len(), 6);
        assert!(registry.health().iter().all(|h| h.loaded));
        assert_eq!(registry.names()[0], "toxicity");
        assert_eq!(registry.names()[5], "spam");
    }

    #[test]
    fn test_failed_constructor_registers_stand_in() {
        fn broken() -> Result<Arc<dyn Detector>> {
            Err(Error::unavailable("model file missing"))
        }
        let table: &[(DetectorKind, Constructor)] = &[
            (DetectorKind::Toxicity, toxicity),
            (DetectorKind::FactCheck, broken),
        ];
        let registry = DetectorRegistry::from_table(table);

        assert_eq!(registry.len(), 2);
        let health = registry.health();
        assert!(health[0].loaded);
        assert_eq!(health[1].name, "fact_check");
        assert!(!health[1].loaded);
    }
}
