//! Railguard Detectors
//!
//! Content detectors and the orchestrator that runs them.
//!
//! Every detector implements [`Detector`] and reports a tagged
//! pass/warn/block/unavailable result instead of failing. The built-in
//! set is closed ([`DetectorKind`]) and registered from a static table;
//! a detector that fails to construct is replaced by an unavailable
//! stand-in so the rest keep working.

pub mod config;
pub mod detector;
pub mod fact_check;
pub mod orchestrator;
pub mod pii;
pub mod presets;
pub mod prompt_injection;
pub mod registry;
pub mod spam;
pub mod topic;
pub mod toxicity;
pub mod unavailable;

pub use config::{validate_overrides, DetectorConfig};
pub use detector::{Detector, DetectorKind};
pub use orchestrator::{aggregate, DetectorUsage, Orchestrator, MAX_BATCH};
pub use presets::Preset;
pub use registry::{Constructor, DetectorHealth, DetectorRegistry, BUILTIN};
pub use unavailable::UnavailableDetector;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::DetectorConfig;
    pub use crate::detector::{Detector, DetectorKind};
    pub use crate::fact_check::FactCheckDetector;
    pub use crate::orchestrator::Orchestrator;
    pub use crate::pii::PiiDetector;
    pub use crate::prompt_injection::PromptInjectionDetector;
    pub use crate::registry::DetectorRegistry;
    pub use crate::spam::SpamDetector;
    pub use crate::topic::TopicDetector;
    pub use crate::toxicity::ToxicityDetector;
}
