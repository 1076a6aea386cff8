//! Detector port and the closed set of built-in detector kinds

use async_trait::async_trait;
use railguard_core::{DetectorResult, DetectorSettings};

/// Trait for all detectors.
///
/// Implementations must be safe to call concurrently from many
/// orchestrations. Failures are reported as a tagged
/// [`Decision::Unavailable`](railguard_core::Decision::Unavailable) result,
/// never by returning early or blocking indefinitely.
#[async_trait]
pub trait Detector: Send + Sync {
    /// Score `text` against the effective settings
    async fn evaluate(&self, text: &str, settings: &DetectorSettings) -> DetectorResult;

    /// Registry name of this detector
    fn name(&self) -> &str;

    /// Whether the backing model initialized
    fn is_loaded(&self) -> bool {
        true
    }
}

/// Built-in detector kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DetectorKind {
    Toxicity,
    Pii,
    PromptInjection,
    Topic,
    FactCheck,
    Spam,
}

impl DetectorKind {
    /// All kinds in registration order
    pub const ALL: [DetectorKind; 6] = [
        Self::Toxicity,
        Self::Pii,
        Self::PromptInjection,
        Self::Topic,
        Self::FactCheck,
        Self::Spam,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Toxicity => "toxicity",
            Self::Pii => "pii",
            Self::PromptInjection => "prompt_injection",
            Self::Topic => "topic",
            Self::FactCheck => "fact_check",
            Self::Spam => "spam",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }

    /// Default blocking threshold
    pub fn default_threshold(&self) -> f32 {
        match self {
            Self::Toxicity => 0.7,
            Self::Pii => 0.8,
            Self::PromptInjection => 0.5,
            Self::Topic => 0.7,
            Self::FactCheck => 0.5,
            Self::Spam => 0.6,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Toxicity => "Abusive or hateful language",
            Self::Pii => "Personal data such as emails, phone numbers and card numbers",
            Self::PromptInjection => "Attempts to override the assistant's instructions",
            Self::Topic => "Restricted topics such as violence or illegal activity",
            Self::FactCheck => "Factual claims that may need verification",
            Self::Spam => "Promotional or spam-like content",
        }
    }

    pub fn default_settings(&self) -> DetectorSettings {
        DetectorSettings::new(self.default_threshold())
    }
}

impl std::fmt::Display for DetectorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
