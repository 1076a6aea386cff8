//! Named threshold presets
//!
//! A preset is a set of detector overrides applied to a session in one
//! step. `strict` lowers thresholds so more content blocks; `permissive`
//! raises them. fact_check is left at its configured threshold in every
//! preset.

use crate::detector::DetectorKind;
use railguard_core::{DetectorOverride, DetectorOverrides};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preset {
    Strict,
    Balanced,
    Permissive,
}

impl Preset {
    pub const ALL: [Preset; 3] = [Self::Strict, Self::Balanced, Self::Permissive];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::Balanced => "balanced",
            Self::Permissive => "permissive",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.name() == name)
    }

    fn threshold(&self, kind: DetectorKind) -> Option<f32> {
        use DetectorKind::*;
        let t = match (self, kind) {
            (_, FactCheck) => return None,
            (Self::Strict, Toxicity) => 0.5,
            (Self::Strict, Pii) => 0.6,
            (Self::Strict, PromptInjection) => 0.3,
            (Self::Strict, Topic) => 0.6,
            (Self::Strict, Spam) => 0.4,
            (Self::Balanced, kind) => kind.default_threshold(),
            (Self::Permissive, Toxicity) => 0.8,
            (Self::Permissive, Pii) => 0.9,
            (Self::Permissive, PromptInjection) => 0.7,
            (Self::Permissive, Topic) => 0.8,
            (Self::Permissive, Spam) => 0.7,
        };
        Some(t)
    }

    /// Overrides this preset applies
    pub fn overrides(&self) -> DetectorOverrides {
        DetectorKind::ALL
            .into_iter()
            .filter_map(|kind| {
                self.threshold(kind).map(|threshold| {
                    (
                        kind.name().to_string(),
                        DetectorOverride {
                            enabled: None,
                            threshold: Some(threshold),
                        },
                    )
                })
            })
            .collect()
    }
}

impl std::fmt::Display for Preset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::validate_overrides;

    #[test]
    fn test_presets_are_valid_overrides() {
        for preset in Preset::ALL {
            let overrides = preset.overrides();
            assert_eq!(overrides.len(), 5);
            assert!(!overrides.contains_key("fact_check"));
            validate_overrides(&overrides).unwrap();
        }
    }

    #[test]
    fn test_strict_is_stricter_than_permissive() {
        let strict = Preset::Strict.overrides();
        let permissive = Preset::Permissive.overrides();
        for (name, over) in &strict {
            assert!(over.threshold < permissive[name].threshold, "{name}");
        }
        assert_eq!(
            Preset::Balanced.overrides()["pii"].threshold,
            Some(DetectorKind::Pii.default_threshold())
        );
        assert_eq!(Preset::from_name("lenient"), None);
    }
}
