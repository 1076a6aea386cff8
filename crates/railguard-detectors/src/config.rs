//! Configuration for detectors

use crate::detector::DetectorKind;
use railguard_core::{DetectorOverrides, DetectorSettings, Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Default settings for every detector, keyed by name.
///
/// Names missing from the map fall back to the built-in defaults, so a
/// config file only needs to list what it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DetectorConfig {
    pub detectors: BTreeMap<String, DetectorSettings>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            detectors: DetectorKind::ALL
                .into_iter()
                .map(|k| (k.name().to_string(), k.default_settings()))
                .collect(),
        }
    }
}

impl DetectorConfig {
    /// Load from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let partial: BTreeMap<String, DetectorSettings> = serde_yaml::from_str(yaml)
            .map_err(|e| Error::config(format!("Failed to parse detector config: {e}")))?;
        Self::from_partial(partial)
    }

    /// Layer a partial map over the built-in defaults and validate
    pub fn from_partial(partial: BTreeMap<String, DetectorSettings>) -> Result<Self> {
        let mut config = Self::default();
        config.detectors.extend(partial);
        config.validate()?;
        Ok(config)
    }

    /// Load from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::config(format!(
                "Failed to read detector config {}: {e}",
                path.as_ref().display()
            ))
        })?;
        Self::from_yaml(&content)
    }

    /// Configured settings for `name`, or built-in defaults
    pub fn settings(&self, name: &str) -> DetectorSettings {
        self.detectors.get(name).copied().unwrap_or_else(|| {
            DetectorKind::from_name(name)
                .map(|k| k.default_settings())
                .unwrap_or_else(|| DetectorSettings::new(0.5))
        })
    }

    /// Settings after applying client overrides
    pub fn effective(&self, name: &str, overrides: &DetectorOverrides) -> DetectorSettings {
        let base = self.settings(name);
        match overrides.get(name) {
            Some(over) => base.merged(over),
            None => base,
        }
    }

    /// Reject unknown names and out-of-range values
    pub fn validate(&self) -> Result<()> {
        for (name, settings) in &self.detectors {
            validate_name(name)?;
            validate_threshold(name, settings.threshold)?;
            if settings.timeout_ms == Some(0) {
                return Err(Error::config(format!("{name}: timeout_ms must be positive")));
            }
        }
        Ok(())
    }
}

/// Validate client-supplied overrides before they are stored
pub fn validate_overrides(overrides: &DetectorOverrides) -> Result<()> {
    for (name, over) in overrides {
        validate_name(name)?;
        if let Some(threshold) = over.threshold {
            validate_threshold(name, threshold)?;
        }
    }
    Ok(())
}

fn validate_name(name: &str) -> Result<()> {
    if DetectorKind::from_name(name).is_none() {
        return Err(Error::config(format!("unknown detector '{name}'")));
    }
    Ok(())
}

fn validate_threshold(name: &str, threshold: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&threshold) {
        return Err(Error::config(format!(
            "{name}: threshold {threshold} outside [0, 1]"
        )));
    }
    Ok(())
}
