//! Stand-in for a detector whose construction failed

use crate::detector::Detector;
use railguard_core::{DetectorResult, DetectorSettings};

/// Always reports `unavailable` with the load error as the reason
pub struct UnavailableDetector {
    name: String,
    reason: String,
}

impl UnavailableDetector {
    pub fn new(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

#[async_trait::async_trait]
impl Detector for UnavailableDetector {
    async fn evaluate(&self, _text: &str, settings: &DetectorSettings) -> DetectorResult {
        DetectorResult::unavailable(&self.name, &self.reason, settings.threshold)
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn is_loaded(&self) -> bool {
        false
    }
}
