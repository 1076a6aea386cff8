//! PII detector

use crate::detector::Detector;
use railguard_core::{DetectorResult, DetectorSettings, Error, Result};
use regex::Regex;
use std::time::Instant;

/// PII detector using regex patterns.
///
/// Binary in practice: any match scores 1.0.
pub struct PiiDetector {
    patterns: Vec<(&'static str, Regex)>,
}

impl PiiDetector {
    pub fn new() -> Result<Self> {
        let table = [
            ("email", r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b"),
            ("phone", r"(\+?1[-.\s]?)?\(?\b\d{3}\)?[-.\s]?\d{3}[-.\s]?\d{4}\b"),
            ("ssn", r"\b\d{3}-\d{2}-\d{4}\b"),
            ("credit_card", r"\b(?:\d{4}[-.\s]?){3}\d{4}\b"),
            ("ip_address", r"\b(?:\d{1,3}\.){3}\d{1,3}\b"),
        ];

        let patterns = table
            .into_iter()
            .map(|(kind, pattern)| {
                Regex::new(pattern)
                    .map(|re| (kind, re))
                    .map_err(|e| Error::unavailable(format!("pii: bad {kind} pattern: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { patterns })
    }
}

#[async_trait::async_trait]
impl Detector for PiiDetector {
    async fn evaluate(&self, text: &str, settings: &DetectorSettings) -> DetectorResult {
        let start = Instant::now();

        let mut kinds = Vec::new();
        let mut spans = Vec::new();
        for (kind, re) in &self.patterns {
            if let Some(m) = re.find(text) {
                kinds.push(*kind);
                spans.push((m.start(), m.end()));
            }
        }

        let score = if kinds.is_empty() { 0.0 } else { 1.0 };

        DetectorResult::scored(self.name(), score, settings.threshold, None)
            .with_details(serde_json::json!({
                "pii_types": kinds,
                "spans": spans,
            }))
            .with_latency_us(start.elapsed().as_micros() as u64)
    }

    fn name(&self) -> &str {
        "pii"
    }
}
