//! Fact-check detector
//!
//! Flags text that makes factual-sounding claims. Advisory only: it can
//! warn but never blocks.

use crate::detector::Detector;
use railguard_core::{Decision, DetectorResult, DetectorSettings, Error, Result};
use regex::Regex;
use std::time::Instant;

const FACTUAL_INDICATORS: &[&str] = &[
    "according to",
    "studies show",
    "research indicates",
    "statistics reveal",
    "data shows",
    "evidence suggests",
    "proven fact",
    "scientific evidence",
    "documented case",
];

/// Claims must clear this as well as the threshold to warn
const WARN_FLOOR: f32 = 0.7;

pub struct FactCheckDetector {
    numbers: Regex,
}

impl FactCheckDetector {
    pub fn new() -> Result<Self> {
        Ok(Self {
            numbers: Regex::new(r"\d+").map_err(|e| Error::unavailable(format!("fact_check: {e}")))?,
        })
    }
}

#[async_trait::async_trait]
impl Detector for FactCheckDetector {
    async fn evaluate(&self, text: &str, settings: &DetectorSettings) -> DetectorResult {
        let start = Instant::now();

        let lower = text.to_lowercase();
        let claims: Vec<&str> = FACTUAL_INDICATORS
            .iter()
            .copied()
            .filter(|i| lower.contains(i))
            .collect();
        let has_numbers = self.numbers.is_match(text);

        let score = match (has_numbers, !claims.is_empty()) {
            (true, true) => 0.8,
            (true, false) | (false, true) => 0.4,
            (false, false) => 0.0,
        };

        let decision = if score > settings.threshold && score > WARN_FLOOR {
            Decision::Warn
        } else {
            Decision::Pass
        };

        DetectorResult::new(self.name(), decision, Some(score), settings.threshold)
            .with_details(serde_json::json!({
                "needs_fact_check": decision == Decision::Warn,
                "factual_claims": claims,
                "has_numbers": has_numbers,
            }))
            .with_latency_us(start.elapsed().as_micros() as u64)
    }

    fn name(&self) -> &str {
        "fact_check"
    }
}
