//! Prompt injection detector
//!
//! Detects attempts to manipulate assistant behavior through the user
//! message. Patterns cover:
//! - Direct instruction override ("ignore previous instructions")
//! - Role-playing/persona switching ("pretend you are")
//! - Behavior alteration ("override your programming")
//!
//! Every match adds 0.3 to the score, capped at 1.0.

use crate::detector::Detector;
use railguard_core::{DetectorResult, DetectorSettings, Error, Result};
use regex::{Regex, RegexBuilder};
use std::time::Instant;

const PATTERNS: &[&str] = &[
    r"ignore\s+previous\s+instructions",
    r"ignore\s+the\s+above",
    r"disregard\s+the\s+above",
    r"forget\s+everything\s+above",
    r"you\s+are\s+now\s+playing\s+the\s+role\s+of",
    r"pretend\s+you\s+are",
    r"act\s+as\s+if\s+you\s+are",
    r"simulate\s+being",
    r"roleplay\s+as",
    r"behave\s+like",
    r"respond\s+as\s+if\s+you\s+were",
    r"from\s+now\s+on",
    r"new\s+instruction",
    r"override\s+your\s+programming",
    r"change\s+your\s+behavior",
    r"alter\s+your\s+responses",
];

const WARN_ABOVE: f32 = 0.3;

/// Regex-based prompt injection detector
pub struct PromptInjectionDetector {
    patterns: Vec<Regex>,
}

impl PromptInjectionDetector {
    pub fn new() -> Result<Self> {
        let patterns = PATTERNS
            .iter()
            .map(|p| {
                RegexBuilder::new(p)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| Error::unavailable(format!("prompt_injection: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { patterns })
    }

    fn matches(&self, text: &str) -> Vec<(usize, usize)> {
        self.patterns
            .iter()
            .enumerate()
            .filter_map(|(i, re)| {
                let count = re.find_iter(text).count();
                (count > 0).then_some((i, count))
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl Detector for PromptInjectionDetector {
    async fn evaluate(&self, text: &str, settings: &DetectorSettings) -> DetectorResult {
        let start = Instant::now();

        let matched = self.matches(text);
        let total: usize = matched.iter().map(|(_, c)| c).sum();
        let score = (total as f32 * 0.3).min(1.0);

        let matched_patterns: Vec<_> = matched
            .iter()
            .map(|(i, count)| serde_json::json!({ "pattern": PATTERNS[*i], "count": count }))
            .collect();

        DetectorResult::scored(self.name(), score, settings.threshold, Some(WARN_ABOVE))
            .with_details(serde_json::json!({ "matched_patterns": matched_patterns }))
            .with_latency_us(start.elapsed().as_micros() as u64)
    }

    fn name(&self) -> &str {
        "prompt_injection"
    }
}
