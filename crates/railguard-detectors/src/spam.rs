//! Spam detector

use crate::detector::Detector;
use aho_corasick::AhoCorasick;
use railguard_core::{DetectorResult, DetectorSettings, Error, Result};
use regex::Regex;
use std::collections::BTreeSet;
use std::time::Instant;

const INDICATORS: &[&str] = &[
    "click here",
    "buy now",
    "limited time",
    "act now",
    "urgent",
    "congratulations",
    "winner",
    "free money",
    "make money fast",
    "work from home",
    "get rich quick",
];

const WARN_ABOVE: f32 = 0.4;
const CAPS_RATIO: f32 = 0.3;

/// Heuristic spam detector.
///
/// 0.2 per indicator phrase, +0.3 for shouting, +0.2 for runs of `!`/`?`.
pub struct SpamDetector {
    indicators: AhoCorasick,
    punctuation: Regex,
}

impl SpamDetector {
    pub fn new() -> Result<Self> {
        Ok(Self {
            indicators: AhoCorasick::builder()
                .ascii_case_insensitive(true)
                .build(INDICATORS)
                .map_err(|e| Error::unavailable(format!("spam: {e}")))?,
            punctuation: Regex::new(r"[!?]{2,}")
                .map_err(|e| Error::unavailable(format!("spam: {e}")))?,
        })
    }
}

fn caps_ratio(text: &str) -> f32 {
    let total = text.chars().count();
    if total == 0 {
        return 0.0;
    }
    let upper = text.chars().filter(|c| c.is_ascii_uppercase()).count();
    upper as f32 / total as f32
}

#[async_trait::async_trait]
impl Detector for SpamDetector {
    async fn evaluate(&self, text: &str, settings: &DetectorSettings) -> DetectorResult {
        let start = Instant::now();

        let found: BTreeSet<&str> = self
            .indicators
            .find_iter(text)
            .map(|m| INDICATORS[m.pattern().as_usize()])
            .collect();
        let excessive_caps = caps_ratio(text) > CAPS_RATIO;
        let excessive_punctuation = self.punctuation.is_match(text);

        let mut score = found.len() as f32 * 0.2;
        if excessive_caps {
            score += 0.3;
        }
        if excessive_punctuation {
            score += 0.2;
        }
        let score = score.min(1.0);

        DetectorResult::scored(self.name(), score, settings.threshold, Some(WARN_ABOVE))
            .with_details(serde_json::json!({
                "spam_indicators": found,
                "excessive_caps": excessive_caps,
                "excessive_punctuation": excessive_punctuation,
            }))
            .with_latency_us(start.elapsed().as_micros() as u64)
    }

    fn name(&self) -> &str {
        "spam"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use railguard_core::Decision;

    #[tokio::test]
    async fn test_spam_blocks() {
        let detector = SpamDetector::new().unwrap();

        let result = detector
            .evaluate(
                "CONGRATULATIONS WINNER!!! CLICK HERE to claim free money",
                &DetectorSettings::new(0.6),
            )
            .await;
        assert_eq!(result.decision, Decision::Block);
        assert_eq!(result.confidence, Some(1.0));
    }

    #[tokio::test]
    async fn test_normal_text_passes() {
        let detector = SpamDetector::new().unwrap();

        let result = detector
            .evaluate("Can you help me write a cover letter?", &DetectorSettings::new(0.6))
            .await;
        assert_eq!(result.decision, Decision::Pass);
    }

    #[test]
    fn test_caps_ratio() {
        assert_eq!(caps_ratio(""), 0.0);
        assert!(caps_ratio("HELLO there") > 0.3);
        assert!(caps_ratio("Hello there") < 0.3);
    }
}
