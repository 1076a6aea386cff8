//! Toxicity detector

use crate::detector::Detector;
use railguard_core::{DetectorResult, DetectorSettings};
use std::collections::HashSet;
use std::time::Instant;

const LEXICON: &[&str] = &[
    "hate", "stupid", "idiot", "dumb", "kill", "die", "worst", "terrible", "awful", "sucks",
    "garbage", "trash", "shit", "fuck", "damn", "asshole", "bastard", "bitch", "moron",
];

/// Scores above this are reported as a warning when they do not block
const WARN_ABOVE: f32 = 0.5;

/// Lexicon-based toxicity detector.
///
/// Deterministic and dependency-light: each distinct lexicon word adds
/// 0.35 to the score, capped at 0.95.
pub struct ToxicityDetector {
    lexicon: HashSet<&'static str>,
}

impl ToxicityDetector {
    pub fn new() -> Self {
        Self {
            lexicon: LEXICON.iter().copied().collect(),
        }
    }

    fn score(&self, text: &str) -> (f32, Vec<String>) {
        let lower = text.to_lowercase();
        let mut hits: Vec<String> = Vec::new();
        for word in lower.split(|c: char| !c.is_alphanumeric()) {
            if self.lexicon.contains(word) && !hits.iter().any(|h| h == word) {
                hits.push(word.to_string());
            }
        }
        let score = (hits.len() as f32 * 0.35).clamp(0.0, 0.95);
        (score, hits)
    }
}

impl Default for ToxicityDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Detector for ToxicityDetector {
    async fn evaluate(&self, text: &str, settings: &DetectorSettings) -> DetectorResult {
        let start = Instant::now();
        let (score, hits) = self.score(text);

        DetectorResult::scored(self.name(), score, settings.threshold, Some(WARN_ABOVE))
            .with_details(serde_json::json!({
                "model": "toxicity-lexicon",
                "matched_terms": hits,
            }))
            .with_latency_us(start.elapsed().as_micros() as u64)
    }

    fn name(&self) -> &str {
        "toxicity"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use railguard_core::Decision;

    fn settings() -> DetectorSettings {
        DetectorSettings::new(0.7)
    }

    #[tokio::test]
    async fn test_toxicity_safe() {
        let detector = ToxicityDetector::new();

        let result = detector.evaluate("Hello, how are you?", &settings()).await;
        assert_eq!(result.decision, Decision::Pass);
        assert_eq!(result.confidence, Some(0.0));
    }

    #[tokio::test]
    async fn test_toxicity_toxic() {
        let detector = ToxicityDetector::new();

        let result = detector
            .evaluate("I hate you, you stupid idiot!", &settings())
            .await;
        assert_eq!(result.decision, Decision::Block);
        assert_eq!(result.confidence, Some(0.95));
    }

    #[tokio::test]
    async fn test_toxicity_warn_band() {
        let detector = ToxicityDetector::new();

        // two hits = 0.7, so raise the threshold to land in the warn band
        let result = detector
            .evaluate("that was a dumb and terrible idea", &DetectorSettings::new(0.9))
            .await;
        assert_eq!(result.decision, Decision::Warn);
    }

    #[tokio::test]
    async fn test_whole_words_only() {
        let detector = ToxicityDetector::new();

        let result = detector.evaluate("skill and diet", &settings()).await;
        assert_eq!(result.confidence, Some(0.0));
    }
}
