//! Restricted-topic detector

use crate::detector::Detector;
use aho_corasick::AhoCorasick;
use railguard_core::{DetectorResult, DetectorSettings, Error, Result};
use std::collections::{BTreeMap, HashSet};
use std::time::Instant;

const RESTRICTED_TOPICS: &[(&str, &[&str])] = &[
    (
        "violence",
        &[
            "physical harm", "weapons", "assault", "fighting", "violence", "murder", "killing",
            "attack", "terrorism", "war",
        ],
    ),
    (
        "hate_speech",
        &[
            "racial slurs", "discrimination", "prejudice", "hatred", "racist", "sexist",
            "homophobic", "bigotry",
        ],
    ),
    (
        "illegal_activities",
        &[
            "drug dealing", "fraud", "hacking", "theft", "money laundering",
            "illegal substances", "criminal activities", "law breaking",
        ],
    ),
    (
        "adult_content",
        &[
            "explicit sexual content", "pornography", "adult material", "sexual acts",
            "inappropriate content",
        ],
    ),
];

const WARN_ABOVE: f32 = 0.3;

struct TopicMatcher {
    topic: &'static str,
    keywords: &'static [&'static str],
    matcher: AhoCorasick,
}

/// Keyword detector for restricted topics.
///
/// Each topic scores 0.35 per distinct keyword hit; the detector reports
/// the highest-scoring topic.
pub struct TopicDetector {
    topics: Vec<TopicMatcher>,
}

impl TopicDetector {
    pub fn new() -> Result<Self> {
        let topics = RESTRICTED_TOPICS
            .iter()
            .map(|(topic, keywords)| {
                AhoCorasick::builder()
                    .ascii_case_insensitive(true)
                    .build(keywords.iter())
                    .map(|matcher| TopicMatcher {
                        topic: *topic,
                        keywords: *keywords,
                        matcher,
                    })
                    .map_err(|e| Error::unavailable(format!("topic: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { topics })
    }

    fn topic_scores(&self, text: &str) -> BTreeMap<&'static str, (f32, Vec<&'static str>)> {
        self.topics
            .iter()
            .map(|t| {
                let hits: HashSet<usize> = t
                    .matcher
                    .find_iter(text)
                    .filter(|m| on_word_boundary(text, m.start(), m.end()))
                    .map(|m| m.pattern().as_usize())
                    .collect();
                let mut words: Vec<&'static str> = hits.iter().map(|i| t.keywords[*i]).collect();
                words.sort_unstable();
                let score = (hits.len() as f32 * 0.35).min(1.0);
                (t.topic, (score, words))
            })
            .collect()
    }
}

fn on_word_boundary(text: &str, start: usize, end: usize) -> bool {
    let bytes = text.as_bytes();
    let before = start == 0 || !bytes[start - 1].is_ascii_alphanumeric();
    let after = end == bytes.len() || !bytes[end].is_ascii_alphanumeric();
    before && after
}

#[async_trait::async_trait]
impl Detector for TopicDetector {
    async fn evaluate(&self, text: &str, settings: &DetectorSettings) -> DetectorResult {
        let start = Instant::now();

        let scores = self.topic_scores(text);
        let (top_topic, top_score) = scores
            .iter()
            .map(|(topic, (score, _))| (*topic, *score))
            .fold(("none", 0.0_f32), |best, cur| if cur.1 > best.1 { cur } else { best });

        let similarities: BTreeMap<_, _> = scores.iter().map(|(t, (s, _))| (*t, *s)).collect();
        let matched: BTreeMap<_, _> = scores
            .iter()
            .filter(|(_, (_, words))| !words.is_empty())
            .map(|(t, (_, words))| (*t, words.clone()))
            .collect();

        DetectorResult::scored(self.name(), top_score, settings.threshold, Some(WARN_ABOVE))
            .with_details(serde_json::json!({
                "top_topic": top_topic,
                "similarities": similarities,
                "matched_keywords": matched,
            }))
            .with_latency_us(start.elapsed().as_micros() as u64)
    }

    fn name(&self) -> &str {
        "topic"
    }
}
