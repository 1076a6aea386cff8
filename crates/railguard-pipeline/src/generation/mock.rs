use super::GenerationPort;
use async_trait::async_trait;
use rand::prelude::*;
use railguard_core::{ChatMessage, Result};
use std::time::Duration;

/// Offline backend that answers from canned templates.
///
/// Used when no model server is configured and in tests.
pub struct MockBackend {
    templates: ResponseTemplates,
    latency: Duration,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            templates: ResponseTemplates::new(),
            latency: Duration::ZERO,
        }
    }

    /// Simulate backend latency on every call
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GenerationPort for MockBackend {
    async fn generate(&self, prompt: &str, _history: &[ChatMessage]) -> Result<String> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        Ok(self.templates.generate_response(prompt))
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Response templates for different conversation types
pub struct ResponseTemplates {
    general_responses: Vec<&'static str>,
    coding_responses: Vec<&'static str>,
    creative_responses: Vec<&'static str>,
}

impl ResponseTemplates {
    pub fn new() -> Self {
        Self {
            general_responses: vec![
                "I'd be happy to help you with that. Let me explain the key concepts involved.",
                "That's an interesting question. Here's what I think about it.",
                "Based on my understanding, I can provide some insights on this topic.",
                "Let me break this down for you step by step.",
            ],
            coding_responses: vec![
                "For this programming task, I recommend a modular approach. Define your data structures first, then implement the core logic.",
                "The implementation has a few steps: parse the input, validate it, then transform it into the output you need.",
            ],
            creative_responses: vec![
                "Let me craft something for you. The story begins in a small town where unexpected events unfold.",
                "Here's an imaginative take on your request. Picture a world where anything is possible.",
            ],
        }
    }

    fn pool(&self, prompt: &str) -> &[&'static str] {
        let prompt = prompt.to_lowercase();
        let mentions = |words: &[&str]| words.iter().any(|w| prompt.contains(w));

        if mentions(&["code", "function", "program", "implement"]) {
            &self.coding_responses
        } else if mentions(&["write", "story", "creative", "imagine"]) {
            &self.creative_responses
        } else {
            &self.general_responses
        }
    }

    /// Pick a reply for the prompt's apparent conversation type
    pub fn generate_response(&self, prompt: &str) -> String {
        let mut rng = rand::thread_rng();
        let base = self
            .pool(prompt)
            .choose(&mut rng)
            .copied()
            .unwrap_or("Let me think about that.");
        let extension = if rng.gen::<f32>() > 0.5 {
            " Feel free to ask if you need more clarification."
        } else {
            " I hope this helps! Let me know if you have any follow-up questions."
        };

        format!("{base}{extension}")
    }
}

impl Default for ResponseTemplates {
    fn default() -> Self {
        Self::new()
    }
}
