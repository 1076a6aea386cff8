//! Core types for Railguard

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A chat message passed to the generation backend as context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Role of the message sender (system, user, assistant)
    pub role: String,

    /// Content of the message
    pub content: String,
}

impl ChatMessage {
    /// Create a new chat message
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new("assistant", content)
    }

    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }
}

/// Author of a history message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// Which side of the generation call a verdict guards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Input,
    Output,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Output => "output",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tagged outcome of a single detector evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Pass,
    Warn,
    Block,
    Unavailable,
}

/// Result reported by one detector for one piece of text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorResult {
    /// Detector name
    pub detector: String,

    /// Tagged decision
    pub decision: Decision,

    /// Confidence score (0.0-1.0), absent for binary detectors
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,

    /// Threshold the decision was taken against
    pub threshold: f32,

    /// Detector-owned detail payload, opaque to the orchestrator
    #[serde(default)]
    pub details: serde_json::Value,

    /// Evaluation latency in microseconds
    #[serde(default)]
    pub latency_us: u64,
}

impl DetectorResult {
    /// Create a result with an explicit decision
    pub fn new(
        detector: impl Into<String>,
        decision: Decision,
        confidence: Option<f32>,
        threshold: f32,
    ) -> Self {
        Self {
            detector: detector.into(),
            decision,
            confidence,
            threshold,
            details: serde_json::Value::Null,
            latency_us: 0,
        }
    }

    /// Derive the decision from a score and its thresholds.
    ///
    /// `warn_above` is the advisory band below the blocking threshold.
    pub fn scored(
        detector: impl Into<String>,
        score: f32,
        threshold: f32,
        warn_above: Option<f32>,
    ) -> Self {
        let decision = if score >= threshold {
            Decision::Block
        } else if warn_above.is_some_and(|w| score > w) {
            Decision::Warn
        } else {
            Decision::Pass
        };
        Self::new(detector, decision, Some(score), threshold)
    }

    /// A detector that could not produce a usable result
    pub fn unavailable(detector: impl Into<String>, reason: impl Into<String>, threshold: f32) -> Self {
        Self::new(detector, Decision::Unavailable, None, threshold)
            .with_details(serde_json::json!({ "reason": reason.into() }))
    }

    /// Attach the detail payload
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }

    /// Record latency
    pub fn with_latency_us(mut self, latency_us: u64) -> Self {
        self.latency_us = latency_us;
        self
    }

    /// Whether this result blocks at its own threshold.
    ///
    /// Binary detectors (no confidence) block on the decision alone.
    pub fn is_blocking(&self) -> bool {
        self.decision == Decision::Block && self.confidence.map_or(true, |c| c >= self.threshold)
    }
}

/// Aggregated outcome of one orchestrator run for one phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub blocked: bool,
    pub phase: Phase,

    /// Blocking detector names, in evaluation-start order
    pub reasons: Vec<String>,

    /// Advisory notes, in evaluation-start order
    pub warnings: Vec<String>,

    /// Per-detector breakdown
    pub breakdown: BTreeMap<String, DetectorResult>,

    pub evaluated_at: DateTime<Utc>,
}

impl Verdict {
    /// A verdict for a run with no enabled detectors
    pub fn pass(phase: Phase) -> Self {
        Self {
            blocked: false,
            phase,
            reasons: Vec::new(),
            warnings: Vec::new(),
            breakdown: BTreeMap::new(),
            evaluated_at: Utc::now(),
        }
    }

    /// Whether the verdict carries warnings but no block
    pub fn is_warn(&self) -> bool {
        !self.blocked && !self.warnings.is_empty()
    }
}

/// Per-detector settings after merging defaults and overrides
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectorSettings {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub threshold: f32,

    /// A mandatory detector must produce a usable result or the run fails
    #[serde(default)]
    pub mandatory: bool,

    /// Per-detector timeout, clamped to the remaining deadline
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl DetectorSettings {
    pub fn new(threshold: f32) -> Self {
        Self {
            enabled: true,
            threshold,
            mandatory: false,
            timeout_ms: None,
        }
    }

    /// Apply a session/message override on top of these settings
    pub fn merged(mut self, over: &DetectorOverride) -> Self {
        if let Some(enabled) = over.enabled {
            self.enabled = enabled;
        }
        if let Some(threshold) = over.threshold {
            self.threshold = threshold;
        }
        self
    }
}

fn default_enabled() -> bool {
    true
}

/// Partial settings supplied by a client for one detector
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectorOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Also accepted as `sensitivity`
    #[serde(default, alias = "sensitivity", skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f32>,
}

/// Detector name → override
pub type DetectorOverrides = BTreeMap<String, DetectorOverride>;

/// Merge `top` over `base`, field by field
pub fn merge_overrides(base: &DetectorOverrides, top: &DetectorOverrides) -> DetectorOverrides {
    let mut merged = base.clone();
    for (name, over) in top {
        let entry = merged.entry(name.clone()).or_default();
        if over.enabled.is_some() {
            entry.enabled = over.enabled;
        }
        if over.threshold.is_some() {
            entry.threshold = over.threshold;
        }
    }
    merged
}

/// States of the per-message rail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RailState {
    Received,
    InputChecking,
    Generating,
    OutputChecking,
    Blocked,
    Delivered,
    Failed,
}

impl RailState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Blocked | Self::Delivered | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::InputChecking => "input_checking",
            Self::Generating => "generating",
            Self::OutputChecking => "output_checking",
            Self::Blocked => "blocked",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
        }
    }
}

/// Why a message failed to complete
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Generation backend errored or exceeded its budget
    Generation,
    /// Overall message deadline expired
    Timeout,
    /// A mandatory detector could not produce a result
    Detector,
}

impl FailureKind {
    /// Wire-level error code reported for this failure
    pub fn code(&self) -> &'static str {
        match self {
            Self::Generation => "generation_failure",
            Self::Timeout => "pipeline_timeout",
            Self::Detector => "detector_unavailable",
        }
    }
}

/// Terminal status of a submitted message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MessageStatus {
    Delivered,
    Blocked { phase: Phase },
    Failed { kind: FailureKind },
}

impl MessageStatus {
    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::Blocked { .. } => "blocked",
            Self::Failed { .. } => "failed",
        }
    }
}

/// A history entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Caller-supplied or generated identifier
    pub id: String,
    pub role: Role,
    pub content: String,

    /// Monotonic per session, assigned at arrival
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub status: MessageStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_verdict: Option<Verdict>,

    /// Assistant messages only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_verdict: Option<Verdict>,

    /// Generated text as returned by the backend. Never serialized and
    /// always `None` once the output phase has blocked.
    #[serde(skip)]
    pub raw_generated: Option<String>,
}

impl Message {
    /// Build a user message
    pub fn user(id: impl Into<String>, content: impl Into<String>, sequence: u64) -> Self {
        Self {
            id: id.into(),
            role: Role::User,
            content: content.into(),
            sequence,
            timestamp: Utc::now(),
            status: MessageStatus::Delivered,
            input_verdict: None,
            output_verdict: None,
            raw_generated: None,
        }
    }

    /// Build an assistant message
    pub fn assistant(id: impl Into<String>, content: impl Into<String>, sequence: u64) -> Self {
        Self {
            role: Role::Assistant,
            ..Self::user(id, content, sequence)
        }
    }

    /// Convert to backend context
    pub fn to_chat(&self) -> ChatMessage {
        ChatMessage::new(self.role.as_str(), self.content.clone())
    }
}

/// Client-facing result of one submitted message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnOutcome {
    pub session_id: String,
    pub message_id: String,

    /// Sequence number of the user message
    pub sequence: u64,
    pub status: MessageStatus,

    /// Assistant reply or the refusal/error notice shown in its place
    pub response: String,

    pub blocked: bool,
    pub blocking_reasons: Vec<String>,
    pub warnings: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply: Option<Message>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_verdict: Option<Verdict>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_verdict: Option<Verdict>,

    pub timestamp: DateTime<Utc>,
}
