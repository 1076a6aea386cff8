//! Two-phase safety rail
//!
//! Each message runs input checks, one generation call and output checks
//! under a single deadline:
//!
//! ```text
//! RECEIVED → INPUT_CHECKING → GENERATING → OUTPUT_CHECKING → DELIVERED
//!                  ↓               ↓               ↓
//!               BLOCKED          FAILED         BLOCKED
//! ```
//!
//! Deadline expiry at any point cancels whatever is in flight for that
//! message and records it as failed. The session stays usable.

use crate::generation::GenerationPort;
use crate::hub::EventHub;
use crate::session::{SessionHandle, SessionManager, TurnRecord, TurnStart, TurnTicket};
use chrono::Utc;
use railguard_core::{
    merge_overrides, DetectorOverrides, DetectorResult, Error, FailureKind, Message,
    MessageStatus, Phase, RailState, Result, ServerEvent, TurnOutcome, Verdict,
};
use railguard_detectors::{validate_overrides, DetectorKind, Orchestrator};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{error::Elapsed, timeout_at, Instant};
use tracing::{debug, info, warn};

/// Shown in place of the reply when the input phase blocks
pub const INPUT_BLOCKED_NOTICE: &str = "I cannot process this message due to safety concerns.";

/// Shown in place of the reply when the output phase blocks
pub const OUTPUT_BLOCKED_NOTICE: &str = "I cannot provide that response due to safety concerns.";

/// Shown when a message fails
pub const FAILURE_NOTICE: &str = "processing error";

/// Most messages in one chat batch
pub const MAX_CHAT_BATCH: usize = 10;

/// Rail settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RailSettings {
    /// Overall budget from arrival to a terminal state
    #[serde(with = "millis", rename = "message_timeout_ms")]
    pub message_timeout: Duration,

    /// Longest one detector phase may take. A detector still running at
    /// this point is reported unavailable and the message carries on.
    #[serde(with = "millis", rename = "detector_timeout_ms")]
    pub detector_timeout: Duration,

    /// Detectors run on user text
    pub input_detectors: Vec<String>,

    /// Detectors run on generated text
    pub output_detectors: Vec<String>,

    /// Delivered messages passed to the backend as context
    pub history_window: usize,

    /// Longest accepted message, in characters
    pub max_message_length: usize,
}

impl Default for RailSettings {
    fn default() -> Self {
        Self {
            message_timeout: Duration::from_secs(30),
            detector_timeout: Duration::from_secs(2),
            input_detectors: DetectorKind::ALL
                .iter()
                .map(|k| k.name().to_string())
                .collect(),
            output_detectors: vec![
                DetectorKind::Toxicity.name().to_string(),
                DetectorKind::FactCheck.name().to_string(),
            ],
            history_window: 10,
            max_message_length: 10_000,
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// A message submitted to the rail
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatRequest {
    /// Unknown ids create the session; `None` starts a fresh one
    pub session_id: Option<String>,

    /// Idempotence key, generated when absent
    pub message_id: Option<String>,

    pub text: String,

    /// Overrides for this message only, merged over the session's
    pub overrides: DetectorOverrides,
}

impl ChatRequest {
    pub fn new(session_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    pub fn with_overrides(mut self, overrides: DetectorOverrides) -> Self {
        self.overrides = overrides;
        self
    }
}

/// One message of a chat batch: its outcome, or why it never started
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum BatchEntry {
    Outcome(TurnOutcome),
    Rejected {
        message_index: usize,
        error: String,
        message: String,
    },
}

/// Messages run in order through one fresh session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatBatch {
    pub session_id: String,
    pub results: Vec<BatchEntry>,
}

/// What the run observed before it stopped, kept even when the deadline
/// cuts it short
#[derive(Default)]
struct Trace {
    reached: Option<RailState>,
    input: Option<Verdict>,
    generated: Option<String>,
    output: Option<Verdict>,
}

/// The per-message state machine and its collaborators
pub struct Rail {
    orchestrator: Arc<Orchestrator>,
    generator: Arc<dyn GenerationPort>,
    sessions: Arc<SessionManager>,
    hub: Arc<EventHub>,
    settings: RailSettings,
}

impl Rail {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        generator: Arc<dyn GenerationPort>,
        sessions: Arc<SessionManager>,
        hub: Arc<EventHub>,
        settings: RailSettings,
    ) -> Self {
        Self {
            orchestrator,
            generator,
            sessions,
            hub,
            settings,
        }
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub fn generator(&self) -> &Arc<dyn GenerationPort> {
        &self.generator
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn hub(&self) -> &Arc<EventHub> {
        &self.hub
    }

    pub fn settings(&self) -> &RailSettings {
        &self.settings
    }

    /// Deadline for one detector phase, never past the message deadline
    fn phase_deadline(&self, deadline: Instant) -> Instant {
        (Instant::now() + self.settings.detector_timeout).min(deadline)
    }

    fn validate_text(&self, text: &str) -> Result<()> {
        if text.trim().is_empty() {
            return Err(Error::invalid_request("message must not be empty"));
        }
        let len = text.chars().count();
        if len > self.settings.max_message_length {
            return Err(Error::invalid_request(format!(
                "message is {len} characters, the limit is {}",
                self.settings.max_message_length
            )));
        }
        Ok(())
    }

    /// Run one message through the rail.
    ///
    /// Blocked and failed messages are still `Ok`: their outcome says what
    /// happened. Errors are reserved for requests rejected before a turn
    /// starts.
    pub async fn submit(&self, request: ChatRequest) -> Result<TurnOutcome> {
        self.validate_text(&request.text)?;
        validate_overrides(&request.overrides)?;

        let handle = match request.session_id.as_deref() {
            Some(id) if !id.trim().is_empty() => self.sessions.resolve(id),
            _ => self.sessions.create(),
        };
        let message_id = request
            .message_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let mut turn = match self.sessions.begin_turn(&handle, &message_id)? {
            TurnStart::Completed(outcome) => {
                debug!(session_id = %handle.id(), message_id = %message_id, "Returning recorded outcome");
                // Redelivered so a reconnecting client still gets it; clients dedupe
                publish_outcome(&self.hub, outcome.clone());
                return Ok(outcome);
            }
            TurnStart::Started(ticket) => InFlight {
                sequence: ticket.sequence(),
                ticket: Some(ticket),
                hub: &self.hub,
            },
        };

        let started = Instant::now();
        let deadline = started + self.settings.message_timeout;
        let overrides = merge_overrides(&handle.overrides(), &request.overrides);
        self.status(&handle, &message_id, RailState::Received);

        let mut trace = Trace::default();
        let run = timeout_at(
            deadline,
            self.run(&handle, &message_id, &request.text, &overrides, deadline, &mut trace),
        )
        .await;

        let record = self.conclude(&handle, &message_id, request.text, turn.sequence, run, trace);
        let outcome = record.outcome.clone();

        metrics::counter!("railguard_messages_total", "outcome" => outcome.status.label())
            .increment(1);
        info!(
            session_id = %handle.id(),
            message_id = %message_id,
            sequence = outcome.sequence,
            status = outcome.status.label(),
            latency_ms = started.elapsed().as_millis() as u64,
            "Message processed"
        );

        if let Some(ticket) = turn.ticket.take() {
            for released in self.sessions.append(ticket, record) {
                publish_outcome(&self.hub, released.outcome);
            }
        }

        Ok(outcome)
    }

    async fn run(
        &self,
        handle: &SessionHandle,
        message_id: &str,
        text: &str,
        overrides: &DetectorOverrides,
        deadline: Instant,
        trace: &mut Trace,
    ) -> Result<RailState> {
        trace.reached = Some(RailState::InputChecking);
        self.status(handle, message_id, RailState::InputChecking);
        let phase_started = Instant::now();
        let input = self
            .orchestrator
            .evaluate(
                text,
                Phase::Input,
                &self.settings.input_detectors,
                overrides,
                self.phase_deadline(deadline),
            )
            .await?;
        record_phase_latency(Phase::Input, phase_started);

        let blocked = input.blocked;
        if blocked {
            info!(
                session_id = %handle.id(),
                message_id,
                reasons = ?input.reasons,
                "Input blocked"
            );
        }
        trace.input = Some(input);
        if blocked {
            return Ok(RailState::Blocked);
        }

        trace.reached = Some(RailState::Generating);
        self.status(handle, message_id, RailState::Generating);
        let history = handle.context(self.settings.history_window);
        let generated = self.generator.generate(text, &history).await?;
        let generated = generated.trim();
        if generated.is_empty() {
            return Err(Error::generation("backend returned an empty reply"));
        }
        trace.generated = Some(generated.to_string());

        trace.reached = Some(RailState::OutputChecking);
        self.status(handle, message_id, RailState::OutputChecking);
        let phase_started = Instant::now();
        let output = self
            .orchestrator
            .evaluate(
                generated,
                Phase::Output,
                &self.settings.output_detectors,
                overrides,
                self.phase_deadline(deadline),
            )
            .await?;
        record_phase_latency(Phase::Output, phase_started);

        let blocked = output.blocked;
        if blocked {
            info!(
                session_id = %handle.id(),
                message_id,
                reasons = ?output.reasons,
                "Output blocked"
            );
            trace.generated = None;
        }
        trace.output = Some(output);
        Ok(if blocked {
            RailState::Blocked
        } else {
            RailState::Delivered
        })
    }

    /// Turn the run's result into the record kept in history
    fn conclude(
        &self,
        handle: &SessionHandle,
        message_id: &str,
        text: String,
        sequence: u64,
        run: std::result::Result<Result<RailState>, Elapsed>,
        mut trace: Trace,
    ) -> TurnRecord {
        let status = match run {
            Ok(Ok(RailState::Delivered)) => MessageStatus::Delivered,
            Ok(Ok(_)) => {
                let phase = if trace.output.as_ref().is_some_and(|v| v.blocked) {
                    Phase::Output
                } else {
                    Phase::Input
                };
                MessageStatus::Blocked { phase }
            }
            Ok(Err(e)) => {
                let kind = failure_kind(&e);
                warn!(
                    session_id = %handle.id(),
                    message_id,
                    state = trace.reached.map(|s| s.as_str()),
                    error = %e,
                    "Message failed"
                );
                MessageStatus::Failed { kind }
            }
            Err(_) => {
                warn!(
                    session_id = %handle.id(),
                    message_id,
                    state = trace.reached.map(|s| s.as_str()),
                    "Message deadline exceeded"
                );
                MessageStatus::Failed {
                    kind: FailureKind::Timeout,
                }
            }
        };

        if let MessageStatus::Failed { kind } = status {
            if kind == FailureKind::Generation {
                metrics::counter!("railguard_generation_failures_total").increment(1);
            }
            // Partial results of a failed run never reach the client
            trace.generated = None;
        }

        let mut user = Message::user(message_id, text, sequence);
        user.status = status;
        user.input_verdict = trace.input.clone();

        let reply = match status {
            MessageStatus::Delivered => trace.generated.as_ref().map(|generated| {
                let mut reply = assistant(generated, sequence);
                reply.raw_generated = Some(generated.clone());
                reply.output_verdict = trace.output.clone();
                reply
            }),
            MessageStatus::Blocked {
                phase: Phase::Output,
            } => {
                let mut reply = assistant(OUTPUT_BLOCKED_NOTICE, sequence);
                reply.status = status;
                reply.output_verdict = trace.output.clone();
                Some(reply)
            }
            _ => None,
        };

        let response = match status {
            MessageStatus::Delivered => trace.generated.clone().unwrap_or_default(),
            MessageStatus::Blocked {
                phase: Phase::Input,
            } => INPUT_BLOCKED_NOTICE.to_string(),
            MessageStatus::Blocked {
                phase: Phase::Output,
            } => OUTPUT_BLOCKED_NOTICE.to_string(),
            MessageStatus::Failed { .. } => FAILURE_NOTICE.to_string(),
        };

        let blocking_reasons = [&trace.input, &trace.output]
            .into_iter()
            .flatten()
            .find(|v| v.blocked)
            .map(|v| v.reasons.clone())
            .unwrap_or_default();
        let warnings = [&trace.input, &trace.output]
            .into_iter()
            .flatten()
            .flat_map(|v| v.warnings.iter().cloned())
            .collect();

        let outcome = TurnOutcome {
            session_id: handle.id().to_string(),
            message_id: message_id.to_string(),
            sequence,
            status,
            response,
            blocked: status.is_blocked(),
            blocking_reasons,
            warnings,
            reply: reply.clone(),
            input_verdict: trace.input,
            output_verdict: trace.output,
            timestamp: Utc::now(),
        };

        TurnRecord {
            user,
            reply,
            outcome,
        }
    }

    /// Run up to [`MAX_CHAT_BATCH`] messages, one after another, through
    /// a new session. A message rejected before its turn starts is
    /// reported in place and the rest still run.
    pub async fn submit_batch(
        &self,
        messages: &[String],
        overrides: &DetectorOverrides,
    ) -> Result<ChatBatch> {
        if messages.is_empty() {
            return Err(Error::invalid_request("batch must not be empty"));
        }
        if messages.len() > MAX_CHAT_BATCH {
            return Err(Error::invalid_request(format!(
                "at most {MAX_CHAT_BATCH} messages per batch, got {}",
                messages.len()
            )));
        }
        validate_overrides(overrides)?;

        let session_id = self.sessions.create().id().to_string();
        let mut results = Vec::with_capacity(messages.len());
        for (message_index, text) in messages.iter().enumerate() {
            let request = ChatRequest::new(session_id.as_str(), text.as_str())
                .with_overrides(overrides.clone());
            let entry = match self.submit(request).await {
                Ok(outcome) => BatchEntry::Outcome(outcome),
                Err(err) => BatchEntry::Rejected {
                    message_index,
                    error: err.code().to_string(),
                    message: err.public_message(),
                },
            };
            results.push(entry);
        }

        info!(session_id = %session_id, messages = messages.len(), "Chat batch processed");
        Ok(ChatBatch {
            session_id,
            results,
        })
    }

    /// Run detectors on `text` without generating anything
    pub async fn detect(
        &self,
        session_id: Option<&str>,
        text: &str,
        detectors: Option<&[String]>,
    ) -> Result<Verdict> {
        self.validate_text(text)?;
        let overrides = session_id
            .map(|id| self.sessions.session_config(id))
            .unwrap_or_default();
        let deadline = Instant::now() + self.settings.detector_timeout;
        self.orchestrator
            .detect(text, detectors, &overrides, deadline)
            .await
    }

    /// Evaluate one detector, optionally at a custom threshold
    pub async fn test_detector(
        &self,
        name: &str,
        text: &str,
        threshold: Option<f32>,
    ) -> Result<DetectorResult> {
        self.validate_text(text)?;
        let deadline = Instant::now() + self.settings.detector_timeout;
        self.orchestrator
            .test_detector(name, text, threshold, deadline)
            .await
    }

    /// Run detection over several texts
    pub async fn batch(
        &self,
        texts: &[String],
        detectors: Option<&[String]>,
    ) -> Result<Vec<Verdict>> {
        for text in texts {
            self.validate_text(text)?;
        }
        let deadline = Instant::now() + self.settings.detector_timeout;
        self.orchestrator
            .batch(texts, detectors, &DetectorOverrides::new(), deadline)
            .await
    }

    fn status(&self, handle: &SessionHandle, message_id: &str, state: RailState) {
        self.hub.publish(ServerEvent::StatusUpdate {
            session_id: handle.id().to_string(),
            message_id: message_id.to_string(),
            state,
        });
    }
}

/// A started turn. Dropped before it completes (the caller gave up on
/// `submit`), it abandons the ticket and publishes the later turns that
/// were waiting on it.
struct InFlight<'a> {
    sequence: u64,
    ticket: Option<TurnTicket>,
    hub: &'a EventHub,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Some(ticket) = self.ticket.take() {
            for released in ticket.abandon() {
                publish_outcome(self.hub, released.outcome);
            }
        }
    }
}

fn publish_outcome(hub: &EventHub, outcome: TurnOutcome) {
    let event = match outcome.status {
        MessageStatus::Failed { kind } => ServerEvent::Error {
            session_id: outcome.session_id,
            message_id: outcome.message_id,
            code: kind.code().to_string(),
            message: FAILURE_NOTICE.to_string(),
        },
        _ => ServerEvent::ChatResponse(outcome),
    };
    hub.publish(event);
}

fn assistant(content: &str, sequence: u64) -> Message {
    Message::assistant(uuid::Uuid::new_v4().to_string(), content, sequence + 1)
}

fn record_phase_latency(phase: Phase, started: Instant) {
    metrics::histogram!("railguard_phase_latency_us", "phase" => phase.as_str())
        .record(started.elapsed().as_micros() as f64);
}

/// Map a run error onto the failure marker recorded for the message
pub fn failure_kind(err: &Error) -> FailureKind {
    match err {
        Error::PipelineTimeout => FailureKind::Timeout,
        Error::DetectorTimeout(_) | Error::DetectorUnavailable(_) => FailureKind::Detector,
        _ => FailureKind::Generation,
    }
}
