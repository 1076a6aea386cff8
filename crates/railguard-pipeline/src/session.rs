//! Session manager
//!
//! Owns every session's history, sequence counter and detector
//! overrides. Each session sits behind its own lock, so sessions proceed
//! independently while writes within one session are serialized.
//!
//! A turn reserves its sequence pair at arrival (`begin_turn`) and
//! records its result at completion (`append`). Completed turns wait in a
//! reorder buffer until every earlier turn of the session has completed,
//! so history order always follows arrival order.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use railguard_core::{
    merge_overrides, ChatMessage, DetectorOverrides, Error, Message, MessageStatus, Result, Role,
    TurnOutcome,
};
use railguard_detectors::validate_overrides;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Upper bound for a single history read
pub const MAX_HISTORY_PAGE: usize = 200;

/// Completed outcomes remembered per session for idempotent resubmission
const COMPLETED_WINDOW: usize = 1024;

/// Session lifecycle settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    /// Sessions idle for longer than this are evicted
    pub idle_ttl: Duration,

    /// Oldest messages are dropped past this many
    pub max_history: usize,

    /// How often the reaper runs
    pub reap_interval: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            idle_ttl: Duration::from_secs(3600),
            max_history: 100,
            reap_interval: Duration::from_secs(60),
        }
    }
}

/// One completed turn: the user message, an optional assistant message,
/// and the outcome reported to the client
#[derive(Debug, Clone)]
pub struct TurnRecord {
    pub user: Message,
    pub reply: Option<Message>,
    pub outcome: TurnOutcome,
}

/// Result of trying to start a turn
#[derive(Debug)]
pub enum TurnStart {
    /// The message id already completed; this is its recorded outcome
    Completed(TurnOutcome),

    /// A fresh turn holding a reserved sequence pair
    Started(TurnTicket),
}

/// Export format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Json,
    Text,
}

/// Aggregate counts over a session's history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    pub session_id: String,
    pub total_messages: usize,
    pub user_messages: usize,
    pub assistant_messages: usize,
    pub blocked_messages: usize,
    pub failed_messages: usize,
    pub created_at: DateTime<Utc>,
    pub first_message_at: Option<DateTime<Utc>>,
    pub last_message_at: Option<DateTime<Utc>>,
}

struct SessionState {
    id: String,
    history: VecDeque<Message>,
    overrides: DetectorOverrides,
    created_at: DateTime<Utc>,
    last_activity: Instant,
    max_history: usize,

    /// Next user sequence number to hand out
    next_sequence: u64,

    /// User sequence number of the next turn to release into history
    next_release: u64,

    /// Completed or abandoned (`None`) turns waiting on an earlier turn
    pending: BTreeMap<u64, Option<TurnRecord>>,

    /// message id → reserved user sequence number
    in_flight: HashMap<String, u64>,

    completed: HashMap<String, TurnOutcome>,
    completed_order: VecDeque<String>,

    /// Replaced by `clear`; never put back into the map
    cleared: bool,
}

impl SessionState {
    fn new(id: String, overrides: DetectorOverrides, max_history: usize) -> Self {
        Self {
            id,
            history: VecDeque::new(),
            overrides,
            created_at: Utc::now(),
            last_activity: Instant::now(),
            max_history,
            next_sequence: 1,
            next_release: 1,
            pending: BTreeMap::new(),
            in_flight: HashMap::new(),
            completed: HashMap::new(),
            completed_order: VecDeque::new(),
            cleared: false,
        }
    }

    fn is_busy(&self) -> bool {
        !self.in_flight.is_empty() || !self.pending.is_empty()
    }

    fn remember(&mut self, outcome: TurnOutcome) {
        if self.completed_order.len() >= COMPLETED_WINDOW {
            if let Some(oldest) = self.completed_order.pop_front() {
                self.completed.remove(&oldest);
            }
        }
        self.completed_order.push_back(outcome.message_id.clone());
        self.completed.insert(outcome.message_id.clone(), outcome);
    }

    /// Move every turn whose predecessors are done into history
    fn release(&mut self) -> Vec<TurnRecord> {
        let mut released = Vec::new();
        while let Some(entry) = self.pending.remove(&self.next_release) {
            self.next_release += 2;
            let Some(record) = entry else { continue };

            self.push_history(record.user.clone());
            if let Some(reply) = &record.reply {
                self.push_history(reply.clone());
            }
            released.push(record);
        }
        released
    }

    fn push_history(&mut self, message: Message) {
        self.history.push_back(message);
        while self.history.len() > self.max_history {
            self.history.pop_front();
        }
    }
}

/// A session as seen by one in-flight message
#[derive(Clone)]
pub struct SessionHandle {
    id: String,
    state: Arc<Mutex<SessionState>>,
}

impl SessionHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Session-level detector overrides
    pub fn overrides(&self) -> DetectorOverrides {
        self.state.lock().overrides.clone()
    }

    /// The last `window` delivered messages, as backend context.
    ///
    /// Blocked and failed turns are left out.
    pub fn context(&self, window: usize) -> Vec<ChatMessage> {
        let state = self.state.lock();
        let mut context: Vec<ChatMessage> = state
            .history
            .iter()
            .rev()
            .filter(|m| m.status == MessageStatus::Delivered)
            .take(window)
            .map(Message::to_chat)
            .collect();
        context.reverse();
        context
    }

    /// Number of messages currently in history
    pub fn len(&self) -> usize {
        self.state.lock().history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A reserved sequence pair for one in-flight turn.
///
/// Dropping a ticket without passing it to [`SessionManager::append`]
/// marks the turn abandoned, so later turns are not held back by it.
pub struct TurnTicket {
    session_id: String,
    message_id: String,
    sequence: u64,
    state: Arc<Mutex<SessionState>>,
    finished: bool,
}

impl TurnTicket {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// Sequence number of the user message. The reply takes the next one.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

impl std::fmt::Debug for TurnTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnTicket")
            .field("session_id", &self.session_id)
            .field("message_id", &self.message_id)
            .field("sequence", &self.sequence)
            .finish()
    }
}

impl TurnTicket {
    /// Give up the turn without a result.
    ///
    /// Returns later turns that were only waiting on this one, now moved
    /// into history, in sequence order.
    pub fn abandon(mut self) -> Vec<TurnRecord> {
        self.release_abandoned()
    }

    fn release_abandoned(&mut self) -> Vec<TurnRecord> {
        self.finished = true;
        let mut state = self.state.lock();
        state.in_flight.remove(&self.message_id);
        state.pending.insert(self.sequence, None);
        let released = state.release();
        warn!(
            session_id = %self.session_id,
            message_id = %self.message_id,
            released = released.len(),
            "Turn abandoned before completion"
        );
        released
    }
}

impl Drop for TurnTicket {
    fn drop(&mut self) {
        if !self.finished {
            self.release_abandoned();
        }
    }
}

/// Owner of all active sessions
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<Mutex<SessionState>>>>,
    settings: SessionSettings,
}

impl SessionManager {
    pub fn new(settings: SessionSettings) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            settings,
        }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Start a fresh session with a generated id
    pub fn create(&self) -> SessionHandle {
        self.insert_new(DetectorOverrides::new())
    }

    fn insert_new(&self, overrides: DetectorOverrides) -> SessionHandle {
        let id = uuid::Uuid::new_v4().to_string();
        let state = Arc::new(Mutex::new(SessionState::new(
            id.clone(),
            overrides,
            self.settings.max_history,
        )));
        let mut sessions = self.sessions.write();
        sessions.insert(id.clone(), Arc::clone(&state));
        metrics::gauge!("railguard_active_sessions").set(sessions.len() as f64);
        debug!(session_id = %id, "Session created");
        SessionHandle { id, state }
    }

    /// Look up a session, creating it when the id is unknown
    pub fn resolve(&self, id: &str) -> SessionHandle {
        if let Some(state) = self.sessions.read().get(id) {
            return SessionHandle {
                id: id.to_string(),
                state: Arc::clone(state),
            };
        }

        let mut sessions = self.sessions.write();
        let state = sessions
            .entry(id.to_string())
            .or_insert_with(|| {
                debug!(session_id = %id, "Session created on first use");
                Arc::new(Mutex::new(SessionState::new(
                    id.to_string(),
                    DetectorOverrides::new(),
                    self.settings.max_history,
                )))
            })
            .clone();
        metrics::gauge!("railguard_active_sessions").set(sessions.len() as f64);
        SessionHandle {
            id: id.to_string(),
            state,
        }
    }

    fn lookup(&self, id: &str) -> Option<Arc<Mutex<SessionState>>> {
        self.sessions.read().get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.read().contains_key(id)
    }

    /// Reserve a sequence pair for `message_id`.
    ///
    /// A message id that already completed returns its recorded outcome;
    /// one still in flight is rejected. A session evicted since `handle`
    /// was resolved is put back, so the turn is not recorded on a
    /// detached session.
    pub fn begin_turn(&self, handle: &SessionHandle, message_id: &str) -> Result<TurnStart> {
        let (sequence, evicted) = {
            // The reaper needs the write lock, so it cannot evict while the
            // turn is being reserved
            let sessions = self.sessions.read();
            let mut state = handle.state.lock();

            if let Some(outcome) = state.completed.get(message_id) {
                return Ok(TurnStart::Completed(outcome.clone()));
            }
            if state.in_flight.contains_key(message_id) {
                return Err(Error::DuplicateMessage(message_id.to_string()));
            }

            let sequence = state.next_sequence;
            state.next_sequence += 2;
            state.in_flight.insert(message_id.to_string(), sequence);
            state.last_activity = Instant::now();

            let attached = sessions
                .get(&handle.id)
                .is_some_and(|current| Arc::ptr_eq(current, &handle.state));
            (sequence, !attached && !state.cleared)
        };

        if evicted {
            let mut sessions = self.sessions.write();
            sessions
                .entry(handle.id.clone())
                .or_insert_with(|| Arc::clone(&handle.state));
            metrics::gauge!("railguard_active_sessions").set(sessions.len() as f64);
            debug!(session_id = %handle.id, "Session restored after eviction");
        }

        Ok(TurnStart::Started(TurnTicket {
            session_id: handle.id.clone(),
            message_id: message_id.to_string(),
            sequence,
            state: Arc::clone(&handle.state),
            finished: false,
        }))
    }

    /// Record a completed turn.
    ///
    /// Returns the turns released into history by this call, in sequence
    /// order. That is empty while an earlier turn is still in flight.
    pub fn append(&self, mut ticket: TurnTicket, mut record: TurnRecord) -> Vec<TurnRecord> {
        ticket.finished = true;

        record.user.sequence = ticket.sequence;
        record.outcome.sequence = ticket.sequence;
        if let Some(reply) = record.reply.as_mut() {
            reply.sequence = ticket.sequence + 1;
        }

        let mut state = ticket.state.lock();
        state.in_flight.remove(&ticket.message_id);
        state.remember(record.outcome.clone());
        state.pending.insert(ticket.sequence, Some(record));
        state.last_activity = Instant::now();

        let released = state.release();
        if released.is_empty() {
            debug!(
                session_id = %state.id,
                sequence = ticket.sequence,
                "Turn buffered behind an earlier turn"
            );
        }
        released
    }

    /// Merge detector overrides into a session's configuration.
    ///
    /// Rejected overrides leave the prior configuration untouched.
    pub fn configure(&self, id: &str, overrides: &DetectorOverrides) -> Result<DetectorOverrides> {
        validate_overrides(overrides)?;
        let handle = self.resolve(id);
        let mut state = handle.state.lock();
        state.overrides = merge_overrides(&state.overrides, overrides);
        info!(session_id = %id, detectors = overrides.len(), "Session detector config updated");
        Ok(state.overrides.clone())
    }

    /// Current overrides, empty for an unknown session
    pub fn session_config(&self, id: &str) -> DetectorOverrides {
        match self.lookup(id) {
            Some(state) => {
                let overrides = state.lock().overrides.clone();
                overrides
            }
            None => DetectorOverrides::new(),
        }
    }

    /// Replace a session with a fresh, empty one and return its id.
    ///
    /// Overrides carry over. The old record is detached, so turns still in
    /// flight on it finish without touching the new session.
    pub fn clear(&self, id: &str) -> String {
        let overrides = {
            let mut sessions = self.sessions.write();
            match sessions.remove(id) {
                Some(state) => {
                    let mut state = state.lock();
                    state.cleared = true;
                    state.overrides.clone()
                }
                None => DetectorOverrides::new(),
            }
        };
        let handle = self.insert_new(overrides);
        info!(old_session_id = %id, session_id = %handle.id, "Session cleared");
        handle.id
    }

    /// Most recent `limit` messages in display order. Unknown ids have none.
    pub fn history(&self, id: &str, limit: usize) -> Vec<Message> {
        let Some(state) = self.lookup(id) else {
            return Vec::new();
        };
        let state = state.lock();
        let limit = limit.min(MAX_HISTORY_PAGE);
        let skip = state.history.len().saturating_sub(limit);
        state.history.iter().skip(skip).cloned().collect()
    }

    pub fn stats(&self, id: &str) -> Result<SessionStats> {
        let state = self
            .lookup(id)
            .ok_or_else(|| Error::SessionNotFound(id.to_string()))?;
        let state = state.lock();

        let mut stats = SessionStats {
            session_id: state.id.clone(),
            total_messages: state.history.len(),
            user_messages: 0,
            assistant_messages: 0,
            blocked_messages: 0,
            failed_messages: 0,
            created_at: state.created_at,
            first_message_at: state.history.front().map(|m| m.timestamp),
            last_message_at: state.history.back().map(|m| m.timestamp),
        };
        for msg in &state.history {
            match msg.role {
                Role::User => stats.user_messages += 1,
                Role::Assistant => stats.assistant_messages += 1,
            }
            match msg.status {
                MessageStatus::Blocked { .. } => stats.blocked_messages += 1,
                MessageStatus::Failed { .. } => stats.failed_messages += 1,
                MessageStatus::Delivered => {}
            }
        }
        Ok(stats)
    }

    /// Active session ids, sorted
    pub fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Render a session's history
    pub fn export(&self, id: &str, format: ExportFormat) -> Result<String> {
        let state = self
            .lookup(id)
            .ok_or_else(|| Error::SessionNotFound(id.to_string()))?;
        let state = state.lock();

        match format {
            ExportFormat::Json => {
                let doc = serde_json::json!({
                    "session_id": state.id,
                    "created_at": state.created_at,
                    "exported_at": Utc::now(),
                    "messages": state.history,
                });
                Ok(serde_json::to_string_pretty(&doc)?)
            }
            ExportFormat::Text => {
                let mut out = String::new();
                for msg in &state.history {
                    let role = match msg.role {
                        Role::User => "User",
                        Role::Assistant => "Assistant",
                    };
                    out.push_str(&format!(
                        "[{}] {role}: {}\n",
                        msg.timestamp.to_rfc3339(),
                        msg.content
                    ));
                    if let Some(reasons) = blocking_reasons(msg) {
                        out.push_str(&format!("[BLOCKED: {}]\n", reasons.join(", ")));
                    }
                }
                Ok(out)
            }
        }
    }

    /// Evict sessions idle past the TTL. Sessions with a turn still in
    /// flight or buffered are kept regardless.
    pub fn evict_idle(&self) -> usize {
        let now = Instant::now();
        let ttl = self.settings.idle_ttl;
        let mut sessions = self.sessions.write();
        let before = sessions.len();

        sessions.retain(|_, state| {
            let state = state.lock();
            state.is_busy() || now.duration_since(state.last_activity) <= ttl
        });

        let evicted = before - sessions.len();
        metrics::gauge!("railguard_active_sessions").set(sessions.len() as f64);
        if evicted > 0 {
            metrics::counter!("railguard_sessions_evicted_total").increment(evicted as u64);
            info!(evicted, remaining = sessions.len(), "Evicted idle sessions");
        }
        evicted
    }

    /// Run `evict_idle` on the configured interval until aborted
    pub fn spawn_reaper(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        let period = self.settings.reap_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                manager.evict_idle();
            }
        })
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new(SessionSettings::default())
    }
}

fn blocking_reasons(msg: &Message) -> Option<&[String]> {
    [&msg.input_verdict, &msg.output_verdict]
        .into_iter()
        .flatten()
        .find(|v| v.blocked)
        .map(|v| v.reasons.as_slice())
}
