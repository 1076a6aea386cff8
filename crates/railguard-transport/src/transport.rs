//! Reconnecting delivery transport
//!
//! One task owns the connection. [`Transport`] handles talk to it over a
//! command channel and observe its state on a watch channel; server events
//! arrive on the [`Inbox`].
//!
//! Events sent but not yet answered with a terminal server event are
//! remembered and sent again after a reconnect. The server treats a
//! repeated message id as a replay, so nothing runs twice.
//!
//! ```text
//! DISCONNECTED → CONNECTING → CONNECTED → CLOSING → DISCONNECTED
//!       ↑             │            │
//!       └── backoff ──┴── lost ────┘
//! ```

use crate::connector::{Connector, Frame, Link, CLOSE_ABNORMAL, CLOSE_NORMAL};
use futures::{SinkExt, StreamExt};
use railguard_core::{ClientEvent, Error, Result, ServerEvent};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Reconnect, queue and dedupe settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Delay before the first reconnect attempt, doubled for each further one
    #[serde(with = "millis", rename = "base_delay_ms")]
    pub base_delay: Duration,

    #[serde(with = "millis", rename = "max_delay_ms")]
    pub max_delay: Duration,

    /// Reconnect attempts before giving up
    pub max_attempts: u32,

    /// Events held while disconnected, and sent events awaiting an answer
    pub queue_capacity: usize,

    /// Recent server event keys remembered for deduplication
    pub dedupe_window: usize,

    /// Buffered inbound events
    pub inbox_capacity: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
            max_attempts: 5,
            queue_capacity: 256,
            dedupe_window: 1024,
            inbox_capacity: 256,
        }
    }
}

impl TransportConfig {
    /// Wait before reconnect attempt `attempt` (1-based)
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
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

/// Connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

/// Something delivered to the client
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Event(ServerEvent),

    /// Reconnect attempts ran out. Nothing is retried until `reconnect`.
    ConnectionLost { attempts: u32 },
}

/// Inbound events from the server
pub struct Inbox {
    rx: mpsc::Receiver<Inbound>,
}

impl Inbox {
    pub async fn recv(&mut self) -> Option<Inbound> {
        self.rx.recv().await
    }

    /// Invoke `handler` for every inbound item on a background task
    pub fn on_event<F>(mut self, mut handler: F) -> JoinHandle<()>
    where
        F: FnMut(Inbound) + Send + 'static,
    {
        tokio::spawn(async move {
            while let Some(item) = self.rx.recv().await {
                handler(item);
            }
        })
    }
}

/// A serialized client event and the message id it carries
#[derive(Debug, Clone)]
struct Outgoing {
    message_id: String,
    text: String,
}

enum Command {
    Send(Outgoing, oneshot::Sender<Result<()>>),
    Close(oneshot::Sender<()>),
    Reconnect(oneshot::Sender<()>),
}

/// Handle to the connection task. Dropping every handle stops the task.
#[derive(Clone)]
pub struct Transport {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<ConnectionState>,
}

impl Transport {
    /// Start the connection task and begin connecting
    pub fn connect<C: Connector>(connector: C, config: TransportConfig) -> (Self, Inbox) {
        let (commands_tx, commands_rx) = mpsc::channel(64);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (inbox_tx, inbox_rx) = mpsc::channel(config.inbox_capacity.max(1));

        let queue_capacity = config.queue_capacity;
        let worker = Worker {
            connector: Arc::new(connector),
            dedupe: Dedupe::new(config.dedupe_window),
            config,
            commands: commands_rx,
            state: state_tx,
            inbox: inbox_tx,
            queue: VecDeque::new(),
            unanswered: Unanswered::new(queue_capacity),
            closed_by_user: false,
        };
        tokio::spawn(worker.run());

        (
            Self {
                commands: commands_tx,
                state: state_rx,
            },
            Inbox { rx: inbox_rx },
        )
    }

    /// Send an event, or queue it while disconnected.
    ///
    /// Events without a message id get one. Returns that id so the caller
    /// can match it against server events.
    pub async fn send(&self, mut event: ClientEvent) -> Result<String> {
        let message_id = stamp(&mut event);
        let outgoing = Outgoing {
            message_id: message_id.clone(),
            text: serde_json::to_string(&event)?,
        };
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::Send(outgoing, reply_tx))
            .await
            .map_err(|_| Error::transport("transport task stopped"))?;
        reply_rx
            .await
            .map_err(|_| Error::transport("transport task stopped"))??;
        Ok(message_id)
    }

    /// Close the connection. Queued and unanswered events are discarded
    /// and no reconnect happens until [`Transport::reconnect`].
    pub async fn close(&self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.commands.send(Command::Close(reply_tx)).await.is_ok() {
            let _ = reply_rx.await;
        }
    }

    /// Restart the connect cycle with a fresh attempt budget
    pub async fn reconnect(&self) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::Reconnect(reply_tx))
            .await
            .map_err(|_| Error::transport("transport task stopped"))?;
        reply_rx
            .await
            .map_err(|_| Error::transport("transport task stopped"))
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Subscribe to state changes
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Wait until the connection reaches `target`
    pub async fn wait_for(&self, target: ConnectionState) -> Result<()> {
        let mut state = self.state.clone();
        state
            .wait_for(|s| *s == target)
            .await
            .map(|_| ())
            .map_err(|_| Error::transport("transport task stopped"))
    }
}

fn stamp(event: &mut ClientEvent) -> String {
    match event {
        ClientEvent::ChatMessage { message_id, .. }
        | ClientEvent::DetectionRequest { message_id, .. } => message_id
            .get_or_insert_with(|| uuid::Uuid::new_v4().to_string())
            .clone(),
    }
}

/// Bounded memory of recently seen server events
struct Dedupe {
    seen: HashSet<(String, &'static str)>,
    order: VecDeque<(String, &'static str)>,
    capacity: usize,
}

impl Dedupe {
    fn new(capacity: usize) -> Self {
        Self {
            seen: HashSet::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// False for a redelivered event
    fn first_sighting(&mut self, event: &ServerEvent) -> bool {
        let Some(key) = event.dedupe_key() else {
            return true;
        };
        if self.seen.contains(&key) {
            return false;
        }
        if self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.order.push_back(key.clone());
        self.seen.insert(key);
        true
    }
}

/// Sent events still waiting for a terminal server event, oldest first
struct Unanswered {
    events: VecDeque<Outgoing>,
    capacity: usize,
}

impl Unanswered {
    fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    fn track(&mut self, outgoing: Outgoing) {
        if self.events.len() >= self.capacity {
            if let Some(oldest) = self.events.pop_front() {
                warn!(message_id = %oldest.message_id, "Too many unanswered events, forgetting the oldest");
            }
        }
        self.events.push_back(outgoing);
    }

    fn settle(&mut self, message_id: &str) {
        self.events.retain(|e| e.message_id != message_id);
    }

    fn snapshot(&self) -> Vec<Outgoing> {
        self.events.iter().cloned().collect()
    }

    fn len(&self) -> usize {
        self.events.len()
    }

    fn clear(&mut self) {
        self.events.clear();
    }
}

enum Step {
    /// Attempt a connect. Attempt 0 connects immediately.
    Connect { attempt: u32 },
    Online(Link),
    /// Manually closed or out of attempts
    Idle,
    Shutdown,
}

struct Worker<C> {
    connector: Arc<C>,
    config: TransportConfig,
    commands: mpsc::Receiver<Command>,
    state: watch::Sender<ConnectionState>,
    inbox: mpsc::Sender<Inbound>,
    queue: VecDeque<Outgoing>,
    unanswered: Unanswered,
    dedupe: Dedupe,
    closed_by_user: bool,
}

impl<C: Connector> Worker<C> {
    async fn run(mut self) {
        let mut step = Step::Connect { attempt: 0 };
        loop {
            step = match step {
                Step::Connect { attempt } => self.connect(attempt).await,
                Step::Online(link) => self.online(link).await,
                Step::Idle => self.idle().await,
                Step::Shutdown => break,
            };
        }
        self.set_state(ConnectionState::Disconnected);
        debug!(endpoint = %self.connector.endpoint(), "Transport task stopped");
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_if_modified(|current| {
            let changed = *current != state;
            *current = state;
            changed
        });
    }

    fn enqueue(&mut self, outgoing: Outgoing) -> Result<()> {
        if self.queue.len() >= self.config.queue_capacity {
            warn!(capacity = self.config.queue_capacity, "Outbound queue full");
            return Err(Error::QueueFull(self.config.queue_capacity));
        }
        self.queue.push_back(outgoing);
        metrics::gauge!("railguard_transport_queue_depth").set(self.queue.len() as f64);
        Ok(())
    }

    fn discard_queue(&mut self) {
        if !self.queue.is_empty() || self.unanswered.len() > 0 {
            info!(
                queued = self.queue.len(),
                unanswered = self.unanswered.len(),
                "Discarding undelivered events"
            );
        }
        self.queue.clear();
        self.unanswered.clear();
        metrics::gauge!("railguard_transport_queue_depth").set(0.0);
    }

    /// Handle a command while not connected. `Some` leaves the current step.
    fn offline_command(&mut self, command: Option<Command>) -> Option<Step> {
        match command? {
            Command::Send(outgoing, reply) => {
                let _ = reply.send(self.enqueue(outgoing));
                None
            }
            Command::Close(reply) => {
                self.closed_by_user = true;
                self.discard_queue();
                self.set_state(ConnectionState::Disconnected);
                let _ = reply.send(());
                Some(Step::Idle)
            }
            Command::Reconnect(reply) => {
                self.closed_by_user = false;
                let _ = reply.send(());
                Some(Step::Connect { attempt: 0 })
            }
        }
    }

    async fn connect(&mut self, attempt: u32) -> Step {
        if attempt > self.config.max_attempts {
            warn!(
                endpoint = %self.connector.endpoint(),
                attempts = self.config.max_attempts,
                "Reconnect attempts exhausted"
            );
            self.set_state(ConnectionState::Disconnected);
            let _ = self
                .inbox
                .send(Inbound::ConnectionLost {
                    attempts: self.config.max_attempts,
                })
                .await;
            return Step::Idle;
        }

        if attempt > 0 {
            self.set_state(ConnectionState::Disconnected);
            let delay = self.config.backoff_delay(attempt);
            info!(attempt, delay_ms = delay.as_millis() as u64, "Reconnecting");
            let sleep = tokio::time::sleep(delay);
            tokio::pin!(sleep);
            loop {
                tokio::select! {
                    _ = &mut sleep => break,
                    command = self.commands.recv() => {
                        if let Some(step) = self.offline_command(command) {
                            return step;
                        }
                    }
                }
            }
            metrics::counter!("railguard_transport_reconnects_total").increment(1);
        }

        self.set_state(ConnectionState::Connecting);
        let connector = Arc::clone(&self.connector);
        let connecting = connector.connect();
        tokio::pin!(connecting);
        loop {
            tokio::select! {
                result = &mut connecting => {
                    return match result {
                        Ok(link) => {
                            info!(endpoint = %connector.endpoint(), "Connected");
                            Step::Online(link)
                        }
                        Err(e) => {
                            debug!(attempt, error = %e, "Connect failed");
                            Step::Connect { attempt: attempt + 1 }
                        }
                    };
                }
                command = self.commands.recv() => {
                    if let Some(step) = self.offline_command(command) {
                        return step;
                    }
                }
            }
        }
    }

    async fn online(&mut self, mut link: Link) -> Step {
        self.set_state(ConnectionState::Connected);

        // Events the last connection never answered go out again first
        let resend = self.unanswered.snapshot();
        if !resend.is_empty() {
            info!(count = resend.len(), "Resending unanswered events");
        }
        for outgoing in resend {
            if let Err(e) = link.sink.send(Frame::Text(outgoing.text)).await {
                warn!(error = %e, "Resend failed, connection lost");
                return Step::Connect { attempt: 1 };
            }
        }

        // Queued events go out before anything sent from now on
        while let Some(outgoing) = self.queue.front().cloned() {
            if let Err(e) = link.sink.send(Frame::Text(outgoing.text.clone())).await {
                warn!(error = %e, "Flush failed, connection lost");
                return Step::Connect { attempt: 1 };
            }
            self.queue.pop_front();
            self.unanswered.track(outgoing);
        }
        metrics::gauge!("railguard_transport_queue_depth").set(0.0);

        loop {
            tokio::select! {
                frame = link.stream.next() => match frame {
                    Some(Ok(Frame::Text(text))) => self.deliver(&text).await,
                    Some(Ok(Frame::Close(CLOSE_NORMAL))) => {
                        info!("Server closed the connection");
                        self.set_state(ConnectionState::Disconnected);
                        return Step::Idle;
                    }
                    Some(Ok(Frame::Close(code))) => {
                        warn!(code, "Connection closed unexpectedly");
                        return Step::Connect { attempt: 1 };
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "Connection error");
                        return Step::Connect { attempt: 1 };
                    }
                    None => {
                        warn!(code = CLOSE_ABNORMAL, "Connection dropped");
                        return Step::Connect { attempt: 1 };
                    }
                },
                command = self.commands.recv() => match command {
                    Some(Command::Send(outgoing, reply)) => {
                        if let Err(e) = link.sink.send(Frame::Text(outgoing.text.clone())).await {
                            warn!(error = %e, "Send failed, queueing for redelivery");
                            let _ = reply.send(self.enqueue(outgoing));
                            return Step::Connect { attempt: 1 };
                        }
                        self.unanswered.track(outgoing);
                        let _ = reply.send(Ok(()));
                    }
                    Some(Command::Close(reply)) => {
                        self.set_state(ConnectionState::Closing);
                        let _ = link.sink.send(Frame::Close(CLOSE_NORMAL)).await;
                        let _ = link.sink.close().await;
                        self.closed_by_user = true;
                        self.discard_queue();
                        self.set_state(ConnectionState::Disconnected);
                        let _ = reply.send(());
                        return Step::Idle;
                    }
                    Some(Command::Reconnect(reply)) => {
                        let _ = reply.send(());
                    }
                    None => {
                        let _ = link.sink.send(Frame::Close(CLOSE_NORMAL)).await;
                        return Step::Shutdown;
                    }
                },
            }
        }
    }

    async fn idle(&mut self) -> Step {
        loop {
            match self.commands.recv().await {
                Some(Command::Send(outgoing, reply)) => {
                    let result = if self.closed_by_user {
                        Err(Error::transport("transport closed"))
                    } else {
                        self.enqueue(outgoing)
                    };
                    let _ = reply.send(result);
                }
                Some(Command::Close(reply)) => {
                    self.closed_by_user = true;
                    self.discard_queue();
                    let _ = reply.send(());
                }
                Some(Command::Reconnect(reply)) => {
                    self.closed_by_user = false;
                    let _ = reply.send(());
                    return Step::Connect { attempt: 0 };
                }
                None => return Step::Shutdown,
            }
        }
    }

    async fn deliver(&mut self, text: &str) {
        let event: ServerEvent = match serde_json::from_str(text) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Ignoring malformed server event");
                return;
            }
        };
        if event.is_terminal() {
            self.unanswered.settle(event.message_id());
        }
        if !self.dedupe.first_sighting(&event) {
            debug!(
                message_id = event.message_id(),
                event_type = event.event_type(),
                "Dropping redelivered event"
            );
            return;
        }
        let _ = self.inbox.send(Inbound::Event(event)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use railguard_core::RailState;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = TransportConfig::default();
        let delays: Vec<u64> = (1..=7)
            .map(|n| config.backoff_delay(n).as_millis() as u64)
            .collect();
        assert_eq!(delays, [1000, 2000, 4000, 8000, 16000, 30000, 30000]);
    }

    #[test]
    fn test_dedupe_window() {
        let mut dedupe = Dedupe::new(2);
        let error = |id: &str| ServerEvent::Error {
            session_id: "s".into(),
            message_id: id.into(),
            code: "pipeline_timeout".into(),
            message: "processing error".into(),
        };
        assert!(dedupe.first_sighting(&error("a")));
        assert!(!dedupe.first_sighting(&error("a")));
        assert!(dedupe.first_sighting(&error("b")));
        assert!(dedupe.first_sighting(&error("c")));
        // "a" fell out of the window
        assert!(dedupe.first_sighting(&error("a")));

        let status = ServerEvent::StatusUpdate {
            session_id: "s".into(),
            message_id: "a".into(),
            state: RailState::Generating,
        };
        assert!(dedupe.first_sighting(&status));
        assert!(dedupe.first_sighting(&status));
    }

    #[test]
    fn test_unanswered_forgets_oldest_past_capacity() {
        let outgoing = |id: &str| Outgoing {
            message_id: id.into(),
            text: id.to_string(),
        };
        let mut unanswered = Unanswered::new(2);
        unanswered.track(outgoing("a"));
        unanswered.track(outgoing("b"));
        unanswered.track(outgoing("c"));
        let ids: Vec<_> = unanswered.snapshot().into_iter().map(|e| e.message_id).collect();
        assert_eq!(ids, ["b", "c"]);

        unanswered.settle("b");
        assert_eq!(unanswered.len(), 1);
    }

    #[test]
    fn test_stamp_keeps_existing_id() {
        let mut event = ClientEvent::ChatMessage {
            session_id: None,
            message_id: Some("m1".into()),
            text: "hi".into(),
            config: Default::default(),
        };
        assert_eq!(stamp(&mut event), "m1");

        let mut event = ClientEvent::DetectionRequest {
            session_id: None,
            message_id: None,
            text: "hi".into(),
            detectors: None,
        };
        let id = stamp(&mut event);
        assert_eq!(event.message_id(), Some(id.as_str()));
    }
}
