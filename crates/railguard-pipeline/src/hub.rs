use parking_lot::RwLock;
use railguard_core::ServerEvent;
use std::collections::HashMap;
use tokio::sync::broadcast;
use tracing::trace;

/// Per-session event bus for subscriber fan-out.
///
/// Every subscriber of a session receives every event published to it.
/// A session's channel is dropped once its last subscriber is gone.
pub struct EventHub {
    channels: RwLock<HashMap<String, broadcast::Sender<ServerEvent>>>,
    capacity: usize,
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Subscribe to a session's events
    pub fn subscribe(&self, session_id: &str) -> broadcast::Receiver<ServerEvent> {
        if let Some(sender) = self.channels.read().get(session_id) {
            return sender.subscribe();
        }
        self.channels
            .write()
            .entry(session_id.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Publish to the event's session. Returns how many subscribers got it.
    pub fn publish(&self, event: ServerEvent) -> usize {
        let session_id = event.session_id().to_string();
        let sent = match self.channels.read().get(&session_id) {
            Some(sender) => sender.send(event).ok(),
            None => return 0,
        };

        match sent {
            Some(receivers) => receivers,
            None => {
                // Nobody listening
                let mut channels = self.channels.write();
                if channels
                    .get(&session_id)
                    .is_some_and(|s| s.receiver_count() == 0)
                {
                    channels.remove(&session_id);
                    trace!(session_id = %session_id, "Dropped idle event channel");
                }
                0
            }
        }
    }

    /// Get the number of active subscribers for a session
    pub fn subscriber_count(&self, session_id: &str) -> usize {
        self.channels
            .read()
            .get(session_id)
            .map_or(0, |s| s.receiver_count())
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(1024)
    }
}
