//! In-memory connector
//!
//! Pairs a [`MemoryConnector`] with a [`MemoryServer`] that accepts its
//! links, so the transport can be driven without a network.

use crate::connector::{Connector, Frame, Link};
use async_trait::async_trait;
use futures::channel::mpsc as frames;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use railguard_core::{ClientEvent, Error, Result, ServerEvent};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;

struct Shared {
    available: bool,
    refuse_next: u32,
    attempts: Vec<Instant>,
}

/// Client half
#[derive(Clone)]
pub struct MemoryConnector {
    shared: Arc<Mutex<Shared>>,
    accepted: mpsc::UnboundedSender<MemoryPeer>,
}

/// Server half: accepts links and controls whether connects succeed
pub struct MemoryServer {
    shared: Arc<Mutex<Shared>>,
    accepted: mpsc::UnboundedReceiver<MemoryPeer>,
}

/// Create a connected client/server pair
pub fn pair() -> (MemoryConnector, MemoryServer) {
    let shared = Arc::new(Mutex::new(Shared {
        available: true,
        refuse_next: 0,
        attempts: Vec::new(),
    }));
    let (tx, rx) = mpsc::unbounded_channel();
    (
        MemoryConnector {
            shared: Arc::clone(&shared),
            accepted: tx,
        },
        MemoryServer {
            shared,
            accepted: rx,
        },
    )
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> Result<Link> {
        {
            let mut shared = self.shared.lock();
            shared.attempts.push(Instant::now());
            if !shared.available {
                return Err(Error::transport("connection refused"));
            }
            if shared.refuse_next > 0 {
                shared.refuse_next -= 1;
                return Err(Error::transport("connection refused"));
            }
        }

        let (to_server, from_client) = frames::unbounded();
        let (to_client, from_server) = frames::unbounded();
        self.accepted
            .send(MemoryPeer {
                incoming: from_client,
                outgoing: to_client,
            })
            .map_err(|_| Error::transport("server gone"))?;

        let sink = to_server.sink_map_err(|e| Error::transport(e.to_string()));
        Ok(Link::new(sink, from_server.map(Ok)))
    }

    fn endpoint(&self) -> String {
        "memory".to_string()
    }
}

impl MemoryServer {
    /// Next accepted link
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.accepted.recv().await
    }

    /// Refuse (or allow) every connect until changed
    pub fn set_available(&self, available: bool) {
        self.shared.lock().available = available;
    }

    /// Refuse the next `n` connects
    pub fn refuse_next(&self, n: u32) {
        self.shared.lock().refuse_next = n;
    }

    /// When each connect was attempted
    pub fn attempts(&self) -> Vec<Instant> {
        self.shared.lock().attempts.clone()
    }
}

/// Server side of one accepted link. Dropping it ends the link without a
/// close frame.
pub struct MemoryPeer {
    incoming: frames::UnboundedReceiver<Frame>,
    outgoing: frames::UnboundedSender<Frame>,
}

impl MemoryPeer {
    pub async fn recv(&mut self) -> Option<Frame> {
        self.incoming.next().await
    }

    /// Next client event, skipping anything that is not one
    pub async fn recv_event(&mut self) -> Option<ClientEvent> {
        while let Some(frame) = self.recv().await {
            match frame {
                Frame::Text(text) => {
                    if let Ok(event) = serde_json::from_str(&text) {
                        return Some(event);
                    }
                }
                Frame::Close(_) => return None,
            }
        }
        None
    }

    pub fn send(&self, event: &ServerEvent) -> Result<()> {
        let text = serde_json::to_string(event)?;
        self.outgoing
            .unbounded_send(Frame::Text(text))
            .map_err(|e| Error::transport(e.to_string()))
    }

    pub fn close(&self, code: u16) {
        let _ = self.outgoing.unbounded_send(Frame::Close(code));
        self.outgoing.close_channel();
    }
}
