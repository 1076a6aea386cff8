//! WebSocket connector over tokio-tungstenite

use crate::connector::{Connector, Frame, Link, CLOSE_ABNORMAL};
use async_trait::async_trait;
use futures::{future, SinkExt, StreamExt};
use railguard_core::{Error, Result};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

/// Connects to a Railguard `/ws` endpoint
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    /// `url` is the full endpoint, e.g. `ws://127.0.0.1:8080/ws?session_id=abc`
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

fn to_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text),
        Frame::Close(code) => Message::Close(Some(CloseFrame {
            code: CloseCode::from(code),
            reason: "".into(),
        })),
    }
}

fn from_message(msg: std::result::Result<Message, tokio_tungstenite::tungstenite::Error>) -> Option<Result<Frame>> {
    match msg {
        Ok(Message::Text(text)) => Some(Ok(Frame::Text(text))),
        Ok(Message::Close(frame)) => Some(Ok(Frame::Close(
            frame.map_or(CLOSE_ABNORMAL, |f| u16::from(f.code)),
        ))),
        // Pings are answered by tungstenite itself
        Ok(_) => None,
        Err(e) => Some(Err(Error::transport(e.to_string()))),
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<Link> {
        let (socket, response) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| Error::transport(format!("connect to {} failed: {e}", self.url)))?;
        debug!(url = %self.url, status = %response.status(), "WebSocket connected");

        let (sink, stream) = socket.split();
        let sink = sink
            .sink_map_err(|e| Error::transport(e.to_string()))
            .with(|frame: Frame| future::ready(Ok::<_, Error>(to_message(frame))));
        let stream = stream.filter_map(|msg| future::ready(from_message(msg)));

        Ok(Link::new(sink, stream))
    }

    fn endpoint(&self) -> String {
        self.url.clone()
    }
}
