//! Connector abstraction
//!
//! A [`Connector`] opens a [`Link`]: a sink and a stream of frames. The
//! transport task owns the link for as long as it stays up.

use async_trait::async_trait;
use futures::{Sink, Stream};
use railguard_core::{Error, Result};
use std::pin::Pin;

/// Close code for a normal, intentional close
pub const CLOSE_NORMAL: u16 = 1000;

/// Close code reported when the stream ends without a close frame
pub const CLOSE_ABNORMAL: u16 = 1006;

/// One unit on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Close(u16),
}

pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = Error> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame>> + Send>>;

/// An open connection
pub struct Link {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

impl Link {
    pub fn new(
        sink: impl Sink<Frame, Error = Error> + Send + 'static,
        stream: impl Stream<Item = Result<Frame>> + Send + 'static,
    ) -> Self {
        Self {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        }
    }
}

/// Opens links to the server
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self) -> Result<Link>;

    /// Where this connector points, for logs
    fn endpoint(&self) -> String;
}
