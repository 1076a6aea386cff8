//! Railguard Transport
//!
//! Client side of the duplex chat channel. A single task owns the
//! connection and reconnects with exponential backoff after unexpected
//! drops. Events sent while offline wait in a bounded queue and go out in
//! order on reconnection; redelivered server events are dropped.
//!
//! Enable the `websocket` feature for [`WsConnector`]. [`memory::pair`]
//! provides an in-process connector for tests.

pub mod connector;
pub mod memory;
pub mod transport;
#[cfg(feature = "websocket")]
pub mod ws;

pub use connector::{Connector, Frame, Link, CLOSE_ABNORMAL, CLOSE_NORMAL};
pub use transport::{ConnectionState, Inbound, Inbox, Transport, TransportConfig};
#[cfg(feature = "websocket")]
pub use ws::WsConnector;
