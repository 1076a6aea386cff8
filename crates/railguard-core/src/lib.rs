//! Railguard Core
//!
//! Types and utilities shared across Railguard components.
//!
//! This crate provides:
//! - The verdict model produced by detectors and the orchestrator
//! - Session history types (messages, statuses, turn outcomes)
//! - Typed wire events for the duplex channel
//! - Error types and result handling

pub mod error;
pub mod events;
pub mod types;

pub use error::{Error, Result};
pub use events::{ClientEvent, ServerEvent};
pub use types::{
    merge_overrides, ChatMessage, Decision, DetectorOverride, DetectorOverrides, DetectorResult,
    DetectorSettings, FailureKind, Message, MessageStatus, Phase, RailState, Role, TurnOutcome,
    Verdict,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::events::{ClientEvent, ServerEvent};
    pub use crate::types::{
        ChatMessage, Decision, DetectorOverrides, DetectorResult, DetectorSettings, Message,
        MessageStatus, Phase, RailState, Role, TurnOutcome, Verdict,
    };
}
