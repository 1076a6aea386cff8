//! Railguard Pipeline
//!
//! The per-message safety rail and the state it works against:
//!
//! - **Rail**: input checks, one generation call, output checks, under one deadline
//! - **Sessions**: ordered per-session history with arrival-order sequencing
//! - **Generation**: the backend port, with Ollama and offline mock backends
//! - **Event hub**: per-session broadcast of rail progress and outcomes

pub mod generation;
pub mod hub;
pub mod rail;
pub mod session;

pub use generation::{GenerationPort, MockBackend, OllamaBackend, OllamaConfig};
pub use hub::EventHub;
pub use rail::{
    failure_kind, BatchEntry, ChatBatch, ChatRequest, Rail, RailSettings, MAX_CHAT_BATCH,
};
pub use session::{
    ExportFormat, SessionHandle, SessionManager, SessionSettings, SessionStats, TurnRecord,
    TurnStart, TurnTicket,
};
