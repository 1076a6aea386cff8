//! Railguard Server
//!
//! HTTP and WebSocket front end for the safety rail, plus an interactive
//! client for the WebSocket channel.

pub mod app;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;
pub mod telemetry;
pub mod websocket;

pub use app::build_app;
pub use config::AppConfig;
pub use error::AppError;
pub use state::AppState;
