//! Generation port and backends

mod mock;
mod ollama;

pub use mock::{MockBackend, ResponseTemplates};
pub use ollama::{OllamaBackend, OllamaConfig};

use async_trait::async_trait;
use railguard_core::{ChatMessage, Result};

/// Text-generation backend.
///
/// One call per message. Callers bound the call with their own deadline
/// and cancel it by dropping the future.
#[async_trait]
pub trait GenerationPort: Send + Sync {
    /// Generate a reply to `prompt` given prior conversation `history`
    async fn generate(&self, prompt: &str, history: &[ChatMessage]) -> Result<String>;

    /// Backend name for logs and health output
    fn name(&self) -> &str;

    /// Whether the backend is reachable
    async fn health_check(&self) -> bool {
        true
    }
}
