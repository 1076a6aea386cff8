//! Error types for Railguard

/// Result type alias using Railguard's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for Railguard operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A detector's backing model is not loaded
    #[error("detector unavailable: {0}")]
    DetectorUnavailable(String),

    /// A detector did not answer within its budget
    #[error("detector timed out: {0}")]
    DetectorTimeout(String),

    /// The generation backend was unreachable or errored
    #[error("generation failed: {0}")]
    GenerationFailure(String),

    /// The overall per-message deadline expired
    #[error("pipeline deadline exceeded")]
    PipelineTimeout,

    /// Configuration rejected at the configuration boundary
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Transport gave up after exhausting its reconnect policy
    #[error("transport disconnected: {0}")]
    TransportDisconnected(String),

    /// Outbound queue is at capacity
    #[error("outbound queue full (capacity {0})")]
    QueueFull(usize),

    /// Request failed input validation
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The message id is already being processed in this session
    #[error("message {0} is already in flight")]
    DuplicateMessage(String),

    /// Unknown session identifier on a read-only operation
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Network/IO errors
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic internal errors
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new detector-unavailable error
    pub fn unavailable(detector: impl Into<String>) -> Self {
        Self::DetectorUnavailable(detector.into())
    }

    /// Create a new generation error
    pub fn generation(msg: impl Into<String>) -> Self {
        Self::GenerationFailure(msg.into())
    }

    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    /// Create a new invalid-request error
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Create a new transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::TransportDisconnected(msg.into())
    }

    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Stable machine-readable code used in wire-level error events
    pub fn code(&self) -> &'static str {
        match self {
            Self::DetectorUnavailable(_) => "detector_unavailable",
            Self::DetectorTimeout(_) => "detector_timeout",
            Self::GenerationFailure(_) => "generation_failure",
            Self::PipelineTimeout => "pipeline_timeout",
            Self::InvalidConfiguration(_) => "invalid_configuration",
            Self::TransportDisconnected(_) => "transport_disconnected",
            Self::QueueFull(_) => "queue_full",
            Self::InvalidRequest(_) => "invalid_request",
            Self::DuplicateMessage(_) => "duplicate_message",
            Self::SessionNotFound(_) => "session_not_found",
            Self::Io(_) => "io_error",
            Self::Serialization(_) => "serialization_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Whether this error terminates the message that raised it.
    ///
    /// Detector-level failures are absorbed as warnings, so they never are.
    pub fn is_fatal_to_message(&self) -> bool {
        matches!(
            self,
            Self::GenerationFailure(_) | Self::PipelineTimeout | Self::Internal(_)
        )
    }

    /// Text safe to show an end user. Internal detail stays in the logs.
    pub fn public_message(&self) -> String {
        match self {
            Self::GenerationFailure(_) | Self::PipelineTimeout | Self::Internal(_) => {
                "processing error".to_string()
            }
            Self::Io(_) | Self::Serialization(_) => "processing error".to_string(),
            Self::TransportDisconnected(_) => "connection lost".to_string(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detector_errors_are_not_fatal() {
        assert!(!Error::unavailable("pii").is_fatal_to_message());
        assert!(!Error::DetectorTimeout("spam".into()).is_fatal_to_message());
        assert!(Error::PipelineTimeout.is_fatal_to_message());
        assert!(Error::generation("backend down").is_fatal_to_message());
    }

    #[test]
    fn test_public_message_hides_internal_detail() {
        let err = Error::generation("connect ECONNREFUSED 127.0.0.1:11434");
        assert_eq!(err.public_message(), "processing error");
        assert_eq!(err.code(), "generation_failure");
    }
}
