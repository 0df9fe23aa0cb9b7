use thiserror::Error;

/// Result type alias for gateway operations
pub type Result<T, E = GatewayError> = std::result::Result<T, E>;

/// Errors that can surface from the gateway service itself. Partner-level
/// failures never take this shape; they are folded into `PartnerResponse`
/// records on the broadcast path.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Response serialization error: {0}")]
    ResponseSerializationError(String),

    #[error("Gateway is shutting down")]
    ShuttingDown,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure of a single outbound partner exchange.
///
/// Display strings are part of the behavior: the `timeout` flag on a
/// partner response is derived from the error text containing "timeout",
/// so the `Timeout` variant must render that word.
#[derive(Error, Debug)]
pub enum SendError {
    #[error("timeout after {0}ms")]
    Timeout(u64),

    #[error("request failed: {0}")]
    Transport(String),

    #[error("partner returned HTTP {0}")]
    Status(hyper::StatusCode),

    #[error("invalid response body: {0}")]
    Body(String),

    #[error("failed to build request: {0}")]
    BuildRequest(String),
}

impl SendError {
    /// Matches the original gateway's text-based timeout detection.
    pub fn is_timeout_text(message: &str) -> bool {
        message.to_lowercase().contains("timeout")
    }
}

/// Errors from the partner configuration store.
#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("partner not found: {0}")]
    NotFound(String),

    #[error("invalid partner configuration: {0}")]
    Invalid(String),

    #[error("storage error: {0}")]
    Storage(String),
}
