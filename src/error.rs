use thiserror::Error;

/// Errors surfaced by senders, receivers and transports.
///
/// Liveness conditions (gating, backpressure, timeouts, resume points that
/// have not been reached yet) are never errors; `send` and `recv` report
/// those as `Ok(None)`.
#[derive(Error, Debug)]
pub enum Error {
    /// Two upstream endpoints contributed the same topic into one receiver.
    ///
    /// This is a topology misconfiguration and is never retried internally.
    #[error("duplicate topic {topic:?} from {first} and {second}")]
    DuplicateTopic {
        topic: String,
        first: String,
        second: String,
    },

    /// Endpoint string could not be parsed.
    #[error("invalid endpoint {0:?}: {1}")]
    InvalidEndpoint(String, String),

    /// Required configuration value missing.
    #[error("missing configuration: {0}")]
    MissingConfig(String),

    /// Configuration values contradict each other.
    #[error("configuration conflict: {0}")]
    ConfigConflict(String),

    /// Another live sender is already bound at this address.
    #[error("address already in use: {0}")]
    AddressInUse(String),

    /// Nothing is bound at the address a receiver tried to connect to.
    #[error("nothing bound at {0}")]
    NotBound(String),

    /// Transport-level failure not covered by a more specific variant.
    #[error("transport error: {0}")]
    Transport(String),

    /// Socket I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Wire frame could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// JSON serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for transport operations
pub type Result<T> = std::result::Result<T, Error>;
