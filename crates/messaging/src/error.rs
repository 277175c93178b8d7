use thiserror::Error;

/// Errors that can occur when interacting with the message bus.
///
/// Broker error types are flattened to strings at this seam so that callers
/// are not coupled to a specific client library.
#[derive(Debug, Error)]
pub enum BusError {
    /// Connecting to the broker failed.
    #[error("Broker connection failed: {0}")]
    Connect(String),

    /// Setting up the durable stream failed.
    #[error("Stream setup failed: {0}")]
    Stream(String),

    /// A publish was not accepted by the broker.
    #[error("Publish to '{subject}' failed: {reason}")]
    Publish { subject: String, reason: String },

    /// Creating a subscription failed.
    #[error("Subscribe to '{subject}' failed: {reason}")]
    Subscribe { subject: String, reason: String },

    /// Acknowledging a delivered message failed.
    #[error("Message acknowledgement failed: {0}")]
    Ack(String),

    /// A payload could not be serialized or deserialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The bus has been closed.
    #[error("Message bus is closed")]
    Closed,
}

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;
