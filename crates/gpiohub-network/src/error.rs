//! Error types for outbound delivery.

pub type Result<T> = std::result::Result<T, NetworkError>;

#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    /// The transport has no link to the upstream consumer.
    #[error("Transport is disconnected")]
    Disconnected,

    /// The transport refused a message.
    #[error("Failed to send on {topic}: {message}")]
    Send { topic: String, message: String },

    /// A payload could not be encoded.
    #[error("Payload encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

impl NetworkError {
    pub fn send(topic: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Send {
            topic: topic.into(),
            message: message.into(),
        }
    }
}
