//! Error types for the event bus.

use thiserror::Error;

/// Result type for event bus operations.
pub type Result<T> = std::result::Result<T, EventBusError>;

/// Errors returned by the event bus.
///
/// Listener and hook failures are never returned to callers; they are
/// logged where they happen.
#[derive(Debug, Error)]
pub enum EventBusError {
    /// The bus has been shut down.
    #[error("event bus is shut down")]
    ShutDown,
}
