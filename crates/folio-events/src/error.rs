/// Errors produced by the notification and deferred-work subsystem.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    /// A deferred unit reported failure; it stays queued.
    #[error("deferred work '{key}' failed: {reason}")]
    WorkFailed { key: String, reason: String },

    /// Work keys must be non-empty.
    #[error("deferred work key must not be empty")]
    EmptyKey,
}

/// Convenience alias used throughout the events crate.
pub type EventResult<T> = std::result::Result<T, EventError>;
