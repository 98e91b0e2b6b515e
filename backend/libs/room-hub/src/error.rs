//! Error types for hub, backend and transport operations

use thiserror::Error;

/// Failure of a single connection's byte stream.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The remote side (or our own teardown) closed the stream
    #[error("transport closed")]
    Closed,

    /// Read or write failed
    #[error("transport I/O failure: {0}")]
    Io(String),
}

/// Hub and backend errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HubError {
    /// Per-connection I/O failure; never fatal to the hub
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The broker could not be reached while publishing or subscribing
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The coordinator task has stopped and accepts no more events
    #[error("hub is shut down")]
    HubClosed,

    /// Channel name failed validation
    #[error("invalid channel name: {0}")]
    InvalidChannel(String),

    /// A connection arrived without a channel identity attached
    #[error("no channel attached to connection context")]
    ChannelMissing,

    /// The same event name was registered twice in a routing table
    #[error("event handler already registered: {0}")]
    DuplicateRegistration(String),
}

impl From<redis::RedisError> for HubError {
    fn from(e: redis::RedisError) -> Self {
        HubError::BackendUnavailable(e.to_string())
    }
}

impl HubError {
    /// Returns whether retrying the same call may succeed later
    pub fn is_retryable(&self) -> bool {
        matches!(self, HubError::BackendUnavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = HubError::InvalidChannel("empty".to_string());
        assert_eq!(err.to_string(), "invalid channel name: empty");

        let err = HubError::Transport(TransportError::Io("reset by peer".to_string()));
        assert_eq!(
            err.to_string(),
            "transport error: transport I/O failure: reset by peer"
        );
    }

    #[test]
    fn test_redis_error_maps_to_backend_unavailable() {
        let redis_err = redis::RedisError::from((redis::ErrorKind::IoError, "connection refused"));
        let err: HubError = redis_err.into();
        assert!(matches!(err, HubError::BackendUnavailable(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_only_backend_errors_are_retryable() {
        assert!(!HubError::HubClosed.is_retryable());
        assert!(!HubError::ChannelMissing.is_retryable());
        assert!(!HubError::Transport(TransportError::Closed).is_retryable());
    }
}
