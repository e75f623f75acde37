//! Error types for the meeting session layer

pub use crate::media::capture::CaptureError;

/// Result type alias using the session layer Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in session layer operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// No auth token available for the signaling connection
    #[error("No credential available for signaling connection")]
    MissingCredential,

    /// Signaling connection did not open within the configured timeout
    #[error("Signaling connection timed out: {0}")]
    TransportTimeout(String),

    /// Socket-level signaling transport error
    #[error("Transport error: {0}")]
    Transport(String),

    /// Peer connection construction or teardown error
    #[error("Peer connection error: {0}")]
    PeerConnection(String),

    /// SDP description/answer failure during peer negotiation
    #[error("Negotiation error: {0}")]
    Negotiation(String),

    /// ICE candidate error
    #[error("ICE candidate error: {0}")]
    IceCandidate(String),

    /// Inbound signaling frame that could not be decoded
    #[error("Malformed signaling message: {0}")]
    MalformedMessage(String),

    /// Local capture failure (degrade ladder input)
    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error belongs to the transport layer (drives reconnect policy)
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::MissingCredential
                | Error::TransportTimeout(_)
                | Error::Transport(_)
                | Error::Io(_)
        )
    }

    /// Check if this error is a per-peer negotiation failure
    ///
    /// Negotiation errors are isolated to one peer: they are logged and the
    /// connection is allowed to fail naturally, never force-closed.
    pub fn is_negotiation(&self) -> bool {
        matches!(self, Error::Negotiation(_) | Error::IceCandidate(_))
    }

    /// Check if this error is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::InvalidConfig(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidConfig("test".to_string());
        assert_eq!(err.to_string(), "Invalid configuration: test");

        let err = Error::MissingCredential;
        assert_eq!(
            err.to_string(),
            "No credential available for signaling connection"
        );
    }

    #[test]
    fn test_error_is_transport() {
        assert!(Error::MissingCredential.is_transport());
        assert!(Error::TransportTimeout("10s".to_string()).is_transport());
        assert!(Error::Transport("reset".to_string()).is_transport());
        assert!(!Error::Negotiation("bad sdp".to_string()).is_transport());
    }

    #[test]
    fn test_error_is_negotiation() {
        assert!(Error::Negotiation("test".to_string()).is_negotiation());
        assert!(Error::IceCandidate("test".to_string()).is_negotiation());
        assert!(!Error::Transport("test".to_string()).is_negotiation());
    }

    #[test]
    fn test_capture_error_conversion() {
        let err = Error::from(CaptureError::Busy);
        assert!(matches!(err, Error::Capture(CaptureError::Busy)));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err = Error::from(io_err);
        assert!(matches!(err, Error::Io(_)));
        assert!(err.is_transport());
    }
}
