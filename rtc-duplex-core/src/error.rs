//! Error types for peer sessions and the underlying transport

use std::fmt;
use thiserror::Error;

/// Stable error tag carried by every [`PeerError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// The RTC transport could not be initialised
    WebRtcSupport,
    /// The peer connection constructor failed
    PcConstructor,
    /// Operation on a destroyed session
    Destroyed,
    /// Signal message carried no recognised branch
    Signaling,
    /// Remote description could not be applied
    SetRemoteDescription,
    /// Remote ICE candidate could not be applied
    AddIceCandidate,
    /// Offer creation failed
    CreateOffer,
    /// Answer creation failed
    CreateAnswer,
    /// Local description could not be applied
    SetLocalDescription,
    /// Transport reported a connection failure
    ConnectionFailure,
    /// ICE connectivity failed
    IceConnectionFailure,
    /// ICE agent closed
    IceConnectionClosed,
    /// Data channel failure
    DataChannel,
    /// Transceiver could not be added
    AddTransceiver,
    /// Sender could not be removed
    RemoveTrack,
    /// Pending-write slot already occupied
    WriteInProgress,
    /// Write issued after the write side ended
    WriteAfterEnd,
    /// Statistics could not be collected
    GetStats,
}

impl ErrorCode {
    /// Tag string (`ERR_*`)
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WebRtcSupport => "ERR_WEBRTC_SUPPORT",
            Self::PcConstructor => "ERR_PC_CONSTRUCTOR",
            Self::Destroyed => "ERR_DESTROYED",
            Self::Signaling => "ERR_SIGNALING",
            Self::SetRemoteDescription => "ERR_SET_REMOTE_DESCRIPTION",
            Self::AddIceCandidate => "ERR_ADD_ICE_CANDIDATE",
            Self::CreateOffer => "ERR_CREATE_OFFER",
            Self::CreateAnswer => "ERR_CREATE_ANSWER",
            Self::SetLocalDescription => "ERR_SET_LOCAL_DESCRIPTION",
            Self::ConnectionFailure => "ERR_CONNECTION_FAILURE",
            Self::IceConnectionFailure => "ERR_ICE_CONNECTION_FAILURE",
            Self::IceConnectionClosed => "ERR_ICE_CONNECTION_CLOSED",
            Self::DataChannel => "ERR_DATA_CHANNEL",
            Self::AddTransceiver => "ERR_ADD_TRANSCEIVER",
            Self::RemoveTrack => "ERR_REMOVE_TRACK",
            Self::WriteInProgress => "ERR_WRITE_IN_PROGRESS",
            Self::WriteAfterEnd => "ERR_WRITE_AFTER_END",
            Self::GetStats => "ERR_GET_STATS",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Peer session errors
///
/// Fatal variants reach the application as a single [`crate::PeerEvent::Error`]
/// followed by [`crate::PeerEvent::Close`]. Misuse of the public API is
/// returned directly from the call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PeerError {
    /// The RTC transport could not be initialised
    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),

    /// The peer connection could not be constructed
    #[error("Peer connection construction failed: {0}")]
    Construction(String),

    /// Operation attempted after the session was destroyed
    #[error("Cannot {operation} after peer is destroyed")]
    Destroyed {
        /// Name of the rejected operation
        operation: &'static str,
    },

    /// Signal message carried nothing this session understands
    #[error("Invalid signal: {0}")]
    InvalidSignal(String),

    /// Remote description rejected
    #[error("Failed to set remote description: {0}")]
    SetRemoteDescription(String),

    /// Remote candidate rejected
    #[error("Failed to add ICE candidate: {0}")]
    AddIceCandidate(String),

    /// Offer creation failed
    #[error("Failed to create offer: {0}")]
    CreateOffer(String),

    /// Answer creation failed
    #[error("Failed to create answer: {0}")]
    CreateAnswer(String),

    /// Local description rejected
    #[error("Failed to set local description: {0}")]
    SetLocalDescription(String),

    /// Transport-level connection failure
    #[error("Connection failed")]
    ConnectionFailure,

    /// ICE connectivity failed
    #[error("Ice connection failed")]
    IceConnectionFailure,

    /// ICE agent closed underneath the session
    #[error("Ice connection closed")]
    IceConnectionClosed,

    /// Data channel failure
    #[error("Data channel error: {0}")]
    DataChannel(String),

    /// Transceiver could not be added
    #[error("Failed to add transceiver: {0}")]
    AddTransceiver(String),

    /// Sender could not be removed
    #[error("Failed to remove track: {0}")]
    RemoveTrack(String),

    /// A write is already pending completion
    #[error("A write is already pending; wait for its completion before writing again")]
    WriteInProgress,

    /// The write side was already ended
    #[error("Write after end")]
    WriteAfterEnd,

    /// Statistics retrieval failed
    #[error("Failed to get stats: {0}")]
    Stats(String),
}

impl PeerError {
    /// Stable tag for this error
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::TransportUnavailable(_) => ErrorCode::WebRtcSupport,
            Self::Construction(_) => ErrorCode::PcConstructor,
            Self::Destroyed { .. } => ErrorCode::Destroyed,
            Self::InvalidSignal(_) => ErrorCode::Signaling,
            Self::SetRemoteDescription(_) => ErrorCode::SetRemoteDescription,
            Self::AddIceCandidate(_) => ErrorCode::AddIceCandidate,
            Self::CreateOffer(_) => ErrorCode::CreateOffer,
            Self::CreateAnswer(_) => ErrorCode::CreateAnswer,
            Self::SetLocalDescription(_) => ErrorCode::SetLocalDescription,
            Self::ConnectionFailure => ErrorCode::ConnectionFailure,
            Self::IceConnectionFailure => ErrorCode::IceConnectionFailure,
            Self::IceConnectionClosed => ErrorCode::IceConnectionClosed,
            Self::DataChannel(_) => ErrorCode::DataChannel,
            Self::AddTransceiver(_) => ErrorCode::AddTransceiver,
            Self::RemoveTrack(_) => ErrorCode::RemoveTrack,
            Self::WriteInProgress => ErrorCode::WriteInProgress,
            Self::WriteAfterEnd => ErrorCode::WriteAfterEnd,
            Self::Stats(_) => ErrorCode::GetStats,
        }
    }

    /// Check if this error tears the session down when it occurs asynchronously
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::Destroyed { .. } | Self::WriteInProgress | Self::WriteAfterEnd | Self::Stats(_)
        )
    }
}

/// Failures reported by an [`crate::RtcTransport`] or [`crate::DataChannel`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The operation was attempted and failed
    #[error("Operation failed: {0}")]
    OperationFailed(String),

    /// The object is in a state that forbids the operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Signaling state is not stable; retry after the next stable transition
    #[error("Signaling state is not stable")]
    NotStable,

    /// Data channel failure
    #[error("Channel error: {0}")]
    Channel(String),

    /// The transport does not implement the operation
    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}

/// Result type for peer operations
pub type Result<T> = std::result::Result<T, PeerError>;

/// Result type for transport operations
pub type TransportResult<T> = std::result::Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            PeerError::Destroyed { operation: "signal" }.code().as_str(),
            "ERR_DESTROYED"
        );
        assert_eq!(
            PeerError::InvalidSignal("empty".into()).code(),
            ErrorCode::Signaling
        );
        assert_eq!(
            PeerError::IceConnectionFailure.code().to_string(),
            "ERR_ICE_CONNECTION_FAILURE"
        );
    }

    #[test]
    fn test_error_display() {
        let err = PeerError::Destroyed { operation: "write" };
        assert_eq!(err.to_string(), "Cannot write after peer is destroyed");

        let err = PeerError::CreateOffer("no codecs".into());
        assert_eq!(err.to_string(), "Failed to create offer: no codecs");
    }

    #[test]
    fn test_fatality() {
        assert!(PeerError::DataChannel("closed".into()).is_fatal());
        assert!(!PeerError::WriteInProgress.is_fatal());
        assert!(!PeerError::Destroyed { operation: "send" }.is_fatal());
    }
}
