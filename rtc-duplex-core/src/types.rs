//! Shared types for sessions, transports, and signaling

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which side of the offer/answer exchange this session plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Creates the offers and (by default) the data channel
    Initiator,
    /// Answers offers and asks the initiator to renegotiate
    Responder,
}

impl Role {
    /// Role for the given initiator flag
    #[must_use]
    pub fn from_initiator(initiator: bool) -> Self {
        if initiator {
            Self::Initiator
        } else {
            Self::Responder
        }
    }

    /// Check if this is the initiating side
    #[must_use]
    pub fn is_initiator(self) -> bool {
        self == Self::Initiator
    }
}

/// Media kind of a transceiver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// Audio transceiver
    Audio,
    /// Video transceiver
    Video,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Audio => f.write_str("audio"),
            Self::Video => f.write_str("video"),
        }
    }
}

/// Session description type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    /// SDP offer
    Offer,
    /// Provisional answer
    Pranswer,
    /// SDP answer
    Answer,
    /// Rollback of a pending description
    Rollback,
}

impl SdpType {
    /// Wire name of the description type
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Offer => "offer",
            Self::Pranswer => "pranswer",
            Self::Answer => "answer",
            Self::Rollback => "rollback",
        }
    }

    /// Parse a wire name
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "offer" => Some(Self::Offer),
            "pranswer" => Some(Self::Pranswer),
            "answer" => Some(Self::Answer),
            "rollback" => Some(Self::Rollback),
            _ => None,
        }
    }
}

impl fmt::Display for SdpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Session description (type plus SDP text)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Description type
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    /// SDP text
    pub sdp: String,
}

impl SessionDescription {
    /// Create an offer description
    #[must_use]
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    /// Create an answer description
    #[must_use]
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// ICE candidate as exchanged over signaling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidateInit {
    /// Candidate attribute line (`candidate:...`)
    pub candidate: String,
    /// Media line index the candidate belongs to
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_m_line_index: Option<u16>,
    /// Media stream id the candidate belongs to
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,
}

impl IceCandidateInit {
    /// Create a candidate for media line 0
    #[must_use]
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_m_line_index: Some(0),
            sdp_mid: Some("0".to_string()),
        }
    }

    /// Connection address field of the candidate line, if present
    ///
    /// `candidate:<foundation> <component> <transport> <priority> <address> <port> typ ...`
    #[must_use]
    pub fn address(&self) -> Option<&str> {
        self.candidate
            .split_whitespace()
            .nth(4)
            .filter(|addr| !addr.is_empty())
    }

    /// Check if the candidate names a host this side cannot resolve
    ///
    /// Missing addresses and mDNS `.local` names fall in this category.
    #[must_use]
    pub fn has_unresolvable_address(&self) -> bool {
        match self.address() {
            None => true,
            Some(addr) => addr.ends_with(".local"),
        }
    }
}

/// ICE connectivity state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IceConnectionState {
    /// No checks started
    New,
    /// Checks in progress
    Checking,
    /// A usable pair was found
    Connected,
    /// Checks finished with a usable pair
    Completed,
    /// Connectivity lost, may recover
    Disconnected,
    /// No usable pair
    Failed,
    /// Agent shut down
    Closed,
}

impl IceConnectionState {
    /// Check if the transport can carry data in this state
    #[must_use]
    pub fn is_ready(self) -> bool {
        matches!(self, Self::Connected | Self::Completed)
    }
}

/// ICE candidate gathering state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IceGatheringState {
    /// Gathering not started
    New,
    /// Gathering in progress
    Gathering,
    /// Gathering finished
    Complete,
}

/// Offer/answer negotiation state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignalingState {
    /// No exchange in progress
    Stable,
    /// Local offer applied
    HaveLocalOffer,
    /// Remote offer applied
    HaveRemoteOffer,
    /// Local provisional answer applied
    HaveLocalPranswer,
    /// Remote provisional answer applied
    HaveRemotePranswer,
    /// Connection closed
    Closed,
}

/// Aggregate transport connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerConnectionState {
    /// Nothing started
    New,
    /// Transports connecting
    Connecting,
    /// Transports connected
    Connected,
    /// Connectivity lost, may recover
    Disconnected,
    /// Transport-level failure
    Failed,
    /// Connection closed
    Closed,
}

/// Data channel ready state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelState {
    /// Channel not yet open
    Connecting,
    /// Channel can carry messages
    Open,
    /// Close requested, not yet complete
    Closing,
    /// Channel closed
    Closed,
}

/// One data channel message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelPayload {
    /// Binary message
    Binary(Bytes),
    /// Text message
    Text(String),
}

impl ChannelPayload {
    /// Payload size in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Binary(bytes) => bytes.len(),
            Self::Text(text) => text.len(),
        }
    }

    /// Check if the payload is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check if this is a text message
    #[must_use]
    pub fn is_text(&self) -> bool {
        matches!(self, Self::Text(_))
    }

    /// Borrow the payload bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Binary(bytes) => bytes,
            Self::Text(text) => text.as_bytes(),
        }
    }

    /// Convert into raw bytes, encoding text as UTF-8
    #[must_use]
    pub fn into_bytes(self) -> Bytes {
        match self {
            Self::Binary(bytes) => bytes,
            Self::Text(text) => Bytes::from(text),
        }
    }
}

impl From<Bytes> for ChannelPayload {
    fn from(bytes: Bytes) -> Self {
        Self::Binary(bytes)
    }
}

impl From<Vec<u8>> for ChannelPayload {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Binary(Bytes::from(bytes))
    }
}

impl From<&[u8]> for ChannelPayload {
    fn from(bytes: &[u8]) -> Self {
        Self::Binary(Bytes::copy_from_slice(bytes))
    }
}

impl From<String> for ChannelPayload {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for ChannelPayload {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

/// Address family of a resolved endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AddressFamily {
    /// IPv4 address
    IPv4,
    /// IPv6 address
    IPv6,
}

impl AddressFamily {
    /// Family of a textual address
    #[must_use]
    pub fn of(address: &str) -> Self {
        if address.contains(':') {
            Self::IPv6
        } else {
            Self::IPv4
        }
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IPv4 => f.write_str("IPv4"),
            Self::IPv6 => f.write_str("IPv6"),
        }
    }
}

/// Endpoint of the active candidate pair, once known
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressInfo {
    /// Textual address
    pub address: Option<String>,
    /// Address family
    pub family: Option<AddressFamily>,
    /// Port number
    pub port: Option<u16>,
}

impl AddressInfo {
    /// Build from an address and port, deriving the family
    #[must_use]
    pub fn new(address: impl Into<String>, port: Option<u16>) -> Self {
        let address = address.into();
        let family = AddressFamily::of(&address);
        Self {
            address: Some(address),
            family: Some(family),
            port,
        }
    }

    /// Check if an address has been resolved
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.address.is_some()
    }
}
