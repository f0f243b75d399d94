//! Signaling wire format
//!
//! Inbound messages are parsed leniently into [`SignalData`]: every branch is
//! optional and malformed text becomes an empty message, which the session
//! then rejects as an invalid signal. Outbound messages are emitted as
//! [`SignalMessage`], which serializes to the same JSON shape.

use crate::types::{IceCandidateInit, MediaKind, SdpType, SessionDescription};
use serde::{Deserialize, Deserializer, Serialize};

/// Request from a responder asking the initiator to add a transceiver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransceiverRequest {
    /// Media kind
    pub kind: MediaKind,
    /// Transceiver init parameters, passed through to the transport
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init: Option<serde_json::Value>,
}

/// Inbound signaling message
///
/// `{ type?, sdp?, candidate?, renegotiate?, transceiverRequest? }`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalData {
    /// Description type or message tag
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// SDP text of a description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp: Option<String>,
    /// Remote candidate; `Some(None)` is an explicit end-of-candidates marker
    #[serde(
        default,
        deserialize_with = "deserialize_some",
        skip_serializing_if = "Option::is_none"
    )]
    pub candidate: Option<Option<IceCandidateInit>>,
    /// Renegotiation request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renegotiate: Option<bool>,
    /// Transceiver request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transceiver_request: Option<TransceiverRequest>,
}

// Distinguishes an absent field from an explicit `null`.
fn deserialize_some<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Deserialize::deserialize(deserializer).map(Some)
}

impl SignalData {
    /// Parse serialized text, falling back to an empty message
    #[must_use]
    pub fn parse(text: &str) -> Self {
        match serde_json::from_str(text) {
            Ok(data) => data,
            Err(e) => {
                tracing::debug!(error = %e, "Malformed signal text, treating as empty");
                Self::default()
            }
        }
    }

    /// Check if the message asks for a renegotiation
    #[must_use]
    pub fn wants_renegotiate(&self) -> bool {
        self.renegotiate == Some(true)
    }

    /// Remote candidate carried by the message
    #[must_use]
    pub fn remote_candidate(&self) -> Option<&IceCandidateInit> {
        self.candidate.as_ref().and_then(Option::as_ref)
    }

    /// Check if the message is an explicit end-of-candidates marker
    #[must_use]
    pub fn is_end_of_candidates(&self) -> bool {
        matches!(self.candidate, Some(None))
    }

    /// Check if the message carries SDP
    #[must_use]
    pub fn has_description(&self) -> bool {
        self.sdp.as_deref().is_some_and(|sdp| !sdp.is_empty())
    }

    /// Description carried by the message
    ///
    /// # Errors
    ///
    /// Returns the offending type name if the type is missing or unknown
    pub fn description(&self) -> Option<Result<SessionDescription, String>> {
        if !self.has_description() {
            return None;
        }
        let sdp = self.sdp.clone().unwrap_or_default();
        let kind = self.kind.as_deref().unwrap_or_default();
        Some(match SdpType::parse(kind) {
            Some(sdp_type) => Ok(SessionDescription { sdp_type, sdp }),
            None => Err(format!("unknown description type '{kind}'")),
        })
    }

    /// Check if the message carries no branch at all
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.wants_renegotiate()
            && self.transceiver_request.is_none()
            && self.candidate.is_none()
            && !self.has_description()
    }

    /// Short label for logging
    #[must_use]
    pub fn label(&self) -> &'static str {
        if self.has_description() {
            "description"
        } else if self.candidate.is_some() {
            "candidate"
        } else if self.wants_renegotiate() {
            "renegotiate"
        } else if self.transceiver_request.is_some() {
            "transceiverRequest"
        } else {
            "empty"
        }
    }
}

impl From<&str> for SignalData {
    fn from(text: &str) -> Self {
        Self::parse(text)
    }
}

impl From<String> for SignalData {
    fn from(text: String) -> Self {
        Self::parse(&text)
    }
}

impl From<serde_json::Value> for SignalData {
    fn from(value: serde_json::Value) -> Self {
        match serde_json::from_value(value) {
            Ok(data) => data,
            Err(e) => {
                tracing::debug!(error = %e, "Malformed signal object, treating as empty");
                Self::default()
            }
        }
    }
}

impl From<SignalMessage> for SignalData {
    fn from(message: SignalMessage) -> Self {
        match message {
            SignalMessage::Description(description) => Self {
                kind: Some(description.sdp_type.as_str().to_string()),
                sdp: Some(description.sdp),
                ..Self::default()
            },
            SignalMessage::Candidate(candidate) => Self {
                kind: Some("candidate".to_string()),
                candidate: Some(Some(candidate)),
                ..Self::default()
            },
            SignalMessage::Renegotiate => Self {
                kind: Some("renegotiate".to_string()),
                renegotiate: Some(true),
                ..Self::default()
            },
            SignalMessage::TransceiverRequest(request) => Self {
                kind: Some("transceiverRequest".to_string()),
                transceiver_request: Some(request),
                ..Self::default()
            },
        }
    }
}

/// Outbound signaling message, to be relayed to the remote peer
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(into = "SignalData")]
pub enum SignalMessage {
    /// Offer or answer
    Description(SessionDescription),
    /// Locally discovered candidate
    Candidate(IceCandidateInit),
    /// Responder asks the initiator to start a negotiation cycle
    Renegotiate,
    /// Responder asks the initiator to add a transceiver
    TransceiverRequest(TransceiverRequest),
}

impl SignalMessage {
    /// Serialize to JSON text
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Check if this is a candidate message
    #[must_use]
    pub fn is_candidate(&self) -> bool {
        matches!(self, Self::Candidate(_))
    }

    /// Description type, if this is a description message
    #[must_use]
    pub fn sdp_type(&self) -> Option<SdpType> {
        match self {
            Self::Description(description) => Some(description.sdp_type),
            _ => None,
        }
    }
}

/// Remove the trickle advertisement (`a=ice-options:trickle` lines) from SDP
#[must_use]
pub fn filter_trickle(sdp: &str) -> String {
    const NEEDLE: &str = "a=ice-options:trickle";

    let mut out = String::with_capacity(sdp.len());
    let mut rest = sdp;
    while let Some(pos) = rest.find(NEEDLE) {
        let after = &rest[pos + NEEDLE.len()..];
        let mut chars = after.chars();
        match (chars.next(), chars.next()) {
            (Some(ws), Some('\n')) if ws.is_whitespace() => {
                out.push_str(&rest[..pos]);
                rest = &after[ws.len_utf8() + 1..];
            }
            _ => {
                out.push_str(&rest[..pos + NEEDLE.len()]);
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}
