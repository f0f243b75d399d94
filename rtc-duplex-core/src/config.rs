//! Session configuration

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Buffered bytes above which write completions are held back
pub const MAX_BUFFERED_AMOUNT: usize = 64 * 1024;

/// Default wait for the end-of-candidates marker once gathering starts
pub const ICE_COMPLETE_TIMEOUT: Duration = Duration::from_millis(5000);

/// Interval of the stuck-closing channel check
pub const CHANNEL_CLOSING_TIMEOUT: Duration = Duration::from_millis(5000);

/// Buffered-amount poll interval when the channel has no native low event
pub const BACKPRESSURE_POLL_INTERVAL: Duration = Duration::from_millis(150);

/// Delay between statistics attempts while resolving the candidate pair
pub const STATS_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Statistics attempts before the session gives up resolving addresses
pub const STATS_MAX_ATTEMPTS: u32 = 50;

/// Grace period between ending the write side and full teardown
pub const FINISH_GRACE: Duration = Duration::from_millis(1000);

/// Default STUN servers
pub const DEFAULT_ICE_SERVERS: [&str; 2] = [
    "stun:stun.l.google.com:19302",
    "stun:global.stun.twilio.com:3478",
];

/// Hook applied to every locally generated SDP before it is committed
pub type SdpTransform = Arc<dyn Fn(String) -> String + Send + Sync>;

/// ICE server entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    /// Server URLs
    pub urls: Vec<String>,
    /// Username for TURN servers
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username: String,
    /// Credential for TURN servers
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub credential: String,
}

impl IceServer {
    /// Server without credentials
    #[must_use]
    pub fn url(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: String::new(),
            credential: String::new(),
        }
    }
}

/// Transport configuration handed to the RTC provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RtcConfiguration {
    /// ICE servers
    #[serde(rename = "iceServers")]
    pub ice_servers: Vec<IceServer>,
}

impl Default for RtcConfiguration {
    fn default() -> Self {
        Self {
            ice_servers: DEFAULT_ICE_SERVERS.iter().map(|url| IceServer::url(*url)).collect(),
        }
    }
}

/// Data channel parameters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Deliver messages in order
    pub ordered: Option<bool>,
    /// Lifetime limit for retransmissions, in milliseconds
    pub max_packet_life_time: Option<u16>,
    /// Retransmission limit
    pub max_retransmits: Option<u16>,
    /// Sub-protocol name
    pub protocol: Option<String>,
    /// Channel is set up out of band; both sides create it locally
    pub negotiated: bool,
    /// Stream id for negotiated channels
    pub id: Option<u16>,
}

/// Options for offer creation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferOptions {
    /// Restart ICE with the new offer
    pub ice_restart: bool,
    /// Request voice activity detection
    pub voice_activity_detection: Option<bool>,
}

/// Options for answer creation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerOptions {
    /// Request voice activity detection
    pub voice_activity_detection: Option<bool>,
}

/// Peer session configuration
#[derive(Clone)]
pub struct PeerConfig {
    /// Create offers and the data channel
    pub initiator: bool,
    /// Data channel label; the initiator picks a random one when unset
    pub channel_name: Option<String>,
    /// Data channel parameters
    pub channel_config: ChannelConfig,
    /// Transport configuration
    pub rtc_config: RtcConfiguration,
    /// Offer options
    pub offer_options: OfferOptions,
    /// Answer options
    pub answer_options: AnswerOptions,
    /// SDP rewrite hook
    pub sdp_transform: Option<SdpTransform>,
    /// Send candidates as they are discovered
    pub trickle: bool,
    /// Keep the trickle advertisement in SDP even when not trickling
    pub allow_half_trickle: bool,
    /// Wait for end-of-candidates before giving up on gathering
    pub ice_complete_timeout: Duration,
    /// Deliver text messages as text instead of bytes
    pub object_mode: bool,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            initiator: false,
            channel_name: None,
            channel_config: ChannelConfig::default(),
            rtc_config: RtcConfiguration::default(),
            offer_options: OfferOptions::default(),
            answer_options: AnswerOptions::default(),
            sdp_transform: None,
            trickle: true,
            allow_half_trickle: false,
            ice_complete_timeout: ICE_COMPLETE_TIMEOUT,
            object_mode: false,
        }
    }
}

impl fmt::Debug for PeerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerConfig")
            .field("initiator", &self.initiator)
            .field("channel_name", &self.channel_name)
            .field("channel_config", &self.channel_config)
            .field("rtc_config", &self.rtc_config)
            .field("offer_options", &self.offer_options)
            .field("answer_options", &self.answer_options)
            .field("sdp_transform", &self.sdp_transform.is_some())
            .field("trickle", &self.trickle)
            .field("allow_half_trickle", &self.allow_half_trickle)
            .field("ice_complete_timeout", &self.ice_complete_timeout)
            .field("object_mode", &self.object_mode)
            .finish()
    }
}

impl PeerConfig {
    /// Initiator configuration with defaults
    #[must_use]
    pub fn initiator() -> Self {
        Self {
            initiator: true,
            ..Self::default()
        }
    }

    /// Responder configuration with defaults
    #[must_use]
    pub fn responder() -> Self {
        Self::default()
    }

    /// Check if the trickle advertisement must be stripped from local SDP
    #[must_use]
    pub fn strips_trickle(&self) -> bool {
        !self.trickle && !self.allow_half_trickle
    }

    /// Apply the SDP transform hook, if any
    #[must_use]
    pub fn transform_sdp(&self, sdp: String) -> String {
        match &self.sdp_transform {
            Some(transform) => transform(sdp),
            None => sdp,
        }
    }
}
