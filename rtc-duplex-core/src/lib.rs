//! rtc-duplex - duplex byte streams over WebRTC data channels
//!
//! This library turns a WebRTC peer connection into a backpressured duplex
//! stream. The application relays signaling messages between the two peers by
//! any means it likes; the session handles the rest:
//!
//! - **Negotiation**: offer/answer cycles, coalesced renegotiation requests,
//!   and responder-initiated renegotiation
//! - **Candidate buffering**: remote candidates wait for the remote
//!   description and are applied in arrival order
//! - **Readiness**: one `connect` event once ICE and the data channel are both
//!   ready, with the selected candidate pair's addresses resolved from stats
//! - **Backpressure**: write completions are held while the channel buffers
//!   more than 64 KiB
//! - **Teardown**: one idempotent, ordered shutdown path
//!
//! # Examples
//!
//! ```rust,no_run
//! use rtc_duplex_core::{LoopbackTransport, Peer, PeerConfig, PeerEvent};
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let (left, right) = LoopbackTransport::pair();
//! let (alice, mut alice_events) = Peer::new(PeerConfig::initiator(), Arc::new(left)).await?;
//! let (bob, mut bob_events) = Peer::new(PeerConfig::responder(), Arc::new(right)).await?;
//!
//! // Relay signals until connected
//! while let Some(event) = alice_events.recv().await {
//!     match event {
//!         PeerEvent::Signal(message) => bob.signal(message)?,
//!         PeerEvent::Connect => break,
//!         _ => {}
//!     }
//!     while let Some(PeerEvent::Signal(message)) = bob_events.try_recv() {
//!         alice.signal(message)?;
//!     }
//! }
//!
//! alice.write("hello").await?;
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::panic)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::all)]
#![allow(clippy::pedantic)]
#![allow(clippy::nursery)]
#![allow(clippy::unused_async)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::derivable_impls)]

/// Core types shared by sessions and transports
pub mod types;

/// Error types
pub mod error;

/// Session configuration and constants
pub mod config;

/// Signaling wire format
pub mod signaling;

/// RTC transport and data channel traits
pub mod transport;

/// Statistics report normalization
pub mod stats;

/// Remote candidate buffering and local candidate relay
pub mod candidates;

/// Peer handle, builder, and events
pub mod peer;

/// In-process transport pair
pub mod loopback;

/// Adapter for the `webrtc` crate (requires webrtc-backend feature)
#[cfg(feature = "webrtc-backend")]
pub mod webrtc_transport;

mod channel;
mod gateway;
mod lifecycle;
mod negotiation;
mod readiness;
mod session;
mod stream;

pub use candidates::CandidateBuffer;
pub use config::{
    AnswerOptions, ChannelConfig, IceServer, OfferOptions, PeerConfig, RtcConfiguration,
    SdpTransform, MAX_BUFFERED_AMOUNT,
};
pub use error::{ErrorCode, PeerError, Result, TransportError, TransportResult};
pub use loopback::{LoopbackChannel, LoopbackOp, LoopbackTransport};
pub use peer::{Peer, PeerBuilder, PeerEvent, PeerEvents};
pub use signaling::{filter_trickle, SignalData, SignalMessage, TransceiverRequest};
pub use stats::StatsReport;
pub use transport::{ChannelEvent, DataChannel, EventHandler, HandlerSlot, RtcTransport, TransportEvent};
pub use types::{
    AddressFamily, AddressInfo, ChannelPayload, ChannelState, IceCandidateInit,
    IceConnectionState, IceGatheringState, MediaKind, PeerConnectionState, Role, SdpType,
    SessionDescription, SignalingState,
};

#[cfg(feature = "webrtc-backend")]
pub use webrtc_transport::WebRtcTransport;

/// Prelude for common imports
pub mod prelude {
    pub use crate::{
        ChannelPayload, MediaKind, Peer, PeerBuilder, PeerConfig, PeerError, PeerEvent,
        PeerEvents, RtcTransport, SignalData, SignalMessage,
    };
}
