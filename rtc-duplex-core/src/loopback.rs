//! In-process transport pair
//!
//! [`LoopbackTransport::pair`] returns two linked transports that simulate an
//! offer/answer state machine, host candidate gathering, connectivity once
//! both sides hold both descriptions, and data channels that deliver straight
//! to the other side. Knobs on the transport and its channels inject faults
//! and hold back the buffered amount, so session behaviour can be driven
//! deterministically.

use crate::config::ChannelConfig;
use crate::config::{AnswerOptions, OfferOptions};
use crate::error::{TransportError, TransportResult};
use crate::transport::{
    ChannelEvent, DataChannel, EventHandler, HandlerSlot, RtcTransport, TransportEvent,
};
use crate::types::{
    ChannelPayload, ChannelState, IceCandidateInit, IceConnectionState, IceGatheringState,
    MediaKind, PeerConnectionState, SdpType, SessionDescription, SignalingState,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashSet;
use std::sync::{Arc, Weak};
use std::time::Duration;

const BASE_PORT: u16 = 50000;
const GATHER_DELAY: Duration = Duration::from_millis(5);

/// Operations that can be made to fail once
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoopbackOp {
    /// `create_offer`
    CreateOffer,
    /// `create_answer`
    CreateAnswer,
    /// `set_local_description`
    SetLocalDescription,
    /// `set_remote_description`
    SetRemoteDescription,
    /// `add_ice_candidate`
    AddIceCandidate,
    /// `create_data_channel`
    CreateDataChannel,
    /// `add_transceiver`
    AddTransceiver,
    /// `remove_sender`
    RemoveSender,
    /// `get_stats`
    GetStats,
}

struct ChannelInner {
    ready: ChannelState,
    buffered: usize,
    holding: bool,
    low_threshold: usize,
    supports_low_threshold: bool,
}

/// Data channel half of a loopback pair
pub struct LoopbackChannel {
    label: String,
    config: ChannelConfig,
    inner: Mutex<ChannelInner>,
    events: HandlerSlot<ChannelEvent>,
    peer: Mutex<Weak<LoopbackChannel>>,
}

impl LoopbackChannel {
    fn new(label: String, config: ChannelConfig, supports_low_threshold: bool) -> Arc<Self> {
        Arc::new(Self {
            label,
            config,
            inner: Mutex::new(ChannelInner {
                ready: ChannelState::Connecting,
                buffered: 0,
                holding: false,
                low_threshold: 0,
                supports_low_threshold,
            }),
            events: HandlerSlot::new(),
            peer: Mutex::new(Weak::new()),
        })
    }

    fn link(a: &Arc<Self>, b: &Arc<Self>) {
        *a.peer.lock() = Arc::downgrade(b);
        *b.peer.lock() = Arc::downgrade(a);
    }

    fn open(&self) {
        {
            let mut inner = self.inner.lock();
            if inner.ready != ChannelState::Connecting {
                return;
            }
            inner.ready = ChannelState::Open;
        }
        self.events.emit(ChannelEvent::Open);
    }

    fn remote_closed(&self) {
        {
            let mut inner = self.inner.lock();
            if inner.ready == ChannelState::Closed {
                return;
            }
            inner.ready = ChannelState::Closed;
        }
        self.events.emit(ChannelEvent::Close);
    }

    /// Accumulate sent bytes in the buffered amount until [`Self::release_buffer`]
    pub fn hold_buffer(&self) {
        self.inner.lock().holding = true;
    }

    /// Drain the buffered amount and raise the low event if supported
    pub fn release_buffer(&self) {
        let notify = {
            let mut inner = self.inner.lock();
            let was_above = inner.buffered > inner.low_threshold;
            inner.buffered = 0;
            inner.holding = false;
            was_above && inner.supports_low_threshold
        };
        if notify {
            self.events.emit(ChannelEvent::BufferedAmountLow);
        }
    }

    /// Force the ready state without raising events
    pub fn force_state(&self, state: ChannelState) {
        self.inner.lock().ready = state;
    }

    /// Raise a channel error
    pub fn fail(&self, message: impl Into<String>) {
        self.events.emit(ChannelEvent::Error(TransportError::Channel(message.into())));
    }

    /// Channel parameters it was created with
    #[must_use]
    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }
}

#[async_trait]
impl DataChannel for LoopbackChannel {
    fn label(&self) -> String {
        self.label.clone()
    }

    fn ready_state(&self) -> ChannelState {
        self.inner.lock().ready
    }

    async fn buffered_amount(&self) -> usize {
        self.inner.lock().buffered
    }

    async fn set_buffered_amount_low_threshold(&self, threshold: usize) -> bool {
        let mut inner = self.inner.lock();
        inner.low_threshold = threshold;
        inner.supports_low_threshold
    }

    async fn send(&self, payload: ChannelPayload) -> TransportResult<()> {
        {
            let mut inner = self.inner.lock();
            if inner.ready != ChannelState::Open {
                return Err(TransportError::InvalidState(format!(
                    "channel is {:?}",
                    inner.ready
                )));
            }
            if inner.holding {
                inner.buffered += payload.len();
            }
        }
        let peer = self.peer.lock().upgrade();
        if let Some(peer) = peer {
            peer.events.emit(ChannelEvent::Message(payload));
        }
        Ok(())
    }

    async fn close(&self) -> TransportResult<()> {
        {
            let mut inner = self.inner.lock();
            if inner.ready == ChannelState::Closed {
                return Ok(());
            }
            inner.ready = ChannelState::Closed;
        }
        self.events.emit(ChannelEvent::Close);
        let peer = self.peer.lock().upgrade();
        if let Some(peer) = peer {
            peer.remote_closed();
        }
        Ok(())
    }

    fn bind(&self, handler: EventHandler<ChannelEvent>) {
        self.events.bind(handler);
    }

    fn unbind(&self) {
        self.events.unbind();
    }
}

#[derive(Default)]
struct EndpointState {
    signaling: Option<SignalingState>,
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    version: u32,
    gathering_started: bool,
    gathered: Vec<IceCandidateInit>,
    gathering_complete: bool,
    connected: bool,
    closed: bool,
    channels: Vec<Arc<LoopbackChannel>>,
    transceivers: Vec<MediaKind>,
    removed_senders: Vec<String>,
    applied_candidates: Vec<IceCandidateInit>,
    fail_next: HashSet<LoopbackOp>,
    missing_channel: bool,
    low_threshold_unsupported: bool,
    gathering_stalls: bool,
    removal_needs_stable: bool,
    stats: Option<Vec<serde_json::Value>>,
}

impl EndpointState {
    fn signaling_state(&self) -> SignalingState {
        self.signaling.unwrap_or(SignalingState::Stable)
    }

    fn take_failure(&mut self, op: LoopbackOp) -> TransportResult<()> {
        if self.fail_next.remove(&op) {
            Err(TransportError::OperationFailed(format!("injected {op:?} failure")))
        } else {
            Ok(())
        }
    }

    fn ensure_open(&self) -> TransportResult<()> {
        if self.closed {
            Err(TransportError::InvalidState("peer connection is closed".to_string()))
        } else {
            Ok(())
        }
    }
}

struct Endpoint {
    state: Mutex<EndpointState>,
    events: HandlerSlot<TransportEvent>,
}

impl Endpoint {
    fn new() -> Self {
        Self {
            state: Mutex::new(EndpointState::default()),
            events: HandlerSlot::new(),
        }
    }
}

struct Link {
    sides: [Endpoint; 2],
}

/// One side of an in-process transport pair
pub struct LoopbackTransport {
    link: Arc<Link>,
    side: usize,
}

fn port_of(side: usize) -> u16 {
    if side == 0 {
        BASE_PORT
    } else {
        BASE_PORT + 1
    }
}

fn host_candidate(foundation: u32, port: u16) -> IceCandidateInit {
    IceCandidateInit::new(format!(
        "candidate:{foundation} 1 udp 2122260223 127.0.0.1 {port} typ host"
    ))
}

impl LoopbackTransport {
    /// Create two linked transports
    #[must_use]
    pub fn pair() -> (Self, Self) {
        let link = Arc::new(Link {
            sides: [Endpoint::new(), Endpoint::new()],
        });
        (
            Self {
                link: Arc::clone(&link),
                side: 0,
            },
            Self { link, side: 1 },
        )
    }

    fn me(&self) -> &Endpoint {
        &self.link.sides[self.side]
    }

    fn other(&self) -> &Endpoint {
        &self.link.sides[1 - self.side]
    }

    /// Make the next call of `op` fail
    pub fn fail_next(&self, op: LoopbackOp) {
        self.me().state.lock().fail_next.insert(op);
    }

    /// Deliver no channel object for channels created on or arriving at this side
    pub fn set_missing_channel(&self, missing: bool) {
        self.me().state.lock().missing_channel = missing;
    }

    /// Channels on this side never raise the buffered-amount-low event
    pub fn set_low_threshold_supported(&self, supported: bool) {
        self.me().state.lock().low_threshold_unsupported = !supported;
    }

    /// Gather candidates but never report the end of gathering
    pub fn set_gathering_stalls(&self, stalls: bool) {
        self.me().state.lock().gathering_stalls = stalls;
    }

    /// `remove_sender` reports not-stable outside the stable signaling state
    pub fn set_removal_needs_stable(&self, needs_stable: bool) {
        self.me().state.lock().removal_needs_stable = needs_stable;
    }

    /// Replace the statistics reports; `None` restores the generated ones
    pub fn set_stats(&self, stats: Option<Vec<serde_json::Value>>) {
        self.me().state.lock().stats = stats;
    }

    /// Raise an ICE connectivity state change on this side
    pub fn set_ice_state(&self, state: IceConnectionState) {
        self.me().events.emit(TransportEvent::IceConnectionStateChange(state));
    }

    /// Raise a connection state change on this side
    pub fn set_connection_state(&self, state: PeerConnectionState) {
        self.me().events.emit(TransportEvent::ConnectionStateChange(state));
    }

    /// Remote candidates applied so far, in order
    #[must_use]
    pub fn applied_candidates(&self) -> Vec<IceCandidateInit> {
        self.me().state.lock().applied_candidates.clone()
    }

    /// Data channels on this side
    #[must_use]
    pub fn channels(&self) -> Vec<Arc<LoopbackChannel>> {
        self.me().state.lock().channels.clone()
    }

    /// Transceivers added on this side
    #[must_use]
    pub fn transceivers(&self) -> Vec<MediaKind> {
        self.me().state.lock().transceivers.clone()
    }

    /// Senders removed on this side
    #[must_use]
    pub fn removed_senders(&self) -> Vec<String> {
        self.me().state.lock().removed_senders.clone()
    }

    /// Current signaling state
    #[must_use]
    pub fn signaling_state(&self) -> SignalingState {
        self.me().state.lock().signaling_state()
    }

    /// Check if `close` was called
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.me().state.lock().closed
    }

    fn make_sdp(&self, state: &mut EndpointState) -> String {
        state.version += 1;
        let mut sdp = format!(
            "v=0\r\no=- {} {} IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\na=group:BUNDLE 0\r\na=ice-options:trickle\r\n\
             m=application 9 UDP/DTLS/SCTP webrtc-datachannel\r\nc=IN IP4 0.0.0.0\r\na=mid:0\r\na=sctp-port:5000\r\n",
            4_000_000 + self.side,
            state.version
        );
        for (mid, kind) in state.transceivers.iter().enumerate() {
            sdp.push_str(&format!("m={kind} 9 UDP/TLS/RTP/SAVPF 96\r\na=mid:{}\r\n", mid + 1));
        }
        sdp
    }

    fn set_signaling(&self, state: SignalingState) {
        let changed = {
            let mut endpoint = self.me().state.lock();
            let changed = endpoint.signaling_state() != state;
            endpoint.signaling = Some(state);
            changed
        };
        if changed {
            self.me().events.emit(TransportEvent::SignalingStateChange(state));
        }
    }

    fn start_gathering(&self) {
        {
            let mut state = self.me().state.lock();
            if state.gathering_started {
                return;
            }
            state.gathering_started = true;
        }
        let link = Arc::clone(&self.link);
        let side = self.side;
        tokio::spawn(async move {
            tokio::time::sleep(GATHER_DELAY).await;
            let endpoint = &link.sides[side];
            let port = port_of(side);
            let candidates = vec![host_candidate(1, port), host_candidate(2, port + 100)];
            let stalls = {
                let mut state = endpoint.state.lock();
                if state.closed {
                    return;
                }
                state.gathered = candidates.clone();
                state.gathering_stalls
            };
            endpoint
                .events
                .emit(TransportEvent::IceGatheringStateChange(IceGatheringState::Gathering));
            for candidate in candidates {
                endpoint.events.emit(TransportEvent::IceCandidate(Some(candidate)));
            }
            if stalls {
                return;
            }
            endpoint.state.lock().gathering_complete = true;
            endpoint.events.emit(TransportEvent::IceCandidate(None));
            endpoint
                .events
                .emit(TransportEvent::IceGatheringStateChange(IceGatheringState::Complete));
        });
    }

    // Both sides hold both descriptions: connect and open the channels.
    fn check_connectivity(&self) {
        let ready = |endpoint: &Endpoint| {
            let state = endpoint.state.lock();
            !state.closed && !state.connected && state.local.is_some() && state.remote.is_some()
        };
        if !ready(self.me()) || !ready(self.other()) {
            return;
        }
        for endpoint in &self.link.sides {
            endpoint.state.lock().connected = true;
        }

        for endpoint in &self.link.sides {
            endpoint
                .events
                .emit(TransportEvent::IceConnectionStateChange(IceConnectionState::Checking));
            endpoint
                .events
                .emit(TransportEvent::IceConnectionStateChange(IceConnectionState::Connected));
            endpoint
                .events
                .emit(TransportEvent::ConnectionStateChange(PeerConnectionState::Connected));
        }

        let mut opened = Vec::new();
        for side in 0..2 {
            let local_channels = self.link.sides[side].state.lock().channels.clone();
            let remote = &self.link.sides[1 - side];
            for channel in local_channels {
                if channel.peer.lock().upgrade().is_some() {
                    continue;
                }
                if channel.config.negotiated {
                    let counterpart = remote
                        .state
                        .lock()
                        .channels
                        .iter()
                        .find(|c| c.config.negotiated && c.config.id == channel.config.id && c.label == channel.label)
                        .cloned();
                    if let Some(counterpart) = counterpart {
                        LoopbackChannel::link(&channel, &counterpart);
                        opened.push(channel);
                        opened.push(counterpart);
                    }
                    continue;
                }

                let (missing, unsupported) = {
                    let state = remote.state.lock();
                    (state.missing_channel, state.low_threshold_unsupported)
                };
                if missing {
                    remote.events.emit(TransportEvent::DataChannel(None));
                    continue;
                }
                let counterpart = LoopbackChannel::new(
                    channel.label.clone(),
                    channel.config.clone(),
                    !unsupported,
                );
                LoopbackChannel::link(&channel, &counterpart);
                remote.state.lock().channels.push(Arc::clone(&counterpart));
                let event_channel: Arc<dyn DataChannel> = Arc::clone(&counterpart) as Arc<dyn DataChannel>;
                remote.events.emit(TransportEvent::DataChannel(Some(event_channel)));
                opened.push(channel);
                opened.push(counterpart);
            }
        }
        for channel in opened {
            channel.open();
        }
    }

    fn default_stats(&self, state: &EndpointState) -> Vec<serde_json::Value> {
        let mut reports = vec![json!({
            "id": "T1",
            "type": "transport",
            "timestamp": 0.0,
            "selectedCandidatePairId": if state.connected { "CP1" } else { "" },
        })];
        if state.connected {
            reports.push(json!({
                "id": "CP1",
                "type": "candidate-pair",
                "localCandidateId": "LC1",
                "remoteCandidateId": "RC1",
                "nominated": true,
            }));
            reports.push(json!({
                "id": "LC1",
                "type": "local-candidate",
                "ip": "127.0.0.1",
                "port": port_of(self.side),
            }));
            reports.push(json!({
                "id": "RC1",
                "type": "remote-candidate",
                "ip": "127.0.0.1",
                "port": port_of(1 - self.side),
            }));
        }
        reports
    }
}

#[async_trait]
impl RtcTransport for LoopbackTransport {
    async fn create_offer(&self, _options: &OfferOptions) -> TransportResult<SessionDescription> {
        let mut state = self.me().state.lock();
        state.ensure_open()?;
        state.take_failure(LoopbackOp::CreateOffer)?;
        let sdp = self.make_sdp(&mut state);
        Ok(SessionDescription::offer(sdp))
    }

    async fn create_answer(&self, _options: &AnswerOptions) -> TransportResult<SessionDescription> {
        let mut state = self.me().state.lock();
        state.ensure_open()?;
        state.take_failure(LoopbackOp::CreateAnswer)?;
        if state.signaling_state() != SignalingState::HaveRemoteOffer {
            return Err(TransportError::InvalidState(
                "no remote offer to answer".to_string(),
            ));
        }
        let sdp = self.make_sdp(&mut state);
        Ok(SessionDescription::answer(sdp))
    }

    async fn set_local_description(&self, description: SessionDescription) -> TransportResult<()> {
        let next = {
            let mut state = self.me().state.lock();
            state.ensure_open()?;
            state.take_failure(LoopbackOp::SetLocalDescription)?;
            let next = match (description.sdp_type, state.signaling_state()) {
                (SdpType::Offer, SignalingState::Stable | SignalingState::HaveLocalOffer) => {
                    SignalingState::HaveLocalOffer
                }
                (SdpType::Answer, SignalingState::HaveRemoteOffer) => SignalingState::Stable,
                (SdpType::Rollback, _) => SignalingState::Stable,
                (sdp_type, current) => {
                    return Err(TransportError::InvalidState(format!(
                        "cannot apply local {sdp_type} in {current:?}"
                    )))
                }
            };
            if description.sdp_type != SdpType::Rollback {
                state.local = Some(description);
            }
            next
        };
        self.set_signaling(next);
        self.start_gathering();
        self.check_connectivity();
        Ok(())
    }

    async fn set_remote_description(&self, description: SessionDescription) -> TransportResult<()> {
        let next = {
            let mut state = self.me().state.lock();
            state.ensure_open()?;
            state.take_failure(LoopbackOp::SetRemoteDescription)?;
            let next = match (description.sdp_type, state.signaling_state()) {
                (SdpType::Offer, SignalingState::Stable | SignalingState::HaveRemoteOffer) => {
                    SignalingState::HaveRemoteOffer
                }
                (SdpType::Answer, SignalingState::HaveLocalOffer) => SignalingState::Stable,
                (SdpType::Rollback, _) => SignalingState::Stable,
                (sdp_type, current) => {
                    return Err(TransportError::InvalidState(format!(
                        "cannot apply remote {sdp_type} in {current:?}"
                    )))
                }
            };
            if description.sdp_type != SdpType::Rollback {
                state.remote = Some(description);
            }
            next
        };
        self.set_signaling(next);
        self.check_connectivity();
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        let state = self.me().state.lock();
        let mut description = state.local.clone()?;
        if state.gathering_complete {
            for candidate in &state.gathered {
                description.sdp.push_str(&format!("a={}\r\n", candidate.candidate));
            }
            description.sdp.push_str("a=end-of-candidates\r\n");
        }
        Some(description)
    }

    async fn add_ice_candidate(&self, candidate: IceCandidateInit) -> TransportResult<()> {
        let mut state = self.me().state.lock();
        state.ensure_open()?;
        state.take_failure(LoopbackOp::AddIceCandidate)?;
        if state.remote.is_none() {
            return Err(TransportError::InvalidState(
                "no remote description".to_string(),
            ));
        }
        if candidate.has_unresolvable_address() {
            return Err(TransportError::OperationFailed(format!(
                "cannot resolve candidate host in '{}'",
                candidate.candidate
            )));
        }
        state.applied_candidates.push(candidate);
        Ok(())
    }

    async fn create_data_channel(
        &self,
        label: &str,
        config: &ChannelConfig,
    ) -> TransportResult<Option<Arc<dyn DataChannel>>> {
        let mut state = self.me().state.lock();
        state.ensure_open()?;
        state.take_failure(LoopbackOp::CreateDataChannel)?;
        if state.missing_channel {
            return Ok(None);
        }
        let channel = LoopbackChannel::new(
            label.to_string(),
            config.clone(),
            !state.low_threshold_unsupported,
        );
        state.channels.push(Arc::clone(&channel));
        Ok(Some(channel as Arc<dyn DataChannel>))
    }

    async fn add_transceiver(
        &self,
        kind: MediaKind,
        _init: Option<serde_json::Value>,
    ) -> TransportResult<()> {
        let mut state = self.me().state.lock();
        state.ensure_open()?;
        state.take_failure(LoopbackOp::AddTransceiver)?;
        state.transceivers.push(kind);
        Ok(())
    }

    async fn remove_sender(&self, sender_id: &str) -> TransportResult<()> {
        let mut state = self.me().state.lock();
        state.ensure_open()?;
        state.take_failure(LoopbackOp::RemoveSender)?;
        if state.removal_needs_stable && state.signaling_state() != SignalingState::Stable {
            return Err(TransportError::NotStable);
        }
        state.removed_senders.push(sender_id.to_string());
        Ok(())
    }

    async fn get_stats(&self) -> TransportResult<Vec<serde_json::Value>> {
        let mut state = self.me().state.lock();
        state.take_failure(LoopbackOp::GetStats)?;
        Ok(match &state.stats {
            Some(stats) => stats.clone(),
            None => self.default_stats(&state),
        })
    }

    async fn close(&self) -> TransportResult<()> {
        let channels = {
            let mut state = self.me().state.lock();
            if state.closed {
                return Ok(());
            }
            state.closed = true;
            state.signaling = Some(SignalingState::Closed);
            state.channels.clone()
        };
        for channel in channels {
            channel.close().await?;
        }
        Ok(())
    }

    fn bind(&self, handler: EventHandler<TransportEvent>) {
        self.me().events.bind(handler);
    }

    fn unbind(&self) {
        self.me().events.unbind();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn recorder<E: Send + 'static>() -> (Arc<Mutex<Vec<E>>>, EventHandler<E>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, Arc::new(move |event: E| sink.lock().push(event)))
    }

    #[tokio::test]
    async fn test_offer_answer_state_machine() {
        let (a, b) = LoopbackTransport::pair();

        let offer = a.create_offer(&OfferOptions::default()).await.unwrap();
        assert!(offer.sdp.contains("a=ice-options:trickle\r\n"));
        assert!(b.create_answer(&AnswerOptions::default()).await.is_err());

        a.set_local_description(offer.clone()).await.unwrap();
        assert_eq!(a.signaling_state(), SignalingState::HaveLocalOffer);

        b.set_remote_description(offer).await.unwrap();
        assert_eq!(b.signaling_state(), SignalingState::HaveRemoteOffer);

        let answer = b.create_answer(&AnswerOptions::default()).await.unwrap();
        b.set_local_description(answer.clone()).await.unwrap();
        a.set_remote_description(answer).await.unwrap();
        assert_eq!(a.signaling_state(), SignalingState::Stable);
        assert_eq!(b.signaling_state(), SignalingState::Stable);

        // An answer with no offer outstanding is rejected
        let stray = SessionDescription::answer("v=0\r\n");
        assert!(a.set_remote_description(stray).await.is_err());
    }

    #[tokio::test]
    async fn test_candidates_need_remote_description() {
        let (a, _b) = LoopbackTransport::pair();
        let candidate = host_candidate(1, 9);
        assert!(a.add_ice_candidate(candidate.clone()).await.is_err());

        a.set_remote_description(SessionDescription::offer("v=0\r\n"))
            .await
            .unwrap();
        a.add_ice_candidate(candidate.clone()).await.unwrap();
        assert_eq!(a.applied_candidates(), vec![candidate]);

        let mdns = IceCandidateInit::new("candidate:1 1 udp 1 abc.local 9 typ host");
        assert!(a.add_ice_candidate(mdns).await.is_err());
    }

    #[tokio::test]
    async fn test_fail_next_is_one_shot() {
        let (a, _b) = LoopbackTransport::pair();
        a.fail_next(LoopbackOp::CreateOffer);
        assert!(a.create_offer(&OfferOptions::default()).await.is_err());
        assert!(a.create_offer(&OfferOptions::default()).await.is_ok());
    }

    #[tokio::test]
    async fn test_channel_delivery_and_buffering() {
        let a = LoopbackChannel::new("x".into(), ChannelConfig::default(), true);
        let b = LoopbackChannel::new("x".into(), ChannelConfig::default(), true);
        LoopbackChannel::link(&a, &b);

        let (seen, handler) = recorder();
        b.bind(handler);
        assert!(a.send(ChannelPayload::from("early")).await.is_err());

        a.open();
        b.open();
        a.hold_buffer();
        a.set_buffered_amount_low_threshold(4).await;
        a.send(ChannelPayload::from("hello")).await.unwrap();
        assert_eq!(a.buffered_amount().await, 5);

        let (low, low_handler) = recorder();
        a.bind(low_handler);
        a.release_buffer();
        assert_eq!(a.buffered_amount().await, 0);
        assert!(matches!(low.lock().last(), Some(ChannelEvent::BufferedAmountLow)));

        let events = seen.lock();
        assert!(matches!(events[0], ChannelEvent::Open));
        assert!(matches!(&events[1], ChannelEvent::Message(ChannelPayload::Text(t)) if t == "hello"));
    }
}
