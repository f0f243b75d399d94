//! [`RtcTransport`] over the `webrtc` crate's `RTCPeerConnection`
//!
//! Callbacks are registered once at construction and forwarded into a
//! [`HandlerSlot`], so events raised before the session binds are replayed
//! rather than lost.

use crate::config::{AnswerOptions, ChannelConfig, OfferOptions, RtcConfiguration};
use crate::error::{PeerError, TransportError, TransportResult};
use crate::transport::{
    ChannelEvent, DataChannel, EventHandler, HandlerSlot, RtcTransport, TransportEvent,
};
use crate::types::{
    ChannelPayload, ChannelState, IceCandidateInit, IceConnectionState, IceGatheringState,
    MediaKind, PeerConnectionState, SdpType, SessionDescription, SignalingState,
};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::offer_answer_options::{RTCAnswerOptions, RTCOfferOptions};
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::stats::StatsReportType;

fn failed(e: webrtc::Error) -> TransportError {
    TransportError::OperationFailed(e.to_string())
}

fn ice_connection_state(state: RTCIceConnectionState) -> Option<IceConnectionState> {
    Some(match state {
        RTCIceConnectionState::New => IceConnectionState::New,
        RTCIceConnectionState::Checking => IceConnectionState::Checking,
        RTCIceConnectionState::Connected => IceConnectionState::Connected,
        RTCIceConnectionState::Completed => IceConnectionState::Completed,
        RTCIceConnectionState::Disconnected => IceConnectionState::Disconnected,
        RTCIceConnectionState::Failed => IceConnectionState::Failed,
        RTCIceConnectionState::Closed => IceConnectionState::Closed,
        _ => return None,
    })
}

fn ice_gathering_state(state: RTCIceGathererState) -> Option<IceGatheringState> {
    Some(match state {
        RTCIceGathererState::New => IceGatheringState::New,
        RTCIceGathererState::Gathering => IceGatheringState::Gathering,
        RTCIceGathererState::Complete => IceGatheringState::Complete,
        _ => return None,
    })
}

fn signaling_state(state: RTCSignalingState) -> Option<SignalingState> {
    Some(match state {
        RTCSignalingState::Stable => SignalingState::Stable,
        RTCSignalingState::HaveLocalOffer => SignalingState::HaveLocalOffer,
        RTCSignalingState::HaveRemoteOffer => SignalingState::HaveRemoteOffer,
        RTCSignalingState::HaveLocalPranswer => SignalingState::HaveLocalPranswer,
        RTCSignalingState::HaveRemotePranswer => SignalingState::HaveRemotePranswer,
        RTCSignalingState::Closed => SignalingState::Closed,
        _ => return None,
    })
}

fn connection_state(state: RTCPeerConnectionState) -> Option<PeerConnectionState> {
    Some(match state {
        RTCPeerConnectionState::New => PeerConnectionState::New,
        RTCPeerConnectionState::Connecting => PeerConnectionState::Connecting,
        RTCPeerConnectionState::Connected => PeerConnectionState::Connected,
        RTCPeerConnectionState::Disconnected => PeerConnectionState::Disconnected,
        RTCPeerConnectionState::Failed => PeerConnectionState::Failed,
        RTCPeerConnectionState::Closed => PeerConnectionState::Closed,
        _ => return None,
    })
}

fn channel_state(state: RTCDataChannelState) -> ChannelState {
    match state {
        RTCDataChannelState::Open => ChannelState::Open,
        RTCDataChannelState::Closing => ChannelState::Closing,
        RTCDataChannelState::Closed => ChannelState::Closed,
        _ => ChannelState::Connecting,
    }
}

fn from_rtc_description(description: RTCSessionDescription) -> Option<SessionDescription> {
    let sdp_type = match description.sdp_type {
        RTCSdpType::Offer => SdpType::Offer,
        RTCSdpType::Pranswer => SdpType::Pranswer,
        RTCSdpType::Answer => SdpType::Answer,
        RTCSdpType::Rollback => SdpType::Rollback,
        _ => return None,
    };
    Some(SessionDescription {
        sdp_type,
        sdp: description.sdp,
    })
}

#[allow(clippy::field_reassign_with_default)]
fn to_rtc_description(description: SessionDescription) -> TransportResult<RTCSessionDescription> {
    match description.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(description.sdp).map_err(failed),
        SdpType::Answer => RTCSessionDescription::answer(description.sdp).map_err(failed),
        SdpType::Pranswer => RTCSessionDescription::pranswer(description.sdp).map_err(failed),
        SdpType::Rollback => {
            let mut rollback = RTCSessionDescription::default();
            rollback.sdp_type = RTCSdpType::Rollback;
            Ok(rollback)
        }
    }
}

fn rtc_configuration(config: &RtcConfiguration) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: config
            .ice_servers
            .iter()
            .map(|server| RTCIceServer {
                urls: server.urls.clone(),
                username: server.username.clone(),
                credential: server.credential.clone(),
                ..Default::default()
            })
            .collect(),
        ..Default::default()
    }
}

fn channel_init(config: &ChannelConfig) -> TransportResult<RTCDataChannelInit> {
    let negotiated = if config.negotiated {
        Some(config.id.ok_or_else(|| {
            TransportError::InvalidState("negotiated channel requires an id".to_string())
        })?)
    } else {
        None
    };
    Ok(RTCDataChannelInit {
        ordered: config.ordered,
        max_packet_life_time: config.max_packet_life_time,
        max_retransmits: config.max_retransmits,
        protocol: config.protocol.clone(),
        negotiated,
    })
}

/// Data channel adapter over `RTCDataChannel`
pub struct WebRtcChannel {
    inner: Arc<RTCDataChannel>,
    events: Arc<HandlerSlot<ChannelEvent>>,
}

impl WebRtcChannel {
    /// Wrap a channel and start forwarding its callbacks
    pub async fn wrap(inner: Arc<RTCDataChannel>) -> Arc<Self> {
        let events = Arc::new(HandlerSlot::new());

        let slot = Arc::clone(&events);
        inner.on_open(Box::new(move || {
            slot.emit(ChannelEvent::Open);
            Box::pin(async {})
        }));

        let slot = Arc::clone(&events);
        inner.on_message(Box::new(move |message: DataChannelMessage| {
            let payload = if message.is_string {
                ChannelPayload::Text(String::from_utf8_lossy(&message.data).into_owned())
            } else {
                ChannelPayload::Binary(message.data)
            };
            slot.emit(ChannelEvent::Message(payload));
            Box::pin(async {})
        }));

        let slot = Arc::clone(&events);
        inner.on_close(Box::new(move || {
            slot.emit(ChannelEvent::Close);
            Box::pin(async {})
        }));

        let slot = Arc::clone(&events);
        inner.on_error(Box::new(move |e: webrtc::Error| {
            slot.emit(ChannelEvent::Error(TransportError::Channel(e.to_string())));
            Box::pin(async {})
        }));

        let slot = Arc::clone(&events);
        inner
            .on_buffered_amount_low(Box::new(move || {
                slot.emit(ChannelEvent::BufferedAmountLow);
                Box::pin(async {})
            }))
            .await;

        Arc::new(Self { inner, events })
    }
}

#[async_trait]
impl DataChannel for WebRtcChannel {
    fn label(&self) -> String {
        self.inner.label().to_string()
    }

    fn ready_state(&self) -> ChannelState {
        channel_state(self.inner.ready_state())
    }

    async fn buffered_amount(&self) -> usize {
        self.inner.buffered_amount().await
    }

    async fn set_buffered_amount_low_threshold(&self, threshold: usize) -> bool {
        self.inner.set_buffered_amount_low_threshold(threshold).await;
        true
    }

    async fn send(&self, payload: ChannelPayload) -> TransportResult<()> {
        let sent = match payload {
            ChannelPayload::Binary(data) => self.inner.send(&data).await,
            ChannelPayload::Text(text) => self.inner.send_text(text).await,
        };
        sent.map(|_| ()).map_err(|e| TransportError::Channel(e.to_string()))
    }

    async fn close(&self) -> TransportResult<()> {
        self.inner.close().await.map_err(failed)
    }

    fn bind(&self, handler: EventHandler<ChannelEvent>) {
        self.events.bind(handler);
    }

    fn unbind(&self) {
        self.events.unbind();
    }
}

/// Transport backed by a `webrtc` crate peer connection
pub struct WebRtcTransport {
    pc: Arc<RTCPeerConnection>,
    events: Arc<HandlerSlot<TransportEvent>>,
}

impl WebRtcTransport {
    /// Create a peer connection with default codecs and interceptors
    ///
    /// # Errors
    ///
    /// Returns [`PeerError::TransportUnavailable`] if the media engine cannot
    /// be set up, or [`PeerError::Construction`] if the peer connection
    /// cannot be created
    pub async fn new(config: &RtcConfiguration) -> Result<Self, PeerError> {
        let mut media = MediaEngine::default();
        media
            .register_default_codecs()
            .map_err(|e| PeerError::TransportUnavailable(e.to_string()))?;
        let registry = register_default_interceptors(Registry::new(), &mut media)
            .map_err(|e| PeerError::TransportUnavailable(e.to_string()))?;

        let api = APIBuilder::new()
            .with_media_engine(media)
            .with_interceptor_registry(registry)
            .build();

        let pc = api
            .new_peer_connection(rtc_configuration(config))
            .await
            .map_err(|e| {
                tracing::error!("Failed to create peer connection: {}", e);
                PeerError::Construction(e.to_string())
            })?;

        let transport = Self {
            pc: Arc::new(pc),
            events: Arc::new(HandlerSlot::new()),
        };
        transport.forward_callbacks();
        Ok(transport)
    }

    /// Underlying peer connection
    #[must_use]
    pub fn peer_connection(&self) -> &Arc<RTCPeerConnection> {
        &self.pc
    }

    fn forward_callbacks(&self) {
        let slot = Arc::clone(&self.events);
        self.pc
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                let init = match candidate {
                    Some(candidate) => match candidate.to_json() {
                        Ok(init) => Some(IceCandidateInit {
                            candidate: init.candidate,
                            sdp_m_line_index: init.sdp_mline_index,
                            sdp_mid: init.sdp_mid,
                        }),
                        Err(e) => {
                            tracing::warn!("Dropping unserializable local candidate: {}", e);
                            return Box::pin(async {});
                        }
                    },
                    None => None,
                };
                slot.emit(TransportEvent::IceCandidate(init));
                Box::pin(async {})
            }));

        let slot = Arc::clone(&self.events);
        self.pc
            .on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
                if let Some(state) = ice_connection_state(state) {
                    slot.emit(TransportEvent::IceConnectionStateChange(state));
                }
                Box::pin(async {})
            }));

        let slot = Arc::clone(&self.events);
        self.pc
            .on_ice_gathering_state_change(Box::new(move |state: RTCIceGathererState| {
                if let Some(state) = ice_gathering_state(state) {
                    slot.emit(TransportEvent::IceGatheringStateChange(state));
                }
                Box::pin(async {})
            }));

        let slot = Arc::clone(&self.events);
        self.pc
            .on_signaling_state_change(Box::new(move |state: RTCSignalingState| {
                if let Some(state) = signaling_state(state) {
                    slot.emit(TransportEvent::SignalingStateChange(state));
                }
                Box::pin(async {})
            }));

        let slot = Arc::clone(&self.events);
        self.pc
            .on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
                if let Some(state) = connection_state(state) {
                    slot.emit(TransportEvent::ConnectionStateChange(state));
                }
                Box::pin(async {})
            }));

        let slot = Arc::clone(&self.events);
        self.pc
            .on_data_channel(Box::new(move |channel: Arc<RTCDataChannel>| {
                let slot = Arc::clone(&slot);
                Box::pin(async move {
                    let channel: Arc<dyn DataChannel> = WebRtcChannel::wrap(channel).await;
                    slot.emit(TransportEvent::DataChannel(Some(channel)));
                })
            }));
    }
}

#[async_trait]
impl RtcTransport for WebRtcTransport {
    async fn create_offer(&self, options: &OfferOptions) -> TransportResult<SessionDescription> {
        let options = RTCOfferOptions {
            ice_restart: options.ice_restart,
            voice_activity_detection: options.voice_activity_detection.unwrap_or(true),
        };
        let offer = self.pc.create_offer(Some(options)).await.map_err(failed)?;
        from_rtc_description(offer)
            .ok_or_else(|| TransportError::OperationFailed("offer has no type".to_string()))
    }

    async fn create_answer(&self, options: &AnswerOptions) -> TransportResult<SessionDescription> {
        let options = RTCAnswerOptions {
            voice_activity_detection: options.voice_activity_detection.unwrap_or(true),
        };
        let answer = self.pc.create_answer(Some(options)).await.map_err(failed)?;
        from_rtc_description(answer)
            .ok_or_else(|| TransportError::OperationFailed("answer has no type".to_string()))
    }

    async fn set_local_description(&self, description: SessionDescription) -> TransportResult<()> {
        let description = to_rtc_description(description)?;
        self.pc
            .set_local_description(description)
            .await
            .map_err(failed)
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> TransportResult<()> {
        let description = to_rtc_description(description)?;
        self.pc
            .set_remote_description(description)
            .await
            .map_err(failed)
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.pc
            .local_description()
            .await
            .and_then(from_rtc_description)
    }

    async fn add_ice_candidate(&self, candidate: IceCandidateInit) -> TransportResult<()> {
        self.pc
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_m_line_index,
                username_fragment: None,
            })
            .await
            .map_err(failed)
    }

    async fn create_data_channel(
        &self,
        label: &str,
        config: &ChannelConfig,
    ) -> TransportResult<Option<Arc<dyn DataChannel>>> {
        let init = channel_init(config)?;
        let channel = self
            .pc
            .create_data_channel(label, Some(init))
            .await
            .map_err(failed)?;
        let channel: Arc<dyn DataChannel> = WebRtcChannel::wrap(channel).await;
        Ok(Some(channel))
    }

    async fn add_transceiver(
        &self,
        kind: MediaKind,
        init: Option<serde_json::Value>,
    ) -> TransportResult<()> {
        if init.is_some() {
            tracing::trace!(%kind, "transceiver init is not forwarded to the webrtc backend");
        }
        let codec_type = match kind {
            MediaKind::Audio => RTPCodecType::Audio,
            MediaKind::Video => RTPCodecType::Video,
        };
        self.pc
            .add_transceiver_from_kind(codec_type, None)
            .await
            .map(|_| ())
            .map_err(failed)
    }

    async fn remove_sender(&self, sender_id: &str) -> TransportResult<()> {
        for sender in self.pc.get_senders().await {
            let Some(track) = sender.track().await else {
                continue;
            };
            if track.id() == sender_id {
                return self.pc.remove_track(&sender).await.map_err(failed);
            }
        }
        Err(TransportError::OperationFailed(format!(
            "no sender for track {sender_id}"
        )))
    }

    async fn get_stats(&self) -> TransportResult<Vec<serde_json::Value>> {
        let report = self.pc.get_stats().await;
        let mut reports = Vec::new();
        for (id, stats) in report.reports {
            let value = match stats {
                StatsReportType::CandidatePair(pair) => json!({
                    "id": id,
                    "type": "candidate-pair",
                    "localCandidateId": pair.local_candidate_id,
                    "remoteCandidateId": pair.remote_candidate_id,
                    "nominated": pair.nominated,
                    "selected": pair.nominated,
                }),
                StatsReportType::LocalCandidate(candidate) => json!({
                    "id": id,
                    "type": "local-candidate",
                    "ip": candidate.ip,
                    "port": candidate.port,
                }),
                StatsReportType::RemoteCandidate(candidate) => json!({
                    "id": id,
                    "type": "remote-candidate",
                    "ip": candidate.ip,
                    "port": candidate.port,
                }),
                _ => continue,
            };
            reports.push(value);
        }
        Ok(reports)
    }

    async fn close(&self) -> TransportResult<()> {
        self.pc.close().await.map_err(failed)
    }

    fn bind(&self, handler: EventHandler<TransportEvent>) {
        self.events.bind(handler);
    }

    fn unbind(&self) {
        self.events.unbind();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_state_mapping() {
        assert_eq!(
            ice_connection_state(RTCIceConnectionState::Completed),
            Some(IceConnectionState::Completed)
        );
        assert_eq!(ice_connection_state(RTCIceConnectionState::Unspecified), None);
        assert_eq!(
            signaling_state(RTCSignalingState::HaveRemoteOffer),
            Some(SignalingState::HaveRemoteOffer)
        );
        assert_eq!(channel_state(RTCDataChannelState::Unspecified), ChannelState::Connecting);
    }

    #[test]
    fn test_negotiated_channel_needs_id() {
        let config = ChannelConfig {
            negotiated: true,
            ..Default::default()
        };
        assert!(channel_init(&config).is_err());

        let config = ChannelConfig {
            negotiated: true,
            id: Some(3),
            ..Default::default()
        };
        assert_eq!(channel_init(&config).unwrap().negotiated, Some(3));
    }

    #[tokio::test]
    async fn test_offer_carries_data_channel() {
        let transport = WebRtcTransport::new(&RtcConfiguration { ice_servers: vec![] })
            .await
            .unwrap();
        transport
            .create_data_channel("test", &ChannelConfig::default())
            .await
            .unwrap();
        let offer = transport.create_offer(&OfferOptions::default()).await.unwrap();
        assert_eq!(offer.sdp_type, SdpType::Offer);
        assert!(offer.sdp.contains("m=application"));
        transport.close().await.unwrap();
    }
}
