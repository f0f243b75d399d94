//! Offer/answer negotiation
//!
//! At most one negotiation cycle is in flight. Triggers that arrive while one
//! is running set `queued_negotiation`, and the queued cycle starts when the
//! signaling state returns to stable. Local state changes go through
//! [`Session::needs_negotiation`], which coalesces every trigger of one tick
//! into a single microtask.

use crate::error::{PeerError, TransportError, TransportResult};
use crate::peer::PeerEvent;
use crate::session::{Completion, Deferred, Microtask, Session};
use crate::signaling::{filter_trickle, SignalMessage, TransceiverRequest};
use crate::types::{MediaKind, SessionDescription, SignalingState};
use std::sync::Arc;

impl Session {
    /// Batch a negotiation request with the rest of this tick
    pub(crate) fn needs_negotiation(&mut self) {
        tracing::trace!(peer = %self.id, "needs negotiation");
        if self.batched_negotiation {
            return;
        }
        self.batched_negotiation = true;
        self.queue_microtask(Microtask::NeedsNegotiation);
    }

    pub(crate) fn run_batched_negotiation(&mut self) {
        self.batched_negotiation = false;
        if self.role.is_initiator() || !self.first_negotiation {
            tracing::debug!(peer = %self.id, "starting batched negotiation");
            self.negotiate();
        } else {
            tracing::debug!(peer = %self.id, "responder initial negotiation request discarded");
        }
        self.first_negotiation = false;
    }

    /// Start a negotiation cycle, or queue one behind the current cycle
    pub(crate) fn negotiate(&mut self) {
        if self.destroying {
            return;
        }
        if self.is_negotiating {
            tracing::debug!(peer = %self.id, "already negotiating, queueing");
            self.queued_negotiation = true;
        } else if self.role.is_initiator() {
            tracing::debug!(peer = %self.id, "start negotiation");
            self.defer(Deferred::CreateOffer);
        } else {
            tracing::debug!(peer = %self.id, "requesting negotiation from initiator");
            self.emit(PeerEvent::Signal(SignalMessage::Renegotiate));
        }
        self.is_negotiating = true;
    }

    pub(crate) fn create_offer(&mut self) {
        if self.destroyed {
            return;
        }
        let transport = Arc::clone(&self.transport);
        let options = self.config.offer_options.clone();
        self.submit(async move { Completion::OfferCreated(transport.create_offer(&options).await) });
    }

    pub(crate) fn create_answer(&mut self) {
        if self.destroyed {
            return;
        }
        let transport = Arc::clone(&self.transport);
        let options = self.config.answer_options.clone();
        self.submit(async move { Completion::AnswerCreated(transport.create_answer(&options).await) });
    }

    pub(crate) fn on_offer_created(&mut self, result: TransportResult<SessionDescription>) {
        if self.destroyed {
            return;
        }
        match result {
            Ok(offer) => self.commit_local_description(offer),
            Err(e) => self.destroy(Some(PeerError::CreateOffer(e.to_string()))),
        }
    }

    pub(crate) fn on_answer_created(&mut self, result: TransportResult<SessionDescription>) {
        if self.destroyed {
            return;
        }
        match result {
            Ok(answer) => self.commit_local_description(answer),
            Err(e) => self.destroy(Some(PeerError::CreateAnswer(e.to_string()))),
        }
    }

    fn commit_local_description(&mut self, mut description: SessionDescription) {
        if self.config.strips_trickle() {
            description.sdp = filter_trickle(&description.sdp);
        }
        description.sdp = self.config.transform_sdp(description.sdp);

        let transport = Arc::clone(&self.transport);
        self.submit(async move {
            let result = transport.set_local_description(description.clone()).await;
            Completion::LocalDescriptionSet(description, result)
        });
    }

    pub(crate) async fn on_local_description_set(
        &mut self,
        description: SessionDescription,
        result: TransportResult<()>,
    ) {
        if self.destroyed {
            return;
        }
        if let Err(e) = result {
            self.destroy(Some(PeerError::SetLocalDescription(e.to_string())));
            return;
        }
        tracing::debug!(peer = %self.id, sdp_type = %description.sdp_type, "local description set");
        if self.config.trickle || self.ice_complete {
            self.send_description(description).await;
        } else {
            // Sent once gathering finishes
            self.awaiting_ice_complete = Some(description);
        }
    }

    /// Release a description held back until gathering finished
    pub(crate) async fn on_ice_complete(&mut self) {
        if let Some(description) = self.awaiting_ice_complete.take() {
            self.send_description(description).await;
        }
    }

    // The committed description may carry gathered candidates; prefer it.
    async fn send_description(&mut self, fallback: SessionDescription) {
        if self.destroyed {
            return;
        }
        let description = self.transport.local_description().await.unwrap_or(fallback);
        tracing::debug!(peer = %self.id, sdp_type = %description.sdp_type, "signal");
        self.emit(PeerEvent::Signal(SignalMessage::Description(description)));
    }

    pub(crate) fn on_signaling_state_change(&mut self, state: SignalingState) {
        if self.destroyed {
            return;
        }
        if state == SignalingState::Stable {
            self.is_negotiating = false;

            let awaiting = std::mem::take(&mut self.senders_awaiting_stable);
            if !awaiting.is_empty() {
                tracing::debug!(peer = %self.id, count = awaiting.len(), "flushing sender queue");
            }
            for sender_id in awaiting {
                self.submit_remove_sender(sender_id);
                self.queued_negotiation = true;
            }

            if self.queued_negotiation {
                self.queued_negotiation = false;
                self.needs_negotiation();
            } else {
                tracing::debug!(peer = %self.id, "negotiated");
                self.emit(PeerEvent::Negotiated);
            }
        }
        self.emit(PeerEvent::SignalingStateChange(state));
    }

    /// Add a transceiver (initiator) or ask the initiator to add one (responder)
    pub(crate) fn add_transceiver(&mut self, kind: MediaKind, init: Option<serde_json::Value>) {
        if self.destroying {
            return;
        }
        if self.role.is_initiator() {
            let transport = Arc::clone(&self.transport);
            self.submit(async move {
                Completion::TransceiverAdded(kind, transport.add_transceiver(kind, init).await)
            });
            self.needs_negotiation();
        } else {
            self.emit(PeerEvent::Signal(SignalMessage::TransceiverRequest(
                TransceiverRequest { kind, init },
            )));
        }
    }

    pub(crate) fn on_transceiver_added(&mut self, kind: MediaKind, result: TransportResult<()>) {
        if self.destroyed {
            return;
        }
        if let Err(e) = result {
            self.destroy(Some(PeerError::AddTransceiver(format!("{kind}: {e}"))));
        }
    }

    /// Remove a sender and renegotiate
    pub(crate) fn remove_sender(&mut self, sender_id: String) {
        if self.destroying {
            return;
        }
        self.submit_remove_sender(sender_id);
        self.needs_negotiation();
    }

    fn submit_remove_sender(&mut self, sender_id: String) {
        let transport = Arc::clone(&self.transport);
        self.submit(async move {
            let result = transport.remove_sender(&sender_id).await;
            Completion::SenderRemoved(sender_id, result)
        });
    }

    pub(crate) fn on_sender_removed(&mut self, sender_id: String, result: TransportResult<()>) {
        if self.destroyed {
            return;
        }
        match result {
            Ok(()) => tracing::debug!(peer = %self.id, sender = %sender_id, "sender removed"),
            Err(TransportError::NotStable) => {
                tracing::debug!(peer = %self.id, sender = %sender_id, "sender removal waits for stable");
                self.senders_awaiting_stable.push(sender_id);
            }
            Err(e) => self.destroy(Some(PeerError::RemoveTrack(e.to_string()))),
        }
    }
}
