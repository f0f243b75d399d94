//! Inbound signal routing

use crate::error::{PeerError, TransportResult};
use crate::session::{Completion, Session};
use crate::signaling::SignalData;
use crate::types::SdpType;
use std::sync::Arc;

impl Session {
    /// Route one inbound signal
    ///
    /// Every branch present in the message is processed, in a fixed order:
    /// renegotiate, transceiver request, candidate, description. A message
    /// with no branch at all tears the session down.
    pub(crate) fn signal(&mut self, data: SignalData) {
        if self.destroying {
            return;
        }
        tracing::debug!(peer = %self.id, kind = data.label(), "signal()");

        if data.is_empty() {
            self.destroy(Some(PeerError::InvalidSignal(
                "signal() called with invalid signal data".to_string(),
            )));
            return;
        }

        if data.wants_renegotiate() && self.role.is_initiator() {
            tracing::debug!(peer = %self.id, "got request to renegotiate");
            self.needs_negotiation();
        }

        if let Some(request) = data.transceiver_request.clone() {
            if self.role.is_initiator() {
                tracing::debug!(peer = %self.id, kind = %request.kind, "got request for transceiver");
                self.add_transceiver(request.kind, request.init);
            }
        }

        if let Some(candidate) = data.remote_candidate() {
            self.add_or_buffer_candidate(candidate.clone());
        } else if data.is_end_of_candidates() {
            tracing::trace!(peer = %self.id, "remote end of candidates");
        }

        match data.description() {
            Some(Ok(description)) => {
                let sdp_type = description.sdp_type;
                let transport = Arc::clone(&self.transport);
                self.submit(async move {
                    let result = transport.set_remote_description(description).await;
                    Completion::RemoteDescriptionSet(sdp_type, result)
                });
            }
            Some(Err(reason)) => {
                self.destroy(Some(PeerError::SetRemoteDescription(reason)));
            }
            None => {}
        }
    }

    pub(crate) fn on_remote_description_set(&mut self, sdp_type: SdpType, result: TransportResult<()>) {
        if self.destroyed {
            return;
        }
        if let Err(e) = result {
            self.destroy(Some(PeerError::SetRemoteDescription(e.to_string())));
            return;
        }
        tracing::debug!(peer = %self.id, %sdp_type, "remote description set");

        self.remote_description_set = true;
        self.flush_candidates();

        if sdp_type == SdpType::Offer {
            self.create_answer();
        }
    }
}
