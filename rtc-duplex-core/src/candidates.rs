//! ICE candidate handling
//!
//! Remote candidates that arrive before a remote description is committed
//! wait in a [`CandidateBuffer`] and are applied in arrival order right after
//! the description lands. Local candidates are relayed as signals when
//! trickling; the end-of-gathering marker (or the ICE-complete timeout)
//! releases descriptions held back for non-trickle sessions.

use crate::error::{PeerError, TransportResult};
use crate::peer::PeerEvent;
use crate::session::{Completion, Deferred, Session, Timer};
use crate::signaling::SignalMessage;
use crate::types::IceCandidateInit;
use std::collections::VecDeque;
use std::sync::Arc;

/// FIFO of remote candidates waiting for a remote description
#[derive(Debug, Default)]
pub struct CandidateBuffer {
    pending: VecDeque<IceCandidateInit>,
}

impl CandidateBuffer {
    /// Create an empty buffer
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a candidate at the tail
    pub fn enqueue(&mut self, candidate: IceCandidateInit) {
        self.pending.push_back(candidate);
    }

    /// Remove and return every buffered candidate in arrival order
    pub fn drain(&mut self) -> Vec<IceCandidateInit> {
        self.pending.drain(..).collect()
    }

    /// Number of buffered candidates
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Check if nothing is buffered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl Session {
    /// Apply a remote candidate now, or hold it until a remote description exists
    pub(crate) fn add_or_buffer_candidate(&mut self, candidate: IceCandidateInit) {
        if self.remote_description_set {
            self.apply_candidate(candidate);
        } else {
            tracing::trace!(peer = %self.id, candidate = %candidate.candidate, "buffering remote candidate");
            self.pending_candidates.enqueue(candidate);
        }
    }

    /// Apply every buffered candidate in arrival order
    pub(crate) fn flush_candidates(&mut self) {
        let pending = self.pending_candidates.drain();
        if !pending.is_empty() {
            tracing::debug!(peer = %self.id, count = pending.len(), "flushing buffered candidates");
        }
        for candidate in pending {
            self.apply_candidate(candidate);
        }
    }

    fn apply_candidate(&mut self, candidate: IceCandidateInit) {
        let transport = Arc::clone(&self.transport);
        self.submit(async move {
            let result = transport.add_ice_candidate(candidate.clone()).await;
            Completion::CandidateAdded(candidate, result)
        });
    }

    pub(crate) fn on_candidate_added(&mut self, candidate: &IceCandidateInit, result: TransportResult<()>) {
        let Err(e) = result else {
            return;
        };
        if self.destroyed {
            return;
        }
        if candidate.has_unresolvable_address() {
            tracing::warn!(
                peer = %self.id,
                candidate = %candidate.candidate,
                error = %e,
                "Ignoring unsupported ICE candidate"
            );
        } else {
            self.destroy(Some(PeerError::AddIceCandidate(e.to_string())));
        }
    }

    /// Local candidate discovered, or `None` once gathering finished
    pub(crate) async fn on_local_candidate(&mut self, candidate: Option<IceCandidateInit>) {
        if self.destroyed {
            return;
        }
        match candidate {
            Some(candidate) => {
                if self.config.trickle {
                    self.emit(PeerEvent::Signal(SignalMessage::Candidate(candidate)));
                }
                self.start_ice_complete_timeout();
            }
            None if !self.ice_complete => {
                self.ice_complete = true;
                self.on_ice_complete().await;
            }
            None => {}
        }
    }

    fn start_ice_complete_timeout(&mut self) {
        if self.ice_complete_timer.is_some() {
            return;
        }
        tracing::debug!(peer = %self.id, "started iceComplete timeout");
        self.ice_complete_timer = Some(Timer::after(
            &self.inbox,
            self.config.ice_complete_timeout,
            Deferred::IceCompleteTimeout,
        ));
    }

    pub(crate) async fn on_ice_complete_timeout(&mut self) {
        if self.destroyed || self.ice_complete {
            return;
        }
        self.ice_complete = true;
        tracing::debug!(peer = %self.id, "iceComplete timeout completed");
        self.emit(PeerEvent::IceTimeout);
        self.on_ice_complete().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn candidate(n: usize) -> IceCandidateInit {
        IceCandidateInit::new(format!("candidate:{n} 1 udp 1 10.0.0.{} 9 typ host", n % 250))
    }

    #[test]
    fn test_drain_empties_buffer() {
        let mut buffer = CandidateBuffer::new();
        buffer.enqueue(candidate(1));
        buffer.enqueue(candidate(2));
        assert_eq!(buffer.len(), 2);

        let drained = buffer.drain();
        assert_eq!(drained, vec![candidate(1), candidate(2)]);
        assert!(buffer.is_empty());
        assert!(buffer.drain().is_empty());
    }

    proptest! {
        #[test]
        fn prop_drain_preserves_arrival_order(ids in prop::collection::vec(0usize..10_000, 0..64)) {
            let mut buffer = CandidateBuffer::new();
            for id in &ids {
                buffer.enqueue(candidate(*id));
            }
            let drained: Vec<_> = buffer.drain();
            let expected: Vec<_> = ids.iter().map(|id| candidate(*id)).collect();
            prop_assert_eq!(drained, expected);
        }
    }
}
