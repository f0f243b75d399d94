//! Connection readiness
//!
//! A session is connected once ICE reports connectivity and the data channel
//! is open. Before announcing it, the session polls statistics to resolve the
//! endpoints of the selected candidate pair. Statistics failures only cost
//! the address information.

use crate::config::{BACKPRESSURE_POLL_INTERVAL, STATS_MAX_ATTEMPTS, STATS_RETRY_INTERVAL};
use crate::error::{PeerError, TransportResult};
use crate::peer::PeerEvent;
use crate::session::{Completion, Deferred, Session, Timer};
use crate::stats::{normalize_reports, CandidateIndex, PairSelection};
use crate::types::{IceConnectionState, PeerConnectionState};
use std::sync::Arc;

impl Session {
    pub(crate) fn on_ice_state_change(&mut self) {
        if self.destroyed {
            return;
        }
        let ice_connection_state = self.ice_connection_state;
        let ice_gathering_state = self.ice_gathering_state;
        tracing::debug!(
            peer = %self.id,
            connection = ?ice_connection_state,
            gathering = ?ice_gathering_state,
            "iceStateChange"
        );
        self.emit(PeerEvent::IceStateChange {
            ice_connection_state,
            ice_gathering_state,
        });

        match ice_connection_state {
            state if state.is_ready() => {
                self.pc_ready = true;
                self.maybe_ready();
            }
            IceConnectionState::Failed => self.destroy(Some(PeerError::IceConnectionFailure)),
            IceConnectionState::Closed => self.destroy(Some(PeerError::IceConnectionClosed)),
            _ => {}
        }
    }

    pub(crate) fn on_connection_state_change(&mut self, state: PeerConnectionState) {
        if self.destroyed || self.destroying {
            return;
        }
        if state == PeerConnectionState::Failed {
            self.destroy(Some(PeerError::ConnectionFailure));
        }
    }

    pub(crate) fn on_channel_open(&mut self) {
        if self.destroyed {
            return;
        }
        self.shared.set_channel_open(true);
        if self.connected {
            return;
        }
        tracing::debug!(peer = %self.id, "on channel open");
        self.channel_ready = true;
        self.maybe_ready();
    }

    fn maybe_ready(&mut self) {
        tracing::trace!(
            peer = %self.id,
            pc_ready = self.pc_ready,
            channel_ready = self.channel_ready,
            "maybeReady"
        );
        if self.connected || self.connecting || !self.pc_ready || !self.channel_ready {
            return;
        }
        self.connecting = true;
        self.stats_attempts = 0;
        self.find_candidate_pair();
    }

    pub(crate) fn find_candidate_pair(&mut self) {
        if self.destroyed || self.destroying {
            return;
        }
        self.stats_attempts += 1;
        let transport = Arc::clone(&self.transport);
        self.spawn_detached(async move { Completion::ReadinessStats(transport.get_stats().await) });
    }

    pub(crate) async fn on_readiness_stats(&mut self, result: TransportResult<Vec<serde_json::Value>>) {
        if self.destroyed || self.destroying {
            return;
        }
        let raw = result.unwrap_or_else(|e| {
            tracing::warn!(peer = %self.id, error = %e, "getStats failed, continuing without addresses");
            Vec::new()
        });
        let selection = CandidateIndex::build(&normalize_reports(raw)).selection();

        match selection {
            PairSelection::Found { local, remote } => {
                tracing::debug!(
                    peer = %self.id,
                    local = ?local.address,
                    local_port = ?local.port,
                    remote = ?remote.address,
                    remote_port = ?remote.port,
                    "connect"
                );
                self.shared.set_addresses(local, remote);
            }
            PairSelection::Retry if self.stats_attempts < STATS_MAX_ATTEMPTS => {
                self.stats_timer = Some(Timer::after(
                    &self.inbox,
                    STATS_RETRY_INTERVAL,
                    Deferred::FindCandidatePair,
                ));
                return;
            }
            PairSelection::Retry => {
                tracing::warn!(
                    peer = %self.id,
                    attempts = self.stats_attempts,
                    "no selected candidate pair, connecting without addresses"
                );
            }
            PairSelection::Unavailable => {
                tracing::debug!(peer = %self.id, "stats expose no candidates");
            }
        }

        self.mark_connected().await;
    }

    async fn mark_connected(&mut self) {
        self.stats_timer = None;
        self.connecting = false;
        self.connected = true;
        self.shared.set_connected(true);

        // The chunk buffered before connect goes out ahead of the event
        self.flush_pending_write().await;
        if self.destroying {
            return;
        }
        self.emit(PeerEvent::Connect);

        if !self.low_threshold_supported {
            self.backpressure_timer = Some(Timer::every(
                &self.inbox,
                BACKPRESSURE_POLL_INTERVAL,
                Deferred::BackpressurePoll,
            ));
        }
        if self.finish_on_connect {
            self.schedule_finish();
        }
    }
}
