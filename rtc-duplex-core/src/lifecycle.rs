//! Session teardown

use crate::error::PeerError;
use crate::peer::PeerEvent;
use crate::session::{Deferred, Session};

impl Session {
    /// Begin teardown; later calls are ignored
    ///
    /// The actual teardown runs one tick later so that events already queued
    /// for the session are still delivered.
    pub(crate) fn destroy(&mut self, err: Option<PeerError>) {
        if self.destroyed || self.destroying {
            return;
        }
        self.destroying = true;
        self.shared.begin_destroy();
        match &err {
            Some(e) => tracing::debug!(peer = %self.id, error = %e, code = %e.code(), "destroying"),
            None => tracing::debug!(peer = %self.id, "destroying"),
        }
        self.defer(Deferred::Teardown(err));
    }

    pub(crate) async fn teardown(&mut self, err: Option<PeerError>) {
        if self.destroyed {
            return;
        }
        if self.connected {
            self.emit(PeerEvent::Disconnect);
        }
        self.connected = false;
        self.shared.set_connected(false);
        self.pc_ready = false;
        self.channel_ready = false;
        self.connecting = false;

        self.closing_timer = None;
        self.backpressure_timer = None;
        self.stats_timer = None;
        self.ice_complete_timer = None;
        self.finish_timer = None;
        self.stop_operations();

        // Dropping the replies fails the waiting writes with a destroyed error
        self.pending_write = None;
        self.held_completion = None;
        self.awaiting_ice_complete = None;

        if let Some(channel) = self.channel.take() {
            channel.unbind();
            if let Err(e) = channel.close().await {
                tracing::trace!(peer = %self.id, error = %e, "channel close failed");
            }
        }
        self.transport.unbind();
        if let Err(e) = self.transport.close().await {
            tracing::trace!(peer = %self.id, error = %e, "transport close failed");
        }

        self.destroyed = true;
        self.shared.mark_destroyed();

        if let Some(err) = err {
            self.emit(PeerEvent::Error(err));
        }
        tracing::debug!(peer = %self.id, "close");
        self.emit(PeerEvent::Close);
    }
}
