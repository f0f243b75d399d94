//! Data channel lifecycle
//!
//! Binds the session to its data channel, whether created locally or opened
//! by the remote peer, and works around channels that stay in the closing
//! state without ever raising a close event.

use crate::config::{CHANNEL_CLOSING_TIMEOUT, MAX_BUFFERED_AMOUNT};
use crate::error::{PeerError, TransportError};
use crate::session::{Deferred, Session, Task, Timer};
use crate::transport::DataChannel;
use crate::types::ChannelState;
use std::sync::Arc;

impl Session {
    /// Adopt a data channel; a missing channel object is fatal
    pub(crate) async fn setup_channel(&mut self, channel: Option<Arc<dyn DataChannel>>) {
        let Some(channel) = channel else {
            self.destroy(Some(PeerError::DataChannel(
                "Data channel event is missing channel object".to_string(),
            )));
            return;
        };

        self.low_threshold_supported = channel
            .set_buffered_amount_low_threshold(MAX_BUFFERED_AMOUNT)
            .await;

        let label = channel.label();
        tracing::debug!(
            peer = %self.id,
            label = %label,
            low_threshold = self.low_threshold_supported,
            "data channel bound"
        );
        self.shared.set_channel_name(label);

        let inbox = self.inbox.clone();
        channel.bind(Arc::new(move |event| {
            let _ = inbox.send(Task::Channel(event));
        }));
        self.channel = Some(channel);

        self.closing_observed = false;
        self.closing_timer = Some(Timer::every(
            &self.inbox,
            CHANNEL_CLOSING_TIMEOUT,
            Deferred::ClosingPoll,
        ));
    }

    /// Channel opened by the remote peer
    pub(crate) async fn on_remote_channel(&mut self, channel: Option<Arc<dyn DataChannel>>) {
        if self.destroyed {
            return;
        }
        if self.role.is_initiator() || self.config.channel_config.negotiated || self.channel.is_some() {
            tracing::debug!(peer = %self.id, "ignoring unexpected remote data channel");
            return;
        }
        self.setup_channel(channel).await;
    }

    pub(crate) fn on_channel_close(&mut self) {
        self.shared.set_channel_open(false);
        if self.destroyed {
            return;
        }
        tracing::debug!(peer = %self.id, "on channel close");
        self.destroy(None);
    }

    pub(crate) fn on_channel_error(&mut self, error: TransportError) {
        let message = match error {
            TransportError::Channel(message) => message,
            other => other.to_string(),
        };
        self.destroy(Some(PeerError::DataChannel(message)));
    }

    /// Synthesize a close after two consecutive polls see the channel closing
    pub(crate) fn closing_poll(&mut self) {
        let closing = self
            .channel
            .as_ref()
            .is_some_and(|channel| channel.ready_state() == ChannelState::Closing);
        if !closing {
            self.closing_observed = false;
            return;
        }
        if self.closing_observed {
            tracing::debug!(peer = %self.id, "channel stuck closing");
            self.on_channel_close();
        }
        self.closing_observed = true;
    }
}
