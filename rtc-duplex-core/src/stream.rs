//! Duplex stream adapter
//!
//! `write` is the backpressured path: before the session connects the single
//! pending-write slot holds the payload, and once connected a completion is
//! held back while the channel buffers more than [`MAX_BUFFERED_AMOUNT`].
//! `send` is fire-and-forget and reports channel errors to the caller only.

use crate::config::{FINISH_GRACE, MAX_BUFFERED_AMOUNT};
use crate::error::PeerError;
use crate::peer::PeerEvent;
use crate::session::{Deferred, Reply, Session, Timer};
use crate::stats::{normalize_reports, StatsReport};
use crate::types::{ChannelPayload, ChannelState};
use std::sync::Arc;

impl Session {
    pub(crate) async fn send(&mut self, payload: ChannelPayload, reply: Reply<()>) {
        if self.destroying {
            let _ = reply.send(Ok(()));
            return;
        }
        let result = match &self.channel {
            Some(channel) if channel.ready_state() == ChannelState::Open => channel
                .send(payload)
                .await
                .map_err(|e| PeerError::DataChannel(e.to_string())),
            _ => Err(PeerError::DataChannel("data channel is not open".to_string())),
        };
        let _ = reply.send(result);
    }

    pub(crate) async fn write(&mut self, payload: ChannelPayload, reply: Reply<()>) {
        if self.destroyed {
            let _ = reply.send(Err(PeerError::Destroyed { operation: "write" }));
            return;
        }
        if self.destroying {
            let _ = reply.send(Ok(()));
            return;
        }
        if self.write_ended {
            let _ = reply.send(Err(PeerError::WriteAfterEnd));
            return;
        }
        if self.pending_write.is_some() || self.held_completion.is_some() {
            let _ = reply.send(Err(PeerError::WriteInProgress));
            return;
        }

        if !self.connected {
            tracing::debug!(peer = %self.id, bytes = payload.len(), "write before connect");
            self.pending_write = Some((payload, reply));
            return;
        }

        let bytes = payload.len();
        if let Err(err) = self.send_on_channel(payload).await {
            let _ = reply.send(Err(err.clone()));
            self.destroy(Some(err));
            return;
        }

        let buffered = self.buffered_amount().await;
        if buffered > MAX_BUFFERED_AMOUNT {
            tracing::debug!(peer = %self.id, buffered, "start backpressure");
            self.held_completion = Some(reply);
        } else {
            tracing::trace!(peer = %self.id, bytes, buffered, "write complete");
            let _ = reply.send(Ok(()));
        }
    }

    async fn send_on_channel(&self, payload: ChannelPayload) -> Result<(), PeerError> {
        match &self.channel {
            Some(channel) => channel
                .send(payload)
                .await
                .map_err(|e| PeerError::DataChannel(e.to_string())),
            None => Err(PeerError::DataChannel("no data channel".to_string())),
        }
    }

    pub(crate) async fn buffered_amount(&self) -> usize {
        match &self.channel {
            Some(channel) => channel.buffered_amount().await,
            None => 0,
        }
    }

    /// Send the write issued before the connection came up
    pub(crate) async fn flush_pending_write(&mut self) {
        let Some((payload, reply)) = self.pending_write.take() else {
            return;
        };
        match self.send_on_channel(payload).await {
            Ok(()) => {
                tracing::debug!(peer = %self.id, "sent chunk from write before connect");
                let _ = reply.send(Ok(()));
            }
            Err(err) => {
                let _ = reply.send(Err(err.clone()));
                self.destroy(Some(err));
            }
        }
    }

    pub(crate) fn on_buffered_amount_low(&mut self) {
        let Some(reply) = self.held_completion.take() else {
            return;
        };
        tracing::debug!(peer = %self.id, "ending backpressure");
        let _ = reply.send(Ok(()));
    }

    pub(crate) async fn backpressure_poll(&mut self) {
        if self.held_completion.is_none() || self.channel.is_none() {
            return;
        }
        if self.buffered_amount().await > MAX_BUFFERED_AMOUNT {
            return;
        }
        self.on_buffered_amount_low();
    }

    pub(crate) fn on_channel_message(&mut self, payload: ChannelPayload) {
        if self.destroyed {
            return;
        }
        let payload = match payload {
            ChannelPayload::Text(text) if !self.config.object_mode => {
                ChannelPayload::Binary(text.into())
            }
            other => other,
        };
        tracing::trace!(peer = %self.id, bytes = payload.len(), "data");
        self.emit(PeerEvent::Data(payload));
    }

    /// End the write side; the whole session follows shortly after
    pub(crate) fn end(&mut self) {
        if self.write_ended || self.destroyed {
            return;
        }
        self.write_ended = true;
        tracing::debug!(peer = %self.id, connected = self.connected, "write side ended");
        if self.connected {
            self.schedule_finish();
        } else {
            self.finish_on_connect = true;
        }
    }

    pub(crate) fn schedule_finish(&mut self) {
        if self.finish_timer.is_none() {
            self.finish_timer = Some(Timer::after(&self.inbox, FINISH_GRACE, Deferred::FinishFlush));
        }
    }

    pub(crate) fn get_stats(&self, reply: Reply<Vec<StatsReport>>) {
        let transport = Arc::clone(&self.transport);
        tokio::spawn(async move {
            let result = transport
                .get_stats()
                .await
                .map(normalize_reports)
                .map_err(|e| PeerError::Stats(e.to_string()));
            let _ = reply.send(result);
        });
    }
}
