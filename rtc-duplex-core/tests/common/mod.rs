//! Shared harness: two sessions over a loopback pair with a signal relay

#![allow(dead_code)]

use rtc_duplex_core::{
    LoopbackTransport, Peer, PeerBuilder, PeerEvent, PeerEvents, SdpType, SignalMessage,
};
use std::sync::Arc;
use std::time::Duration;

/// One session plus everything it reported so far
pub struct Side {
    pub peer: Peer,
    pub events: PeerEvents,
    pub transport: Arc<LoopbackTransport>,
    pub log: Vec<PeerEvent>,
    /// Signals not yet forwarded to the other side
    pub outbox: Vec<SignalMessage>,
    /// Forward signals to the other side as they are emitted
    pub relay: bool,
    /// Forward signals as JSON text instead of typed messages
    pub relay_json: bool,
}

/// Session logs go to the test output when `RUST_LOG` is set
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

impl Side {
    pub async fn start(builder: PeerBuilder, transport: LoopbackTransport) -> Self {
        init_tracing();
        let transport = Arc::new(transport);
        let (peer, events) = builder.build(transport.clone()).await.unwrap();
        Self {
            peer,
            events,
            transport,
            log: Vec::new(),
            outbox: Vec::new(),
            relay: true,
            relay_json: false,
        }
    }

    pub fn count(&self, name: &str) -> usize {
        self.log.iter().filter(|e| e.name() == name).count()
    }

    pub fn has(&self, name: &str) -> bool {
        self.count(name) > 0
    }

    pub fn connected(&self) -> bool {
        self.has("connect")
    }

    pub fn closed(&self) -> bool {
        self.has("close")
    }

    pub fn errors(&self) -> Vec<rtc_duplex_core::PeerError> {
        self.log
            .iter()
            .filter_map(|e| match e {
                PeerEvent::Error(err) => Some(err.clone()),
                _ => None,
            })
            .collect()
    }

    /// Every signal this side emitted, relayed or not
    pub fn signals(&self) -> Vec<SignalMessage> {
        self.log
            .iter()
            .filter_map(|e| match e {
                PeerEvent::Signal(message) => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn descriptions(&self, sdp_type: SdpType) -> Vec<String> {
        self.signals()
            .into_iter()
            .filter_map(|m| match m {
                SignalMessage::Description(d) if d.sdp_type == sdp_type => Some(d.sdp),
                _ => None,
            })
            .collect()
    }

    pub fn data(&self) -> Vec<rtc_duplex_core::ChannelPayload> {
        self.log
            .iter()
            .filter_map(|e| match e {
                PeerEvent::Data(payload) => Some(payload.clone()),
                _ => None,
            })
            .collect()
    }

    /// Names of events after the first one named `after`
    pub fn names_since(&self, after: &str) -> Vec<&'static str> {
        let start = self
            .log
            .iter()
            .position(|e| e.name() == after)
            .map_or(self.log.len(), |i| i + 1);
        self.log[start..].iter().map(PeerEvent::name).collect()
    }

    fn forward(&self, message: SignalMessage, to: &Peer) {
        let _ = if self.relay_json {
            to.signal(message.to_json().unwrap())
        } else {
            to.signal(message)
        };
    }

    /// Forward everything held in the outbox
    pub fn flush_outbox(&mut self, to: &Peer) {
        for message in std::mem::take(&mut self.outbox) {
            self.forward(message, to);
        }
    }
}

/// Initiator and responder over a fresh loopback pair
pub async fn start_pair(a: PeerBuilder, b: PeerBuilder) -> (Side, Side) {
    let (left, right) = LoopbackTransport::pair();
    let a = Side::start(a.initiator(true), left).await;
    let b = Side::start(b.initiator(false), right).await;
    (a, b)
}

pub async fn connected_pair() -> (Side, Side) {
    let (mut a, mut b) = start_pair(Peer::builder(), Peer::builder()).await;
    assert!(pump_until(&mut a, &mut b, |a, b| a.connected() && b.connected()).await);
    (a, b)
}

fn record(from: &mut Side, to: &Peer, event: PeerEvent) {
    if let PeerEvent::Signal(message) = &event {
        if from.relay {
            from.forward(message.clone(), to);
        } else {
            from.outbox.push(message.clone());
        }
    }
    from.log.push(event);
}

/// Deliver events until `done` holds; false after 60s of simulated time
pub async fn pump_until(
    a: &mut Side,
    b: &mut Side,
    done: impl FnMut(&Side, &Side) -> bool,
) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(60);
    pump(a, b, done, deadline).await
}

/// Deliver events for `duration` of simulated time
pub async fn pump_for(a: &mut Side, b: &mut Side, duration: Duration) {
    let deadline = tokio::time::Instant::now() + duration;
    pump(a, b, |_, _| false, deadline).await;
}

async fn pump(
    a: &mut Side,
    b: &mut Side,
    mut done: impl FnMut(&Side, &Side) -> bool,
    deadline: tokio::time::Instant,
) -> bool {
    loop {
        if done(a, b) {
            return true;
        }
        let next = tokio::select! {
            Some(event) = a.events.recv() => Some((true, event)),
            Some(event) = b.events.recv() => Some((false, event)),
            () = tokio::time::sleep_until(deadline) => None,
        };
        match next {
            Some((true, event)) => {
                let to = b.peer.clone();
                record(a, &to, event);
            }
            Some((false, event)) => {
                let to = a.peer.clone();
                record(b, &to, event);
            }
            None => return false,
        }
    }
}

/// Drain one session's events until `done` holds; false after 60s
pub async fn drain_until(side: &mut Side, mut done: impl FnMut(&Side) -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(60);
    loop {
        if done(side) {
            return true;
        }
        let next = tokio::select! {
            Some(event) = side.events.recv() => Some(event),
            () = tokio::time::sleep_until(deadline) => None,
        };
        match next {
            Some(event) => {
                if let PeerEvent::Signal(message) = &event {
                    side.outbox.push(message.clone());
                }
                side.log.push(event);
            }
            None => return false,
        }
    }
}
