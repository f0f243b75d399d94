//! Teardown ordering, fatal transport events and the write side's end

mod common;

use common::{connected_pair, drain_until, pump_for, pump_until, start_pair, Side};
use pretty_assertions::assert_eq;
use rtc_duplex_core::{
    ChannelState, IceConnectionState, LoopbackTransport, Peer, PeerConnectionState, PeerError,
    PeerEvent, SdpType,
};
use std::time::Duration;
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn destroy_reports_disconnect_then_close() {
    let (mut a, mut b) = connected_pair().await;

    a.peer.destroy(None);
    assert!(pump_until(&mut a, &mut b, |a, b| a.closed() && b.closed()).await);

    assert_eq!(a.names_since("disconnect"), vec!["close"]);
    assert!(a.errors().is_empty());
    assert!(a.transport.is_closed());
    assert!(a.peer.is_destroyed());
    assert!(!a.peer.is_connected());

    // The remote side follows through its channel closing
    assert_eq!(b.names_since("disconnect"), vec!["close"]);
    assert!(b.errors().is_empty());

    // The event stream ends after close
    assert_eq!(a.events.recv().await, None);
}

#[tokio::test(start_paused = true)]
async fn destroy_with_error_reports_it_before_close() {
    let (mut a, mut b) = connected_pair().await;

    a.peer.destroy(Some(PeerError::DataChannel("application abort".into())));
    assert!(pump_until(&mut a, &mut b, |a, _| a.closed()).await);

    assert_eq!(a.names_since("disconnect"), vec!["error", "close"]);
    assert_eq!(
        a.errors(),
        vec![PeerError::DataChannel("application abort".into())]
    );
}

#[tokio::test(start_paused = true)]
async fn destroy_is_idempotent() {
    let (mut a, mut b) = connected_pair().await;

    a.peer.destroy(None);
    a.peer.destroy(Some(PeerError::ConnectionFailure));
    a.peer.destroy(None);
    assert!(pump_until(&mut a, &mut b, |a, b| a.closed() && b.closed()).await);
    tokio::time::sleep(Duration::from_secs(1)).await;
    while let Some(event) = a.events.try_recv() {
        a.log.push(event);
    }

    assert_eq!(a.count("close"), 1);
    assert_eq!(a.count("disconnect"), 1);
    assert!(a.errors().is_empty());
}

#[tokio::test(start_paused = true)]
async fn calls_after_teardown_report_destroyed() {
    let (mut a, mut b) = connected_pair().await;
    a.peer.destroy(None);
    assert!(pump_until(&mut a, &mut b, |a, _| a.closed()).await);

    assert_eq!(
        a.peer.write("late").await,
        Err(PeerError::Destroyed { operation: "write" })
    );
    assert_eq!(
        a.peer.send("late").await,
        Err(PeerError::Destroyed { operation: "send" })
    );
    assert!(a.peer.negotiate().is_err());
    assert!(a.peer.end().is_err());
    assert!(a.peer.get_stats().await.is_err());
    a.peer.destroy(None);
    assert!(a.peer.is_destroyed());
}

#[tokio::test(start_paused = true)]
async fn dropping_last_handle_destroys_session() {
    let (a, mut b) = connected_pair().await;
    let Side {
        peer,
        mut events,
        transport,
        ..
    } = a;

    drop(peer);
    let mut names = Vec::new();
    while let Some(event) = events.recv().await {
        names.push(event.name());
    }

    assert_eq!(names.last(), Some(&"close"));
    assert!(transport.is_closed());
    assert!(drain_until(&mut b, Side::closed).await);
}

#[tokio::test(start_paused = true)]
async fn pending_write_fails_when_destroyed() {
    let (left, _right) = LoopbackTransport::pair();
    let mut a = Side::start(Peer::builder().initiator(true), left).await;

    let writer = a.peer.clone();
    let write = tokio::spawn(async move { writer.write("never sent").await });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(!write.is_finished());

    a.peer.destroy(None);
    assert_eq!(
        write.await.unwrap(),
        Err(PeerError::Destroyed { operation: "write" })
    );
    assert!(drain_until(&mut a, Side::closed).await);
}

async fn fatal_after_connect(trigger: impl FnOnce(&Side)) -> Side {
    let (mut a, mut b) = connected_pair().await;
    trigger(&a);
    assert!(pump_until(&mut a, &mut b, |a, _| a.closed()).await);
    a
}

#[tokio::test(start_paused = true)]
async fn ice_failure_is_fatal() {
    let a = fatal_after_connect(|a| a.transport.set_ice_state(IceConnectionState::Failed)).await;
    assert_eq!(a.errors(), vec![PeerError::IceConnectionFailure]);
    assert_eq!(a.names_since("error"), vec!["close"]);
}

#[tokio::test(start_paused = true)]
async fn ice_closed_is_fatal() {
    let a = fatal_after_connect(|a| a.transport.set_ice_state(IceConnectionState::Closed)).await;
    assert_eq!(a.errors()[0].code().as_str(), "ERR_ICE_CONNECTION_CLOSED");
}

#[tokio::test(start_paused = true)]
async fn connection_failure_is_fatal() {
    let a =
        fatal_after_connect(|a| a.transport.set_connection_state(PeerConnectionState::Failed))
            .await;
    assert_eq!(a.errors(), vec![PeerError::ConnectionFailure]);
}

#[tokio::test(start_paused = true)]
async fn ice_disconnect_alone_is_not_fatal() {
    let (mut a, mut b) = connected_pair().await;
    a.transport.set_ice_state(IceConnectionState::Disconnected);
    pump_for(&mut a, &mut b, Duration::from_secs(1)).await;

    assert!(!a.closed());
    assert!(a.peer.is_connected());
}

#[tokio::test(start_paused = true)]
async fn ice_reconnect_does_not_fire_connect_again() {
    let (mut a, mut b) = connected_pair().await;
    a.transport.set_ice_state(IceConnectionState::Disconnected);
    pump_for(&mut a, &mut b, Duration::from_secs(1)).await;
    a.transport.set_ice_state(IceConnectionState::Connected);
    pump_for(&mut a, &mut b, Duration::from_secs(1)).await;

    assert_eq!(a.count("connect"), 1);
    assert!(a.errors().is_empty());
    assert!(a.peer.is_connected());
}

#[tokio::test(start_paused = true)]
async fn write_during_teardown_is_dropped() {
    let (mut a, mut b) = connected_pair().await;

    // The channel error is queued ahead of the write
    a.transport.channels()[0].fail("sctp abort");
    assert_eq!(a.peer.write("dropped").await, Ok(()));

    assert!(pump_until(&mut a, &mut b, |a, _| a.closed()).await);
    pump_for(&mut a, &mut b, Duration::from_millis(100)).await;
    assert!(b.data().is_empty());
}

#[tokio::test(start_paused = true)]
async fn is_connected_follows_the_data_channel() {
    let (mut a, mut b) = start_pair(Peer::builder(), Peer::builder()).await;
    assert!(!a.peer.is_connected());
    assert!(pump_until(&mut a, &mut b, |a, b| a.connected() && b.connected()).await);
    assert!(a.peer.is_connected());
    assert!(b.peer.is_connected());

    a.peer.destroy(None);
    assert!(pump_until(&mut a, &mut b, |a, b| a.closed() && b.closed()).await);
    assert!(!a.peer.is_connected());
    assert!(!b.peer.is_connected());
}

#[tokio::test(start_paused = true)]
async fn channel_error_is_fatal() {
    let a = fatal_after_connect(|a| a.transport.channels()[0].fail("sctp abort")).await;
    assert_eq!(a.errors(), vec![PeerError::DataChannel("sctp abort".into())]);
}

#[tokio::test(start_paused = true)]
async fn channel_stuck_closing_is_closed_by_poll() {
    let start = Instant::now();
    let a = fatal_after_connect(|a| a.transport.channels()[0].force_state(ChannelState::Closing))
        .await;

    assert!(a.errors().is_empty());
    assert!(start.elapsed() >= Duration::from_secs(5));
}

#[tokio::test(start_paused = true)]
async fn missing_remote_channel_object_is_fatal() {
    let (left, right) = LoopbackTransport::pair();
    right.set_missing_channel(true);
    let mut a = Side::start(Peer::builder().initiator(true), left).await;
    let mut b = Side::start(Peer::builder(), right).await;

    assert!(pump_until(&mut a, &mut b, |_, b| b.closed()).await);
    assert_eq!(
        b.errors(),
        vec![PeerError::DataChannel(
            "Data channel event is missing channel object".into()
        )]
    );
}

#[tokio::test(start_paused = true)]
async fn missing_local_channel_object_is_fatal() {
    let (left, _right) = LoopbackTransport::pair();
    left.set_missing_channel(true);
    let mut a = Side::start(Peer::builder().initiator(true), left).await;

    assert!(drain_until(&mut a, Side::closed).await);
    assert_eq!(a.errors()[0].code().as_str(), "ERR_DATA_CHANNEL");
}

#[tokio::test(start_paused = true)]
async fn end_after_connect_closes_after_grace() {
    let (mut a, mut b) = connected_pair().await;
    let start = Instant::now();

    a.peer.end().unwrap();
    assert_eq!(a.peer.write("late").await, Err(PeerError::WriteAfterEnd));
    assert!(pump_until(&mut a, &mut b, |a, b| a.closed() && b.closed()).await);

    assert!(start.elapsed() >= Duration::from_secs(1));
    assert!(a.errors().is_empty());
    assert!(b.errors().is_empty());
}

#[tokio::test(start_paused = true)]
async fn end_before_connect_waits_for_connect() {
    let (mut a, mut b) = start_pair(Peer::builder(), Peer::builder()).await;

    a.peer.end().unwrap();
    assert!(pump_until(&mut a, &mut b, |a, _| a.closed()).await);

    let connect = a.log.iter().position(|e| *e == PeerEvent::Connect).unwrap();
    let close = a.log.iter().position(|e| *e == PeerEvent::Close).unwrap();
    assert!(connect < close);
    assert!(a.errors().is_empty());
}

#[tokio::test(start_paused = true)]
async fn stalled_gathering_releases_description_on_timeout() {
    let (left, right) = LoopbackTransport::pair();
    left.set_gathering_stalls(true);
    let start = Instant::now();
    let mut a = Side::start(
        Peer::builder()
            .initiator(true)
            .trickle(false)
            .ice_complete_timeout(Duration::from_secs(2)),
        left,
    )
    .await;
    let mut b = Side::start(Peer::builder(), right).await;

    assert!(pump_until(&mut a, &mut b, |a, b| a.connected() && b.connected()).await);

    let timeout = a.log.iter().position(|e| *e == PeerEvent::IceTimeout).unwrap();
    let offer = a
        .log
        .iter()
        .position(|e| matches!(e, PeerEvent::Signal(m) if m.sdp_type() == Some(SdpType::Offer)))
        .unwrap();
    assert!(timeout < offer);
    assert!(start.elapsed() >= Duration::from_secs(2));
}
