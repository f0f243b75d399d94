//! End-to-end session tests over the loopback transport
//!
//! Two sessions are wired back to back and their signals relayed by the
//! harness. Time is paused, so timers advance only when both sessions idle.

mod common;

use common::{connected_pair, pump_for, pump_until, start_pair};
use pretty_assertions::assert_eq;
use rtc_duplex_core::{
    AddressFamily, AddressInfo, ChannelConfig, ChannelPayload, Peer, PeerEvent, SdpType,
    SignalMessage,
};
use serde_json::json;
use std::task::Poll;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn sessions_connect_and_exchange_data() {
    let (mut a, mut b) = connected_pair().await;

    a.peer.write("hello").await.unwrap();
    b.peer.send(&b"bytes"[..]).await.unwrap();
    assert!(pump_until(&mut a, &mut b, |a, b| !a.data().is_empty() && !b.data().is_empty()).await);

    // Text arrives as bytes unless object mode is on
    assert_eq!(b.data(), vec![ChannelPayload::from(&b"hello"[..])]);
    assert_eq!(a.data(), vec![ChannelPayload::from(&b"bytes"[..])]);
    assert!(a.peer.is_connected());
    assert!(b.peer.is_connected());
}

#[tokio::test(start_paused = true)]
async fn connect_fires_once_per_side() {
    let (mut a, mut b) = connected_pair().await;
    pump_for(&mut a, &mut b, Duration::from_secs(3)).await;

    assert_eq!(a.count("connect"), 1);
    assert_eq!(b.count("connect"), 1);
    assert!(a.errors().is_empty());
    assert!(b.errors().is_empty());
}

#[tokio::test(start_paused = true)]
async fn addresses_come_from_selected_candidate_pair() {
    let (a, b) = connected_pair().await;

    assert_eq!(a.peer.address(), AddressInfo::new("127.0.0.1", Some(50000)));
    assert_eq!(a.peer.remote_address(), AddressInfo::new("127.0.0.1", Some(50001)));
    assert_eq!(b.peer.address().port, Some(50001));
    assert_eq!(a.peer.address().family, Some(AddressFamily::IPv4));
}

#[tokio::test(start_paused = true)]
async fn legacy_stats_shape_resolves_addresses() {
    let (mut a, mut b) = start_pair(Peer::builder(), Peer::builder()).await;
    a.transport.set_stats(Some(vec![json!({
        "id": "pair-1",
        "type": "googCandidatePair",
        "values": [
            {"googActiveConnection": "true"},
            {"googLocalAddress": "10.0.0.1:5000"},
            {"googRemoteAddress": "[fe80::1]:5001"}
        ]
    })]));
    assert!(pump_until(&mut a, &mut b, |a, b| a.connected() && b.connected()).await);

    assert_eq!(a.peer.address(), AddressInfo::new("10.0.0.1", Some(5000)));
    assert_eq!(a.peer.remote_address().family, Some(AddressFamily::IPv6));
    assert_eq!(a.peer.remote_address().port, Some(5001));
}

#[tokio::test(start_paused = true)]
async fn connects_without_addresses_when_no_pair_is_ever_selected() {
    let (mut a, mut b) = start_pair(Peer::builder(), Peer::builder()).await;
    a.transport.set_stats(Some(Vec::new()));

    assert!(pump_until(&mut a, &mut b, |a, b| a.connected() && b.connected()).await);
    assert_eq!(a.peer.address(), AddressInfo::default());
    assert!(b.peer.address().is_resolved());
}

#[tokio::test(start_paused = true)]
async fn write_before_connect_is_sent_on_connect() {
    let (mut a, mut b) = start_pair(Peer::builder(), Peer::builder()).await;

    let writer = a.peer.clone();
    let mut write = Box::pin(async move { writer.write("early").await });
    assert!(futures::poll!(&mut write).is_pending());

    // The buffered chunk is sent and completed before connect is announced
    assert!(pump_until(&mut a, &mut b, |a, _| a.connected()).await);
    assert_eq!(futures::poll!(&mut write), Poll::Ready(Ok(())));

    assert!(pump_until(&mut a, &mut b, |_, b| !b.data().is_empty()).await);
    assert_eq!(b.data(), vec![ChannelPayload::from(&b"early"[..])]);
}

#[tokio::test(start_paused = true)]
async fn send_before_connect_fails_without_teardown() {
    let (mut a, mut b) = start_pair(Peer::builder(), Peer::builder()).await;

    let err = a.peer.send("too soon").await.unwrap_err();
    assert_eq!(err.code().as_str(), "ERR_DATA_CHANNEL");

    assert!(pump_until(&mut a, &mut b, |a, b| a.connected() && b.connected()).await);
    assert!(a.errors().is_empty());
}

#[tokio::test(start_paused = true)]
async fn object_mode_keeps_text_messages() {
    let (mut a, mut b) = start_pair(Peer::builder(), Peer::builder().object_mode(true)).await;
    assert!(pump_until(&mut a, &mut b, |a, b| a.connected() && b.connected()).await);

    a.peer.write("text").await.unwrap();
    a.peer.write(&b"raw"[..]).await.unwrap();
    assert!(pump_until(&mut a, &mut b, |_, b| b.data().len() == 2).await);

    assert_eq!(
        b.data(),
        vec![
            ChannelPayload::Text("text".to_string()),
            ChannelPayload::from(&b"raw"[..]),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn empty_and_binary_payloads_arrive_intact() {
    for object_mode in [false, true] {
        let (mut a, mut b) =
            start_pair(Peer::builder(), Peer::builder().object_mode(object_mode)).await;
        assert!(pump_until(&mut a, &mut b, |a, b| a.connected() && b.connected()).await);

        a.peer.write(Vec::<u8>::new()).await.unwrap();
        a.peer.write("").await.unwrap();
        a.peer.write(vec![0u8, 255, 7]).await.unwrap();
        assert!(pump_until(&mut a, &mut b, |_, b| b.data().len() == 3).await);

        let empty_text = if object_mode {
            ChannelPayload::Text(String::new())
        } else {
            ChannelPayload::from(Vec::<u8>::new())
        };
        assert_eq!(
            b.data(),
            vec![
                ChannelPayload::from(Vec::<u8>::new()),
                empty_text,
                ChannelPayload::from(vec![0u8, 255, 7]),
            ],
            "object_mode = {object_mode}"
        );
    }
}

#[tokio::test(start_paused = true)]
async fn responder_learns_channel_name() {
    let (mut a, mut b) = start_pair(Peer::builder().channel_name("chat"), Peer::builder()).await;
    assert_eq!(a.peer.channel_name().as_deref(), Some("chat"));
    assert_eq!(b.peer.channel_name(), None);

    assert!(pump_until(&mut a, &mut b, |a, b| a.connected() && b.connected()).await);
    assert_eq!(b.peer.channel_name().as_deref(), Some("chat"));
}

#[tokio::test(start_paused = true)]
async fn initiator_generates_random_channel_name() {
    let (a, _b) = start_pair(Peer::builder(), Peer::builder()).await;
    let name = a.peer.channel_name().unwrap();
    assert_eq!(name.len(), 40);
    assert!(name.chars().all(|c| c.is_ascii_hexdigit()));
}

#[tokio::test(start_paused = true)]
async fn negotiated_channel_connects_without_remote_channel_event() {
    let config = ChannelConfig {
        negotiated: true,
        id: Some(0),
        ..Default::default()
    };
    let (mut a, mut b) = start_pair(
        Peer::builder().channel_name("shared").channel_config(config.clone()),
        Peer::builder().channel_name("shared").channel_config(config),
    )
    .await;

    assert!(pump_until(&mut a, &mut b, |a, b| a.connected() && b.connected()).await);
    assert_eq!(b.transport.channels().len(), 1);

    b.peer.write("over negotiated").await.unwrap();
    assert!(pump_until(&mut a, &mut b, |a, _| !a.data().is_empty()).await);
}

#[tokio::test(start_paused = true)]
async fn trickle_relays_local_candidates() {
    let (mut a, mut b) = connected_pair().await;
    pump_for(&mut a, &mut b, Duration::from_millis(100)).await;

    let candidates = a.signals().iter().filter(|m| m.is_candidate()).count();
    assert_eq!(candidates, 2);
    assert_eq!(b.transport.applied_candidates().len(), 2);

    let offer = &a.descriptions(SdpType::Offer)[0];
    assert!(offer.contains("a=ice-options:trickle"));
}

#[tokio::test(start_paused = true)]
async fn non_trickle_sends_complete_description_once_gathered() {
    let (mut a, mut b) = start_pair(
        Peer::builder().trickle(false),
        Peer::builder().trickle(false),
    )
    .await;
    assert!(pump_until(&mut a, &mut b, |a, b| a.connected() && b.connected()).await);

    assert!(!a.signals().iter().any(SignalMessage::is_candidate));
    assert!(!b.signals().iter().any(SignalMessage::is_candidate));
    assert_eq!(a.signals().len(), 1);
    assert_eq!(b.signals().len(), 1);

    let offers = a.descriptions(SdpType::Offer);
    assert_eq!(offers.len(), 1);
    assert!(!offers[0].contains("a=ice-options:trickle"));
    assert!(offers[0].contains("a=candidate:"));
    assert!(offers[0].contains("a=end-of-candidates"));
}

#[tokio::test(start_paused = true)]
async fn half_trickle_keeps_trickle_advertisement() {
    let (mut a, mut b) = start_pair(
        Peer::builder().trickle(false).allow_half_trickle(true),
        Peer::builder(),
    )
    .await;
    assert!(pump_until(&mut a, &mut b, |a, b| a.connected() && b.connected()).await);

    let offer = &a.descriptions(SdpType::Offer)[0];
    assert!(offer.contains("a=ice-options:trickle"));
}

#[tokio::test(start_paused = true)]
async fn sdp_transform_rewrites_local_descriptions() {
    let (mut a, mut b) = start_pair(
        Peer::builder().sdp_transform(|sdp| format!("{sdp}a=x-initiator:1\r\n")),
        Peer::builder().sdp_transform(|sdp| format!("{sdp}a=x-responder:1\r\n")),
    )
    .await;
    assert!(pump_until(&mut a, &mut b, |a, b| a.connected() && b.connected()).await);

    assert!(a.descriptions(SdpType::Offer)[0].contains("a=x-initiator:1"));
    assert!(b.descriptions(SdpType::Answer)[0].contains("a=x-responder:1"));
}

#[tokio::test(start_paused = true)]
async fn ice_state_changes_are_reported() {
    let (a, _b) = connected_pair().await;
    let states: Vec<_> = a
        .log
        .iter()
        .filter_map(|e| match e {
            PeerEvent::IceStateChange {
                ice_connection_state,
                ..
            } => Some(*ice_connection_state),
            _ => None,
        })
        .collect();
    assert!(states.contains(&rtc_duplex_core::IceConnectionState::Checking));
    assert!(states.contains(&rtc_duplex_core::IceConnectionState::Connected));
}

#[tokio::test(start_paused = true)]
async fn get_stats_flattens_reports() {
    let (a, _b) = connected_pair().await;
    a.transport.set_stats(Some(vec![json!({
        "id": "legacy",
        "type": "ssrc",
        "values": [{"bytesSent": 10}, {"bytesReceived": 20}]
    })]));

    let reports = a.peer.get_stats().await.unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].report_type(), "ssrc");
    assert_eq!(reports[0].get("bytesReceived"), Some(&json!(20)));
}

#[tokio::test(start_paused = true)]
async fn get_stats_failure_is_not_fatal() {
    let (mut a, mut b) = connected_pair().await;
    a.transport.fail_next(rtc_duplex_core::LoopbackOp::GetStats);

    let err = a.peer.get_stats().await.unwrap_err();
    assert_eq!(err.code().as_str(), "ERR_GET_STATS");

    pump_for(&mut a, &mut b, Duration::from_millis(500)).await;
    assert!(a.peer.is_connected());
    assert!(a.errors().is_empty());
}
