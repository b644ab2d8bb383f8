//! Heartbeat and latency integration tests.

mod common;

use std::time::Duration;

use serde_json::json;

use aq_core::config::RealtimeConfig;
use aq_realtime::{Channel, ConnectionState, OutboundFrame};

use common::{connect_and_accept, create_test_manager, settle, test_config, until, wait_for_state};

fn heartbeat_config(max_missed: u32) -> RealtimeConfig {
    RealtimeConfig {
        heartbeat_interval_ms: 1_000,
        heartbeat_max_missed: max_missed,
        ..test_config()
    }
}

#[tokio::test(start_paused = true)]
async fn ping_is_sent_each_interval() {
    let (mgr, _connector, mut servers) = create_test_manager(heartbeat_config(0));
    let mut server = connect_and_accept(&mgr, &mut servers, Channel::Market).await;

    let started = tokio::time::Instant::now();
    let first = server.next_json().await;
    assert_eq!(first["type"], "ping");
    assert_eq!(first["channel"], "market");
    assert_eq!(first["sequence"], 0);
    assert!(started.elapsed() >= Duration::from_millis(1_000));

    let second = server.next_json().await;
    assert_eq!(second["sequence"], 1);
}

#[tokio::test(start_paused = true)]
async fn matching_pong_records_latency() {
    let (mgr, _connector, mut servers) = create_test_manager(heartbeat_config(3));
    let mut server = connect_and_accept(&mgr, &mut servers, Channel::Forecasts).await;

    let ping = server.next_json().await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    server.push(json!({"type": "pong", "channel": "forecasts", "sequence": ping["sequence"]}));

    until(|| mgr.stats().latency_ms.is_some()).await;
    assert_eq!(mgr.stats().latency_ms, Some(50));
}

#[tokio::test(start_paused = true)]
async fn pong_without_ping_leaves_latency_unchanged() {
    let (mgr, _connector, mut servers) = create_test_manager(heartbeat_config(3));
    let server = connect_and_accept(&mgr, &mut servers, Channel::Market).await;

    server.push(json!({"type": "pong", "channel": "market", "sequence": 4}));
    server.push(json!({"type": "pong", "channel": "market"}));
    until(|| mgr.stats().messages_received == 2).await;
    settle().await;

    assert_eq!(mgr.stats().latency_ms, None);
    assert_eq!(mgr.stats().errors, 0);
}

#[tokio::test(start_paused = true)]
async fn pong_with_wrong_sequence_is_ignored() {
    let (mgr, _connector, mut servers) = create_test_manager(heartbeat_config(3));
    let mut server = connect_and_accept(&mgr, &mut servers, Channel::Market).await;

    let ping = server.next_json().await;
    assert_eq!(ping["sequence"], 0);
    server.push(json!({"type": "pong", "channel": "market", "sequence": 41}));
    until(|| mgr.stats().messages_received == 1).await;
    settle().await;
    assert_eq!(mgr.stats().latency_ms, None);
}

#[tokio::test(start_paused = true)]
async fn heartbeat_frames_are_not_dispatched() {
    let (mgr, _connector, mut servers) = create_test_manager(heartbeat_config(0));
    let seen = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let counter = std::sync::Arc::clone(&seen);
    let _sub = mgr
        .subscribe(aq_realtime::SubscribeOptions::new(Channel::Market, move |_| {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        }))
        .await;
    let server = servers.recv().await.unwrap();
    wait_for_state(&mgr, Channel::Market, ConnectionState::Connected).await;

    server.push(json!({"type": "ping", "channel": "market", "sequence": 1}));
    server.push(json!({"type": "pong", "channel": "market"}));
    until(|| mgr.stats().messages_received == 2).await;
    settle().await;
    assert_eq!(seen.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn server_ping_is_answered_with_pong() {
    let (mgr, _connector, mut servers) = create_test_manager(test_config());
    let mut server = connect_and_accept(&mgr, &mut servers, Channel::Agents).await;

    server.push(json!({"type": "ping", "channel": "agents", "sequence": 77}));
    let pong = server.next_json().await;
    assert_eq!(pong["type"], "pong");
    assert_eq!(pong["channel"], "agents");
    assert_eq!(pong["sequence"], 77);
}

#[tokio::test(start_paused = true)]
async fn unanswered_pings_force_reconnect() {
    let (mgr, _connector, mut servers) = create_test_manager(heartbeat_config(3));
    let mut server = connect_and_accept(&mgr, &mut servers, Channel::Crisis).await;

    for expected in 0..3 {
        let ping = server.next_json().await;
        assert_eq!(ping["sequence"], expected);
    }

    wait_for_state(&mgr, Channel::Crisis, ConnectionState::Reconnecting).await;
    let _replacement = servers.recv().await.unwrap();
    wait_for_state(&mgr, Channel::Crisis, ConnectionState::Connected).await;
    assert_eq!(mgr.stats().reconnects, 1);
}

#[tokio::test(start_paused = true)]
async fn heartbeat_stops_after_disconnect() {
    let (mgr, _connector, mut servers) = create_test_manager(heartbeat_config(0));
    let mut server = connect_and_accept(&mgr, &mut servers, Channel::Market).await;

    mgr.disconnect(Channel::Market).await;
    assert_eq!(
        server.next_frame().await,
        Some(OutboundFrame::Close {
            code: aq_core::constants::close_codes::NORMAL
        })
    );
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(server.drain().is_empty());
    assert_eq!(mgr.stats().messages_sent, 0);
}

#[tokio::test(start_paused = true)]
async fn heartbeat_interval_follows_config_updates() {
    let (mgr, _connector, mut servers) = create_test_manager(heartbeat_config(0));
    let mut server = connect_and_accept(&mgr, &mut servers, Channel::Market).await;
    server.next_json().await;

    mgr.update_config(&aq_core::config::RealtimeConfigUpdate {
        heartbeat_interval_ms: Some(5_000),
        ..Default::default()
    })
    .unwrap();

    // The already-armed tick still uses the old interval; the next one the new.
    server.next_json().await;
    let started = tokio::time::Instant::now();
    server.next_json().await;
    assert!(started.elapsed() >= Duration::from_millis(5_000));
}
