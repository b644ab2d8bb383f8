//! Shared test utilities for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;

use aq_core::config::{EndpointConfig, RealtimeConfig};
use aq_core::error::{AqError, AqResult};
use aq_realtime::{
    Channel, ChannelManager, Connection, ConnectionState, Connector, CrisisAlert, CrisisHandler,
    Notification, Notifier, OutboundFrame, TransportEvent,
};

pub const BASE_URL: &str = "ws://mock.test/ws";

/// The far end of one mock connection, held by the test.
pub struct ServerSide {
    pub url: String,
    to_client: mpsc::UnboundedSender<TransportEvent>,
    from_client: mpsc::UnboundedReceiver<OutboundFrame>,
}

impl ServerSide {
    /// Deliver a raw text frame to the client.
    pub fn push_raw(&self, raw: impl Into<String>) {
        let _ = self.to_client.send(TransportEvent::Frame(raw.into()));
    }

    /// Deliver a JSON value as a text frame.
    pub fn push(&self, value: Value) {
        self.push_raw(value.to_string());
    }

    pub fn error(&self, message: &str) {
        let _ = self.to_client.send(TransportEvent::Error(message.to_string()));
    }

    /// Close the connection from the server side.
    pub fn close(&self, code: u16) {
        let _ = self.to_client.send(TransportEvent::Closed { code });
    }

    /// Next frame the client wrote. `None` once the client dropped its writer.
    pub async fn next_frame(&mut self) -> Option<OutboundFrame> {
        self.from_client.recv().await
    }

    /// Next text frame, parsed as JSON.
    pub async fn next_json(&mut self) -> Value {
        match self.next_frame().await {
            Some(OutboundFrame::Text(text)) => serde_json::from_str(&text).unwrap(),
            other => panic!("expected a text frame, got {other:?}"),
        }
    }

    /// Frames already written by the client, without waiting.
    pub fn drain(&mut self) -> Vec<OutboundFrame> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.from_client.try_recv() {
            frames.push(frame);
        }
        frames
    }
}

/// Scripted connector.
///
/// Every successful open hands a [`ServerSide`] to the test through the
/// receiver returned by [`MockConnector::new`].
pub struct MockConnector {
    servers: mpsc::UnboundedSender<ServerSide>,
    urls: Mutex<Vec<String>>,
    opened_at: Mutex<Vec<Instant>>,
    fail_next: AtomicUsize,
    delay_next: Mutex<Option<Duration>>,
}

impl MockConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ServerSide>) {
        let (servers, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            servers,
            urls: Mutex::new(Vec::new()),
            opened_at: Mutex::new(Vec::new()),
            fail_next: AtomicUsize::new(0),
            delay_next: Mutex::new(None),
        });
        (connector, rx)
    }

    /// Make the next `n` opens fail.
    pub fn fail_next(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Make the next open take `delay` before completing.
    pub fn delay_next(&self, delay: Duration) {
        *self.delay_next.lock().unwrap() = Some(delay);
    }

    /// Every URL an open was attempted against, in order.
    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }

    pub fn open_count(&self) -> usize {
        self.urls.lock().unwrap().len()
    }

    /// When each open was attempted.
    pub fn opened_at(&self) -> Vec<Instant> {
        self.opened_at.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn open(&self, url: &str) -> AqResult<Connection> {
        self.urls.lock().unwrap().push(url.to_string());
        self.opened_at.lock().unwrap().push(Instant::now());

        let delay = self.delay_next.lock().unwrap().take();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let should_fail = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(AqError::Socket("connection refused".into()));
        }

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let _ = self.servers.send(ServerSide {
            url: url.to_string(),
            to_client: in_tx,
            from_client: out_rx,
        });
        Ok(Connection {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

/// Crisis handler recording every call.
#[derive(Default)]
pub struct RecordingCrisisHandler {
    pub activations: Mutex<Vec<CrisisAlert>>,
    pub alarms: AtomicUsize,
}

impl CrisisHandler for RecordingCrisisHandler {
    fn activate_crisis(&self, alert: &CrisisAlert) {
        self.activations.lock().unwrap().push(alert.clone());
    }

    fn sound_alarm(&self, _alert: &CrisisAlert) {
        self.alarms.fetch_add(1, Ordering::SeqCst);
    }
}

/// Notifier recording every notification.
#[derive(Default)]
pub struct RecordingNotifier {
    pub notifications: Mutex<Vec<Notification>>,
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: &Notification) {
        self.notifications.lock().unwrap().push(notification.clone());
    }
}

/// Short delays, no dead-link detection, heartbeat out of the way.
pub fn test_config() -> RealtimeConfig {
    RealtimeConfig {
        reconnect_attempts: 3,
        reconnect_delay_ms: 100,
        heartbeat_interval_ms: 60_000,
        heartbeat_max_missed: 0,
        unsubscribe_grace_ms: 1_000,
        connect_timeout_ms: 500,
        ..Default::default()
    }
}

/// Build a manager over a fresh mock connector.
pub fn create_test_manager(
    config: RealtimeConfig,
) -> (ChannelManager, Arc<MockConnector>, mpsc::UnboundedReceiver<ServerSide>) {
    let (connector, servers) = MockConnector::new();
    let manager = ChannelManager::new(
        config,
        EndpointConfig::with_base_url(BASE_URL),
        Arc::clone(&connector) as Arc<dyn Connector>,
    )
    .expect("test config is valid");
    (manager, connector, servers)
}

/// Record every status transition the manager emits.
pub fn record_transitions(
    manager: &ChannelManager,
) -> (Arc<Mutex<Vec<(Channel, ConnectionState)>>>, aq_realtime::StatusObserver) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let observer = manager.on_status_change(move |channel, state| {
        sink.lock().unwrap().push((channel, state));
    });
    (seen, observer)
}

/// Transitions recorded for one channel.
pub fn states_of(
    seen: &Mutex<Vec<(Channel, ConnectionState)>>,
    channel: Channel,
) -> Vec<ConnectionState> {
    seen.lock()
        .unwrap()
        .iter()
        .filter(|(c, _)| *c == channel)
        .map(|(_, s)| *s)
        .collect()
}

/// Wait until `channel` reaches `want`.
pub async fn wait_for_state(manager: &ChannelManager, channel: Channel, want: ConnectionState) {
    let mut rx = manager.state_receiver(channel);
    tokio::time::timeout(Duration::from_secs(600), async {
        loop {
            if *rx.borrow_and_update() == want {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("{channel} never reached {want}"));
}

/// Connect `channel` and return its server side once it is `Connected`.
pub async fn connect_and_accept(
    manager: &ChannelManager,
    servers: &mut mpsc::UnboundedReceiver<ServerSide>,
    channel: Channel,
) -> ServerSide {
    manager.connect(channel).await;
    let server = servers.recv().await.expect("connector dropped");
    wait_for_state(manager, channel, ConnectionState::Connected).await;
    server
}

/// Let spawned tasks run without moving the clock.
pub async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

/// Poll `condition` until it holds, advancing the clock a millisecond at a time.
pub async fn until(mut condition: impl FnMut() -> bool) {
    for _ in 0..5_000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition never became true");
}

pub fn envelope(kind: &str, channel: Channel, data: Value) -> Value {
    serde_json::json!({
        "type": kind,
        "channel": channel.as_str(),
        "data": data,
        "timestamp": "2026-03-02T14:30:00Z",
    })
}
