//! Multiplexed channel manager.
//!
//! Owns one slot per [`Channel`] and drives each slot's connection
//! lifecycle: opening through the [`Connector`], reconnection with
//! exponential backoff, heartbeat pings, outbound buffering, subscriber
//! fan-out, crisis escalation, and status broadcasting.
//!
//! Each slot's mutable state sits behind its own `tokio::sync::Mutex`.
//! Background work (open attempts, the reader, heartbeat, backoff and grace
//! timers) runs in spawned tasks whose handles live in that state; every
//! task is tagged with the slot's generation and ignores itself once the
//! generation moves on.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use aq_core::config::{AppConfig, EndpointConfig, RealtimeConfig, RealtimeConfigUpdate};
use aq_core::constants::close_codes;
use aq_core::error::{AqError, AqResult};

use crate::backoff::Backoff;
use crate::channel::{Channel, ConnectionState};
use crate::crisis::{CrisisAlert, CrisisHandler, LogCrisisHandler};
use crate::envelope::{Envelope, MessageType};
use crate::heartbeat::{HeartbeatTick, HeartbeatTracker};
use crate::queue::OutboundQueue;
use crate::stats::{StatsSnapshot, TransportStats};
use crate::status::{
    call_isolated, LogNotifier, Notification, Notifier, StatusNotifier, StatusObserver,
};
use crate::subscription::{
    dispatch, History, SubscribeOptions, Subscriber, SubscriberSet, Subscription, SubscriptionId,
};
use crate::transport::{self, Connection, Connector, OutboundFrame, TransportEvent};

/// Handles of the background tasks attached to one channel.
#[derive(Default)]
struct ChannelTasks {
    open: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
    heartbeat: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
    grace: Option<JoinHandle<()>>,
}

impl ChannelTasks {
    /// Abort everything tied to the current connection attempt.
    fn abort_connection(&mut self) {
        for handle in [
            self.open.take(),
            self.reader.take(),
            self.heartbeat.take(),
            self.reconnect.take(),
        ]
        .into_iter()
        .flatten()
        {
            handle.abort();
        }
    }

    fn abort_grace(&mut self) {
        if let Some(handle) = self.grace.take() {
            handle.abort();
        }
    }
}

struct ChannelState {
    status: ConnectionState,
    /// Bumped on every connect, disconnect and reconnect scheduling.
    generation: u64,
    /// Bumped each time a grace timer starts.
    grace_epoch: u64,
    writer: Option<mpsc::UnboundedSender<OutboundFrame>>,
    subscribers: SubscriberSet,
    queue: OutboundQueue,
    history: History,
    heartbeat: HeartbeatTracker,
    /// Reconnection attempts since the last successful open.
    attempts: u32,
    tasks: ChannelTasks,
}

struct ChannelSlot {
    channel: Channel,
    state: Mutex<ChannelState>,
    state_tx: watch::Sender<ConnectionState>,
}

impl ChannelSlot {
    fn new(channel: Channel) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            channel,
            state: Mutex::new(ChannelState {
                status: ConnectionState::Disconnected,
                generation: 0,
                grace_epoch: 0,
                writer: None,
                subscribers: SubscriberSet::default(),
                queue: OutboundQueue::new(),
                history: History::default(),
                heartbeat: HeartbeatTracker::new(),
                attempts: 0,
                tasks: ChannelTasks::default(),
            }),
            state_tx,
        }
    }
}

/// Realtime channel manager.
///
/// Cheap to clone; clones share the same channels. Construct one per
/// application and hand clones to whoever needs them.
#[derive(Clone)]
pub struct ChannelManager {
    config: Arc<RwLock<RealtimeConfig>>,
    endpoints: Arc<RwLock<EndpointConfig>>,
    auth_token: Arc<RwLock<Option<String>>>,
    connector: Arc<dyn Connector>,
    channels: Arc<[Arc<ChannelSlot>; 5]>,
    observers: StatusNotifier,
    stats: Arc<TransportStats>,
    crisis_handler: Arc<dyn CrisisHandler>,
    notifier: Arc<dyn Notifier>,
    next_subscription: Arc<AtomicU64>,
}

impl ChannelManager {
    /// Create a manager with every channel `Disconnected`.
    ///
    /// Fails if the configuration or endpoints are invalid.
    pub fn new(
        config: RealtimeConfig,
        endpoints: EndpointConfig,
        connector: Arc<dyn Connector>,
    ) -> AqResult<Self> {
        config.validate()?;
        endpoints.validate()?;

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            endpoints: Arc::new(RwLock::new(endpoints)),
            auth_token: Arc::new(RwLock::new(None)),
            connector,
            channels: Arc::new(Channel::ALL.map(|c| Arc::new(ChannelSlot::new(c)))),
            observers: StatusNotifier::new(),
            stats: Arc::new(TransportStats::new()),
            crisis_handler: Arc::new(LogCrisisHandler),
            notifier: Arc::new(LogNotifier),
            next_subscription: Arc::new(AtomicU64::new(1)),
        })
    }

    /// Create a manager from the application config, including its auth token.
    pub fn from_app_config(config: &AppConfig, connector: Arc<dyn Connector>) -> AqResult<Self> {
        let manager = Self::new(config.realtime.clone(), config.endpoints.clone(), connector)?;
        manager.set_auth_token(config.auth.token.clone());
        Ok(manager)
    }

    /// Replace the crisis collaborator. Call before cloning the manager.
    pub fn with_crisis_handler(mut self, handler: Arc<dyn CrisisHandler>) -> Self {
        self.crisis_handler = handler;
        self
    }

    /// Replace the notification collaborator. Call before cloning the manager.
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    // ---------------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------------

    /// Open `channel` if it is neither open nor opening.
    ///
    /// Returns once the attempt is started. A pending backoff timer is
    /// cancelled in favour of an immediate attempt. A channel in `Error`
    /// stays there; use [`reconnect`](Self::reconnect) to resume it.
    pub async fn connect(&self, channel: Channel) {
        let slot = self.slot(channel);
        let mut st = slot.state.lock().await;
        self.connect_locked(slot, &mut st);
    }

    /// Close `channel` deliberately. No reconnection follows.
    pub async fn disconnect(&self, channel: Channel) {
        let slot = self.slot(channel);
        let mut st = slot.state.lock().await;
        self.disconnect_locked(slot, &mut st);
    }

    /// Disconnect every channel.
    pub async fn disconnect_all(&self) {
        for channel in Channel::ALL {
            self.disconnect(channel).await;
        }
    }

    /// Tear down whatever `channel` has and start a fresh attempt with the
    /// retry budget reset. This is the way out of `Error`.
    pub async fn reconnect(&self, channel: Channel) {
        let slot = self.slot(channel);
        let mut st = slot.state.lock().await;
        info!(%channel, "manual reconnect");
        close_writer(&mut st, close_codes::NORMAL);
        st.tasks.abort_connection();
        st.heartbeat.reset();
        st.attempts = 0;
        self.start_open(slot, &mut st);
    }

    /// Current state of `channel`.
    pub fn status(&self, channel: Channel) -> ConnectionState {
        *self.slot(channel).state_tx.borrow()
    }

    pub fn is_connected(&self, channel: Channel) -> bool {
        self.status(channel) == ConnectionState::Connected
    }

    /// Watch `channel`'s state.
    pub fn state_receiver(&self, channel: Channel) -> watch::Receiver<ConnectionState> {
        self.slot(channel).state_tx.subscribe()
    }

    /// Register an observer for state transitions on every channel.
    pub fn on_status_change<F>(&self, callback: F) -> StatusObserver
    where
        F: Fn(Channel, ConnectionState) + Send + Sync + 'static,
    {
        self.observers.on_status_change(callback)
    }

    // ---------------------------------------------------------------------
    // Subscriptions
    // ---------------------------------------------------------------------

    /// Register a subscriber.
    ///
    /// Cancels a pending grace timer on the channel, replays history when
    /// requested, and connects a `Disconnected` channel if `auto_connect`
    /// is on.
    pub async fn subscribe(&self, options: SubscribeOptions) -> Subscription {
        let channel = options.channel;
        let slot = self.slot(channel);
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        let subscriber = Arc::new(Subscriber::new(id, &options));
        let auto_connect = self.config().auto_connect;

        let replay = {
            let mut st = slot.state.lock().await;
            if st.tasks.grace.is_some() {
                debug!(%channel, "grace period cancelled by new subscriber");
                st.tasks.abort_grace();
            }
            st.subscribers.add(Arc::clone(&subscriber));
            debug!(%channel, subscription = %id, total = st.subscribers.len(), "subscribed");

            if auto_connect && st.status == ConnectionState::Disconnected {
                self.connect_locked(slot, &mut st);
            }

            if options.replay_history {
                st.history.snapshot()
            } else {
                Vec::new()
            }
        };

        if options.replay_history {
            debug!(%channel, subscription = %id, replayed = replay.len(), "replaying history");
            let failures = subscriber.replay(&replay);
            self.record_errors(failures);
        }

        Subscription::new(channel, subscriber, self.clone())
    }

    /// Remove every subscriber on `channel`. Returns how many were removed.
    pub async fn unsubscribe_all(&self, channel: Channel) -> usize {
        let slot = self.slot(channel);
        let mut st = slot.state.lock().await;
        let removed = st.subscribers.clear();
        debug!(%channel, removed, "unsubscribed all");
        if removed > 0 {
            self.start_grace_timer(slot, &mut st);
        }
        removed
    }

    pub(crate) async fn remove_subscriber(&self, channel: Channel, id: SubscriptionId) {
        let slot = self.slot(channel);
        let mut st = slot.state.lock().await;
        if !st.subscribers.remove(id) {
            return;
        }
        debug!(%channel, subscription = %id, remaining = st.subscribers.len(), "unsubscribed");
        if st.subscribers.is_empty() {
            self.start_grace_timer(slot, &mut st);
        }
    }

    pub async fn subscriber_count(&self, channel: Channel) -> usize {
        self.slot(channel).state.lock().await.subscribers.len()
    }

    /// Recently dispatched envelopes on `channel`, oldest first.
    pub async fn history(&self, channel: Channel) -> Vec<Envelope> {
        self.slot(channel).state.lock().await.history.snapshot()
    }

    // ---------------------------------------------------------------------
    // Sending
    // ---------------------------------------------------------------------

    /// Send `payload` as JSON on `channel`.
    ///
    /// Returns `true` if it went out immediately. Otherwise it is queued
    /// (evicting the oldest entry at capacity) and flushed in order on the
    /// next successful open; `false` is returned. A payload that cannot be
    /// serialized is dropped, logged and counted as an error.
    pub async fn send<T>(&self, channel: Channel, payload: &T) -> bool
    where
        T: Serialize + ?Sized,
    {
        let data = match serde_json::to_value(payload) {
            Ok(data) => data,
            Err(e) => {
                error!(%channel, "payload serialization failed: {e}");
                self.stats.record_error();
                return false;
            }
        };

        let slot = self.slot(channel);
        let mut st = slot.state.lock().await;

        if st.status == ConnectionState::Connected {
            if let Some(writer) = &st.writer {
                let text = data.to_string();
                let bytes = text.len();
                if writer.send(OutboundFrame::Text(text)).is_ok() {
                    self.stats.record_sent(bytes);
                    return true;
                }
                warn!(%channel, "writer gone, queueing payload");
            }
        }

        let capacity = self.config().queue_capacity(channel.as_str());
        let evicted = st.queue.push(Envelope::outbound(channel, data), capacity);
        if !evicted.is_empty() {
            warn!(%channel, evicted = evicted.len(), capacity, "outbound queue full, dropped oldest");
        }
        debug!(%channel, queued = st.queue.len(), "payload queued");
        false
    }

    /// Number of payloads waiting for `channel` to open.
    pub async fn queued(&self, channel: Channel) -> usize {
        self.slot(channel).state.lock().await.queue.len()
    }

    // ---------------------------------------------------------------------
    // Stats and configuration
    // ---------------------------------------------------------------------

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn reset_stats(&self) {
        self.stats.reset();
    }

    /// Copy of the current configuration.
    pub fn config(&self) -> RealtimeConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Apply a partial update. Invalid values are rejected and the previous
    /// configuration stays in effect.
    pub fn update_config(&self, update: &RealtimeConfigUpdate) -> AqResult<()> {
        let mut config = self.config.write().unwrap_or_else(PoisonError::into_inner);
        let next = config.merged(update)?;
        info!("realtime config updated");
        *config = next;
        Ok(())
    }

    /// Set or clear the token appended to endpoint URLs on the next open.
    pub fn set_auth_token(&self, token: Option<String>) {
        *self.auth_token.write().unwrap_or_else(PoisonError::into_inner) =
            token.filter(|t| !t.is_empty());
    }

    /// URL the next open of `channel` will use, token included.
    pub fn endpoint_url(&self, channel: Channel) -> AqResult<String> {
        let endpoints = self.endpoints.read().unwrap_or_else(PoisonError::into_inner);
        let token = self.auth_token.read().unwrap_or_else(PoisonError::into_inner);
        transport::endpoint_url(&endpoints, channel, token.as_deref())
    }

    // ---------------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------------

    fn slot(&self, channel: Channel) -> &Arc<ChannelSlot> {
        &self.channels[channel as usize]
    }

    fn record_errors(&self, count: usize) {
        for _ in 0..count {
            self.stats.record_error();
        }
    }

    fn set_status(&self, slot: &ChannelSlot, st: &mut ChannelState, next: ConnectionState) {
        if st.status == next {
            return;
        }
        info!(channel = %slot.channel, from = %st.status, to = %next, "channel state changed");
        st.status = next;
        slot.state_tx.send_replace(next);
        self.observers.notify(slot.channel, next);
    }

    fn connect_locked(&self, slot: &Arc<ChannelSlot>, st: &mut ChannelState) {
        match st.status {
            ConnectionState::Connecting | ConnectionState::Connected => {
                debug!(channel = %slot.channel, status = %st.status, "connect ignored");
            }
            ConnectionState::Error => {
                debug!(channel = %slot.channel, "channel in error state, reconnect() required");
            }
            ConnectionState::Reconnecting => {
                if let Some(timer) = st.tasks.reconnect.take() {
                    timer.abort();
                }
                self.start_open(slot, st);
            }
            ConnectionState::Disconnected => self.start_open(slot, st),
        }
    }

    fn start_open(&self, slot: &Arc<ChannelSlot>, st: &mut ChannelState) {
        st.generation += 1;
        let generation = st.generation;
        self.set_status(slot, st, ConnectionState::Connecting);

        let manager = self.clone();
        let slot = Arc::clone(slot);
        st.tasks.open = Some(tokio::spawn(async move {
            manager.run_open(slot, generation).await;
        }));
    }

    async fn run_open(self, slot: Arc<ChannelSlot>, generation: u64) {
        let channel = slot.channel;
        let timeout = self.config().connect_timeout();

        let result = match self.endpoint_url(channel) {
            Ok(url) => {
                debug!(%channel, "opening connection");
                match tokio::time::timeout(timeout, self.connector.open(&url)).await {
                    Ok(result) => result,
                    Err(_) => Err(AqError::ConnectTimeout(timeout.as_millis() as u64)),
                }
            }
            Err(e) => Err(e),
        };

        let mut st = slot.state.lock().await;
        if st.generation != generation || st.status != ConnectionState::Connecting {
            if let Ok(conn) = result {
                debug!(%channel, "discarding superseded connection");
                let _ = conn.outbound.send(OutboundFrame::Close {
                    code: close_codes::NORMAL,
                });
            }
            return;
        }
        st.tasks.open = None;

        match result {
            Ok(conn) => self.on_open(&slot, &mut st, conn),
            Err(e) => {
                warn!(%channel, "connection attempt failed: {e}");
                self.stats.record_error();
                self.on_connection_closed(&slot, &mut st, close_codes::ABNORMAL);
            }
        }
    }

    fn on_open(&self, slot: &Arc<ChannelSlot>, st: &mut ChannelState, conn: Connection) {
        let Connection { outbound, inbound } = conn;
        let generation = st.generation;

        st.attempts = 0;
        st.heartbeat.reset();
        st.writer = Some(outbound);
        self.set_status(slot, st, ConnectionState::Connected);

        let reader = self.clone().run_reader(Arc::clone(slot), generation, inbound);
        st.tasks.reader = Some(tokio::spawn(reader));
        let heartbeat = self.clone().run_heartbeat(Arc::clone(slot), generation);
        st.tasks.heartbeat = Some(tokio::spawn(heartbeat));

        self.flush_queue(slot.channel, st);
    }

    /// Send queued payloads in FIFO order. Entries the writer refuses stay
    /// queued, in order.
    fn flush_queue(&self, channel: Channel, st: &mut ChannelState) {
        if st.queue.is_empty() {
            return;
        }
        let Some(writer) = st.writer.clone() else {
            return;
        };

        let mut flushed = 0usize;
        while let Some(envelope) = st.queue.pop_front() {
            let text = envelope.data.to_string();
            let bytes = text.len();
            if writer.send(OutboundFrame::Text(text)).is_err() {
                st.queue.push_front(envelope);
                warn!(%channel, remaining = st.queue.len(), "writer closed during flush");
                break;
            }
            self.stats.record_sent(bytes);
            flushed += 1;
        }
        info!(%channel, flushed, "outbound queue flushed");
    }

    async fn run_reader(
        self,
        slot: Arc<ChannelSlot>,
        generation: u64,
        mut inbound: mpsc::UnboundedReceiver<TransportEvent>,
    ) {
        let channel = slot.channel;
        let mut code = close_codes::ABNORMAL;

        while let Some(event) = inbound.recv().await {
            match event {
                TransportEvent::Frame(raw) => {
                    if !self.handle_frame(&slot, generation, &raw).await {
                        return;
                    }
                }
                TransportEvent::Error(e) => {
                    warn!(%channel, "transport error: {e}");
                    self.stats.record_error();
                }
                TransportEvent::Closed { code: c } => {
                    code = c;
                    break;
                }
            }
        }

        let mut st = slot.state.lock().await;
        if st.generation != generation || st.status != ConnectionState::Connected {
            return;
        }
        st.tasks.reader = None;
        self.on_connection_closed(&slot, &mut st, code);
    }

    /// Route one inbound frame. Returns `false` once the connection it came
    /// from has been superseded.
    async fn handle_frame(&self, slot: &Arc<ChannelSlot>, generation: u64, raw: &str) -> bool {
        let channel = slot.channel;
        self.stats.record_received(raw.len());

        let envelope = match Envelope::parse(raw, channel) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(%channel, "dropping frame: {e}");
                self.stats.record_error();
                return true;
            }
        };

        let mut st = slot.state.lock().await;
        if st.generation != generation {
            return false;
        }

        match &envelope.kind {
            MessageType::Ping => {
                let pong = Envelope::pong(channel, envelope.sequence);
                match (pong.to_json(), &st.writer) {
                    (Ok(text), Some(writer)) => {
                        let bytes = text.len();
                        if writer.send(OutboundFrame::Text(text)).is_ok() {
                            self.stats.record_sent(bytes);
                        }
                    }
                    (Err(e), _) => warn!(%channel, "failed to encode pong: {e}"),
                    (Ok(_), None) => {}
                }
            }
            MessageType::Pong => match st.heartbeat.on_pong(&envelope) {
                Some(rtt) => {
                    let latency_ms = rtt.as_millis() as u64;
                    debug!(%channel, latency_ms, "pong");
                    self.stats.record_latency(latency_ms);
                }
                None => debug!(%channel, sequence = ?envelope.sequence, "unmatched pong ignored"),
            },
            MessageType::CrisisAlert => {
                drop(st);
                self.escalate_crisis(&envelope);
            }
            MessageType::Outbound => {
                debug!(%channel, "ignoring outbound marker received from peer");
            }
            MessageType::Other(_) => {
                let capacity = self.config().history_size;
                st.history.push(envelope.clone(), capacity);
                let subscribers = st.subscribers.snapshot();
                drop(st);

                let failures = dispatch(&subscribers, &envelope);
                self.record_errors(failures);
            }
        }
        true
    }

    fn escalate_crisis(&self, envelope: &Envelope) {
        let alert = CrisisAlert::from_envelope(envelope);
        warn!(
            channel = %alert.channel,
            severity = %alert.severity,
            scenario = alert.scenario.as_deref().unwrap_or("-"),
            "crisis alert: {}",
            alert.reason
        );

        let handler = &self.crisis_handler;
        if call_isolated("crisis handler", || handler.activate_crisis(&alert)).is_none() {
            self.stats.record_error();
        }
        if call_isolated("crisis alarm", || handler.sound_alarm(&alert)).is_none() {
            self.stats.record_error();
        }
        self.send_notification(&alert.notification());
    }

    fn send_notification(&self, notification: &Notification) {
        if call_isolated("notifier", || self.notifier.notify(notification)).is_none() {
            self.stats.record_error();
        }
    }

    /// The live connection ended with `code`.
    fn on_connection_closed(&self, slot: &Arc<ChannelSlot>, st: &mut ChannelState, code: u16) {
        st.writer = None;
        st.tasks.abort_connection();
        st.heartbeat.reset();

        if close_codes::is_clean(code) {
            info!(channel = %slot.channel, code, "connection closed cleanly");
            self.set_status(slot, st, ConnectionState::Disconnected);
        } else {
            warn!(channel = %slot.channel, code, "connection lost");
            self.schedule_reconnect(slot, st);
        }
    }

    fn schedule_reconnect(&self, slot: &Arc<ChannelSlot>, st: &mut ChannelState) {
        let channel = slot.channel;
        let backoff = Backoff::from_config(&self.config());

        let Some(delay) = backoff.next_delay(st.attempts) else {
            error!(%channel, attempts = st.attempts, "reconnection attempts exhausted");
            self.set_status(slot, st, ConnectionState::Error);
            self.send_notification(&Notification::connection_failed(channel, st.attempts));
            return;
        };

        st.attempts += 1;
        st.generation += 1;
        self.stats.record_reconnect();
        self.set_status(slot, st, ConnectionState::Reconnecting);
        info!(
            %channel,
            attempt = st.attempts,
            max = backoff.max_attempts,
            delay_ms = delay.as_millis() as u64,
            "reconnect scheduled"
        );

        let generation = st.generation;
        let manager = self.clone();
        let slot = Arc::clone(slot);
        st.tasks.reconnect = Some(tokio::spawn(async move {
            sleep(delay).await;
            let mut st = slot.state.lock().await;
            if st.generation != generation || st.status != ConnectionState::Reconnecting {
                return;
            }
            st.tasks.reconnect = None;
            manager.start_open(&slot, &mut st);
        }));
    }

    async fn run_heartbeat(self, slot: Arc<ChannelSlot>, generation: u64) {
        let channel = slot.channel;
        loop {
            let (interval, max_missed) = {
                let config = self.config();
                (config.heartbeat_interval(), config.heartbeat_max_missed)
            };
            sleep(interval).await;

            let mut st = slot.state.lock().await;
            if st.generation != generation || st.status != ConnectionState::Connected {
                return;
            }

            match st.heartbeat.tick(channel, max_missed) {
                HeartbeatTick::Ping(ping) => {
                    let text = match ping.to_json() {
                        Ok(text) => text,
                        Err(e) => {
                            warn!(%channel, "failed to encode ping: {e}");
                            continue;
                        }
                    };
                    let bytes = text.len();
                    let sent = st
                        .writer
                        .as_ref()
                        .is_some_and(|w| w.send(OutboundFrame::Text(text)).is_ok());
                    if sent {
                        self.stats.record_sent(bytes);
                        debug!(%channel, sequence = ?ping.sequence, "ping");
                    }
                }
                HeartbeatTick::Dead { missed } => {
                    warn!(%channel, missed, "heartbeat unanswered, dropping connection");
                    st.tasks.heartbeat = None;
                    self.on_connection_closed(&slot, &mut st, close_codes::ABNORMAL);
                    return;
                }
            }
        }
    }

    fn disconnect_locked(&self, slot: &Arc<ChannelSlot>, st: &mut ChannelState) {
        st.generation += 1;
        close_writer(st, close_codes::NORMAL);
        st.tasks.abort_connection();
        st.tasks.abort_grace();
        st.heartbeat.reset();
        st.attempts = 0;
        if st.status != ConnectionState::Disconnected {
            info!(channel = %slot.channel, "disconnected");
        }
        self.set_status(slot, st, ConnectionState::Disconnected);
    }

    /// Start (or restart) the idle timer that disconnects a channel with no
    /// subscribers.
    fn start_grace_timer(&self, slot: &Arc<ChannelSlot>, st: &mut ChannelState) {
        st.tasks.abort_grace();
        if st.status == ConnectionState::Disconnected || !st.subscribers.is_empty() {
            return;
        }

        st.grace_epoch += 1;
        let epoch = st.grace_epoch;
        let grace = self.config().unsubscribe_grace();
        debug!(channel = %slot.channel, grace_ms = grace.as_millis() as u64, "grace period started");

        let manager = self.clone();
        let slot = Arc::clone(slot);
        st.tasks.grace = Some(tokio::spawn(async move {
            sleep(grace).await;
            let mut st = slot.state.lock().await;
            if st.grace_epoch != epoch {
                return;
            }
            st.tasks.grace = None;
            if st.subscribers.is_empty() && st.status != ConnectionState::Disconnected {
                info!(channel = %slot.channel, "grace period elapsed with no subscribers");
                manager.disconnect_locked(&slot, &mut st);
            }
        }));
    }
}

fn close_writer(st: &mut ChannelState, code: u16) {
    if let Some(writer) = st.writer.take() {
        let _ = writer.send(OutboundFrame::Close { code });
    }
}

impl std::fmt::Debug for ChannelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let states: Vec<(Channel, ConnectionState)> =
            Channel::ALL.iter().map(|c| (*c, self.status(*c))).collect();
        f.debug_struct("ChannelManager")
            .field("channels", &states)
            .field("observers", &self.observers.observer_count())
            .finish()
    }
}
