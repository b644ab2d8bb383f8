//! Subscriber registry, per-channel fan-out, and replay history.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, error};

use crate::channel::Channel;
use crate::envelope::Envelope;
use crate::manager::ChannelManager;
use crate::status::call_isolated;

/// Callback invoked with every envelope that passes the filter.
pub type MessageCallback = Arc<dyn Fn(&Envelope) -> anyhow::Result<()> + Send + Sync>;

/// Predicate deciding whether a subscriber sees an envelope.
pub type MessageFilter = Arc<dyn Fn(&Envelope) -> bool + Send + Sync>;

/// Opaque identifier of one registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub(crate) u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Arguments to [`ChannelManager::subscribe`].
#[derive(Clone)]
pub struct SubscribeOptions {
    pub channel: Channel,
    pub callback: MessageCallback,
    pub filter: Option<MessageFilter>,
    /// Deliver the channel's recent history to this subscriber first.
    pub replay_history: bool,
}

impl SubscribeOptions {
    pub fn new<F>(channel: Channel, callback: F) -> Self
    where
        F: Fn(&Envelope) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            channel,
            callback: Arc::new(callback),
            filter: None,
            replay_history: false,
        }
    }

    pub fn with_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&Envelope) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(filter));
        self
    }

    /// Whether to deliver the channel's recent history first.
    pub fn with_replay(mut self, replay: bool) -> Self {
        self.replay_history = replay;
        self
    }
}

impl fmt::Debug for SubscribeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscribeOptions")
            .field("channel", &self.channel)
            .field("filtered", &self.filter.is_some())
            .field("replay_history", &self.replay_history)
            .finish()
    }
}

/// A registered subscriber.
///
/// While a history replay is pending, live envelopes are parked in
/// `replay_gate` and delivered after the history, in arrival order.
pub(crate) struct Subscriber {
    pub(crate) id: SubscriptionId,
    callback: MessageCallback,
    filter: Option<MessageFilter>,
    active: AtomicBool,
    replay_gate: Mutex<Option<Vec<Envelope>>>,
}

impl Subscriber {
    pub(crate) fn new(id: SubscriptionId, options: &SubscribeOptions) -> Self {
        Self {
            id,
            callback: Arc::clone(&options.callback),
            filter: options.filter.clone(),
            active: AtomicBool::new(true),
            replay_gate: Mutex::new(options.replay_history.then(Vec::new)),
        }
    }

    /// Deliver `history`, then whatever arrived live meanwhile, then open
    /// the gate. Returns the number of failed deliveries.
    pub(crate) fn replay(&self, history: &[Envelope]) -> usize {
        let mut failures = history.iter().filter(|e| !self.deliver(e)).count();
        loop {
            let parked = {
                let mut gate = self.gate();
                match gate.as_mut() {
                    Some(parked) if !parked.is_empty() => std::mem::take(parked),
                    _ => {
                        *gate = None;
                        return failures;
                    }
                }
            };
            failures += parked.iter().filter(|e| !self.deliver(e)).count();
        }
    }

    /// Live delivery: parked while a replay is pending.
    fn offer(&self, envelope: &Envelope) -> bool {
        if let Some(parked) = self.gate().as_mut() {
            parked.push(envelope.clone());
            return true;
        }
        self.deliver(envelope)
    }

    fn gate(&self) -> MutexGuard<'_, Option<Vec<Envelope>>> {
        self.replay_gate.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }

    /// Apply the filter and invoke the callback.
    ///
    /// Returns `false` when the filter or callback failed or panicked.
    fn deliver(&self, envelope: &Envelope) -> bool {
        if !self.is_active() {
            return true;
        }

        if let Some(filter) = &self.filter {
            match call_isolated("subscriber filter", || filter(envelope)) {
                Some(true) => {}
                Some(false) => return true,
                None => return false,
            }
        }

        match call_isolated("subscriber callback", || (self.callback)(envelope)) {
            Some(Ok(())) => true,
            Some(Err(e)) => {
                error!(
                    channel = %envelope.channel,
                    subscription = %self.id,
                    "subscriber callback failed: {e:#}"
                );
                false
            }
            None => false,
        }
    }
}

/// Subscribers on one channel, in registration order.
#[derive(Default)]
pub(crate) struct SubscriberSet {
    entries: Vec<Arc<Subscriber>>,
}

impl SubscriberSet {
    pub(crate) fn add(&mut self, subscriber: Arc<Subscriber>) {
        self.entries.push(subscriber);
    }

    /// Remove one subscriber. Returns whether it was registered.
    pub(crate) fn remove(&mut self, id: SubscriptionId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|s| {
            if s.id == id {
                s.deactivate();
                false
            } else {
                true
            }
        });
        self.entries.len() != before
    }

    /// Remove everyone. Returns how many were removed.
    pub(crate) fn clear(&mut self) -> usize {
        for subscriber in &self.entries {
            subscriber.deactivate();
        }
        let removed = self.entries.len();
        self.entries.clear();
        removed
    }

    pub(crate) fn snapshot(&self) -> Vec<Arc<Subscriber>> {
        self.entries.clone()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Deliver `envelope` to each subscriber in order.
///
/// A failing or panicking subscriber never stops delivery to the rest.
/// Returns the number of failures.
pub(crate) fn dispatch(subscribers: &[Arc<Subscriber>], envelope: &Envelope) -> usize {
    debug!(
        channel = %envelope.channel,
        kind = %envelope.kind,
        subscribers = subscribers.len(),
        "dispatching"
    );
    subscribers
        .iter()
        .filter(|s| !s.offer(envelope))
        .count()
}

/// Capped ring of recently dispatched envelopes.
#[derive(Debug, Default)]
pub(crate) struct History {
    entries: VecDeque<Envelope>,
}

impl History {
    pub(crate) fn push(&mut self, envelope: Envelope, capacity: usize) {
        if capacity == 0 {
            self.entries.clear();
            return;
        }
        self.entries.push_back(envelope);
        while self.entries.len() > capacity {
            self.entries.pop_front();
        }
    }

    pub(crate) fn snapshot(&self) -> Vec<Envelope> {
        self.entries.iter().cloned().collect()
    }
}

/// Handle to a live registration.
///
/// Dropping the handle leaves the registration in place; call
/// [`Subscription::unsubscribe`] to remove it.
#[must_use = "dropping the handle keeps the subscription alive; call unsubscribe() to remove it"]
pub struct Subscription {
    id: SubscriptionId,
    channel: Channel,
    subscriber: Arc<Subscriber>,
    manager: ChannelManager,
}

impl Subscription {
    pub(crate) fn new(
        channel: Channel,
        subscriber: Arc<Subscriber>,
        manager: ChannelManager,
    ) -> Self {
        Self {
            id: subscriber.id,
            channel,
            subscriber,
            manager,
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Whether the registration is still live.
    pub fn is_active(&self) -> bool {
        self.subscriber.is_active()
    }

    /// Remove the registration.
    ///
    /// Delivery stops immediately, including for a fan-out already in
    /// progress. When this was the channel's last subscriber the grace
    /// timer starts.
    pub async fn unsubscribe(self) {
        self.subscriber.deactivate();
        self.manager.remove_subscriber(self.channel, self.id).await;
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("channel", &self.channel)
            .field("active", &self.is_active())
            .finish()
    }
}
