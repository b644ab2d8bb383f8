//! Connection status broadcasting and outward notifications.
//!
//! [`StatusNotifier`] fans every channel state transition out to registered
//! observers. [`Notifier`] is the external collaborator that receives
//! high-priority notifications (exhausted retries, crisis alerts).

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::channel::{Channel, ConnectionState};

/// Observer invoked with `(channel, new_state)` on every transition.
pub type StatusCallback = Arc<dyn Fn(Channel, ConnectionState) + Send + Sync>;

type ObserverList = Vec<(u64, StatusCallback)>;

/// Broadcasts channel state transitions to any number of observers.
///
/// A panicking observer is logged and skipped; the remaining observers
/// still run.
#[derive(Clone, Default)]
pub struct StatusNotifier {
    observers: Arc<Mutex<ObserverList>>,
    next_id: Arc<AtomicU64>,
}

/// Registration handle returned by [`StatusNotifier::on_status_change`].
#[must_use = "dropping the handle keeps the observer registered; call unregister() to remove it"]
pub struct StatusObserver {
    id: u64,
    observers: Arc<Mutex<ObserverList>>,
}

impl StatusObserver {
    /// Remove the observer. Later transitions are not delivered to it.
    pub fn unregister(self) {
        let mut observers = self.observers.lock().unwrap_or_else(PoisonError::into_inner);
        observers.retain(|(id, _)| *id != self.id);
    }
}

impl StatusNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer for every channel's transitions.
    pub fn on_status_change<F>(&self, callback: F) -> StatusObserver
    where
        F: Fn(Channel, ConnectionState) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().push((id, Arc::new(callback)));
        StatusObserver {
            id,
            observers: Arc::clone(&self.observers),
        }
    }

    /// Deliver a transition to every observer.
    pub fn notify(&self, channel: Channel, state: ConnectionState) {
        let observers: Vec<StatusCallback> =
            self.lock().iter().map(|(_, cb)| Arc::clone(cb)).collect();
        debug!(%channel, %state, observers = observers.len(), "status change");
        for callback in observers {
            call_isolated("status observer", || callback(channel, state));
        }
    }

    pub fn observer_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ObserverList> {
        self.observers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Notification priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Normal,
    High,
}

/// What a notification is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// A channel exhausted its reconnection attempts.
    ConnectionFailed,
    /// A crisis alert arrived.
    CrisisAlert,
}

/// A user-facing notification emitted by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub priority: Priority,
    pub channel: Channel,
    pub title: String,
    pub message: String,
}

impl Notification {
    /// Terminal failure after `attempts` reconnection attempts.
    pub fn connection_failed(channel: Channel, attempts: u32) -> Self {
        Self {
            kind: NotificationKind::ConnectionFailed,
            priority: Priority::High,
            channel,
            title: "Realtime connection lost".to_string(),
            message: format!(
                "The {channel} channel could not reconnect after {attempts} attempt(s)."
            ),
        }
    }
}

/// External collaborator receiving transport notifications.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: &Notification);
}

/// Notifier that only writes to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: &Notification) {
        match notification.priority {
            Priority::High => warn!(
                channel = %notification.channel,
                kind = ?notification.kind,
                "{}: {}",
                notification.title,
                notification.message
            ),
            Priority::Normal => info!(
                channel = %notification.channel,
                "{}: {}",
                notification.title,
                notification.message
            ),
        }
    }
}

/// Run a collaborator callback, logging instead of propagating a panic.
///
/// Returns `None` if the callback panicked.
pub(crate) fn call_isolated<R>(what: &str, f: impl FnOnce() -> R) -> Option<R> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Some(value),
        Err(payload) => {
            error!("{what} panicked: {}", panic_message(payload.as_ref()));
            None
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observers_receive_transitions() {
        let notifier = StatusNotifier::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _observer = notifier.on_status_change(move |channel, state| {
            sink.lock().unwrap().push((channel, state));
        });

        notifier.notify(Channel::Market, ConnectionState::Connecting);
        notifier.notify(Channel::Market, ConnectionState::Connected);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                (Channel::Market, ConnectionState::Connecting),
                (Channel::Market, ConnectionState::Connected),
            ]
        );
    }

    #[test]
    fn test_panicking_observer_does_not_block_others() {
        let notifier = StatusNotifier::new();
        let count = Arc::new(AtomicU64::new(0));

        let _bad = notifier.on_status_change(|_, _| panic!("observer exploded"));
        let counter = Arc::clone(&count);
        let _good = notifier.on_status_change(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        notifier.notify(Channel::Crisis, ConnectionState::Error);
        notifier.notify(Channel::Crisis, ConnectionState::Connecting);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unregister_stops_delivery() {
        let notifier = StatusNotifier::new();
        let count = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&count);
        let observer = notifier.on_status_change(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(notifier.observer_count(), 1);

        notifier.notify(Channel::Agents, ConnectionState::Connecting);
        observer.unregister();
        notifier.notify(Channel::Agents, ConnectionState::Connected);

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(notifier.observer_count(), 0);
    }

    #[test]
    fn test_connection_failed_notification() {
        let n = Notification::connection_failed(Channel::Forecasts, 5);
        assert_eq!(n.priority, Priority::High);
        assert_eq!(n.kind, NotificationKind::ConnectionFailed);
        assert!(n.message.contains("forecasts"));
        assert!(n.message.contains('5'));
    }

    #[test]
    fn test_call_isolated() {
        assert_eq!(call_isolated("ok", || 4), Some(4));
        assert_eq!(call_isolated("boom", || -> u8 { panic!("boom") }), None);
    }
}
