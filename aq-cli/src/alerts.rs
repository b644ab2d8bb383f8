//! Terminal and desktop delivery for transport notifications and crisis alerts.

use std::sync::atomic::{AtomicU64, Ordering};

use console::{style, Term};
use tracing::{debug, warn};

use aq_core::error::AqResult;
use aq_realtime::{CrisisAlert, CrisisHandler, CrisisSeverity, Notification, Notifier, Priority};

/// Show a native desktop notification.
fn show_desktop(title: &str, body: &str) -> AqResult<()> {
    #[cfg(not(test))]
    {
        use aq_core::constants::APP_NAME;
        use aq_core::error::AqError;

        notify_rust::Notification::new()
            .summary(title)
            .body(body)
            .appname(APP_NAME)
            .show()
            .map_err(|e| AqError::Notification(e.to_string()))?;
    }

    let _ = (title, body);
    Ok(())
}

/// Prints notifications to stderr and raises high-priority ones on the desktop.
pub struct DesktopNotifier {
    desktop: bool,
    shown: AtomicU64,
}

impl DesktopNotifier {
    pub fn new(desktop: bool) -> Self {
        Self {
            desktop,
            shown: AtomicU64::new(0),
        }
    }

    /// Number of notifications raised on the desktop.
    pub fn shown(&self) -> u64 {
        self.shown.load(Ordering::Relaxed)
    }
}

impl Notifier for DesktopNotifier {
    fn notify(&self, notification: &Notification) {
        let tag = match notification.priority {
            Priority::High => style("NOTICE").yellow().bold(),
            Priority::Normal => style("NOTICE").dim(),
        };
        eprintln!(
            "  {} [{}] {}: {}",
            tag, notification.channel, notification.title, notification.message
        );

        if !self.desktop || notification.priority != Priority::High {
            return;
        }
        match show_desktop(&notification.title, &notification.message) {
            Ok(()) => {
                self.shown.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => warn!("desktop notification failed: {e}"),
        }
    }
}

/// Crisis handler that switches the terminal into a visible alarm state.
#[derive(Default)]
pub struct TerminalCrisisHandler {
    activations: AtomicU64,
}

impl TerminalCrisisHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn activations(&self) -> u64 {
        self.activations.load(Ordering::Relaxed)
    }
}

impl CrisisHandler for TerminalCrisisHandler {
    fn activate_crisis(&self, alert: &CrisisAlert) {
        let n = self.activations.fetch_add(1, Ordering::Relaxed) + 1;
        let headline = match &alert.scenario {
            Some(scenario) => format!("CRISIS MODE ACTIVE ({scenario})"),
            None => "CRISIS MODE ACTIVE".to_string(),
        };
        let severity = match alert.severity {
            CrisisSeverity::Critical | CrisisSeverity::High => {
                style(alert.severity.as_str().to_uppercase()).red().bold()
            }
            _ => style(alert.severity.as_str().to_uppercase()).yellow().bold(),
        };

        eprintln!();
        eprintln!("{}", style(format!("!!! {headline} !!!")).white().on_red().bold());
        eprintln!("  {} {}", severity, alert.reason);
        eprintln!(
            "  {} {}",
            style("at").dim(),
            alert.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
        );
        eprintln!();
        debug!(activation = n, "crisis banner shown");
    }

    fn sound_alarm(&self, _alert: &CrisisAlert) {
        if let Err(e) = Term::stderr().write_str("\x07") {
            debug!("terminal bell failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aq_realtime::{Channel, Envelope};
    use serde_json::json;

    #[test]
    fn test_crisis_activation_is_counted() {
        let handler = TerminalCrisisHandler::new();
        let alert = CrisisAlert::from_envelope(&Envelope::new(
            "crisis_alert",
            Channel::Crisis,
            json!({"reason": "liquidity drain", "severity": "critical"}),
        ));
        handler.activate_crisis(&alert);
        handler.activate_crisis(&alert);
        assert_eq!(handler.activations(), 2);
    }

    #[test]
    fn test_only_high_priority_reaches_desktop() {
        let notifier = DesktopNotifier::new(true);
        notifier.notify(&Notification::connection_failed(Channel::Market, 5));
        notifier.notify(&Notification {
            priority: Priority::Normal,
            ..Notification::connection_failed(Channel::Market, 5)
        });
        assert_eq!(notifier.shown(), 1);
    }

    #[test]
    fn test_desktop_disabled() {
        let notifier = DesktopNotifier::new(false);
        notifier.notify(&Notification::connection_failed(Channel::Agents, 1));
        assert_eq!(notifier.shown(), 0);
    }
}
