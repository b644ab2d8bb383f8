//! Crisis escalation: `crisis_alert` envelopes bypass ordinary dispatch.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::channel::Channel;
use crate::envelope::Envelope;
use crate::status::{Notification, NotificationKind, Priority};

const DEFAULT_REASON: &str = "Crisis alert received";

/// Severity attached to a crisis alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CrisisSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl CrisisSeverity {
    /// Parse a severity label, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" | "normal" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for CrisisSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Details extracted from a `crisis_alert` envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CrisisAlert {
    /// Channel the alert arrived on.
    pub channel: Channel,
    /// Human-readable activation reason.
    pub reason: String,
    pub severity: CrisisSeverity,
    /// Simulation scenario id, e.g. `liquidity_lockdown`.
    pub scenario: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl CrisisAlert {
    /// Derive the alert from an envelope's payload.
    ///
    /// Missing or unrecognised fields fall back to a generic reason and
    /// `High` severity; extraction never fails.
    pub fn from_envelope(envelope: &Envelope) -> Self {
        let data = &envelope.data;

        let reason = match data {
            Value::String(s) if !s.trim().is_empty() => s.clone(),
            _ => first_string(data, &["reason", "message", "title", "description"])
                .unwrap_or_else(|| DEFAULT_REASON.to_string()),
        };

        let severity = match data.get("severity").and_then(Value::as_str) {
            Some(label) => CrisisSeverity::parse(label).unwrap_or_else(|| {
                warn!(label, "unknown crisis severity, assuming high");
                CrisisSeverity::High
            }),
            None => CrisisSeverity::High,
        };

        Self {
            channel: envelope.channel,
            reason,
            severity,
            scenario: first_string(data, &["scenario", "scenario_id"]),
            timestamp: envelope.timestamp,
        }
    }

    /// High-priority notification announcing this alert.
    pub fn notification(&self) -> Notification {
        let title = match &self.scenario {
            Some(scenario) => format!("Crisis mode activated: {scenario}"),
            None => "Crisis mode activated".to_string(),
        };
        Notification {
            kind: NotificationKind::CrisisAlert,
            priority: Priority::High,
            channel: self.channel,
            title,
            message: format!("[{}] {}", self.severity, self.reason),
        }
    }
}

fn first_string(data: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| data.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

/// External collaborator that switches the application into crisis mode.
pub trait CrisisHandler: Send + Sync {
    /// Activate crisis mode. Called exactly once per `crisis_alert` frame.
    fn activate_crisis(&self, alert: &CrisisAlert);

    /// Audible or visual alarm accompanying activation.
    fn sound_alarm(&self, _alert: &CrisisAlert) {}
}

/// Handler that only logs; used when the application wires none.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogCrisisHandler;

impl CrisisHandler for LogCrisisHandler {
    fn activate_crisis(&self, alert: &CrisisAlert) {
        warn!(
            channel = %alert.channel,
            severity = %alert.severity,
            scenario = alert.scenario.as_deref().unwrap_or("-"),
            "crisis alert: {}",
            alert.reason
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::MessageType;
    use serde_json::json;

    fn alert(data: Value) -> CrisisAlert {
        CrisisAlert::from_envelope(&Envelope::new(MessageType::CrisisAlert, Channel::Crisis, data))
    }

    #[test]
    fn test_full_payload() {
        let a = alert(json!({
            "reason": "Liquidity coverage below 30 days",
            "severity": "CRITICAL",
            "scenario": "liquidity_lockdown"
        }));
        assert_eq!(a.reason, "Liquidity coverage below 30 days");
        assert_eq!(a.severity, CrisisSeverity::Critical);
        assert_eq!(a.scenario.as_deref(), Some("liquidity_lockdown"));
        assert_eq!(a.channel, Channel::Crisis);
    }

    #[test]
    fn test_reason_fallbacks() {
        assert_eq!(alert(json!({"message": "VIX spike"})).reason, "VIX spike");
        assert_eq!(alert(json!({"reason": "  ", "title": "Ransomware"})).reason, "Ransomware");
        assert_eq!(alert(json!("Settlement halted")).reason, "Settlement halted");
        assert_eq!(alert(Value::Null).reason, DEFAULT_REASON);
        assert_eq!(alert(json!({"reason": 42})).reason, DEFAULT_REASON);
    }

    #[test]
    fn test_severity_defaults_to_high() {
        assert_eq!(alert(json!({})).severity, CrisisSeverity::High);
        assert_eq!(alert(json!({"severity": "apocalyptic"})).severity, CrisisSeverity::High);
        assert_eq!(alert(json!({"severity": "low"})).severity, CrisisSeverity::Low);
    }

    #[test]
    fn test_scenario_id_key() {
        let a = alert(json!({"scenario_id": "market_crash"}));
        assert_eq!(a.scenario.as_deref(), Some("market_crash"));
    }

    #[test]
    fn test_notification_is_high_priority() {
        let a = alert(json!({"reason": "Insider activity", "severity": "high", "scenario": "insider_threat"}));
        let n = a.notification();
        assert_eq!(n.priority, Priority::High);
        assert_eq!(n.kind, NotificationKind::CrisisAlert);
        assert_eq!(n.title, "Crisis mode activated: insider_threat");
        assert_eq!(n.message, "[high] Insider activity");
    }

    #[test]
    fn test_severity_ordering() {
        assert!(CrisisSeverity::Critical > CrisisSeverity::High);
        assert!(CrisisSeverity::Low < CrisisSeverity::Medium);
    }
}
