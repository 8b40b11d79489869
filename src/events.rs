//! Observability events
//!
//! Process-wide broadcast bus for diagnostics and UI consumers. Events
//! are advisory: losing them (no subscribers, lagged receiver) never
//! affects correctness.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::metrics::UsageStats;
use crate::orchestrator::ProxyStatus;

/// Events published by the orchestrator
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum GatewayEvent {
    /// The orchestrator's status changed
    #[serde(rename_all = "camelCase")]
    StatusChanged {
        enabled: bool,
        status: ProxyStatus,
        timestamp: DateTime<Utc>,
        stats: UsageStats,
    },
    /// A connectivity or health probe failed
    #[serde(rename_all = "camelCase")]
    HealthCheckFailed {
        error: String,
        timestamp: DateTime<Utc>,
        can_retry: bool,
        retry_count: u32,
    },
}

/// Broadcast bus for [`GatewayEvent`]
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<GatewayEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.tx.subscribe()
    }

    /// Publish an event; silently dropped when nobody is listening
    pub fn publish(&self, event: GatewayEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_and_receive() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.publish(GatewayEvent::HealthCheckFailed {
            error: "connection refused".to_string(),
            timestamp: Utc::now(),
            can_retry: true,
            retry_count: 1,
        });

        match rx.recv().await.unwrap() {
            GatewayEvent::HealthCheckFailed { error, can_retry, retry_count, .. } => {
                assert_eq!(error, "connection refused");
                assert!(can_retry);
                assert_eq!(retry_count, 1);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_publish_without_subscribers_is_fine() {
        let bus = EventBus::default();
        bus.publish(GatewayEvent::StatusChanged {
            enabled: true,
            status: ProxyStatus::Enabled,
            timestamp: Utc::now(),
            stats: UsageStats::default(),
        });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_event_wire_shape() {
        let event = GatewayEvent::StatusChanged {
            enabled: true,
            status: ProxyStatus::Enabled,
            timestamp: Utc::now(),
            stats: UsageStats::default(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""event":"status-changed""#));
        assert!(json.contains(r#""status":"enabled""#));

        let event = GatewayEvent::HealthCheckFailed {
            error: "x".to_string(),
            timestamp: Utc::now(),
            can_retry: false,
            retry_count: 3,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""event":"health-check-failed""#));
        assert!(json.contains(r#""canRetry":false"#));
    }
}
