//! Session event publishers
//!
//! Events are posted to a message-bus HTTP bridge as `{topic, payload}`.
//! Delivery is best-effort: publishing never blocks the call and failures
//! are only logged.

use std::sync::Arc;
use std::time::Duration;

use voice_gateway_config::NotificationConfig;
use voice_gateway_core::{EventPublisher, SessionEvent};

/// Posts events to the bus bridge
pub struct HttpEventPublisher {
    client: reqwest::Client,
    endpoint: String,
    topic: String,
}

impl HttpEventPublisher {
    pub fn new(
        endpoint: impl Into<String>,
        topic: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            topic: topic.into(),
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    fn body(&self, event: &SessionEvent) -> serde_json::Value {
        serde_json::json!({
            "topic": self.topic,
            "payload": event,
        })
    }

    /// Fire-and-forget POST; `false` outside a runtime
    fn post(&self, body: serde_json::Value, label: String) -> bool {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!(message = %label, "No runtime, message dropped");
            return false;
        };

        let request = self.client.post(&self.endpoint).json(&body);
        runtime.spawn(async move {
            match request.send().await.and_then(|r| r.error_for_status()) {
                Ok(_) => tracing::debug!(message = %label, "Message published"),
                Err(e) => tracing::debug!(message = %label, error = %e, "Message publish failed"),
            }
        });
        true
    }
}

impl EventPublisher for HttpEventPublisher {
    fn publish(&self, event: SessionEvent) {
        let body = self.body(&event);
        self.post(body, event.name().to_string());
    }

    fn publish_message(&self, topic: &str, payload: serde_json::Value, retain: bool) -> bool {
        let body = serde_json::json!({
            "topic": topic,
            "payload": payload,
            "retain": retain,
        });
        self.post(body, topic.to_string())
    }

    fn bus_available(&self) -> bool {
        true
    }
}

/// Logs events; used when notifications are off
#[derive(Debug, Default)]
pub struct LogEventPublisher;

impl EventPublisher for LogEventPublisher {
    fn publish(&self, event: SessionEvent) {
        tracing::info!(event = event.name(), payload = ?event, "Session event");
    }
}

/// Publisher for the configured notification settings
pub fn build_publisher(config: &NotificationConfig) -> Arc<dyn EventPublisher> {
    let endpoint = match (&config.endpoint, config.enabled) {
        (Some(endpoint), true) if !endpoint.is_empty() => endpoint,
        (None, true) => {
            tracing::warn!("Notifications enabled without an endpoint, logging events instead");
            return Arc::new(LogEventPublisher);
        }
        _ => return Arc::new(LogEventPublisher),
    };

    match HttpEventPublisher::new(
        endpoint.clone(),
        config.topic.clone(),
        Duration::from_millis(config.timeout_ms),
    ) {
        Ok(publisher) => {
            tracing::info!(
                endpoint = %endpoint,
                topic = %config.topic,
                "Publishing session events"
            );
            Arc::new(publisher)
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                "Notification client failed to build, logging events instead"
            );
            Arc::new(LogEventPublisher)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_wraps_tagged_event() {
        let publisher = HttpEventPublisher::new(
            "http://127.0.0.1:1/publish",
            "charlotte/voice/session",
            Duration::from_millis(200),
        )
        .unwrap();
        let body = publisher.body(&SessionEvent::CallStart {
            call_sid: "CA1".to_string(),
            timestamp: 1.0,
        });
        assert_eq!(body["topic"], "charlotte/voice/session");
        assert_eq!(body["payload"]["event"], "call_start");
        assert_eq!(body["payload"]["call_sid"], "CA1");
    }

    #[tokio::test]
    async fn test_direct_messages_go_to_the_bus() {
        let publisher = HttpEventPublisher::new(
            "http://127.0.0.1:1/publish",
            "charlotte/voice/session",
            Duration::from_millis(200),
        )
        .unwrap();
        assert!(publisher.bus_available());
        assert!(publisher.publish_message(
            "charlotte/signals/isg",
            serde_json::json!({"level": 2}),
            true
        ));
        assert!(!LogEventPublisher.bus_available());
        assert!(!LogEventPublisher.publish_message("t", serde_json::Value::Null, false));
    }

    #[tokio::test]
    async fn test_unreachable_bus_is_swallowed() {
        let publisher = HttpEventPublisher::new(
            "http://127.0.0.1:1/publish",
            "t",
            Duration::from_millis(200),
        )
        .unwrap();
        publisher.publish(SessionEvent::CallStart {
            call_sid: "CA1".to_string(),
            timestamp: 1.0,
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[test]
    fn test_publish_outside_runtime_is_dropped() {
        let publisher =
            HttpEventPublisher::new("http://127.0.0.1:1/publish", "t", Duration::from_millis(200))
                .unwrap();
        publisher.publish(SessionEvent::CallStart {
            call_sid: "CA1".to_string(),
            timestamp: 1.0,
        });
    }

    #[test]
    fn test_disabled_notifications_log() {
        let config = NotificationConfig {
            enabled: false,
            endpoint: Some("http://bus.local/publish".to_string()),
            ..Default::default()
        };
        // Only checks that construction picks a publisher without a runtime
        build_publisher(&config).publish(SessionEvent::CallStart {
            call_sid: "CA1".to_string(),
            timestamp: 1.0,
        });
    }
}
