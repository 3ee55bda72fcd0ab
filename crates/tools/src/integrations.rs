//! Integration tools
//!
//! Outbound SMS through the Twilio REST API, direct publishes on the
//! message bus, and a service status report. In demo mode each tool
//! describes what it would have done instead of doing it.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use voice_gateway_config::TwilioConfig;
use voice_gateway_core::{unix_timestamp, EventPublisher};

use crate::schema::{required_str, InputSchema, PropertySchema, Tool, ToolSchema};
use crate::ToolError;

const SMS_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const UPTIME_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Deserialize)]
struct CreatedMessage {
    sid: String,
}

#[derive(Deserialize)]
struct ApiError {
    message: String,
}

pub struct SendSmsTool {
    client: reqwest::Client,
    account_sid: String,
    auth_token: String,
    from: String,
    api_base: String,
    demo: bool,
}

impl SendSmsTool {
    pub fn new(twilio: &TwilioConfig, demo: bool) -> Self {
        let client = reqwest::Client::builder()
            .timeout(SMS_REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            account_sid: twilio.account_sid.clone(),
            auth_token: twilio.auth_token.clone(),
            from: twilio.phone_number.clone(),
            api_base: twilio.api_base.trim_end_matches('/').to_string(),
            demo,
        }
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.api_base, self.account_sid
        )
    }
}

#[async_trait]
impl Tool for SendSmsTool {
    fn name(&self) -> &str {
        "send_sms"
    }

    fn description(&self) -> &str {
        "Send an outbound SMS text message via Twilio. Use to proactively notify Jack or other contacts."
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: InputSchema::object()
                .property(
                    "to",
                    PropertySchema::string(
                        "Recipient phone number in E.164 format (e.g. '+18475551234')",
                    ),
                    true,
                )
                .property("body", PropertySchema::string("Message text to send"), true)
                .build(),
        }
    }

    async fn execute(&self, input: Value) -> Result<String, ToolError> {
        let to = required_str(&input, "to")?;
        let body = required_str(&input, "body")?;

        if self.demo {
            return Ok(format!("DEMO: Would send SMS to {}: {}", to, body));
        }
        if self.account_sid.is_empty() || self.auth_token.is_empty() {
            return Err(ToolError::execution("Twilio credentials not configured"));
        }
        if self.from.is_empty() {
            return Err(ToolError::execution("TWILIO_PHONE_NUMBER not set"));
        }

        let response = self
            .client
            .post(self.messages_url())
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[("To", to), ("From", self.from.as_str()), ("Body", body)])
            .send()
            .await
            .map_err(|e| ToolError::execution(format!("sending SMS failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let detail = match response.json::<ApiError>().await {
                Ok(error) => error.message,
                Err(_) => status.to_string(),
            };
            tracing::error!(
                to = %to,
                status = status.as_u16(),
                detail = %detail,
                "SMS send failed"
            );
            return Err(ToolError::execution(format!("sending SMS failed: {}", detail)));
        }

        let message: CreatedMessage = response
            .json()
            .await
            .map_err(|e| ToolError::execution(format!("unexpected Twilio response: {}", e)))?;
        tracing::info!(to = %to, sid = %message.sid, "SMS sent");
        Ok(format!("SMS sent to {}", to))
    }

    fn timeout_secs(&self) -> u64 {
        20
    }
}

/// Publishes arbitrary messages on the bus behind the event publisher
pub struct PublishMessageTool {
    publisher: Arc<dyn EventPublisher>,
    demo: bool,
}

impl PublishMessageTool {
    pub fn new(publisher: Arc<dyn EventPublisher>, demo: bool) -> Self {
        Self { publisher, demo }
    }
}

#[async_trait]
impl Tool for PublishMessageTool {
    fn name(&self) -> &str {
        "mqtt_publish"
    }

    fn description(&self) -> &str {
        "Publish a message to the Charlotte MQTT broker. Use for controlling Charlotte systems, sending signals, or triggering protocols."
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: InputSchema::object()
                .property(
                    "topic",
                    PropertySchema::string(
                        "MQTT topic (e.g. 'charlotte/voice/command', 'charlotte/signals/isg')",
                    ),
                    true,
                )
                .property(
                    "payload",
                    PropertySchema::string("Message payload (string or JSON)"),
                    true,
                )
                .property(
                    "retain",
                    PropertySchema::boolean("Whether to retain the message (default: false)"),
                    false,
                )
                .build(),
        }
    }

    async fn execute(&self, input: Value) -> Result<String, ToolError> {
        let topic = required_str(&input, "topic")?.trim();
        let payload = required_str(&input, "payload")?;
        let retain = input.get("retain").and_then(Value::as_bool).unwrap_or(false);

        if topic.is_empty() {
            return Err(ToolError::invalid_params("topic must not be empty"));
        }
        if self.demo {
            return Ok(format!("DEMO: Would publish to {}: {}", topic, payload));
        }

        // JSON payloads go out structured, anything else as a string
        let value = serde_json::from_str::<Value>(payload)
            .unwrap_or_else(|_| Value::String(payload.to_string()));

        if self.publisher.publish_message(topic, value, retain) {
            Ok(format!("Published to {}", topic))
        } else {
            Err(ToolError::execution("message bus not available"))
        }
    }

    fn timeout_secs(&self) -> u64 {
        5
    }
}

/// Reports bus connectivity and uptime
pub struct StatusTool {
    publisher: Arc<dyn EventPublisher>,
    started_at: Instant,
    demo: bool,
}

impl StatusTool {
    pub fn new(publisher: Arc<dyn EventPublisher>, demo: bool) -> Self {
        Self {
            publisher,
            started_at: Instant::now(),
            demo,
        }
    }
}

#[async_trait]
impl Tool for StatusTool {
    fn name(&self) -> &str {
        "charlotte_status"
    }

    fn description(&self) -> &str {
        "Get the status of Charlotte OS systems: running services, message bus connectivity and uptime."
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: InputSchema::object().build(),
        }
    }

    async fn execute(&self, _input: Value) -> Result<String, ToolError> {
        let status = if self.demo {
            json!({
                "mode": "demo",
                "services": ["voice-agent"],
                "bus": "simulated",
                "uptime": "demo mode",
            })
        } else {
            json!({
                "bus": if self.publisher.bus_available() { "connected" } else { "unavailable" },
                "voice_agent": "running",
                "uptime": format_uptime(self.started_at.elapsed()),
                "system_uptime": system_uptime().await,
                "timestamp": unix_timestamp(),
            })
        };

        serde_json::to_string_pretty(&status).map_err(|e| ToolError::execution(e.to_string()))
    }

    fn timeout_secs(&self) -> u64 {
        10
    }
}

fn format_uptime(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    let (hours, minutes, seconds) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

/// Host uptime from `uptime -p`, or "unknown"
async fn system_uptime() -> String {
    let probe = tokio::process::Command::new("uptime")
        .arg("-p")
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .output();

    match tokio::time::timeout(UPTIME_PROBE_TIMEOUT, probe).await {
        Ok(Ok(output)) if output.status.success() => {
            let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if text.is_empty() {
                "unknown".to_string()
            } else {
                text
            }
        }
        _ => "unknown".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct NoBus;

    impl EventPublisher for NoBus {
        fn publish(&self, _event: voice_gateway_core::SessionEvent) {}
    }

    #[test]
    fn test_format_uptime() {
        assert_eq!(format_uptime(Duration::from_secs(42)), "42s");
        assert_eq!(format_uptime(Duration::from_secs(125)), "2m 5s");
        assert_eq!(format_uptime(Duration::from_secs(7_500)), "2h 5m");
    }

    #[test]
    fn test_messages_url_trims_base() {
        let twilio = TwilioConfig {
            account_sid: "AC1".to_string(),
            api_base: "http://127.0.0.1:9/".to_string(),
            ..Default::default()
        };
        let tool = SendSmsTool::new(&twilio, false);
        assert_eq!(
            tool.messages_url(),
            "http://127.0.0.1:9/2010-04-01/Accounts/AC1/Messages.json"
        );
    }

    #[tokio::test]
    async fn test_status_reports_missing_bus() {
        let tool = StatusTool::new(Arc::new(NoBus), false);
        let report: Value = serde_json::from_str(&tool.execute(json!({})).await.unwrap()).unwrap();
        assert_eq!(report["bus"], "unavailable");
        assert_eq!(report["voice_agent"], "running");
        assert!(report["system_uptime"].is_string());

        let demo = StatusTool::new(Arc::new(NoBus), true);
        let report: Value = serde_json::from_str(&demo.execute(json!({})).await.unwrap()).unwrap();
        assert_eq!(report["mode"], "demo");
        assert_eq!(report["bus"], "simulated");
    }

    #[tokio::test]
    async fn test_publish_without_bus_fails() {
        let tool = PublishMessageTool::new(Arc::new(NoBus), false);
        let err = tool
            .execute(json!({"topic": "charlotte/voice/command", "payload": "ping"}))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "message bus not available");
    }
}
