//! Session lifecycle events for the notification side-channel

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Event published on the session topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    CallStart {
        call_sid: String,
        timestamp: f64,
    },
    CallEnd {
        session_id: String,
        messages: usize,
        timestamp: f64,
    },
    MinutesStart {
        session_id: String,
        timestamp: f64,
    },
    MinutesEnd {
        session_id: String,
        entries: usize,
        duration_seconds: u64,
        timestamp: f64,
    },
    BriefingStart {
        session_id: String,
        topic: String,
        timestamp: f64,
    },
    BriefingEnd {
        session_id: String,
        topic: String,
        turn_count: u32,
        duration_seconds: u64,
        timestamp: f64,
    },
    SmsReceived {
        from: String,
        body: String,
        reply: String,
        mode: String,
        last_entity: String,
        timestamp: f64,
    },
}

impl SessionEvent {
    /// Event name as it appears in the payload
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::CallStart { .. } => "call_start",
            SessionEvent::CallEnd { .. } => "call_end",
            SessionEvent::MinutesStart { .. } => "minutes_start",
            SessionEvent::MinutesEnd { .. } => "minutes_end",
            SessionEvent::BriefingStart { .. } => "briefing_start",
            SessionEvent::BriefingEnd { .. } => "briefing_end",
            SessionEvent::SmsReceived { .. } => "sms_received",
        }
    }
}

/// Seconds since the epoch, as carried in event payloads
pub fn unix_timestamp() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}

/// Best-effort publisher. Implementations must never block the caller on
/// the bus and must swallow delivery failures.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: SessionEvent);

    /// Publish an arbitrary message on `topic`. Returns `false` when there
    /// is no bus to deliver to.
    fn publish_message(&self, topic: &str, payload: serde_json::Value, retain: bool) -> bool {
        let _ = (topic, payload, retain);
        false
    }

    /// Whether a bus is configured behind this publisher
    fn bus_available(&self) -> bool {
        false
    }
}
