//! SMS, bus publish and status tools through the registry

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Form, Json, Router};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use voice_gateway_config::{ToolSettings, TwilioConfig};
use voice_gateway_core::{EventPublisher, SessionEvent};
use voice_gateway_persistence::InMemoryConversationStore;
use voice_gateway_tools::{create_registry, SendSmsTool, Tool, ToolError, ToolRegistry};

/// Request seen by the fake Twilio API
#[derive(Debug)]
struct SentMessage {
    account: String,
    authorization: String,
    form: HashMap<String, String>,
}

async fn create_message(
    State(sent): State<mpsc::UnboundedSender<SentMessage>>,
    Path(account): Path<String>,
    headers: HeaderMap,
    Form(form): Form<HashMap<String, String>>,
) -> (StatusCode, Json<Value>) {
    if form.get("To").map(String::as_str) == Some("not-a-number") {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"code": 21211, "message": "The 'To' number is not a valid phone number."})),
        );
    }

    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let _ = sent.send(SentMessage {
        account,
        authorization,
        form,
    });
    (StatusCode::CREATED, Json(json!({"sid": "SM123", "status": "queued"})))
}

async fn fake_twilio() -> (String, mpsc::UnboundedReceiver<SentMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let app = Router::new()
        .route("/2010-04-01/Accounts/:account/Messages.json", post(create_message))
        .with_state(tx);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), rx)
}

fn twilio(api_base: &str) -> TwilioConfig {
    TwilioConfig {
        account_sid: "AC123".to_string(),
        auth_token: "secret".to_string(),
        phone_number: "+15550002222".to_string(),
        api_base: api_base.to_string(),
        ..Default::default()
    }
}

/// Records direct bus messages
#[derive(Default)]
struct RecordingBus {
    messages: Mutex<Vec<(String, Value, bool)>>,
}

impl EventPublisher for RecordingBus {
    fn publish(&self, _event: SessionEvent) {}

    fn publish_message(&self, topic: &str, payload: Value, retain: bool) -> bool {
        self.messages
            .lock()
            .unwrap()
            .push((topic.to_string(), payload, retain));
        true
    }

    fn bus_available(&self) -> bool {
        true
    }
}

fn registry(bus: Arc<RecordingBus>, demo: bool) -> ToolRegistry {
    create_registry(
        Arc::new(InMemoryConversationStore::default()),
        bus,
        &ToolSettings::default(),
        &twilio("http://127.0.0.1:1"),
        demo,
    )
}

#[tokio::test]
async fn test_send_sms_posts_to_twilio() {
    let (base, mut sent) = fake_twilio().await;
    let tool = SendSmsTool::new(&twilio(&base), false);

    let reply = tool
        .execute(json!({"to": "+15550001111", "body": "Roof guy confirmed for 9am"}))
        .await
        .unwrap();
    assert_eq!(reply, "SMS sent to +15550001111");

    let request = sent.recv().await.unwrap();
    assert_eq!(request.account, "AC123");
    // base64("AC123:secret")
    assert_eq!(request.authorization, "Basic QUMxMjM6c2VjcmV0");
    assert_eq!(request.form["To"], "+15550001111");
    assert_eq!(request.form["From"], "+15550002222");
    assert_eq!(request.form["Body"], "Roof guy confirmed for 9am");
}

#[tokio::test]
async fn test_send_sms_surfaces_twilio_error() {
    let (base, _sent) = fake_twilio().await;
    let tool = SendSmsTool::new(&twilio(&base), false);

    let err = tool
        .execute(json!({"to": "not-a-number", "body": "hi"}))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        ToolError::execution("sending SMS failed: The 'To' number is not a valid phone number.")
    );
}

#[tokio::test]
async fn test_send_sms_requires_configuration() {
    let mut config = twilio("http://127.0.0.1:1");
    config.auth_token.clear();
    let err = SendSmsTool::new(&config, false)
        .execute(json!({"to": "+15550001111", "body": "hi"}))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Twilio credentials not configured");

    let mut config = twilio("http://127.0.0.1:1");
    config.phone_number.clear();
    let err = SendSmsTool::new(&config, false)
        .execute(json!({"to": "+15550001111", "body": "hi"}))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "TWILIO_PHONE_NUMBER not set");
}

#[tokio::test]
async fn test_integrations_registered() {
    let registry = registry(Arc::new(RecordingBus::default()), false);
    for name in ["send_sms", "mqtt_publish", "charlotte_status"] {
        assert!(registry.has(name), "{} missing", name);
    }
}

#[tokio::test]
async fn test_publish_goes_to_bus() {
    let bus = Arc::new(RecordingBus::default());
    let registry = registry(bus.clone(), false);

    let reply = registry
        .execute(
            "mqtt_publish",
            json!({"topic": "charlotte/signals/isg", "payload": "{\"level\": 2}", "retain": true}),
        )
        .await
        .unwrap();
    assert_eq!(reply, "Published to charlotte/signals/isg");

    let reply = registry
        .execute(
            "mqtt_publish",
            json!({"topic": "charlotte/voice/command", "payload": "lights off"}),
        )
        .await
        .unwrap();
    assert_eq!(reply, "Published to charlotte/voice/command");

    let messages = bus.messages.lock().unwrap();
    assert_eq!(
        messages[0],
        ("charlotte/signals/isg".to_string(), json!({"level": 2}), true)
    );
    assert_eq!(
        messages[1],
        ("charlotte/voice/command".to_string(), json!("lights off"), false)
    );
}

#[tokio::test]
async fn test_demo_mode_describes_instead_of_acting() {
    let bus = Arc::new(RecordingBus::default());
    let registry = registry(bus.clone(), true);

    let sms = registry
        .execute("send_sms", json!({"to": "+15550001111", "body": "hello"}))
        .await
        .unwrap();
    assert_eq!(sms, "DEMO: Would send SMS to +15550001111: hello");

    let publish = registry
        .execute(
            "mqtt_publish",
            json!({"topic": "charlotte/voice/command", "payload": "ping"}),
        )
        .await
        .unwrap();
    assert_eq!(publish, "DEMO: Would publish to charlotte/voice/command: ping");
    assert!(bus.messages.lock().unwrap().is_empty());

    let status: Value =
        serde_json::from_str(&registry.execute("charlotte_status", json!({})).await.unwrap())
            .unwrap();
    assert_eq!(status["mode"], "demo");
    assert_eq!(status["services"], json!(["voice-agent"]));
}

#[tokio::test]
async fn test_status_reports_connected_bus() {
    let registry = registry(Arc::new(RecordingBus::default()), false);
    let status: Value =
        serde_json::from_str(&registry.execute("charlotte_status", json!({})).await.unwrap())
            .unwrap();
    assert_eq!(status["bus"], "connected");
    assert_eq!(status["voice_agent"], "running");
    assert!(status["timestamp"].as_f64().unwrap() > 0.0);
}
