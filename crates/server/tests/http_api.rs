//! Webhook, health and demo endpoints through the router

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use std::sync::Arc;
use tower::ServiceExt;

use voice_gateway_agent::{VoiceAgent, VoiceAgentConfig};
use voice_gateway_config::Settings;
use voice_gateway_llm::DemoBackend;
use voice_gateway_persistence::InMemoryConversationStore;
use voice_gateway_server::twilio::compute_signature;
use voice_gateway_server::{create_router, AppState, LogEventPublisher};
use voice_gateway_tools::ToolRegistry;

fn router(configure: impl FnOnce(&mut Settings)) -> Router {
    let mut config = Settings::default();
    config.demo = true;
    config.server.public_domain = "voice.example.com".to_string();
    config.twilio.auth_token = String::new();
    configure(&mut config);

    let agent = Arc::new(VoiceAgent::new(
        Arc::new(DemoBackend::new()),
        Arc::new(ToolRegistry::new()),
        VoiceAgentConfig::default(),
    ));
    let state = AppState::new(
        config,
        Arc::new(InMemoryConversationStore::default()),
        agent,
        Arc::new(LogEventPublisher),
    );
    create_router(state)
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn form_request(path: &str, form: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(path)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(form.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_health_reports_mode_and_calls() {
    let response = router(|_| {})
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["mode"], "demo");
    assert_eq!(json["active_calls"], 0);
    assert_eq!(json["model"], "demo");
}

#[tokio::test]
async fn test_voice_webhook_connects_media_stream() {
    let response = router(|_| {})
        .oneshot(form_request(
            "/twilio/voice",
            "CallSid=CA1&From=%2B15550001111&To=%2B15550002222",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/xml"
    );

    let twiml = body_text(response).await;
    assert!(twiml.contains("<Say voice=\"Polly.Joanna\">Connecting to Charlotte.</Say>"));
    assert!(twiml.contains("<Stream url=\"wss://voice.example.com/twilio/media\">"));
}

#[tokio::test]
async fn test_voice_webhook_checks_signature() {
    let signed = |config: &mut Settings| {
        config.twilio.auth_token = "12345".to_string();
        config.twilio.validate_signatures = true;
    };
    let form = "CallSid=CA1234567890ABCDE&From=%2B15550001111&To=%2B15550002222";

    let mut unsigned = form_request("/twilio/voice", form);
    unsigned
        .headers_mut()
        .insert("x-twilio-signature", "bogus".parse().unwrap());
    let response = router(signed).oneshot(unsigned).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let params = vec![
        ("CallSid".to_string(), "CA1234567890ABCDE".to_string()),
        ("From".to_string(), "+15550001111".to_string()),
        ("To".to_string(), "+15550002222".to_string()),
    ];
    let signature =
        compute_signature("12345", "https://voice.example.com/twilio/voice", &params).unwrap();

    let mut request = form_request("/twilio/voice", form);
    let headers = request.headers_mut();
    headers.insert("x-twilio-signature", signature.parse().unwrap());
    headers.insert("x-forwarded-proto", "https".parse().unwrap());
    headers.insert("x-forwarded-host", "voice.example.com".parse().unwrap());
    let response = router(signed).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_sms_webhook_replies_with_twiml() {
    let app = router(|_| {});

    let response = app
        .clone()
        .oneshot(form_request("/twilio/sms", "From=%2B15550001111&Body=help"))
        .await
        .unwrap();
    let twiml = body_text(response).await;
    assert!(twiml.contains("<Message>Charlotte SMS modes:"));
    assert!(twiml.contains("Current: general</Message>"));

    let response = app
        .oneshot(form_request("/twilio/sms", "From=%2B15550001111&Body=hello"))
        .await
        .unwrap();
    let twiml = body_text(response).await;
    assert!(twiml.contains("I&apos;m Charlotte, running in demo mode"));
}

#[tokio::test]
async fn test_sms_webhook_empty_body() {
    let response = router(|_| {})
        .oneshot(form_request("/twilio/sms", "From=%2B15550001111&Body="))
        .await
        .unwrap();
    let twiml = body_text(response).await;
    assert!(twiml.contains("<Message>I received an empty message."));
}

#[tokio::test]
async fn test_demo_trigger() {
    let request = || {
        Request::post("/demo/trigger")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"text":"hello there"}"#))
            .unwrap()
    };

    let response = router(|_| {}).oneshot(request()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(json["input"], "hello there");
    assert!(json["response"].as_str().unwrap().contains("demo mode"));

    let live = router(|config| config.demo = false);
    let response = live.oneshot(request()).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
