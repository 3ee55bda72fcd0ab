//! HTTP Endpoints
//!
//! Twilio webhooks, the app socket, health, metrics and the demo trigger.

use axum::{
    extract::{Json, State},
    http::{header, HeaderMap, HeaderValue, Method, Uri},
    response::IntoResponse,
    routing::{get, post},
    Form, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::app::app_socket_handler;
use crate::media::media_stream_handler;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use crate::twilio::{public_url, sms_twiml, validate_signature, voice_twiml, SIGNATURE_HEADER};
use crate::ServerError;

/// Create the application router
pub fn create_router(state: AppState) -> Router {
    let cors_layer = build_cors_layer(
        &state.config.server.cors_origins,
        state.config.server.cors_enabled,
    );

    Router::new()
        // Twilio webhooks
        .route("/twilio/voice", post(voice_webhook))
        .route("/twilio/sms", post(sms_webhook))
        // Twilio media stream (WebSocket)
        .route("/twilio/media", get(media_stream_handler))
        // Companion app (WebSocket)
        .route("/app/ws", get(app_socket_handler))
        // Health check
        .route("/health", get(health_check))
        // Prometheus metrics
        .route("/metrics", get(metrics_handler))
        // Demo mode only
        .route("/demo/trigger", post(demo_trigger))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors_layer)
        .with_state(state)
}

/// Build CORS layer from configured origins
///
/// - If cors_enabled is false, returns permissive layer (for dev)
/// - If cors_origins is empty, defaults to localhost:3000
/// - Otherwise, uses the configured origins
fn build_cors_layer(origins: &[String], enabled: bool) -> CorsLayer {
    if !enabled {
        tracing::warn!("CORS is disabled - allowing all origins (NOT FOR PRODUCTION)");
        return CorsLayer::permissive();
    }

    let parsed_origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| {
            origin.parse::<HeaderValue>().ok().or_else(|| {
                tracing::warn!("Invalid CORS origin: {}", origin);
                None
            })
        })
        .collect();

    if parsed_origins.is_empty() {
        tracing::info!("No valid CORS origins configured, defaulting to localhost:3000");
        return CorsLayer::new()
            .allow_origin(HeaderValue::from_static("http://localhost:3000"))
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers(Any);
    }

    tracing::info!("CORS configured with {} origins", parsed_origins.len());
    CorsLayer::new()
        .allow_origin(parsed_origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
}

fn xml(body: String) -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "application/xml")], body)
}

/// Reject webhooks Twilio did not sign. Skipped without an auth token.
fn check_signature(
    state: &AppState,
    headers: &HeaderMap,
    uri: &Uri,
    params: &[(String, String)],
) -> Result<(), ServerError> {
    let twilio = &state.config.twilio;
    if !twilio.validate_signatures || twilio.auth_token.is_empty() {
        return Ok(());
    }

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let url = public_url(headers, uri, &state.config.server.public_domain);

    if validate_signature(&twilio.auth_token, &url, params, signature) {
        Ok(())
    } else {
        metrics::counter!("voice_errors_total", "component" => "signature").increment(1);
        tracing::warn!(url = %url, "Invalid Twilio signature, rejecting request");
        Err(ServerError::InvalidSignature)
    }
}

fn form_value<'a>(params: &'a [(String, String)], key: &str) -> Option<&'a str> {
    params
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

/// `POST /twilio/voice`: greet and connect the call to the media stream
async fn voice_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: Uri,
    Form(params): Form<Vec<(String, String)>>,
) -> Result<impl IntoResponse, ServerError> {
    check_signature(&state, &headers, &uri, &params)?;

    tracing::info!(
        from = form_value(&params, "From").unwrap_or("unknown"),
        call_sid = form_value(&params, "CallSid").unwrap_or("unknown"),
        "Incoming call"
    );

    Ok(xml(voice_twiml(
        &state.config.twilio.greeting,
        &state.media_stream_url(),
    )))
}

/// `POST /twilio/sms`: answer through the SMS conversation
async fn sms_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: Uri,
    Form(params): Form<Vec<(String, String)>>,
) -> Result<impl IntoResponse, ServerError> {
    check_signature(&state, &headers, &uri, &params)?;

    let from = form_value(&params, "From").unwrap_or("unknown");
    let body = form_value(&params, "Body").unwrap_or_default();
    tracing::info!(
        from = %from,
        body = %body.chars().take(200).collect::<String>(),
        "Incoming SMS"
    );

    let reply = state.text.sms_reply(from, body).await;
    Ok(xml(sms_twiml(&reply)))
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub mode: String,
    pub uptime: f64,
    pub active_calls: usize,
    pub model: String,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        mode: if state.is_demo() { "demo" } else { "live" }.to_string(),
        uptime: state.uptime().as_secs_f64(),
        active_calls: state.calls.count(),
        model: state.agent.model_name().to_string(),
    })
}

#[derive(Debug, Deserialize)]
pub struct DemoRequest {
    #[serde(default = "default_demo_text")]
    pub text: String,
}

fn default_demo_text() -> String {
    "Hello Charlotte".to_string()
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DemoResponse {
    pub input: String,
    pub response: String,
}

/// `POST /demo/trigger`: one text turn on the demo session
async fn demo_trigger(
    State(state): State<AppState>,
    Json(request): Json<DemoRequest>,
) -> Result<Json<DemoResponse>, ServerError> {
    if !state.is_demo() {
        return Err(ServerError::NotFound);
    }

    let response = state.text.demo_reply(&request.text).await?;
    Ok(Json(DemoResponse {
        input: request.text,
        response,
    }))
}
