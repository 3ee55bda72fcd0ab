//! Twilio wire formats
//!
//! Webhook signature checks, TwiML replies and the media stream JSON
//! messages.

use axum::http::{HeaderMap, Uri};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use std::collections::HashMap;

use voice_gateway_pipeline::OutboundMedia;

type HmacSha1 = Hmac<Sha1>;

pub const SIGNATURE_HEADER: &str = "X-Twilio-Signature";

/// Custom stream parameter naming the media source
const SOURCE_PARAMETER: &str = "twilio";

/// `X-Twilio-Signature` for a request: HMAC-SHA1 over the URL followed by
/// every form field as `key` + `value`, sorted by key
pub fn compute_signature(
    auth_token: &str,
    url: &str,
    params: &[(String, String)],
) -> Option<String> {
    let mut sorted: Vec<&(String, String)> = params.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));

    let mut mac = HmacSha1::new_from_slice(auth_token.as_bytes()).ok()?;
    mac.update(url.as_bytes());
    for (key, value) in sorted {
        mac.update(key.as_bytes());
        mac.update(value.as_bytes());
    }
    Some(BASE64.encode(mac.finalize().into_bytes()))
}

pub fn validate_signature(
    auth_token: &str,
    url: &str,
    params: &[(String, String)],
    signature: &str,
) -> bool {
    match compute_signature(auth_token, url, params) {
        Some(expected) => constant_time_compare(expected.as_bytes(), signature.as_bytes()),
        None => false,
    }
}

/// Constant-time comparison to prevent timing attacks
pub(crate) fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

/// The URL Twilio signed. Behind a tunnel the scheme and host come from
/// the forwarding headers and the query string is dropped.
pub fn public_url(headers: &HeaderMap, uri: &Uri, fallback_host: &str) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    let host = header("x-forwarded-host")
        .or_else(|| header("host"))
        .unwrap_or_else(|| fallback_host.to_string());

    match header("x-forwarded-proto") {
        Some(proto) => format!("{}://{}{}", proto, host, uri.path()),
        None => {
            let path = uri
                .path_and_query()
                .map(|pq| pq.as_str())
                .unwrap_or_else(|| uri.path());
            format!("http://{}{}", host, path)
        }
    }
}

fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// TwiML that greets the caller and connects the call to the media stream
pub fn voice_twiml(greeting: &str, stream_url: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<Response>
    <Say voice="Polly.Joanna">{}</Say>
    <Connect>
        <Stream url="{}">
            <Parameter name="source" value="{}" />
        </Stream>
    </Connect>
</Response>"#,
        escape_xml(greeting),
        escape_xml(stream_url),
        SOURCE_PARAMETER
    )
}

/// TwiML reply to an SMS
pub fn sms_twiml(reply: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<Response>
    <Message>{}</Message>
</Response>"#,
        escape_xml(reply)
    )
}

/// Inbound media stream message
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum StreamEvent {
    Connected {
        #[serde(default)]
        protocol: Option<String>,
    },
    Start {
        start: StartMeta,
    },
    Media {
        media: MediaPayload,
    },
    Mark {
        mark: MarkName,
    },
    Stop {
        #[serde(default)]
        stop: Option<StopMeta>,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartMeta {
    pub stream_sid: String,
    pub call_sid: String,
    #[serde(default)]
    pub custom_parameters: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaPayload {
    #[serde(default)]
    pub track: Option<String>,
    pub payload: String,
}

impl MediaPayload {
    /// Decoded mu-law bytes; malformed payloads decode to nothing
    pub fn audio(&self) -> Vec<u8> {
        BASE64.decode(&self.payload).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkName {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopMeta {
    #[serde(default)]
    pub call_sid: Option<String>,
}

/// Outbound media stream message
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
enum OutboundEvent<'a> {
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: &'a str,
        media: OutboundPayload,
    },
    Clear {
        #[serde(rename = "streamSid")]
        stream_sid: &'a str,
    },
    Mark {
        #[serde(rename = "streamSid")]
        stream_sid: &'a str,
        mark: MarkName,
    },
}

#[derive(Debug, Clone, Serialize)]
struct OutboundPayload {
    payload: String,
}

/// Serialize one outbound item for the stream
pub fn outbound_message(stream_sid: &str, media: OutboundMedia) -> String {
    let event = match media {
        OutboundMedia::Audio(audio) => OutboundEvent::Media {
            stream_sid,
            media: OutboundPayload {
                payload: BASE64.encode(audio),
            },
        },
        OutboundMedia::Clear => OutboundEvent::Clear { stream_sid },
        OutboundMedia::Mark(name) => OutboundEvent::Mark {
            stream_sid,
            mark: MarkName { name },
        },
    };
    // Serializing these plain structs cannot fail
    serde_json::to_string(&event).unwrap_or_default()
}
