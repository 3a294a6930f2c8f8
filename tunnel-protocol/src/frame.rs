use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A single HTTP header or query-string map, as carried on the wire.
///
/// Kept as a `BTreeMap` (rather than a `HashMap`) so encoded frames and
/// test fixtures serialize deterministically; duplicate header/query
/// names collapse to their last occurrence, matching a plain JSON
/// object's semantics.
pub type FieldMap = BTreeMap<String, String>;

/// The HTTP exchange carried inside an [`Frame::HttpRequest`] frame.
///
/// `path` is origin-form and may already include a query string; `query`
/// duplicates whatever is present there so an agent that prefers one or
/// the other can pick.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HttpRequestFrame {
    pub id: String,
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub query: FieldMap,
    #[serde(default)]
    pub headers: FieldMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

/// The HTTP reply carried inside an [`Frame::HttpResponse`] frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HttpResponseFrame {
    #[serde(rename = "requestId")]
    pub request_id: String,
    pub status: u16,
    #[serde(default)]
    pub headers: FieldMap,
    #[serde(default)]
    pub body: String,
}

/// Every message that can appear on the control channel.
///
/// Serializes as `{"type": "<snake_case variant>", ...fields}`; field
/// names that cross the wire as identifiers shared with non-Rust agents
/// (`tunnelId`, `requestId`) are kept camelCase via `#[serde(rename)]`
/// while the Rust-side bindings stay idiomatic snake_case.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// First message sent by the relay once an agent's control channel
    /// attaches.
    Connected {
        #[serde(rename = "tunnelId")]
        tunnel_id: String,
        message: String,
    },

    /// Relay → agent: a parked public HTTP request to be served against
    /// the local origin.
    HttpRequest(HttpRequestFrame),

    /// Agent → relay: the reply to a previously received `HttpRequest`,
    /// matched back to its pending request by `request_id`.
    HttpResponse(HttpResponseFrame),

    /// Agent → relay heartbeat, sent on a fixed cadence.
    Ping { timestamp: i64 },

    /// Relay → agent heartbeat reply, echoing the ping's timestamp.
    Pong { timestamp: i64 },

    /// Either direction: a human-readable error notification that does
    /// not itself terminate the channel.
    Error { message: String },
}

impl Frame {
    /// Encodes this frame as a single line of UTF-8 JSON, ready to be sent
    /// as one WebSocket text message.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Decodes a single JSON text frame. Malformed input is the caller's
    /// concern to log and drop — this never panics.
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connected_frame_round_trips_with_camel_case_field() {
        let frame = Frame::Connected {
            tunnel_id: "abc123".to_string(),
            message: "attached".to_string(),
        };
        let json = frame.to_json().unwrap();
        assert!(json.contains("\"type\":\"connected\""));
        assert!(json.contains("\"tunnelId\":\"abc123\""));
        assert_eq!(Frame::from_json(&json).unwrap(), frame);
    }

    #[test]
    fn http_request_frame_omits_absent_body() {
        let frame = Frame::HttpRequest(HttpRequestFrame {
            id: "r1".to_string(),
            method: "GET".to_string(),
            path: "/hello".to_string(),
            query: FieldMap::new(),
            headers: FieldMap::new(),
            body: None,
        });
        let json = frame.to_json().unwrap();
        assert!(!json.contains("\"body\""));
    }

    #[test]
    fn http_response_frame_round_trips_with_request_id_rename() {
        let mut headers = FieldMap::new();
        headers.insert("content-type".to_string(), "text/plain".to_string());
        let frame = Frame::HttpResponse(HttpResponseFrame {
            request_id: "r1".to_string(),
            status: 200,
            headers,
            body: "ok".to_string(),
        });
        let json = frame.to_json().unwrap();
        assert!(json.contains("\"requestId\":\"r1\""));
        assert_eq!(Frame::from_json(&json).unwrap(), frame);
    }

    #[test]
    fn unknown_type_fails_to_parse_rather_than_panicking() {
        let result = Frame::from_json(r#"{"type":"subscribe","topic":"x"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn ping_pong_echo_timestamp() {
        let ping = Frame::Ping { timestamp: 1700000000 };
        let json = ping.to_json().unwrap();
        assert_eq!(json, r#"{"type":"ping","timestamp":1700000000}"#);

        let pong = Frame::Pong { timestamp: 1700000000 };
        assert_eq!(Frame::from_json(&pong.to_json().unwrap()).unwrap(), pong);
    }
}
