//! # Public Ingress
//!
//! Converts an arbitrary public HTTP request under `/t/{tunnel_id}/*rest`
//! into an [`HttpRequestFrame`], drives it through the
//! [`crate::correlator::RequestCorrelator`], and converts the agent's
//! reply back into an HTTP response. Header hygiene is a pure function shared
//! by both directions, grounded on the hop-by-hop header list pattern
//! used across reverse proxies in the wider corpus (e.g. agentgateway's
//! `HOP_HEADERS`).

use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderName, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::warn;
use tunnel_protocol::{ErrorKind, FieldMap, HttpRequestFrame};

use crate::state::AppState;

/// Headers that apply only to a single transport hop and are never
/// forwarded across a proxy boundary. `content-length` is included because it
/// is re-derived on whichever side re-serializes the body.
const HOP_BY_HOP: &[&str] = &[
    "host",
    "connection",
    "upgrade",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "content-length",
];

/// Copies `headers` into a [`FieldMap`], dropping every hop-by-hop name
/// (case-insensitively) and lower-casing the rest, matching the frame
/// payload's "headers (lowercased keys preferred)" shape.
pub fn strip_hop_by_hop(headers: &HeaderMap) -> FieldMap {
    headers
        .iter()
        .filter_map(|(name, value)| {
            let lower = name.as_str().to_ascii_lowercase();
            if HOP_BY_HOP.contains(&lower.as_str()) {
                return None;
            }
            value.to_str().ok().map(|v| (lower, v.to_string()))
        })
        .collect()
}

fn error_response(err: ErrorKind, tunnel_id: &str, local_port: Option<u16>) -> Response {
    let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = match err {
        ErrorKind::NotConnected => format!(
            "tunnel '{}' has no agent attached (expected local port {})",
            tunnel_id,
            local_port.map(|p| p.to_string()).unwrap_or_else(|| "unknown".to_string())
        ),
        other => other.to_string(),
    };
    (status, body).into_response()
}

/// `ANY /t/{tunnel_id}` — bare-root variant of [`proxy`] for callers that
/// omit the trailing slash; forwards with an empty `rest`.
pub async fn proxy_root(
    state: State<AppState>,
    method: Method,
    Path(tunnel_id): Path<String>,
    headers: HeaderMap,
    uri: axum::http::Uri,
    body: Bytes,
) -> Response {
    proxy(state, method, Path((tunnel_id, String::new())), headers, uri, body).await
}

/// `ANY /t/{tunnel_id}/{*rest}` — the reverse-proxy entry point.
pub async fn proxy(
    State(state): State<AppState>,
    method: Method,
    Path((tunnel_id, rest)): Path<(String, String)>,
    headers: HeaderMap,
    uri: axum::http::Uri,
    body: Bytes,
) -> Response {
    let Some(tunnel) = state.registry.get(&tunnel_id) else {
        return error_response(ErrorKind::NotFound, &tunnel_id, None);
    };

    if !tunnel.is_connected() {
        return error_response(ErrorKind::NotConnected, &tunnel_id, Some(tunnel.local_port));
    }

    let path = match uri.query() {
        Some(q) => format!("/{}?{}", rest, q),
        None => format!("/{}", rest),
    };
    let query = uri
        .query()
        .map(parse_query)
        .unwrap_or_default();

    let body_string = if matches!(method, Method::GET | Method::HEAD) {
        None
    } else {
        Some(String::from_utf8_lossy(&body).into_owned())
    };

    let request = HttpRequestFrame {
        id: String::new(),
        method: method.to_string(),
        path,
        query,
        headers: strip_hop_by_hop(&headers),
        body: body_string,
    };

    match state
        .correlator
        .dispatch(&state.hub, &tunnel_id, request)
        .await
    {
        Ok(response) => {
            tunnel.increment_request_count();
            tunnel.touch();

            let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::BAD_GATEWAY);
            let mut builder = Response::builder().status(status);
            if let Some(response_headers) = builder.headers_mut() {
                for (name, value) in filter_response_headers(&response.headers) {
                    if let Ok(header_name) = HeaderName::try_from(name.as_str()) {
                        if let Ok(header_value) = axum::http::HeaderValue::from_str(&value) {
                            response_headers.append(header_name, header_value);
                        }
                    }
                }
            }
            builder
                .body(Body::from(response.body))
                .unwrap_or_else(|e| {
                    warn!("failed to build proxied response: {}", e);
                    error_response(ErrorKind::Internal, &tunnel_id, None)
                })
        }
        Err(err) => error_response(err, &tunnel_id, Some(tunnel.local_port)),
    }
}

fn filter_response_headers(headers: &FieldMap) -> impl Iterator<Item = (String, String)> + '_ {
    headers.iter().filter_map(|(name, value)| {
        let lower = name.to_ascii_lowercase();
        if HOP_BY_HOP.contains(&lower.as_str()) {
            None
        } else {
            Some((lower, value.clone()))
        }
    })
}

fn parse_query(raw: &str) -> FieldMap {
    raw.split('&')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let mut parts = pair.splitn(2, '=');
            let key = parts.next()?;
            let value = parts.next().unwrap_or("");
            Some((
                percent_decode(key),
                percent_decode(value),
            ))
        })
        .collect()
}

/// Minimal percent-decoding for query components; this system does not
/// pull in a dedicated URL crate since the relay only needs to reproduce
/// the raw query string for the `query` object, not validate it.
fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                if let Ok(byte) = u8::from_str_radix(
                    std::str::from_utf8(&bytes[i + 1..i + 3]).unwrap_or(""),
                    16,
                ) {
                    out.push(byte);
                    i += 3;
                } else {
                    out.push(bytes[i]);
                    i += 1;
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use crate::correlator::RequestCorrelator;
    use crate::hub::ControlChannelHub;
    use crate::registry::TunnelRegistry;

    fn test_state() -> AppState {
        AppState {
            registry: TunnelRegistry::new(),
            hub: ControlChannelHub::new(),
            correlator: RequestCorrelator::new(),
            public_base_url: "http://localhost:8080".to_string(),
            ws_base_url: "ws://localhost:8080".to_string(),
        }
    }

    #[tokio::test]
    async fn proxy_root_for_unknown_tunnel_is_not_found() {
        let state = test_state();
        let response = proxy_root(
            State(state),
            Method::GET,
            Path("missing".to_string()),
            HeaderMap::new(),
            "/".parse().unwrap(),
            Bytes::new(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn proxy_for_disconnected_tunnel_is_service_unavailable() {
        let state = test_state();
        state.registry.create(3000, Some("t1".to_string())).unwrap();

        let response = proxy(
            State(state),
            Method::GET,
            Path(("t1".to_string(), String::new())),
            HeaderMap::new(),
            "/".parse().unwrap(),
            Bytes::new(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn strip_hop_by_hop_removes_named_headers_and_lowercases_keys() {
        let mut headers = HeaderMap::new();
        headers.insert("Host", HeaderValue::from_static("evil"));
        headers.insert("Connection", HeaderValue::from_static("keep-alive"));
        headers.insert("Content-Length", HeaderValue::from_static("5"));
        headers.insert("X-Custom", HeaderValue::from_static("value"));

        let stripped = strip_hop_by_hop(&headers);
        assert!(!stripped.contains_key("host"));
        assert!(!stripped.contains_key("connection"));
        assert!(!stripped.contains_key("content-length"));
        assert_eq!(stripped.get("x-custom"), Some(&"value".to_string()));
    }

    #[test]
    fn parse_query_decodes_percent_and_plus() {
        let query = parse_query("x=1&name=a+b&enc=%2Fpath");
        assert_eq!(query.get("x"), Some(&"1".to_string()));
        assert_eq!(query.get("name"), Some(&"a b".to_string()));
        assert_eq!(query.get("enc"), Some(&"/path".to_string()));
    }

    #[test]
    fn filter_response_headers_drops_hop_by_hop() {
        let mut headers = FieldMap::new();
        headers.insert("content-length".to_string(), "3".to_string());
        headers.insert("content-type".to_string(), "text/plain".to_string());
        let filtered: FieldMap = filter_response_headers(&headers).collect();
        assert!(!filtered.contains_key("content-length"));
        assert_eq!(filtered.get("content-type"), Some(&"text/plain".to_string()));
    }
}
