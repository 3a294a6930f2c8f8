//! # Local Origin Forwarding
//!
//! Turns one `http_request` frame into an outbound call against
//! `localhost:{local_port}` and the upstream reply back into an
//! `http_response` frame. Each inbound frame is handled as an
//! independent async call so one
//! slow origin response never blocks another in-flight request.

use std::time::Duration;

use tunnel_protocol::{FieldMap, HttpRequestFrame, HttpResponseFrame};

/// Deadline for the forwarded request against the local origin.
const LOCAL_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Deadline for the quick liveness probe preceding it.
const LOCAL_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Builds an `http_response` frame reporting that the local origin is
/// unreachable, without ever forwarding the request.
fn unavailable_response(request_id: String, detail: &str) -> HttpResponseFrame {
    let mut headers = FieldMap::new();
    headers.insert("content-type".to_string(), "application/json".to_string());
    HttpResponseFrame {
        request_id,
        status: 503,
        headers,
        body: format!(r#"{{"error":"local server is down","detail":"{detail}"}}"#),
    }
}

/// Builds an `http_response` frame for an unexpected local error.
fn internal_error_response(request_id: String, detail: &str) -> HttpResponseFrame {
    let mut headers = FieldMap::new();
    headers.insert("content-type".to_string(), "application/json".to_string());
    HttpResponseFrame {
        request_id,
        status: 500,
        headers,
        body: format!(r#"{{"error":"{detail}"}}"#),
    }
}

/// Forwards `request` to `http://localhost:{local_port}` and returns the
/// `http_response` frame to send back, never an `Err` — every failure
/// mode becomes a best-effort error response instead.
pub async fn forward(client: &reqwest::Client, local_port: u16, request: HttpRequestFrame) -> HttpResponseFrame {
    let base = format!("http://localhost:{local_port}");

    if let Err(err) = probe_local_origin(client, &base).await {
        return unavailable_response(request.id, &err.to_string());
    }

    match perform(client, &base, &request).await {
        Ok(response) => response,
        Err(err) => internal_error_response(request.id, &err.to_string()),
    }
}

/// A short-deadline `HEAD /` (falling back to `GET /` if the origin
/// rejects `HEAD`) to detect a dead local server before spending the
/// full request timeout on it.
async fn probe_local_origin(client: &reqwest::Client, base: &str) -> anyhow::Result<()> {
    let head = client
        .head(base)
        .timeout(LOCAL_PROBE_TIMEOUT)
        .send()
        .await;
    if head.is_ok() {
        return Ok(());
    }

    client
        .get(base)
        .timeout(LOCAL_PROBE_TIMEOUT)
        .send()
        .await
        .map(|_| ())
        .map_err(|err| anyhow::anyhow!(err))
}

async fn perform(
    client: &reqwest::Client,
    base: &str,
    request: &HttpRequestFrame,
) -> anyhow::Result<HttpResponseFrame> {
    let method = reqwest::Method::from_bytes(request.method.as_bytes())?;
    let url = format!("{base}{}", request.path);

    let mut builder = client.request(method, &url).timeout(LOCAL_REQUEST_TIMEOUT);
    for (name, value) in &request.headers {
        builder = builder.header(name, value);
    }
    if request.query.iter().next().is_some() && !request.path.contains('?') {
        builder = builder.query(&request.query);
    }
    if let Some(body) = &request.body {
        builder = builder.body(body.clone());
    }

    let response = builder.send().await?;
    let status = response.status().as_u16();
    let headers = response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
        })
        .collect();
    let body = response.text().await?;

    Ok(HttpResponseFrame {
        request_id: request.id.clone(),
        status,
        headers,
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_response_is_503_with_json_body() {
        let response = unavailable_response("r1".to_string(), "connection refused");
        assert_eq!(response.status, 503);
        assert!(response.body.contains("local server is down"));
        assert_eq!(response.request_id, "r1");
    }

    #[test]
    fn internal_error_response_is_500() {
        let response = internal_error_response("r1".to_string(), "boom");
        assert_eq!(response.status, 500);
        assert!(response.body.contains("boom"));
    }
}
