//! Outbound JSON POSTs with categorized failures.

use std::time::{Duration, Instant};

use bytes::Bytes;
use chrono::Utc;
use serde_json::Value;
use thiserror::Error;
use tracing::{info_span, Instrument};

use hermes_core::error::BridgeError;

use super::signing::{self, SIGNATURE_HEADER, TIMESTAMP_HEADER};

#[derive(Debug, Clone, Error)]
pub enum WebhookError {
    /// Connection refused, DNS or TLS connect failure: nothing was sent.
    #[error("unreachable: {0}")]
    Unreachable(String),
    #[error("timed out after {0}ms")]
    Timeout(u64),
    #[error("HTTP {status}")]
    Status { status: u16, body: String },
    #[error("request failed: {0}")]
    Request(String),
}

impl WebhookError {
    /// Consumer outage rather than a failed delivery.
    pub fn is_outage(&self) -> bool {
        matches!(self, WebhookError::Unreachable(_))
    }
}

impl From<WebhookError> for BridgeError {
    fn from(e: WebhookError) -> Self {
        match e {
            WebhookError::Timeout(ms) => BridgeError::Timeout(ms),
            other => BridgeError::Upstream(other.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WebhookResponse {
    pub status: u16,
    pub body: Value,
    pub elapsed: Duration,
}

const MAX_ERROR_BODY: usize = 1024;

#[derive(Debug, Clone)]
pub struct WebhookClient {
    http: reqwest::Client,
    secret: Option<String>,
}

impl WebhookClient {
    pub fn new(secret: Option<String>) -> Result<Self, BridgeError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("hermes-bridge/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| BridgeError::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http, secret })
    }

    /// POST `body` as JSON. Any 2xx is success; everything else is an error.
    pub async fn post_json(
        &self,
        url: &str,
        body: &Value,
        headers: &[(&str, String)],
        timeout: Duration,
    ) -> Result<WebhookResponse, WebhookError> {
        let span = info_span!("webhook_post", url = %url);
        async move {
            let bytes = Bytes::from(serde_json::to_vec(body).map_err(|e| WebhookError::Request(e.to_string()))?);
            let mut req = self
                .http
                .post(url)
                .timeout(timeout)
                .header(reqwest::header::CONTENT_TYPE, "application/json");
            for (k, v) in headers {
                req = req.header(*k, v);
            }
            if let Some(secret) = &self.secret {
                let ts = Utc::now().timestamp();
                req = req
                    .header(TIMESTAMP_HEADER, ts.to_string())
                    .header(SIGNATURE_HEADER, signing::sign(secret, ts, &bytes));
            }

            let started = Instant::now();
            let resp = match req.body(bytes).send().await {
                Ok(r) => r,
                Err(e) if e.is_timeout() => {
                    tracing::warn!(timeout_ms = timeout.as_millis() as u64, "webhook timed out");
                    return Err(WebhookError::Timeout(timeout.as_millis() as u64));
                }
                // Only a failed connect is an outage. Once the request is on
                // the wire, a reset or early close counts against the event.
                Err(e) if e.is_connect() => {
                    tracing::warn!(error = %e, "webhook unreachable");
                    return Err(WebhookError::Unreachable(e.to_string()));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "webhook request failed");
                    return Err(WebhookError::Request(e.to_string()));
                }
            };

            let status = resp.status();
            let raw = match resp.bytes().await {
                Ok(b) => b,
                Err(e) if e.is_timeout() => return Err(WebhookError::Timeout(timeout.as_millis() as u64)),
                Err(e) => return Err(WebhookError::Request(e.to_string())),
            };
            let elapsed = started.elapsed();

            if !status.is_success() {
                tracing::warn!(status = status.as_u16(), elapsed_ms = elapsed.as_millis() as u64, "webhook rejected");
                let body: String = String::from_utf8_lossy(&raw).chars().take(MAX_ERROR_BODY).collect();
                return Err(WebhookError::Status { status: status.as_u16(), body });
            }

            tracing::debug!(status = status.as_u16(), elapsed_ms = elapsed.as_millis() as u64, "webhook accepted");
            Ok(WebhookResponse { status: status.as_u16(), body: decode_body(&raw), elapsed })
        }
        .instrument(span)
        .await
    }
}

/// JSON when it parses, the raw text otherwise, `null` for an empty body.
fn decode_body(raw: &Bytes) -> Value {
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Value::Null;
    }
    serde_json::from_slice(raw).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(raw).into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn response_bodies_decode_leniently() {
        assert_eq!(decode_body(&Bytes::from_static(b" \n")), Value::Null);
        assert_eq!(decode_body(&Bytes::from_static(br#"{"ok":true}"#)), json!({"ok": true}));
        assert_eq!(decode_body(&Bytes::from_static(b"Workflow was started")), json!("Workflow was started"));
    }

    #[tokio::test]
    async fn signs_when_secret_configured() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(header_exists("x-hermes-signature"))
            .and(header_exists("x-hermes-timestamp"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let client = WebhookClient::new(Some("k".into())).unwrap();
        let url = format!("{}/hook", server.uri());
        let resp = client.post_json(&url, &json!({"x": 1}), &[], Duration::from_secs(5)).await.unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, json!({"ok": true}));
    }

    #[tokio::test]
    async fn non_2xx_is_status_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;
        let client = WebhookClient::new(None).unwrap();
        let err = client.post_json(&server.uri(), &json!({}), &[], Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, WebhookError::Status { status: 500, .. }));
        assert!(!err.is_outage());
    }

    #[tokio::test]
    async fn slow_consumer_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;
        let client = WebhookClient::new(None).unwrap();
        let err = client.post_json(&server.uri(), &json!({}), &[], Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(err, WebhookError::Timeout(50)));
    }

    #[tokio::test]
    async fn closed_port_is_an_outage() {
        let addr = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap()
        };
        let client = WebhookClient::new(None).unwrap();
        let err = client
            .post_json(&format!("http://{addr}/hook"), &json!({}), &[], Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(err.is_outage(), "{err:?}");
    }

    /// Accepts, reads the request, then hangs up without answering.
    async fn hang_up_listener() -> std::net::SocketAddr {
        use tokio::io::AsyncReadExt;
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut sock, _)) = listener.accept().await {
                let mut buf = [0u8; 4096];
                let _ = sock.read(&mut buf).await;
                drop(sock);
            }
        });
        addr
    }

    #[tokio::test]
    async fn consumer_hanging_up_mid_request_is_not_an_outage() {
        let addr = hang_up_listener().await;
        let client = WebhookClient::new(None).unwrap();
        let err = client
            .post_json(&format!("http://{addr}/hook"), &json!({"x": 1}), &[], Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, WebhookError::Request(_)), "{err:?}");
        assert!(!err.is_outage());
    }
}
