use anyhow::{Context, Result};
use serde::Deserialize;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::time::sleep;

use crate::outcome::{FaultKind, TransportFault, TransportReply};
use crate::params::CallParams;

pub type TransportFuture<'a> =
    Pin<Box<dyn Future<Output = Result<TransportReply, TransportFault>> + Send + 'a>>;

/// Black-box lookup call. Implementations report the server-side latency;
/// the scheduler never looks past this contract.
pub trait Transport: Send + Sync {
    fn name(&self) -> &'static str;

    fn call<'a>(&'a self, params: &'a CallParams) -> TransportFuture<'a>;
}

/// Offline transport: fixed latency, succeeds only for one known NIN.
pub struct MockTransport {
    delay_ms: u64,
    known_nin: String,
}

impl MockTransport {
    pub fn new(delay_ms: u64, known_nin: impl Into<String>) -> Self {
        Self {
            delay_ms,
            known_nin: known_nin.into(),
        }
    }
}

impl Transport for MockTransport {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn call<'a>(&'a self, params: &'a CallParams) -> TransportFuture<'a> {
        Box::pin(async move {
            sleep(Duration::from_millis(self.delay_ms)).await;

            if params.nin == self.known_nin {
                Ok(TransportReply {
                    http_status: 200,
                    ok: true,
                    data: Some(serde_json::json!({
                        "nin": params.nin,
                        "dateString": params.date_string,
                    })),
                    error: None,
                    server_elapsed_ms: self.delay_ms,
                })
            } else {
                Ok(TransportReply {
                    http_status: 404,
                    ok: false,
                    data: None,
                    error: Some("record not found".to_string()),
                    server_elapsed_ms: self.delay_ms,
                })
            }
        })
    }
}

/// Envelope returned by the lookup proxy. Every field is optional so a
/// partial body still yields a reply instead of a parse fault.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProxyEnvelope {
    status: Option<u16>,
    ok: Option<bool>,
    data: Option<serde_json::Value>,
    error: Option<serde_json::Value>,
    elapsed_ms: Option<u64>,
}

impl ProxyEnvelope {
    fn into_reply(self, http_status: u16) -> TransportReply {
        let error = match self.error {
            None | Some(serde_json::Value::Null) => None,
            Some(serde_json::Value::String(s)) => Some(s),
            Some(other) => Some(other.to_string()),
        };
        let status = self.status.unwrap_or(http_status);
        TransportReply {
            http_status: status,
            ok: self.ok.unwrap_or((200..300).contains(&status)),
            data: self.data.filter(|d| !d.is_null()),
            error,
            server_elapsed_ms: self.elapsed_ms.unwrap_or(0),
        }
    }
}

/// JSON-over-HTTP transport talking to the lookup proxy.
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: url::Url,
}

impl HttpTransport {
    pub fn new(base_url: &str, path: &str, timeout_ms: u64) -> Result<Self> {
        let base = url::Url::parse(base_url).with_context(|| format!("Invalid base URL: {base_url}"))?;
        let endpoint = base
            .join(path)
            .with_context(|| format!("Invalid lookup path: {path}"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms.max(1)))
            .tcp_keepalive(Duration::from_secs(30))
            .pool_idle_timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &url::Url {
        &self.endpoint
    }
}

impl Transport for HttpTransport {
    fn name(&self) -> &'static str {
        "http"
    }

    fn call<'a>(&'a self, params: &'a CallParams) -> TransportFuture<'a> {
        Box::pin(async move {
            let response = self
                .client
                .post(self.endpoint.clone())
                .json(params)
                .send()
                .await
                .map_err(|e| classify_reqwest(&e))?;

            let http_status = response.status().as_u16();
            let body = response.text().await.map_err(|e| classify_reqwest(&e))?;

            match serde_json::from_str::<ProxyEnvelope>(&body) {
                Ok(envelope) => Ok(envelope.into_reply(http_status)),
                // A non-2xx from the proxy itself often carries plain text.
                Err(_) if !(200..300).contains(&http_status) => Ok(TransportReply {
                    http_status,
                    ok: false,
                    data: None,
                    error: Some(truncate(&body, 256)),
                    server_elapsed_ms: 0,
                }),
                Err(e) => Err(TransportFault::new(FaultKind::Parse, e.to_string())),
            }
        })
    }
}

fn classify_reqwest(err: &reqwest::Error) -> TransportFault {
    let chain = error_chain(err);
    let kind = if err.is_timeout() {
        FaultKind::Timeout
    } else if err.is_decode() {
        FaultKind::Parse
    } else {
        FaultKind::from_message(&chain)
    };
    TransportFault::new(kind, chain)
}

fn error_chain(err: &dyn std::error::Error) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(e) = source {
        out.push_str(": ");
        out.push_str(&e.to_string());
        source = e.source();
    }
    out
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_transport_known_nin() {
        let transport = MockTransport::new(1, "0012345678");

        let reply = transport
            .call(&CallParams::new("1403-05", "0012345678"))
            .await
            .unwrap();
        assert!(reply.ok);
        assert_eq!(reply.http_status, 200);
        assert_eq!(reply.server_elapsed_ms, 1);

        let reply = transport
            .call(&CallParams::new("1403-05", "123456789"))
            .await
            .unwrap();
        assert!(!reply.ok);
        assert_eq!(reply.http_status, 404);
        assert!(reply.error.is_some());
    }

    #[test]
    fn test_envelope_into_reply() {
        let envelope: ProxyEnvelope = serde_json::from_str(
            r#"{"status":200,"ok":true,"data":{"firstName":"A"},"error":null,"elapsedMs":137}"#,
        )
        .unwrap();
        let reply = envelope.into_reply(200);
        assert!(reply.ok);
        assert_eq!(reply.server_elapsed_ms, 137);
        assert!(reply.error.is_none());
        assert!(reply.data.is_some());
    }

    #[test]
    fn test_envelope_defaults() {
        let envelope: ProxyEnvelope =
            serde_json::from_str(r#"{"error":{"code":"E42","message":"bad nin"}}"#).unwrap();
        let reply = envelope.into_reply(400);
        assert_eq!(reply.http_status, 400);
        assert!(!reply.ok);
        assert_eq!(reply.server_elapsed_ms, 0);
        assert!(reply.error.unwrap().contains("E42"));
    }

    #[tokio::test]
    async fn test_http_transport_endpoint() {
        let transport = HttpTransport::new("http://localhost:3000", "/api/inquiry", 1000).unwrap();
        assert_eq!(transport.endpoint().as_str(), "http://localhost:3000/api/inquiry");
        assert!(HttpTransport::new("not a url", "/api/inquiry", 1000).is_err());
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("abc", 10), "abc");
    }
}
