// src/api/mod.rs
// Request gateway for the signal backend: authenticated HTTP calls with a
// bounded wait and uniform failure reporting

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use lazy_static::lazy_static;
use log::debug;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;

pub mod models;

pub use models::{
    reported_active, AnalyzeRequest, BotConfig, HealthReport, Signal, SignalPayload,
    DIRECTION_WAIT,
};

/// Header carrying the operator credential on state-mutating and analysis
/// calls
pub const API_KEY_HEADER: &str = "x-api-key";

lazy_static! {
    static ref HTTP_CLIENT: Client = {
        Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .pool_idle_timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to build HTTP client")
    };
}

/// Client for one backend. The configuration is captured at construction;
/// reconfiguring the panel means building a new client, so calls already in
/// flight keep the values they started with.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: Client,
    config: ClientConfig,
}

impl ApiClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            http: HTTP_CLIENT.clone(),
            config,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn endpoint_url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    /// Build a request without sending it. Kept separate so header and URL
    /// handling can be exercised directly in tests.
    fn prepare(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        authed: bool,
    ) -> RequestBuilder {
        let mut builder = self.http.request(method, self.endpoint_url(path));
        if authed {
            builder = builder.header(API_KEY_HEADER, &self.config.api_key);
        }
        if let Some(body) = body {
            builder = builder.json(body);
        }
        builder
    }

    /// Single timeout-wrapped send path used by every endpoint. On expiry
    /// the transport wait is abandoned client-side; the request is never
    /// retried automatically.
    async fn execute<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T> {
        let bound = self.config.timeout;

        let exchange = async {
            let response = builder.send().await.map_err(Error::from)?;
            let status = response.status();
            let text = response
                .text()
                .await
                .map_err(|error| Error::Transport(error.to_string()))?;
            Ok::<(StatusCode, String), Error>((status, text))
        };

        let (status, text) = match tokio::time::timeout(bound, exchange).await {
            Err(_) => return Err(Error::Timeout(bound.as_secs())),
            Ok(Err(error)) => return Err(error),
            Ok(Ok(exchange)) => exchange,
        };

        debug!("Backend answered HTTP {} ({} bytes)", status, text.len());

        if !status.is_success() {
            return Err(backend_failure(status.as_u16(), &text));
        }

        serde_json::from_str(&text)
            .map_err(|error| Error::Decode(format!("unexpected response body: {}", error)))
    }

    /// Liveness check against the status endpoint
    pub async fn health(&self) -> Result<HealthReport> {
        let path = self.config.endpoints.health.clone();
        let authed = self.config.endpoints.authed_reads;
        self.execute(self.prepare(Method::GET, &path, None, authed))
            .await
    }

    /// Store the notification channel settings on the backend
    pub async fn save_bot_config(&self, config: &BotConfig) -> Result<Value> {
        let body = serde_json::to_value(config)?;
        let path = self.config.endpoints.bot_config.clone();
        self.execute(self.prepare(Method::POST, &path, Some(&body), true))
            .await
    }

    /// Enable or disable the automated bot. The backend response confirms
    /// the transition; callers must not latch the flag before it arrives.
    pub async fn set_bot_active(&self, enable: bool) -> Result<Value> {
        let path = if enable {
            self.config.endpoints.bot_enable.clone()
        } else {
            self.config.endpoints.bot_disable.clone()
        };
        self.execute(self.prepare(Method::POST, &path, None, true))
            .await
    }

    /// Request a fresh market analysis
    pub async fn analyze(&self, request: &AnalyzeRequest) -> Result<SignalPayload> {
        let body = serde_json::to_value(request)?;
        let path = self.config.endpoints.analyze.clone();
        self.execute(self.prepare(Method::POST, &path, Some(&body), true))
            .await
    }

    /// Fetch the most recently computed signal without triggering analysis
    pub async fn live_signal(&self) -> Result<SignalPayload> {
        let path = self.config.endpoints.live_signal.clone();
        let authed = self.config.endpoints.authed_reads;
        self.execute(self.prepare(Method::GET, &path, None, authed))
            .await
    }
}

/// Turn a non-2xx response into a structured failure, preferring the
/// backend-supplied detail message when the body carries one.
fn backend_failure(status: u16, body: &str) -> Error {
    let detail = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| {
            ["detail", "message", "error"].into_iter().find_map(|key| {
                value
                    .get(key)
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
        })
        .unwrap_or_else(|| {
            StatusCode::from_u16(status)
                .ok()
                .and_then(|code| code.canonical_reason())
                .unwrap_or("request failed")
                .to_string()
        });

    Error::Backend { status, detail }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::oneshot;

    fn test_client(base_url: &str) -> ApiClient {
        let config = ClientConfig::new(base_url, "test-key")
            .unwrap()
            .with_timeout(Duration::from_secs(2));
        ApiClient::new(config)
    }

    fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
        haystack
            .windows(needle.len())
            .position(|window| window == needle)
    }

    async fn read_request(socket: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = socket.read(&mut chunk).await.unwrap_or(0);
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = find_subslice(&buf, b"\r\n\r\n") {
                let headers = String::from_utf8_lossy(&buf[..pos]).to_lowercase();
                let content_length = headers
                    .lines()
                    .find_map(|line| line.strip_prefix("content-length:"))
                    .and_then(|value| value.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= pos + 4 + content_length {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buf).to_string()
    }

    fn http_response(status: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        )
    }

    /// Serve exactly one request, then hand back the raw request text
    async fn one_shot_server(
        response: String,
        delay: Duration,
    ) -> (String, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let request = read_request(&mut socket).await;
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
                let _ = tx.send(request);
            }
        });

        (format!("http://{}", addr), rx)
    }

    #[test]
    fn mutating_requests_carry_the_api_key() {
        let api = test_client("http://localhost:8080");
        let request = api
            .prepare(Method::POST, "/bot/enable", None, true)
            .build()
            .unwrap();
        assert_eq!(
            request.headers().get(API_KEY_HEADER).unwrap(),
            "test-key"
        );
        assert_eq!(request.url().as_str(), "http://localhost:8080/bot/enable");
    }

    #[test]
    fn public_reads_omit_the_api_key() {
        let api = test_client("http://localhost:8080");
        let request = api
            .prepare(Method::GET, "/health", None, false)
            .build()
            .unwrap();
        assert!(request.headers().get(API_KEY_HEADER).is_none());
    }

    #[test]
    fn authed_reads_flag_adds_the_key_to_gets() {
        let mut config = ClientConfig::new("http://localhost:8080", "test-key").unwrap();
        config.endpoints.authed_reads = true;
        let api = ApiClient::new(config);
        let path = api.config().endpoints.live_signal.clone();
        let authed = api.config().endpoints.authed_reads;
        let request = api.prepare(Method::GET, &path, None, authed).build().unwrap();
        assert!(request.headers().get(API_KEY_HEADER).is_some());
    }

    #[test]
    fn backend_detail_is_preferred() {
        let error = backend_failure(401, r#"{"detail": "x-api-key invalid"}"#);
        assert_eq!(
            error.to_string(),
            "Backend error (HTTP 401): x-api-key invalid"
        );
    }

    #[test]
    fn backend_failure_falls_back_to_the_status_reason() {
        let error = backend_failure(502, "<html>gateway</html>");
        assert_eq!(error.to_string(), "Backend error (HTTP 502): Bad Gateway");
    }

    #[tokio::test]
    async fn analyze_round_trip() {
        let body = json!({ "signal": "BUY", "confidence": 92, "price": 1.0845 }).to_string();
        let (base_url, request_rx) =
            one_shot_server(http_response("200 OK", &body), Duration::ZERO).await;

        let api = test_client(&base_url);
        let payload = api
            .analyze(&AnalyzeRequest::new("EUR/USD", "1min"))
            .await
            .unwrap();

        assert_eq!(payload.direction.as_deref(), Some("BUY"));
        assert_eq!(payload.confidence, Some(92.0));
        assert_eq!(payload.price, Some(1.0845));

        let request = request_rx.await.unwrap();
        assert!(request.starts_with("POST /analyze"));
        assert!(request.to_lowercase().contains("x-api-key: test-key"));
        assert!(request.contains(r#""symbol":"EUR/USD""#));
        assert!(request.contains(r#""interval":"1min""#));
    }

    #[tokio::test]
    async fn backend_error_surfaces_the_detail() {
        let body = json!({ "detail": "timeframe invalid" }).to_string();
        let (base_url, _request_rx) =
            one_shot_server(http_response("400 Bad Request", &body), Duration::ZERO).await;

        let api = test_client(&base_url);
        let error = api
            .analyze(&AnalyzeRequest::new("EUR/USD", "bogus"))
            .await
            .unwrap_err();

        match error {
            Error::Backend { status, detail } => {
                assert_eq!(status, 400);
                assert_eq!(detail, "timeframe invalid");
            }
            other => panic!("expected backend error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn undecodable_success_body_is_a_decode_error() {
        let (base_url, _request_rx) =
            one_shot_server(http_response("200 OK", "not json"), Duration::ZERO).await;

        let api = test_client(&base_url);
        let error = api.live_signal().await.unwrap_err();
        assert!(matches!(error, Error::Decode(_)));
    }

    #[tokio::test]
    async fn slow_backend_times_out() {
        let body = json!({ "ok": true }).to_string();
        let (base_url, _request_rx) =
            one_shot_server(http_response("200 OK", &body), Duration::from_secs(5)).await;

        let config = ClientConfig::new(&base_url, "test-key")
            .unwrap()
            .with_timeout(Duration::from_millis(200));
        let api = ApiClient::new(config);

        let error = api.health().await.unwrap_err();
        assert!(matches!(error, Error::Timeout(_)));
    }

    #[tokio::test]
    async fn unreachable_backend_is_a_transport_error() {
        // Port 9 (discard) is assumed closed
        let config = ClientConfig::new("http://127.0.0.1:9", "test-key")
            .unwrap()
            .with_timeout(Duration::from_secs(2));
        let api = ApiClient::new(config);

        let error = api.health().await.unwrap_err();
        assert!(matches!(error, Error::Transport(_) | Error::Timeout(_)));
    }
}
