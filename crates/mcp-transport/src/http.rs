//! HTTP + SSE transport: JSON-RPC frames travel as `POST` bodies, server-initiated traffic
//! arrives over a long-lived `GET` against the same URL using Server-Sent Events.
//!
//! Grounded on the teacher's `streamable_http_client.rs` for the POST/retry/background-reader
//! shape, but driven by this crate's own [`SessionManager`] and [`SseParser`] rather than
//! ad-hoc buffer splitting and endpoint-discovery events (this crate targets the plain
//! `Session-Id`/`Last-Event-ID` header contract, not streamable-HTTP's endpoint handshake).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use mcp_protocol::{Error, Result};
use mcp_transport_traits::Transport;

use crate::session::{SessionManager, SessionManagerConfig};
use crate::sse::{SseParser, SseParserConfig};

/// Statuses that earn a retry attempt beyond plain network failures.
fn default_retryable_statuses() -> Vec<u16> {
    vec![408, 429, 500, 502, 503, 504]
}

/// Backoff/retry policy for outbound POSTs. A policy knob, not a fixed algorithm — see the
/// crate's design notes on why the retryable-status set and jitter are left configurable.
#[derive(Debug, Clone)]
pub struct HttpRetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub retryable_statuses: Vec<u16>,
    pub jitter: bool,
}

impl Default for HttpRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            retryable_statuses: default_retryable_statuses(),
            jitter: true,
        }
    }
}

impl HttpRetryConfig {
    fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        if let Some(d) = retry_after {
            return d.min(self.max_delay);
        }
        let exp = self.base_delay.as_millis() as f64 * 2f64.powi(attempt as i32);
        let capped = exp.min(self.max_delay.as_millis() as f64);
        let millis = if self.jitter {
            capped * (0.5 + fastrand::f64() * 0.5)
        } else {
            capped
        };
        Duration::from_millis(millis as u64)
    }

    fn is_retryable_status(&self, status: u16) -> bool {
        self.retryable_statuses.contains(&status)
    }
}

/// Construction-time configuration for [`HttpTransport`].
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    pub base_url: String,
    pub request_timeout: Duration,
    pub max_request_body_size: usize,
    pub enable_sse: bool,
    pub sse_reconnect_delay: Duration,
    pub retry: HttpRetryConfig,
    pub sse_parser: SseParserConfig,
    pub session: SessionManagerConfig,
}

impl HttpTransportConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            request_timeout: Duration::from_secs(30),
            max_request_body_size: 10 * 1024 * 1024,
            enable_sse: true,
            sse_reconnect_delay: Duration::from_secs(1),
            retry: HttpRetryConfig::default(),
            sse_parser: SseParserConfig::default(),
            session: SessionManagerConfig::default(),
        }
    }
}

/// A [`Transport`] backed by HTTP POST (requests) and an optional long-lived SSE GET
/// (server-initiated traffic), sharing one session with the server.
pub struct HttpTransport {
    config: HttpTransportConfig,
    client: Client,
    session: Arc<SessionManager>,
    running: AtomicBool,
    queue_tx: mpsc::UnboundedSender<Value>,
    queue_rx: AsyncMutex<mpsc::UnboundedReceiver<Value>>,
    sse_task: AsyncMutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("config", &self.config)
            .field("session", &self.session)
            .field("running", &self.running.load(Ordering::Relaxed))
            .finish()
    }
}

impl HttpTransport {
    /// # Errors
    /// Returns a validation error if the underlying `reqwest::Client` fails to build (e.g.
    /// TLS backend initialization failure).
    pub fn new(config: HttpTransportConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| Error::validation(format!("failed to build http client: {e}")))?;
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        Ok(Self {
            session: Arc::new(SessionManager::new(config.session)),
            config,
            client,
            running: AtomicBool::new(false),
            queue_tx,
            queue_rx: AsyncMutex::new(queue_rx),
            sse_task: AsyncMutex::new(None),
        })
    }

    #[must_use]
    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    fn build_headers(&self, accept: &str, include_session: bool) -> reqwest::header::HeaderMap {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_str(accept).expect("accept header is ASCII"),
        );
        if include_session {
            if let Some(sid) = self.session.session_id() {
                if let Ok(v) = reqwest::header::HeaderValue::from_str(&sid) {
                    headers.insert("Session-Id", v);
                }
            }
        }
        if let Some(eid) = self.session.last_event_id() {
            if let Ok(v) = reqwest::header::HeaderValue::from_str(&eid) {
                headers.insert("Last-Event-ID", v);
            }
        }
        headers
    }

    fn adopt_session_header(&self, headers: &reqwest::header::HeaderMap) {
        if let Some(value) = headers.get("Session-Id").and_then(|v| v.to_str().ok()) {
            if self.session.state() == crate::session::SessionState::Active {
                // A fresh id on an already-active session just refreshes it.
                let _ = self.session.connection_established(value);
            } else {
                self.session.begin_connect();
                self.session.connection_established(value);
            }
        }
    }

    async fn post_once(&self, body: &[u8]) -> std::result::Result<reqwest::Response, Error> {
        let headers = self.build_headers("application/json, text/event-stream", true);
        self.client
            .post(&self.config.base_url)
            .headers(headers)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body.to_vec())
            .send()
            .await
            .map_err(|e| Error::network(format!("http post failed: {e}")))
    }

    async fn post_with_retry(&self, message: &Value) -> Result<Option<Value>> {
        let body = serde_json::to_vec(message)
            .map_err(|e| Error::protocol(format!("failed to serialize outbound message: {e}")))?;
        if body.len() > self.config.max_request_body_size {
            return Err(Error::validation(format!(
                "request body of {} bytes exceeds the configured maximum of {}",
                body.len(),
                self.config.max_request_body_size
            )));
        }

        let mut attempt = 0u32;
        let mut retried_after_expiry = false;
        loop {
            let response = match self.post_once(&body).await {
                Ok(response) => response,
                Err(e) => {
                    if attempt + 1 >= self.config.retry.max_attempts {
                        return Err(e);
                    }
                    let delay = self.config.retry.delay_for(attempt, None);
                    warn!(attempt, error = %e, "http post failed, retrying after {delay:?}");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                    continue;
                }
            };

            let status = response.status();
            self.adopt_session_header(response.headers());

            if status == StatusCode::ACCEPTED {
                return Ok(None);
            }

            if status == StatusCode::NOT_FOUND {
                if self.session.session_id().is_some() && !retried_after_expiry {
                    self.session.session_expired();
                    retried_after_expiry = true;
                    continue;
                }
                let body_snippet = snippet(response.text().await.unwrap_or_default());
                return Err(Error::HttpStatus {
                    status: status.as_u16(),
                    body_snippet,
                });
            }

            if !status.is_success() {
                let retryable = self.config.retry.is_retryable_status(status.as_u16());
                let retry_after = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .map(Duration::from_secs);
                let body_snippet = snippet(response.text().await.unwrap_or_default());
                if retryable && attempt + 1 < self.config.retry.max_attempts {
                    let delay = self.config.retry.delay_for(attempt, retry_after);
                    warn!(status = %status, attempt, "http post returned retryable status, retrying after {delay:?}");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                    continue;
                }
                return Err(Error::HttpStatus {
                    status: status.as_u16(),
                    body_snippet,
                });
            }

            let content_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();

            if content_type.starts_with("text/event-stream") {
                let bytes = response
                    .bytes()
                    .await
                    .map_err(|e| Error::network(format!("failed to read sse body: {e}")))?;
                let mut parser = SseParser::new(self.config.sse_parser);
                for event in parser.feed(&bytes)? {
                    if let Some(id) = &event.id {
                        self.session.record_event_id(id.clone());
                    }
                    if event.data.is_empty() {
                        continue;
                    }
                    if let Ok(value) = serde_json::from_str::<Value>(&event.data) {
                        let _ = self.queue_tx.send(value);
                    }
                }
                return Ok(None);
            }

            let value: Value = response
                .json()
                .await
                .map_err(|e| Error::protocol(format!("invalid JSON response body: {e}")))?;
            return Ok(Some(value));
        }
    }
}

fn snippet(body: String) -> String {
    const MAX: usize = 512;
    if body.len() > MAX {
        format!("{}... ({} bytes total)", &body[..MAX], body.len())
    } else {
        body
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.session.begin_connect();

        if self.config.enable_sse {
            // The reader loop only needs data it can own independently of `self`, so it is
            // spawned as a free function with its own running flag rather than borrowing
            // `self` across the `'static` task boundary.
            let client = self.client.clone();
            let base_url = self.config.base_url.clone();
            let session = self.session.clone();
            let queue_tx = self.queue_tx.clone();
            let sse_parser_config = self.config.sse_parser;
            let reconnect_delay = self.config.sse_reconnect_delay;
            let running = Arc::new(AtomicBool::new(true));

            let task = tokio::spawn(sse_reader_task(
                client,
                base_url,
                session,
                queue_tx,
                sse_parser_config,
                reconnect_delay,
                running,
            ));
            *self.sse_task.lock().await = Some(task);
        }

        info!(base_url = %self.config.base_url, "http transport started");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        if let Some(sid) = self.session.session_id() {
            let headers = self.build_headers("application/json", true);
            let _ = self
                .client
                .delete(&self.config.base_url)
                .headers(headers)
                .send()
                .await;
            debug!(session_id = %sid, "sent best-effort session delete");
        }

        if let Some(task) = self.sse_task.lock().await.take() {
            task.abort();
        }

        self.session.begin_close();
        self.session.close_complete();
        Ok(())
    }

    async fn send(&self, message: Value) -> Result<()> {
        if !self.running.load(Ordering::Relaxed) {
            return Err(Error::NotConnected);
        }
        if let Some(value) = self.post_with_retry(&message).await? {
            let _ = self.queue_tx.send(value);
        }
        Ok(())
    }

    async fn receive(&self) -> Result<Value> {
        let mut rx = self.queue_rx.lock().await;
        rx.recv()
            .await
            .ok_or_else(|| Error::network("http transport message queue closed"))
    }

    async fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }
}

#[allow(clippy::too_many_arguments)]
async fn sse_reader_task(
    client: Client,
    base_url: String,
    session: Arc<SessionManager>,
    queue_tx: mpsc::UnboundedSender<Value>,
    parser_config: SseParserConfig,
    reconnect_delay: Duration,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::Relaxed) {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("text/event-stream"),
        );
        if let Some(sid) = session.session_id() {
            if let Ok(v) = reqwest::header::HeaderValue::from_str(&sid) {
                headers.insert("Session-Id", v);
            }
        }
        if let Some(eid) = session.last_event_id() {
            if let Ok(v) = reqwest::header::HeaderValue::from_str(&eid) {
                headers.insert("Last-Event-ID", v);
            }
        }

        let response = client.get(&base_url).headers(headers).send().await;
        let response = match response {
            Ok(r) if r.status().is_success() => r,
            Ok(r) if r.status() == StatusCode::NOT_FOUND => {
                session.session_expired();
                tokio::time::sleep(reconnect_delay).await;
                continue;
            }
            Ok(r) => {
                debug!(status = %r.status(), "sse get returned non-success status");
                tokio::time::sleep(reconnect_delay).await;
                continue;
            }
            Err(e) => {
                debug!(error = %e, "sse get failed");
                tokio::time::sleep(reconnect_delay).await;
                continue;
            }
        };

        if let Some(value) = response.headers().get("Session-Id").and_then(|v| v.to_str().ok()) {
            if session.state() != crate::session::SessionState::Active {
                session.begin_connect();
            }
            session.connection_established(value);
        }

        let mut parser = SseParser::new(parser_config);
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            if !running.load(Ordering::Relaxed) {
                return;
            }
            let bytes = match chunk {
                Ok(bytes) => bytes,
                Err(e) => {
                    debug!(error = %e, "sse stream read failed");
                    break;
                }
            };
            match parser.feed(&bytes) {
                Ok(events) => {
                    for event in events {
                        if let Some(id) = &event.id {
                            session.record_event_id(id.clone());
                        }
                        if event.data.is_empty() {
                            continue;
                        }
                        if let Ok(value) = serde_json::from_str::<Value>(&event.data) {
                            let _ = queue_tx.send(value);
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "sse parser buffer overflow, reconnecting");
                    break;
                }
            }
        }

        if running.load(Ordering::Relaxed) {
            tokio::time::sleep(reconnect_delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(server: &MockServer) -> HttpTransportConfig {
        let mut config = HttpTransportConfig::new(server.uri());
        config.enable_sse = false;
        config
    }

    #[tokio::test]
    async fn simple_json_round_trip() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/json")
                    .set_body_json(json!({"jsonrpc": "2.0", "id": 1, "result": {"ok": true}})),
            )
            .mount(&server)
            .await;

        let transport = HttpTransport::new(config_for(&server)).unwrap();
        transport.start().await.unwrap();
        transport
            .send(json!({"jsonrpc": "2.0", "id": 1, "method": "ping"}))
            .await
            .unwrap();
        let response = transport.receive().await.unwrap();
        assert_eq!(response["result"]["ok"], json!(true));
        transport.stop().await.unwrap();
    }

    #[tokio::test]
    async fn accepted_notification_produces_no_queued_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(202))
            .mount(&server)
            .await;

        let transport = HttpTransport::new(config_for(&server)).unwrap();
        transport.start().await.unwrap();
        transport
            .send(json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
            .await
            .unwrap();
        transport.stop().await.unwrap();
    }

    #[tokio::test]
    async fn session_id_header_is_adopted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/json")
                    .insert_header("session-id", "sid-123")
                    .set_body_json(json!({"jsonrpc": "2.0", "id": 1, "result": {}})),
            )
            .mount(&server)
            .await;

        let transport = HttpTransport::new(config_for(&server)).unwrap();
        transport.start().await.unwrap();
        transport
            .send(json!({"jsonrpc": "2.0", "id": 1, "method": "ping"}))
            .await
            .unwrap();
        transport.receive().await.unwrap();
        assert_eq!(transport.session().session_id(), Some("sid-123".to_string()));
        transport.stop().await.unwrap();
    }

    #[tokio::test]
    async fn non_retryable_status_surfaces_as_http_status_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
            .mount(&server)
            .await;

        let transport = HttpTransport::new(config_for(&server)).unwrap();
        transport.start().await.unwrap();
        let err = transport
            .send(json!({"jsonrpc": "2.0", "id": 1, "method": "ping"}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::HttpStatus { status: 400, .. }));
        transport.stop().await.unwrap();
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let server = MockServer::start().await;
        let transport = HttpTransport::new(config_for(&server)).unwrap();
        transport.start().await.unwrap();
        transport.stop().await.unwrap();
        transport.stop().await.unwrap();
        assert!(!transport.is_running().await);
    }
}
