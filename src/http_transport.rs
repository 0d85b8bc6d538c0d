//! Single-connection-pool HTTP transport.
//!
//! One [`HttpTransport`] per client. Thread-safe; concurrent requests are
//! permitted and share the same `reqwest::Client` connection pool, the way
//! the source project's services hold one long-lived `reqwest::Client`
//! rather than building a fresh one per call.

use crate::error::TransportError;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Default timeout for short (non-long-poll) requests.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// Timeout for `/pull` long-poll requests.
pub const LONG_POLL_TIMEOUT: Duration = Duration::from_secs(40);

const THROTTLE_WINDOW: Duration = Duration::from_millis(1500);
const THROTTLE_LIMIT: usize = 12;
const THROTTLE_PAUSE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// A completed HTTP exchange.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Outcome of a single transport call: either a real response, or the
/// local-throttle sentinel ("connection-reset").
#[derive(Debug, Clone)]
pub enum RequestOutcome {
    Response(HttpResponse),
    ConnectionReset,
}

pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    recent_requests: Mutex<VecDeque<Instant>>,
    paused_until: Mutex<Option<Instant>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .build()
            .expect("reqwest client with default TLS config always builds");
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            client,
            base_url: base_url.into(),
            api_key,
            recent_requests: Mutex::new(VecDeque::new()),
            paused_until: Mutex::new(None),
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Issue a request with the given timeout, honoring the throttle.
    pub async fn request(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<String>,
        timeout: Duration,
    ) -> Result<RequestOutcome, TransportError> {
        if self.record_and_check_throttle() {
            tracing::warn!(path, "local throttle tripped, pausing new requests");
            return Ok(RequestOutcome::ConnectionReset);
        }

        let url = format!("{}{}", self.base_url, path);
        let mut req = match method {
            HttpMethod::Get => self.client.get(&url),
            HttpMethod::Post => self.client.post(&url),
        };
        req = req
            .header("Content-Type", "application/json")
            .header("Accept", "*/*")
            .timeout(timeout);
        if let Some(key) = &self.api_key {
            req = req.header("X-Api-Key", key);
        }
        if let Some(body) = body {
            req = req.body(body);
        }

        let mut shutdown_rx = self.shutdown_rx.clone();
        tokio::select! {
            biased;
            _ = shutdown_rx.changed() => Err(TransportError::Timeout),
            result = req.send() => {
                let resp = result?;
                let status = resp.status().as_u16();
                let body = resp.text().await?;
                if !(200..300).contains(&status) {
                    tracing::debug!(
                        status,
                        body = %crate::util::sanitize_for_log_default(&body),
                        "non-2xx http response"
                    );
                }
                Ok(RequestOutcome::Response(HttpResponse { status, body }))
            }
        }
    }

    pub async fn post(&self, path: &str, body: String, timeout: Duration) -> Result<RequestOutcome, TransportError> {
        self.request(HttpMethod::Post, path, Some(body), timeout).await
    }

    pub async fn get(&self, path: &str, timeout: Duration) -> Result<RequestOutcome, TransportError> {
        self.request(HttpMethod::Get, path, None, timeout).await
    }

    /// Tear down in-flight requests.
    pub fn close_all(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Returns `true` when this request must be refused with the
    /// "connection-reset" sentinel: either a prior trip's 5s pause hasn't
    /// elapsed yet, or this request pushes the trailing-1500ms count over
    /// the limit (which starts a fresh 5s pause).
    fn record_and_check_throttle(&self) -> bool {
        let now = Instant::now();

        {
            let mut paused_until = self.paused_until.lock().unwrap();
            if let Some(until) = *paused_until {
                if now < until {
                    return true;
                }
                *paused_until = None;
            }
        }

        let mut recent = self.recent_requests.lock().unwrap();
        recent.retain(|t| now.duration_since(*t) <= THROTTLE_WINDOW);
        recent.push_back(now);
        if recent.len() > THROTTLE_LIMIT {
            *self.paused_until.lock().unwrap() = Some(now + THROTTLE_PAUSE);
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn throttle_trips_after_limit_within_window() {
        let transport = HttpTransport::new("http://127.0.0.1:1", None);
        // First THROTTLE_LIMIT calls just record; we bypass actual network by
        // checking the counting function directly since there's no server.
        for _ in 0..THROTTLE_LIMIT {
            assert!(!transport.record_and_check_throttle());
        }
        assert!(transport.record_and_check_throttle());
    }

    #[test]
    fn http_response_is_ok_checks_2xx_range() {
        let ok = HttpResponse { status: 200, body: String::new() };
        let err = HttpResponse { status: 404, body: String::new() };
        assert!(ok.is_ok());
        assert!(!err.is_ok());
    }
}
