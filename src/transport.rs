//! HTTP and UDP plumbing shared by both connectors.

use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_CHARSET, CONTENT_TYPE};
use serde_json::Value;
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::codec::extract_page_error;
use crate::logger::MessageLogger;
use crate::{Error, Result};

pub const USER_AGENT: &str = concat!(
    "Mozilla/5.0 (compatible; atag-one/",
    env!("CARGO_PKG_VERSION"),
    ")"
);

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded; charset=UTF-8";

pub type SleepFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Sleep used between attempts. Tests swap in one that records instead of waiting.
pub type SleepFn = Arc<dyn Fn(Duration) -> SleepFuture + Send + Sync>;

pub fn tokio_sleep() -> SleepFn {
    Arc::new(|d: Duration| -> SleepFuture { Box::pin(tokio::time::sleep(d)) })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, delay: Duration) -> Self {
        Self { max_attempts, delay }
    }

    pub const fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(2))
    }
}

/// Run `action` until it succeeds, fails terminally, or attempts run out.
/// The error from the last attempt is the one returned.
pub async fn with_retry<T, F, Fut>(
    policy: RetryPolicy,
    sleep: &SleepFn,
    what: &str,
    mut action: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match action().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < attempts => {
                debug!(what, attempt, error = %e, "attempt failed, retrying");
                sleep(policy.delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Turn a blank body into a retryable error.
pub fn non_empty(body: String) -> Result<String> {
    if body.trim().is_empty() {
        Err(Error::EmptyResponse)
    } else {
        Ok(body)
    }
}

#[derive(Debug, Clone)]
pub struct UdpMessage {
    pub sender: SocketAddr,
    pub message: String,
}

#[derive(Clone)]
pub struct TransportOptions {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub retry: RetryPolicy,
    pub sleep: SleepFn,
    pub message_log: Option<PathBuf>,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
            sleep: tokio_sleep(),
            message_log: None,
        }
    }
}

pub struct Transport {
    http: reqwest::Client,
    retry: RetryPolicy,
    sleep: SleepFn,
    logger: Option<Mutex<MessageLogger>>,
}

impl Transport {
    /// Each transport owns its cookie jar, so portal sessions never leak
    /// between connectors.
    pub fn new(options: TransportOptions) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
        headers.insert(ACCEPT_CHARSET, HeaderValue::from_static("UTF-8"));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(USER_AGENT)
            .connect_timeout(options.connect_timeout)
            .read_timeout(options.read_timeout)
            .cookie_store(true)
            .build()?;

        let logger = match options.message_log {
            Some(path) => Some(Mutex::new(MessageLogger::new(path)?)),
            None => None,
        };

        Ok(Self {
            http,
            retry: options.retry,
            sleep: options.sleep,
            logger,
        })
    }

    pub async fn get(&self, url: &str) -> Result<String> {
        debug!(url, "GET");
        self.log_request("GET", url, None);
        let resp = self.http.get(url).send().await?;
        self.read_page(url, resp).await
    }

    pub async fn post_form(&self, url: &str, params: &[(&str, &str)]) -> Result<String> {
        debug!(url, "POST form");
        self.log_request("POST", url, Some(&encode_form(params, true)));
        let resp = self
            .http
            .post(url)
            .header(CONTENT_TYPE, FORM_CONTENT_TYPE)
            .body(encode_form(params, false))
            .send()
            .await?;
        self.read_page(url, resp).await
    }

    pub async fn post_json(&self, url: &str, payload: &Value) -> Result<String> {
        debug!(url, "POST json");
        self.log_request("POST", url, Some(&payload.to_string()));
        let resp = self.http.post(url).json(payload).send().await?;
        self.read_page(url, resp).await
    }

    /// Inline portal errors win over the status code: a locked account comes
    /// back as a 200 page carrying the message.
    async fn read_page(&self, url: &str, resp: reqwest::Response) -> Result<String> {
        let status = resp.status();
        let body = resp.text().await?;
        self.log_response(url, status.as_u16(), &body);

        if let Some(message) = extract_page_error(&body) {
            debug!(url, %message, "page reports an error");
            return Err(Error::PageError(message));
        }
        if !status.is_success() {
            debug!(url, status = status.as_u16(), body = %body, "request failed");
            return Err(Error::Status {
                status: status.as_u16(),
                body,
            });
        }
        trace!(url, len = body.len(), "response received");
        Ok(body)
    }

    pub async fn retry<T, F, Fut>(&self, what: &str, action: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        with_retry(self.retry, &self.sleep, what, action).await
    }

    pub async fn pause(&self, duration: Duration) {
        (self.sleep)(duration).await;
    }

    /// Wait for a datagram starting with `tag`. `Ok(None)` means the deadline
    /// passed without one; socket failures restart the listen up to `attempts` times.
    pub async fn udp_broadcast_listen(
        &self,
        bind: SocketAddr,
        timeout: Duration,
        tag: &str,
        datagram_len: usize,
        attempts: u32,
    ) -> Result<Option<UdpMessage>> {
        let attempts = attempts.max(1);
        let mut attempt = 1;
        loop {
            match listen_once(bind, timeout, tag, datagram_len).await {
                Ok(found) => {
                    if let Some(ref msg) = found {
                        self.log_datagram(msg);
                    }
                    return Ok(found);
                }
                Err(e) if attempt < attempts => {
                    warn!(%bind, attempt, error = %e, "UDP listen failed, retrying");
                    self.pause(self.retry.delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn log_request(&self, method: &str, url: &str, body: Option<&str>) {
        if let Some(logger) = &self.logger
            && let Ok(mut logger) = logger.lock()
        {
            logger.log_request(method, url, body);
        }
    }

    fn log_response(&self, url: &str, status: u16, body: &str) {
        if let Some(logger) = &self.logger
            && let Ok(mut logger) = logger.lock()
        {
            logger.log_response(url, status, body);
        }
    }

    fn log_datagram(&self, msg: &UdpMessage) {
        if let Some(logger) = &self.logger
            && let Ok(mut logger) = logger.lock()
        {
            logger.log_datagram(&msg.sender.to_string(), &msg.message);
        }
    }
}

async fn listen_once(
    bind: SocketAddr,
    timeout: Duration,
    tag: &str,
    datagram_len: usize,
) -> std::io::Result<Option<UdpMessage>> {
    let socket = UdpSocket::bind(bind).await?;
    socket.set_broadcast(true)?;
    debug!(%bind, ?timeout, "listening for announcements");

    let deadline = Instant::now() + timeout;
    let mut buf = vec![0u8; datagram_len];
    loop {
        let (len, sender) = match tokio::time::timeout_at(deadline, socket.recv_from(&mut buf)).await {
            Err(_) => return Ok(None),
            Ok(received) => received?,
        };
        let message = String::from_utf8_lossy(&buf[..len])
            .trim_end_matches('\0')
            .to_string();
        if message.starts_with(tag) {
            return Ok(Some(UdpMessage { sender, message }));
        }
        trace!(%sender, "ignoring unrelated datagram");
    }
}

/// `redact` hides password values for the message log.
fn encode_form(params: &[(&str, &str)], redact: bool) -> String {
    params
        .iter()
        .map(|(key, value)| {
            let value = if redact && key.eq_ignore_ascii_case("password") {
                "***"
            } else {
                value
            };
            format!("{}={}", urlencoding::encode(key), urlencoding::encode(value))
        })
        .collect::<Vec<_>>()
        .join("&")
}
