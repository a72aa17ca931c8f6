//! Socket Mode session: the state machine that ties the stack together.
//!
//! ARCHITECTURE
//! ============
//! A session owns two channels — a transient one for REST exchanges and a
//! persistent one inside the WebSocket client — plus the single shared
//! buffer every operation borrows. The caller drives it by invoking
//! [`SlackClient::poll`] from its own loop; poll never blocks once the
//! socket is up, but a reconnect attempt inside it costs a full TLS
//! handshake plus one HTTP round-trip.
//!
//! DESIGN
//! ======
//! - Reconnection is lazy: nothing happens until a poll finds the socket
//!   down. Failures are paced by capped exponential backoff and surfaced
//!   as [`Poll::Reconnecting`] rather than silently swallowed.
//! - `poll` absorbs transport errors (they become a reconnect); the
//!   explicit operations — [`SlackClient::post_message`],
//!   [`SlackClient::acknowledge_event`] — propagate their failures.

use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;

use crate::channel::{SecureChannel, TlsConfig, Transport};
use crate::exchange::{self, Outcome, Request, Response};
use crate::frame::Opcode;
use crate::ws::WsClient;

const API_HOST: &str = "slack.com";
const CONNECTIONS_OPEN_PATH: &str = "/api/apps.connections.open";
const POST_MESSAGE_PATH: &str = "/api/chat.postMessage";
const JSON_CONTENT_TYPE: &str = "application/json;charset=utf8";
const WSS_SCHEME: &str = "wss://";

/// Appended to the negotiated path; shortens reconnect latency on the
/// service side.
const RECONNECT_QUERY: &str = "&debug_reconnects=true";

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// Errors raised by session operations.
#[derive(Debug, thiserror::Error)]
pub enum SlackError {
    #[error(transparent)]
    Exchange(#[from] exchange::ExchangeError),
    #[error(transparent)]
    Ws(#[from] crate::ws::WsError),
    /// The service answered with a non-200 status.
    #[error("slack api returned http status {0}")]
    Status(u16),
    /// The service answered 200 but reported `ok: false`.
    #[error("slack api reported failure: {0}")]
    ApiNotOk(String),
    /// A required response field is absent or has the wrong type.
    #[error("response field `{0}` is missing or has the wrong type")]
    MissingField(&'static str),
    /// The negotiated connection URL is not a `wss://` URL.
    #[error("connection url is not a wss:// url: {0}")]
    BadUrl(String),
    /// A body failed to parse or serialize as JSON.
    #[error("json encoding failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// What one call to [`SlackClient::poll`] produced.
#[derive(Debug)]
pub enum Poll {
    /// A service event, parsed from a data frame.
    Event(Value),
    /// Connected; nothing was waiting.
    Idle,
    /// The socket is down. A reconnect attempt just failed or is being
    /// held back by backoff; keep polling.
    Reconnecting,
}

/// Outbound acknowledgement envelope. `payload` is omitted entirely when
/// none is supplied.
#[derive(Serialize)]
struct Acknowledgement<'a> {
    envelope_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload: Option<&'a Value>,
}

/// Reconnect pacing: nothing until a failure, then doubling up to the cap.
struct Backoff {
    delay: Option<Duration>,
    retry_at: Option<Instant>,
}

impl Backoff {
    fn new() -> Self {
        Self { delay: None, retry_at: None }
    }

    fn ready(&self, now: Instant) -> bool {
        self.retry_at.is_none_or(|at| now >= at)
    }

    fn record_failure(&mut self, now: Instant) {
        let delay = self.delay.map_or(INITIAL_BACKOFF, |d| (d * 2).min(MAX_BACKOFF));
        self.delay = Some(delay);
        self.retry_at = Some(now + delay);
    }

    fn reset(&mut self) {
        self.delay = None;
        self.retry_at = None;
    }
}

/// A Socket Mode session.
pub struct SlackClient<C = SecureChannel> {
    bot_token: String,
    app_token: String,
    http: C,
    ws: WsClient<C>,
    buf: Box<[u8]>,
    backoff: Backoff,
}

impl SlackClient<SecureChannel> {
    /// A disconnected session. No network activity happens here; the first
    /// [`SlackClient::poll`] brings the socket up.
    #[must_use]
    pub fn new(
        bot_token: impl Into<String>,
        app_token: impl Into<String>,
        tls: &TlsConfig,
        buf_capacity: usize,
    ) -> Self {
        Self::with_channels(
            bot_token,
            app_token,
            SecureChannel::new(tls),
            SecureChannel::new(tls),
            buf_capacity,
        )
    }
}

impl<C: Transport> SlackClient<C> {
    /// Assemble a session from explicit channels: one transient channel
    /// for REST exchanges, one that becomes the persistent socket.
    pub fn with_channels(
        bot_token: impl Into<String>,
        app_token: impl Into<String>,
        http: C,
        ws_channel: C,
        buf_capacity: usize,
    ) -> Self {
        Self {
            bot_token: bot_token.into(),
            app_token: app_token.into(),
            http,
            ws: WsClient::new(ws_channel),
            buf: vec![0u8; buf_capacity].into_boxed_slice(),
            backoff: Backoff::new(),
        }
    }

    /// Whether the persistent socket currently holds a connection.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.ws.is_open()
    }

    /// Negotiate a connection URL and open the WebSocket.
    ///
    /// # Errors
    ///
    /// Any failing step — the HTTP exchange, a non-200 status, `ok: false`,
    /// a missing or malformed `url`, or the upgrade itself — leaves the
    /// session disconnected and is returned to the caller.
    pub fn open_app_connection(&mut self) -> Result<(), SlackError> {
        let authorization = format!("Bearer {}", self.app_token);
        let headers = [("Authorization", authorization.as_str())];
        let request = Request::post(API_HOST, CONNECTIONS_OPEN_PATH, &headers, None);

        let response = expect_response(exchange::request(&mut self.http, &mut self.buf, &request)?)?;
        if response.status != 200 {
            return Err(SlackError::Status(response.status));
        }

        let body: Value = serde_json::from_slice(response.body)?;
        check_ok(&body)?;

        let url = body
            .get("url")
            .and_then(Value::as_str)
            .ok_or(SlackError::MissingField("url"))?;
        let (host, mut path) = split_wss_url(url)?;
        path.push_str(RECONNECT_QUERY);

        self.ws.open(host, &path, &mut self.buf)?;
        tracing::info!(host, "socket mode connection established");
        Ok(())
    }

    /// Drive the session: reconnect if needed, then read at most one frame.
    pub fn poll(&mut self) -> Poll {
        self.poll_at(Instant::now())
    }

    fn poll_at(&mut self, now: Instant) -> Poll {
        if !self.ws.connected() {
            self.ws.close();
            if !self.backoff.ready(now) {
                return Poll::Reconnecting;
            }
            match self.open_app_connection() {
                Ok(()) => self.backoff.reset(),
                Err(error) => {
                    tracing::warn!(%error, "socket mode reconnect failed");
                    self.backoff.record_failure(now);
                    return Poll::Reconnecting;
                }
            }
        }

        match self.ws.read_frame(&mut self.buf) {
            Err(error) => {
                // The frame layer already forced the channel closed.
                tracing::warn!(%error, "frame read failed");
                Poll::Reconnecting
            }
            Ok(None) => Poll::Idle,
            Ok(Some((Opcode::Ping, payload))) => {
                tracing::debug!(len = payload.len(), "ping; answering with pong");
                if let Err(error) = self.ws.write_frame(Opcode::Pong, payload) {
                    tracing::warn!(%error, "pong write failed");
                }
                Poll::Idle
            }
            Ok(Some((Opcode::Close, _))) => {
                tracing::debug!("server closed the socket");
                self.ws.close();
                Poll::Reconnecting
            }
            Ok(Some((Opcode::Pong, _))) => Poll::Idle,
            Ok(Some((Opcode::Text | Opcode::Binary, payload))) => {
                match serde_json::from_slice(payload) {
                    Ok(event) => Poll::Event(event),
                    Err(error) => {
                        tracing::warn!(%error, len = payload.len(), "discarding unparseable event payload");
                        Poll::Idle
                    }
                }
            }
        }
    }

    /// Acknowledge a delivered envelope, optionally attaching a response
    /// payload.
    ///
    /// # Errors
    ///
    /// Serialization failures and frame-write failures.
    pub fn acknowledge_event(
        &mut self,
        envelope_id: &str,
        payload: Option<&Value>,
    ) -> Result<(), SlackError> {
        let body = serde_json::to_vec(&Acknowledgement { envelope_id, payload })?;
        tracing::debug!(envelope_id, "acknowledging event");
        self.ws.write_frame(Opcode::Text, &body)?;
        Ok(())
    }

    /// Post a chat message. Uses the transient exchange channel; the
    /// WebSocket is not involved.
    ///
    /// # Errors
    ///
    /// Exchange failures, a non-200 status, or an `ok: false` reply.
    pub fn post_message(&mut self, text: &str, channel: &str) -> Result<(), SlackError> {
        let authorization = format!("Bearer {}", self.bot_token);
        let body = serde_json::to_vec(&serde_json::json!({ "channel": channel, "text": text }))?;
        let headers = [
            ("Authorization", authorization.as_str()),
            ("Content-Type", JSON_CONTENT_TYPE),
        ];
        let request = Request::post(API_HOST, POST_MESSAGE_PATH, &headers, Some(&body));

        let response = expect_response(exchange::request(&mut self.http, &mut self.buf, &request)?)?;
        if response.status != 200 {
            return Err(SlackError::Status(response.status));
        }

        let reply: Value = serde_json::from_slice(response.body)?;
        check_ok(&reply)?;
        tracing::debug!(channel, "message posted");
        Ok(())
    }
}

/// REST endpoints never upgrade; treat a protocol switch as the status it is.
fn expect_response(outcome: Outcome<'_>) -> Result<Response<'_>, SlackError> {
    match outcome {
        Outcome::Response(response) => Ok(response),
        Outcome::Upgraded => Err(SlackError::Status(101)),
    }
}

/// Enforce the service's `ok` convention: the field must exist, be a
/// boolean, and be true. The service's `error` string is carried along
/// when it reports failure.
fn check_ok(body: &Value) -> Result<(), SlackError> {
    let ok = body
        .get("ok")
        .and_then(Value::as_bool)
        .ok_or(SlackError::MissingField("ok"))?;
    if ok {
        Ok(())
    } else {
        let reason = body
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unknown_error");
        Err(SlackError::ApiNotOk(reason.to_owned()))
    }
}

/// Split a `wss://` URL into host and path, refusing anything malformed
/// instead of truncating it.
fn split_wss_url(url: &str) -> Result<(&str, String), SlackError> {
    let rest = url
        .strip_prefix(WSS_SCHEME)
        .ok_or_else(|| SlackError::BadUrl(url.to_owned()))?;

    let (host, path) = match rest.find('/') {
        Some(split) => (&rest[..split], rest[split..].to_owned()),
        None => (rest, "/".to_owned()),
    };
    if host.is_empty() {
        return Err(SlackError::BadUrl(url.to_owned()));
    }
    Ok((host, path))
}

#[cfg(test)]
#[path = "slack_test.rs"]
mod tests;
