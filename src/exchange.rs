//! One-shot HTTP/1.1 request/response exchange over a [`Transport`].
//!
//! DESIGN
//! ======
//! The caller lends one buffer per call. The request head is formatted into
//! it, sent, and then the same bytes are overwritten by the response —
//! status line, headers, body. The body is located by `Content-Length`,
//! falling back to read-until-EOF (a `Connection: close` header is added
//! automatically unless the caller supplies its own `Connection`).
//!
//! A `101 Switching Protocols` status is not an error here: it is the
//! distinguished success-with-upgrade outcome, and the channel is left
//! open for the WebSocket layer to adopt. Every other path — normal
//! response, parse failure, transport failure — closes the channel, so a
//! call is exactly one connect/close cycle.

use std::fmt::{self, Write as _};

use crate::channel::{ChannelError, Read, Transport};

/// Port every exchange connects to; this stack only speaks TLS.
pub const HTTPS_PORT: u16 = 443;

const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";
const STATUS_SWITCHING_PROTOCOLS: u16 = 101;

/// Errors raised by a single exchange.
#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    #[error(transparent)]
    Channel(#[from] ChannelError),
    /// The request line plus headers did not fit the caller's buffer.
    #[error("request head does not fit the {0}-byte buffer")]
    HeadTooLarge(usize),
    /// The response (head or body) did not fit the caller's buffer.
    #[error("response exceeds the {0}-byte buffer")]
    ResponseTooLarge(usize),
    /// The peer's bytes did not parse as an HTTP/1.1 response.
    #[error("malformed http response: {0}")]
    Malformed(&'static str),
}

/// A transient request description; consumed by one [`request`] call.
pub struct Request<'a> {
    pub method: &'a str,
    pub host: &'a str,
    pub path: &'a str,
    pub headers: &'a [(&'a str, &'a str)],
    pub body: Option<&'a [u8]>,
}

impl<'a> Request<'a> {
    #[must_use]
    pub fn get(host: &'a str, path: &'a str, headers: &'a [(&'a str, &'a str)]) -> Self {
        Self { method: "GET", host, path, headers, body: None }
    }

    #[must_use]
    pub fn post(
        host: &'a str,
        path: &'a str,
        headers: &'a [(&'a str, &'a str)],
        body: Option<&'a [u8]>,
    ) -> Self {
        Self { method: "POST", host, path, headers, body }
    }
}

/// A parsed response, viewing the caller's buffer.
#[derive(Debug)]
pub struct Response<'b> {
    pub status: u16,
    pub body: &'b [u8],
}

/// Outcome of an exchange.
#[derive(Debug)]
pub enum Outcome<'b> {
    /// A complete response was read and the channel was closed.
    Response(Response<'b>),
    /// The server switched protocols; the channel is still open and now
    /// belongs to the caller.
    Upgraded,
}

/// Run one request/response cycle on `channel`, using `buf` for both the
/// outbound head and the inbound response.
///
/// # Errors
///
/// Transport failures, a head or response exceeding `buf`, or a response
/// that does not parse. Any error closes the channel first.
pub fn request<'b, C: Transport>(
    channel: &mut C,
    buf: &'b mut [u8],
    request: &Request<'_>,
) -> Result<Outcome<'b>, ExchangeError> {
    match perform(channel, buf, request) {
        Ok(Raw::Upgraded) => Ok(Outcome::Upgraded),
        Ok(Raw::Response { status, body }) => {
            channel.close();
            Ok(Outcome::Response(Response { status, body: &buf[body] }))
        }
        Err(e) => {
            channel.close();
            Err(e)
        }
    }
}

enum Raw {
    Response { status: u16, body: std::ops::Range<usize> },
    Upgraded,
}

fn perform<C: Transport>(
    channel: &mut C,
    buf: &mut [u8],
    request: &Request<'_>,
) -> Result<Raw, ExchangeError> {
    let head_len = build_head(buf, request)?;

    channel.connect(request.host, HTTPS_PORT)?;
    channel.write_all(&buf[..head_len])?;
    if let Some(body) = request.body {
        channel.write_all(body)?;
    }

    // Response head: read until the blank line.
    let mut filled = 0;
    let head_end = loop {
        if filled == buf.len() {
            return Err(ExchangeError::ResponseTooLarge(buf.len()));
        }
        match channel.read(&mut buf[filled..])? {
            Read::Data(n) => {
                filled += n;
                if let Some(end) = find_terminator(&buf[..filled]) {
                    break end;
                }
            }
            Read::WouldBlock => {}
            Read::Eof => return Err(ExchangeError::Malformed("connection closed before head")),
        }
    };

    let status = parse_status(&buf[..head_end])?;
    if status == STATUS_SWITCHING_PROTOCOLS {
        // No body follows a protocol switch; the channel stays open.
        return Ok(Raw::Upgraded);
    }

    let content_length = parse_content_length(&buf[..head_end])?;
    let body_end = match content_length {
        Some(length) => {
            let Some(end) = head_end.checked_add(length).filter(|end| *end <= buf.len()) else {
                return Err(ExchangeError::ResponseTooLarge(buf.len()));
            };
            while filled < end {
                match channel.read(&mut buf[filled..end])? {
                    Read::Data(n) => filled += n,
                    Read::WouldBlock => {}
                    Read::Eof => return Err(ExchangeError::Malformed("truncated body")),
                }
            }
            end
        }
        None => {
            // No Content-Length: the body runs to EOF.
            loop {
                if filled == buf.len() {
                    let mut probe = [0u8; 1];
                    match channel.read(&mut probe)? {
                        Read::Data(_) => return Err(ExchangeError::ResponseTooLarge(buf.len())),
                        Read::Eof => break,
                        Read::WouldBlock => {}
                    }
                    continue;
                }
                match channel.read(&mut buf[filled..])? {
                    Read::Data(n) => filled += n,
                    Read::WouldBlock => {}
                    Read::Eof => break,
                }
            }
            filled
        }
    };

    Ok(Raw::Response { status, body: head_end..body_end })
}

/// Bounded formatter over the shared buffer; refuses to overflow.
struct Head<'a> {
    buf: &'a mut [u8],
    len: usize,
}

impl fmt::Write for Head<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let end = self.len + s.len();
        if end > self.buf.len() {
            return Err(fmt::Error);
        }
        self.buf[self.len..end].copy_from_slice(s.as_bytes());
        self.len = end;
        Ok(())
    }
}

fn build_head(buf: &mut [u8], request: &Request<'_>) -> Result<usize, ExchangeError> {
    let capacity = buf.len();
    let mut head = Head { buf, len: 0 };

    let result = (|| {
        write!(head, "{} {} HTTP/1.1\r\n", request.method, request.path)?;
        write!(head, "Host: {}\r\n", request.host)?;
        for (name, value) in request.headers {
            write!(head, "{name}: {value}\r\n")?;
        }
        let caller_manages_connection = request
            .headers
            .iter()
            .any(|(name, _)| name.eq_ignore_ascii_case("connection"));
        if !caller_manages_connection {
            write!(head, "Connection: close\r\n")?;
        }
        if let Some(body) = request.body {
            write!(head, "Content-Length: {}\r\n", body.len())?;
        }
        write!(head, "\r\n")
    })();

    match result {
        Ok(()) => Ok(head.len),
        Err(fmt::Error) => Err(ExchangeError::HeadTooLarge(capacity)),
    }
}

fn find_terminator(bytes: &[u8]) -> Option<usize> {
    bytes
        .windows(HEAD_TERMINATOR.len())
        .position(|window| window == HEAD_TERMINATOR)
        .map(|pos| pos + HEAD_TERMINATOR.len())
}

fn parse_status(head: &[u8]) -> Result<u16, ExchangeError> {
    let head =
        std::str::from_utf8(head).map_err(|_| ExchangeError::Malformed("head is not utf-8"))?;
    let status_line = head.lines().next().unwrap_or("");
    let mut parts = status_line.split_whitespace();

    let version = parts.next().unwrap_or("");
    if !version.starts_with("HTTP/") {
        return Err(ExchangeError::Malformed("missing http version"));
    }
    parts
        .next()
        .and_then(|code| code.parse().ok())
        .ok_or(ExchangeError::Malformed("unparseable status code"))
}

fn parse_content_length(head: &[u8]) -> Result<Option<usize>, ExchangeError> {
    let head =
        std::str::from_utf8(head).map_err(|_| ExchangeError::Malformed("head is not utf-8"))?;
    for line in head.lines().skip(1) {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        if name.trim().eq_ignore_ascii_case("content-length") {
            return value
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| ExchangeError::Malformed("bad content-length"));
        }
    }
    Ok(None)
}

#[cfg(test)]
#[path = "exchange_test.rs"]
mod tests;
