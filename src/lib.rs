//! Slack Socket Mode client for small, single-threaded deployments.
//!
//! ARCHITECTURE
//! ============
//! Four layers, each built on the one below and driven by the one above:
//!
//! ```text
//! slack    — Socket Mode session: connect URL negotiation, poll loop,
//!            acknowledgements, chat.postMessage, reconnect backoff
//! ws       — WebSocket client: upgrade handshake, liveness probe,
//!            masked frame writes, non-blocking frame reads
//! frame    — pure RFC6455-subset codec: header encode/decode, masking
//! exchange — one-shot HTTP/1.1 request/response over a secure channel
//! channel  — TLS session over TCP, pinned to a single root certificate
//! ```
//!
//! DESIGN
//! ======
//! - One fixed-capacity buffer, owned by the session, is lent (`&mut [u8]`)
//!   to whichever operation is in flight. Exclusive access is a borrow-check
//!   fact, not a runtime convention.
//! - No internal threads or tasks: the caller drives everything through
//!   [`slack::SlackClient::poll`], which never blocks once the socket is up.
//! - Every layer below the session fails fast and closes its channel; only
//!   the session retries, lazily, with capped exponential backoff.

pub mod channel;
pub mod exchange;
pub mod frame;
pub mod slack;
pub mod ws;

#[cfg(test)]
mod testing;

pub use channel::{ChannelError, Read, SecureChannel, TlsConfig, Transport};
pub use exchange::{ExchangeError, Outcome, Request, Response};
pub use frame::{FrameError, Opcode};
pub use slack::{Poll, SlackClient, SlackError};
pub use ws::{WsClient, WsError};
