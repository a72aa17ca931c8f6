//! WebSocket client: upgrade handshake plus framed I/O over a [`Transport`].
//!
//! The upgrade is a plain HTTP exchange that ends in success-with-upgrade;
//! the channel that carried it becomes the persistent frame channel. Reads
//! are opportunistic: the two fixed header bytes are probed non-blocking,
//! and only once a frame is actually arriving does the client commit to
//! blocking reads for the remainder. Outbound frames are masked with a
//! fresh random key each time, as the protocol requires of clients.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::Rng as _;

use crate::channel::{self, ChannelError, Read, Transport};
use crate::exchange::{self, Outcome, Request};
use crate::frame::{self, FrameError, LengthField, Opcode};

const WEBSOCKET_VERSION: &str = "13";
const HANDSHAKE_KEY_LEN: usize = 16;

/// Masking works through a small stack chunk so payloads are never copied
/// into a second full-size buffer.
const MASK_CHUNK: usize = 128;

/// Errors raised by the WebSocket layer.
#[derive(Debug, thiserror::Error)]
pub enum WsError {
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    Exchange(#[from] exchange::ExchangeError),
    #[error(transparent)]
    Frame(#[from] FrameError),
    /// The server answered the upgrade request with a normal response.
    #[error("server rejected websocket upgrade with http status {0}")]
    UpgradeRejected(u16),
    /// The peer announced an 8-byte extended length.
    #[error("peer sent unsupported 64-bit frame length")]
    UnsupportedLength,
    /// The announced payload does not fit the caller's buffer.
    #[error("frame of {len} bytes exceeds the {capacity}-byte buffer")]
    FrameTooLarge { len: usize, capacity: usize },
    /// The first header byte carried an opcode this subset does not speak.
    #[error("unknown frame opcode {0:#04x}")]
    BadOpcode(u8),
}

/// A WebSocket connection over a generic transport.
pub struct WsClient<C> {
    channel: C,
}

impl<C: Transport> WsClient<C> {
    /// Wrap an (unconnected) channel.
    #[must_use]
    pub fn new(channel: C) -> Self {
        Self { channel }
    }

    /// Negotiate the upgrade against `host`/`path`.
    ///
    /// On success the exchange's channel stays open and becomes this
    /// client's persistent frame channel.
    ///
    /// # Errors
    ///
    /// Exchange failures, or [`WsError::UpgradeRejected`] when the server
    /// answers with anything but a protocol switch.
    pub fn open(&mut self, host: &str, path: &str, buf: &mut [u8]) -> Result<(), WsError> {
        let key: [u8; HANDSHAKE_KEY_LEN] = rand::rng().random();
        let key = BASE64.encode(key);
        let headers = [
            ("Upgrade", "websocket"),
            ("Connection", "Upgrade"),
            ("Sec-WebSocket-Key", key.as_str()),
            ("Sec-WebSocket-Version", WEBSOCKET_VERSION),
        ];

        match exchange::request(&mut self.channel, buf, &Request::get(host, path, &headers))? {
            Outcome::Upgraded => {
                tracing::debug!(host, path, "websocket upgrade accepted");
                Ok(())
            }
            Outcome::Response(response) => Err(WsError::UpgradeRejected(response.status)),
        }
    }

    /// Heuristic liveness check: probes the channel without consuming
    /// payload data. No data pending is normal and means "still here".
    pub fn connected(&mut self) -> bool {
        self.channel.is_open() && self.channel.probe_alive()
    }

    /// Whether the underlying channel holds a connection at all.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.channel.is_open()
    }

    /// Send one unfragmented, masked frame.
    ///
    /// # Errors
    ///
    /// [`FrameError::PayloadTooLong`] before anything is written, or a
    /// channel failure mid-write.
    pub fn write_frame(&mut self, opcode: Opcode, payload: &[u8]) -> Result<(), WsError> {
        let mask: [u8; 4] = rand::rng().random();
        let (header, header_len) = frame::encode_header(opcode, payload.len(), mask)?;

        self.channel.set_nonblocking(false)?;
        self.channel.write_all(&header[..header_len])?;

        let mut chunk = [0u8; MASK_CHUNK];
        let mut offset = 0;
        while offset < payload.len() {
            let n = (payload.len() - offset).min(MASK_CHUNK);
            chunk[..n].copy_from_slice(&payload[offset..offset + n]);
            frame::apply_mask(mask, offset, &mut chunk[..n]);
            self.channel.write_all(&chunk[..n])?;
            offset += n;
        }
        Ok(())
    }

    /// Try to read one frame into `buf`.
    ///
    /// Returns `None` when no frame has arrived — the normal idle outcome.
    /// Once a header byte is seen the rest of the frame is read to
    /// completion; partial frames are never carried across calls.
    ///
    /// # Errors
    ///
    /// Unsupported lengths, frames larger than `buf`, unknown opcodes, and
    /// channel failures. Every error path forces the channel closed.
    pub fn read_frame<'b>(
        &mut self,
        buf: &'b mut [u8],
    ) -> Result<Option<(Opcode, &'b [u8])>, WsError> {
        match self.read_frame_inner(buf) {
            Ok(result) => Ok(result),
            Err(e) => {
                self.channel.close();
                Err(e)
            }
        }
    }

    fn read_frame_inner<'b>(
        &mut self,
        buf: &'b mut [u8],
    ) -> Result<Option<(Opcode, &'b [u8])>, WsError> {
        self.channel.set_nonblocking(true)?;

        let mut header = [0u8; 2];
        let got = match self.channel.read(&mut header)? {
            Read::WouldBlock => return Ok(None),
            Read::Eof => {
                return Err(WsError::Channel(ChannelError::Io(
                    std::io::ErrorKind::UnexpectedEof.into(),
                )));
            }
            Read::Data(n) => n,
        };

        // A frame is arriving: commit to it.
        self.channel.set_nonblocking(false)?;
        if got < header.len() {
            channel::read_exact(&mut self.channel, &mut header[got..])?;
        }

        let raw = frame::parse_initial(header);
        let Some(opcode) = Opcode::from_bits(raw.opcode_bits) else {
            return Err(WsError::BadOpcode(raw.opcode_bits));
        };

        let len = match raw.length {
            LengthField::Immediate(n) => n,
            LengthField::Extended16 => {
                let mut ext = [0u8; 2];
                channel::read_exact(&mut self.channel, &mut ext)?;
                usize::from(u16::from_be_bytes(ext))
            }
            LengthField::Unsupported64 => return Err(WsError::UnsupportedLength),
        };

        // Servers do not normally mask, but a masked frame decodes fine.
        let mask = if raw.masked {
            let mut key = [0u8; 4];
            channel::read_exact(&mut self.channel, &mut key)?;
            Some(key)
        } else {
            None
        };

        if len > buf.len() {
            return Err(WsError::FrameTooLarge { len, capacity: buf.len() });
        }

        channel::read_exact(&mut self.channel, &mut buf[..len])?;
        if let Some(key) = mask {
            frame::apply_mask(key, 0, &mut buf[..len]);
        }

        Ok(Some((opcode, &buf[..len])))
    }

    /// Close the persistent channel. Safe to call when already closed.
    pub fn close(&mut self) {
        self.channel.close();
    }

    #[cfg(test)]
    pub(crate) fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
