//! TLS-secured TCP channel pinned to a single root certificate.
//!
//! DESIGN
//! ======
//! A channel is either fully connected (socket + finished handshake) or
//! fully closed (`None`); there is no observable in-between. `close` is
//! idempotent. Certificate verification is mandatory and chains to exactly
//! one pinned DER root — there is no system store and no intermediate-CA
//! handling, which is all a device talking to one service needs.
//!
//! The [`Transport`] trait is the seam between this module and everything
//! above it: the HTTP and WebSocket layers are generic over it, so tests
//! drive them with a scripted in-memory transport instead of a socket.

use std::io::{self, Read as _, Write as _};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, ServerName};
use rustls::{ClientConnection, StreamOwned};

/// Errors raised while establishing or using a secure channel.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// The pinned root certificate could not be parsed as DER.
    #[error("trust anchor rejected: {0}")]
    InvalidTrustAnchor(#[source] rustls::Error),
    /// The host is not a valid SNI server name.
    #[error("invalid server name `{name}`")]
    InvalidServerName { name: String },
    /// DNS resolution produced no usable address.
    #[error("hostname resolution failed for {host}: {source}")]
    Resolution {
        host: String,
        #[source]
        source: io::Error,
    },
    /// The TCP connect itself failed.
    #[error("tcp connect to {host}:{port} failed: {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },
    /// The TLS client session could not be created.
    #[error("tls session setup failed: {0}")]
    Tls(#[source] rustls::Error),
    /// TLS negotiation failed, including certificate rejection.
    #[error("tls handshake with {host} failed: {source}")]
    Handshake {
        host: String,
        #[source]
        source: io::Error,
    },
    /// Read or write on an established session failed.
    #[error("channel i/o failed: {0}")]
    Io(#[from] io::Error),
    /// The operation requires a connected channel.
    #[error("channel is closed")]
    Closed,
}

/// Outcome of a single read on a channel.
///
/// Would-block is a normal outcome in non-blocking mode, not an error;
/// callers polling for data treat it as "nothing yet".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Read {
    /// `n` bytes were transferred into the caller's buffer.
    Data(usize),
    /// The channel is non-blocking and no data is ready.
    WouldBlock,
    /// The peer closed the connection cleanly.
    Eof,
}

/// Byte-level transport consumed by the HTTP and WebSocket layers.
pub trait Transport {
    /// Connect to `host:port`. Replaces any previous connection.
    ///
    /// # Errors
    ///
    /// Resolution, connect, or handshake failures. No retry is attempted.
    fn connect(&mut self, host: &str, port: u16) -> Result<(), ChannelError>;

    /// Read into `buf`, honoring the current blocking mode.
    ///
    /// # Errors
    ///
    /// [`ChannelError::Closed`] when disconnected, [`ChannelError::Io`] on
    /// any fatal transport failure. Would-block is not an error.
    fn read(&mut self, buf: &mut [u8]) -> Result<Read, ChannelError>;

    /// Write all of `data`.
    ///
    /// # Errors
    ///
    /// [`ChannelError::Closed`] when disconnected, [`ChannelError::Io`]
    /// otherwise.
    fn write_all(&mut self, data: &[u8]) -> Result<(), ChannelError>;

    /// Toggle the blocking mode of the underlying socket.
    ///
    /// # Errors
    ///
    /// [`ChannelError::Closed`] when disconnected.
    fn set_nonblocking(&mut self, nonblocking: bool) -> Result<(), ChannelError>;

    /// Opportunistic liveness probe: pending data or would-block mean the
    /// peer is still there; clean EOF or any failure means it is not.
    fn probe_alive(&mut self) -> bool;

    /// Whether the channel currently holds a connection.
    fn is_open(&self) -> bool;

    /// Tear down the connection. Safe to call repeatedly.
    fn close(&mut self);
}

/// One-time TLS context: the pinned trust anchor, parsed and ready to
/// stamp out client sessions.
#[derive(Debug, Clone)]
pub struct TlsConfig {
    config: Arc<rustls::ClientConfig>,
}

impl TlsConfig {
    /// Pin a single DER-encoded root certificate.
    ///
    /// # Errors
    ///
    /// [`ChannelError::InvalidTrustAnchor`] if the blob is not a valid
    /// certificate.
    pub fn new(trust_anchor_der: &[u8]) -> Result<Self, ChannelError> {
        let mut roots = rustls::RootCertStore::empty();
        roots
            .add(CertificateDer::from(trust_anchor_der.to_vec()))
            .map_err(ChannelError::InvalidTrustAnchor)?;

        let config = rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();

        Ok(Self { config: Arc::new(config) })
    }

    /// A config with an empty root store, for tests that never handshake.
    #[cfg(test)]
    pub(crate) fn empty_for_tests() -> Self {
        let config = rustls::ClientConfig::builder()
            .with_root_certificates(rustls::RootCertStore::empty())
            .with_no_client_auth();
        Self { config: Arc::new(config) }
    }
}

/// TLS session over a TCP socket.
pub struct SecureChannel {
    config: Arc<rustls::ClientConfig>,
    stream: Option<StreamOwned<ClientConnection, TcpStream>>,
}

impl SecureChannel {
    /// An unconnected channel sharing the given TLS context.
    #[must_use]
    pub fn new(config: &TlsConfig) -> Self {
        Self { config: Arc::clone(&config.config), stream: None }
    }
}

impl Transport for SecureChannel {
    fn connect(&mut self, host: &str, port: u16) -> Result<(), ChannelError> {
        self.close();

        let addr = (host, port)
            .to_socket_addrs()
            .map_err(|source| ChannelError::Resolution { host: host.to_owned(), source })?
            .next()
            .ok_or_else(|| ChannelError::Resolution {
                host: host.to_owned(),
                source: io::ErrorKind::AddrNotAvailable.into(),
            })?;

        let mut sock = TcpStream::connect(addr).map_err(|source| ChannelError::Connect {
            host: host.to_owned(),
            port,
            source,
        })?;

        let name = ServerName::try_from(host.to_owned())
            .map_err(|_| ChannelError::InvalidServerName { name: host.to_owned() })?;
        let mut conn =
            ClientConnection::new(Arc::clone(&self.config), name).map_err(ChannelError::Tls)?;

        while conn.is_handshaking() {
            conn.complete_io(&mut sock).map_err(|source| ChannelError::Handshake {
                host: host.to_owned(),
                source,
            })?;
        }

        tracing::debug!(host, port, "secure channel established");
        self.stream = Some(StreamOwned::new(conn, sock));
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<Read, ChannelError> {
        let stream = self.stream.as_mut().ok_or(ChannelError::Closed)?;
        loop {
            return match stream.read(buf) {
                Ok(0) => Ok(Read::Eof),
                Ok(n) => Ok(Read::Data(n)),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(Read::WouldBlock),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => Err(ChannelError::Io(e)),
            };
        }
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), ChannelError> {
        let stream = self.stream.as_mut().ok_or(ChannelError::Closed)?;
        stream.write_all(data)?;
        Ok(())
    }

    fn set_nonblocking(&mut self, nonblocking: bool) -> Result<(), ChannelError> {
        let stream = self.stream.as_mut().ok_or(ChannelError::Closed)?;
        stream.sock.set_nonblocking(nonblocking)?;
        Ok(())
    }

    fn probe_alive(&mut self) -> bool {
        let Some(stream) = self.stream.as_mut() else {
            return false;
        };
        if stream.sock.set_nonblocking(true).is_err() {
            return false;
        }
        match stream.conn.read_tls(&mut stream.sock) {
            // Clean EOF: the peer hung up.
            Ok(0) => false,
            // Records arrived; they are only good news if they decrypt.
            Ok(_) => stream.conn.process_new_packets().is_ok(),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => true,
            Err(_) => false,
        }
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.conn.send_close_notify();
            let _ = stream.conn.write_tls(&mut stream.sock);
            let _ = stream.sock.shutdown(std::net::Shutdown::Both);
            tracing::debug!("secure channel closed");
        }
    }
}

/// Fill `buf` completely, spinning through transient would-block results.
///
/// Used by the layers above once they have committed to a read (an HTTP
/// response, the remainder of a frame) and the byte count is known.
pub(crate) fn read_exact<C: Transport>(channel: &mut C, buf: &mut [u8]) -> Result<(), ChannelError> {
    let mut filled = 0;
    while filled < buf.len() {
        match channel.read(&mut buf[filled..])? {
            Read::Data(n) => filled += n,
            Read::WouldBlock => {}
            Read::Eof => return Err(ChannelError::Io(io::ErrorKind::UnexpectedEof.into())),
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "channel_test.rs"]
mod tests;
