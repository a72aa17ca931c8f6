//! Scripted in-memory transport for exercising the HTTP, WebSocket, and
//! session layers without a network.

use std::collections::VecDeque;
use std::io;

use crate::channel::{ChannelError, Read, Transport};

/// One scripted read outcome.
pub(crate) enum Script {
    Data(Vec<u8>),
    WouldBlock,
    Eof,
}

/// A [`Transport`] that replays a read script and records everything the
/// code under test does to it.
#[derive(Default)]
pub(crate) struct MockTransport {
    pub open: bool,
    /// What `probe_alive` reports while the transport is open.
    pub alive: bool,
    pub nonblocking: bool,
    pub reads: VecDeque<Script>,
    pub written: Vec<u8>,
    pub connects: Vec<(String, u16)>,
    pub closes: usize,
    pub fail_connect: bool,
}

impl MockTransport {
    /// An unconnected transport; `connect` will succeed.
    pub fn new() -> Self {
        Self { alive: true, ..Self::default() }
    }

    /// A transport that is already connected and alive, as after a
    /// completed upgrade.
    pub fn connected() -> Self {
        Self { open: true, alive: true, ..Self::default() }
    }

    pub fn push_data(&mut self, bytes: &[u8]) {
        self.reads.push_back(Script::Data(bytes.to_vec()));
    }

    pub fn push_would_block(&mut self) {
        self.reads.push_back(Script::WouldBlock);
    }

    pub fn push_eof(&mut self) {
        self.reads.push_back(Script::Eof);
    }
}

impl Transport for MockTransport {
    fn connect(&mut self, host: &str, port: u16) -> Result<(), ChannelError> {
        self.connects.push((host.to_owned(), port));
        if self.fail_connect {
            return Err(ChannelError::Connect {
                host: host.to_owned(),
                port,
                source: io::ErrorKind::ConnectionRefused.into(),
            });
        }
        self.open = true;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<Read, ChannelError> {
        if !self.open {
            return Err(ChannelError::Closed);
        }
        match self.reads.front_mut() {
            // A script that runs dry reads as a hangup, never as a hang.
            None => Ok(Read::Eof),
            Some(Script::Eof) => Ok(Read::Eof),
            Some(Script::WouldBlock) => {
                self.reads.pop_front();
                Ok(Read::WouldBlock)
            }
            Some(Script::Data(bytes)) => {
                let n = buf.len().min(bytes.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                bytes.drain(..n);
                if bytes.is_empty() {
                    self.reads.pop_front();
                }
                Ok(Read::Data(n))
            }
        }
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), ChannelError> {
        if !self.open {
            return Err(ChannelError::Closed);
        }
        self.written.extend_from_slice(data);
        Ok(())
    }

    fn set_nonblocking(&mut self, nonblocking: bool) -> Result<(), ChannelError> {
        if !self.open {
            return Err(ChannelError::Closed);
        }
        self.nonblocking = nonblocking;
        Ok(())
    }

    fn probe_alive(&mut self) -> bool {
        self.open && self.alive
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            self.closes += 1;
        }
    }
}
