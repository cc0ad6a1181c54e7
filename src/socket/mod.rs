//! Socket Module
//!
//! A [`Socket`] is the only thing in the connection core that touches the
//! network. It wraps a boxed [`Transport`] (anything readable and writable)
//! and turns the usual non-blocking I/O outcomes into three cases:
//!
//! ```text
//! read/write returned n > 0   ->  Ok(n)
//! would block                 ->  Ok(0)
//! peer closed / I/O failure   ->  Err(SocketError), message kept for logging
//! ```
//!
//! The socket itself never blocks the tick loop as long as the transport is
//! in non-blocking mode; [`Socket::connect`] and [`Socket::attach_tcp`] set
//! that up for TCP.

pub mod memory;

pub use memory::MemoryTransport;

use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, trace};

/// A byte transport a [`Socket`] can own.
pub trait Transport: Read + Write + Send + fmt::Debug {
    /// Shuts down both directions of the transport.
    fn shutdown(&mut self) -> io::Result<()>;
}

impl Transport for TcpStream {
    fn shutdown(&mut self) -> io::Result<()> {
        TcpStream::shutdown(self, Shutdown::Both)
    }
}

/// Errors raised by socket operations.
#[derive(Debug, Error)]
pub enum SocketError {
    /// The peer closed the connection
    #[error("connection closed by peer")]
    Closed,

    /// No transport is attached
    #[error("socket is not connected")]
    NotConnected,

    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// An exclusively owned, optionally connected socket.
#[derive(Debug, Default)]
pub struct Socket {
    transport: Option<Box<dyn Transport>>,
    last_error: Option<String>,
}

impl Socket {
    /// Creates a socket with no transport attached.
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a non-blocking TCP connection to `addr`.
    pub fn connect(&mut self, addr: SocketAddr, timeout: Duration) -> Result<(), SocketError> {
        let stream = TcpStream::connect_timeout(&addr, timeout).map_err(|e| self.record(e))?;
        self.attach_tcp(stream)
    }

    /// Attaches an accepted TCP stream, switching it to non-blocking mode.
    pub fn attach_tcp(&mut self, stream: TcpStream) -> Result<(), SocketError> {
        stream.set_nonblocking(true).map_err(|e| self.record(e))?;
        stream.set_nodelay(true).map_err(|e| self.record(e))?;
        self.attach(stream);
        Ok(())
    }

    /// Attaches any transport, replacing (and closing) the previous one.
    pub fn attach(&mut self, transport: impl Transport + 'static) {
        self.close();
        self.transport = Some(Box::new(transport));
        self.last_error = None;
    }

    /// Returns `true` while a transport is attached.
    pub fn is_valid(&self) -> bool {
        self.transport.is_some()
    }

    /// Shuts down and drops the transport. Safe to call repeatedly.
    pub fn close(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            if let Err(e) = transport.shutdown() {
                debug!(error = %e, "Socket shutdown failed");
            }
        }
    }

    /// Reads into `buf`; `Ok(0)` means nothing is available right now.
    pub fn receive(&mut self, buf: &mut [u8]) -> Result<usize, SocketError> {
        if buf.is_empty() {
            return Ok(0);
        }
        let transport = self.transport.as_mut().ok_or(SocketError::NotConnected)?;

        loop {
            match transport.read(buf) {
                Ok(0) => {
                    self.last_error = Some(SocketError::Closed.to_string());
                    return Err(SocketError::Closed);
                }
                Ok(n) => {
                    trace!(bytes = n, "Socket received");
                    return Ok(n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(0),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(self.record(e)),
            }
        }
    }

    /// Writes from `buf`; `Ok(0)` means the transport cannot take more now.
    pub fn send(&mut self, buf: &[u8]) -> Result<usize, SocketError> {
        if buf.is_empty() {
            return Ok(0);
        }
        let transport = self.transport.as_mut().ok_or(SocketError::NotConnected)?;

        loop {
            match transport.write(buf) {
                Ok(0) => {
                    self.last_error = Some(SocketError::Closed.to_string());
                    return Err(SocketError::Closed);
                }
                Ok(n) => {
                    trace!(bytes = n, "Socket sent");
                    return Ok(n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(0),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(self.record(e)),
            }
        }
    }

    /// Text of the last failure seen on this socket, empty if none.
    pub fn last_error_message(&self) -> &str {
        self.last_error.as_deref().unwrap_or("")
    }

    fn record(&mut self, e: io::Error) -> SocketError {
        self.last_error = Some(e.to_string());
        SocketError::Io(e)
    }
}
