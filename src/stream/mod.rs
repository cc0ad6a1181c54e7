//! Buffered Socket Streams
//!
//! Each connection owns one [`InputStream`] and one [`OutputStream`] (plus a
//! second input stream for compressed traffic). Streams are growable byte
//! queues with a floor and a hard ceiling:
//!
//! ```text
//!            default_size                     max_size
//!   ┌────────────┬──────────────── ─ ─ ─ ─ ─ ─ ┐
//!   │  floor     │  growth allowed up to here   │  -> CapacityExceeded
//!   └────────────┴──────────────── ─ ─ ─ ─ ─ ─ ┘
//! ```
//!
//! The socket is passed in on every `fill`/`flush` call rather than stored,
//! which keeps the connection the single owner of its socket.
//!
//! Streams carry an [`Assistant`](crate::compression::Assistant) whose flag
//! they expose but never act on; the transform is run by the connection and
//! its protocol. The [`Encryptor`] on the other hand is applied by the stream
//! itself as bytes enter the queue.

pub mod encrypt;
pub mod input;
pub mod output;

pub use encrypt::Encryptor;
pub use input::InputStream;
pub use output::OutputStream;

use crate::socket::SocketError;
use thiserror::Error;

/// Errors raised by stream operations.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The socket failed or was closed
    #[error("socket error: {0}")]
    Socket(#[from] SocketError),

    /// The buffer would grow past its ceiling
    #[error("stream capacity exceeded: {requested} bytes (max: {max})")]
    CapacityExceeded { requested: usize, max: usize },
}

impl StreamError {
    /// Whether the peer closed the connection.
    pub fn is_closed(&self) -> bool {
        matches!(self, StreamError::Socket(SocketError::Closed))
    }
}
