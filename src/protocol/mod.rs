//! Protocol Contract
//!
//! A [`Connection`](crate::connection::Connection) moves bytes; a
//! [`Protocol`] gives them meaning. The connection calls into the protocol at
//! three points of its tick:
//!
//! ```text
//! process_input  ──> Protocol::compress   decompress queued blocks into the plain stream
//! process_command──> Protocol::command    drain at most `max_ops` framed packets
//! send           ──> Protocol::send       serialize one packet into the output stream
//! ```
//!
//! One protocol instance is shared by every connection that speaks it, so
//! implementations must be `Send + Sync` and keep per-connection state on
//! the connection.
//!
//! ## Modules
//!
//! - `framed`: a small reference protocol (id + length framing, compressed
//!   blocks with a length header) used by the server binary and the tests

pub mod framed;

pub use framed::{EchoHandler, FramedProtocol, PacketHandler, FRAME_HEADER_SIZE, MAX_PACKET_SIZE};

use crate::compression::CompressError;
use crate::connection::Connection;
use crate::packet::Packet;
use crate::stream::StreamError;
use thiserror::Error;

/// Errors a protocol reports back to its connection.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Reading or writing a stream failed
    #[error("stream error: {0}")]
    Stream(#[from] StreamError),

    /// Compressing or decompressing a block failed
    #[error("compression error: {0}")]
    Compress(#[from] CompressError),

    /// A packet body exceeds the frame limit
    #[error("packet too large: {size} bytes (max: {max})")]
    PacketTooLarge { size: usize, max: usize },

    /// A compressed block does not fit the receive scratch buffer
    #[error("compressed block too large: {size} bytes (max: {max})")]
    BlockTooLarge { size: usize, max: usize },

    /// Input compression is on but the connection has no compressed stream
    #[error("compressed input stream is missing")]
    MissingCompressStream,

    /// The packet handler rejected a packet
    #[error("handler error: {0}")]
    Handler(String),
}

/// Packet semantics consumed by a connection.
pub trait Protocol: Send + Sync {
    /// Drains at most `max_ops` complete packets from the connection's input.
    fn command(&self, connection: &mut Connection, max_ops: u8) -> Result<(), ProtocolError>;

    /// Serializes `packet` into the connection's output stream.
    fn send(&self, connection: &mut Connection, packet: &dyn Packet) -> Result<(), ProtocolError>;

    /// Moves complete blocks from the compressed input stream through `raw`
    /// (compressed scratch) and `plain` (decompressed scratch) into the plain
    /// input stream.
    fn compress(
        &self,
        connection: &mut Connection,
        raw: &mut [u8],
        plain: &mut [u8],
    ) -> Result<(), ProtocolError>;
}
