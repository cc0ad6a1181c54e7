//! Input Stream
//!
//! Accumulates bytes read from a socket until the protocol can frame them.
//! TCP gives no message boundaries, so a fill may leave half a packet in the
//! queue; the protocol only consumes whole frames and the rest waits for the
//! next tick.

use crate::compression::{Assistant, Codec};
use crate::socket::Socket;
use crate::stream::{Encryptor, StreamError};
use bytes::{Buf, Bytes, BytesMut};
use std::sync::Arc;
use tracing::trace;

/// Buffered, capacity-bounded queue of inbound bytes.
#[derive(Debug)]
pub struct InputStream {
    buffer: BytesMut,
    default_size: usize,
    max_size: usize,
    compressor: Assistant,
    encryptor: Encryptor,
}

impl InputStream {
    /// Creates a stream with a `default_size` floor and a `max_size` ceiling.
    pub fn new(default_size: usize, max_size: usize) -> Self {
        Self::with_assistant(default_size, max_size, Assistant::default())
    }

    /// Creates a stream whose assistant runs `codec`.
    pub fn with_codec(default_size: usize, max_size: usize, codec: Arc<dyn Codec>) -> Self {
        Self::with_assistant(default_size, max_size, Assistant::new(codec))
    }

    fn with_assistant(default_size: usize, max_size: usize, compressor: Assistant) -> Self {
        let default_size = default_size.max(1);
        Self {
            buffer: BytesMut::new(),
            default_size,
            max_size: max_size.max(default_size),
            compressor,
            encryptor: Encryptor::new(),
        }
    }

    /// Allocates the floor capacity.
    pub fn init(&mut self) {
        self.buffer = BytesMut::with_capacity(self.default_size);
        self.encryptor.reset();
    }

    /// Reads everything the socket has ready.
    ///
    /// Grows the buffer one floor-sized step at a time up to the ceiling.
    /// Returns the bytes read this call; bytes read before a failure stay
    /// queued.
    pub fn fill(&mut self, socket: &mut Socket) -> Result<usize, StreamError> {
        let mut total = 0;

        loop {
            let len = self.buffer.len();
            let room = (self.max_size - len).min(self.default_size);
            if room == 0 {
                if total > 0 {
                    break;
                }
                return Err(StreamError::CapacityExceeded {
                    requested: len + 1,
                    max: self.max_size,
                });
            }

            self.buffer.resize(len + room, 0);
            let n = match socket.receive(&mut self.buffer[len..]) {
                Ok(n) => n,
                Err(e) => {
                    self.buffer.truncate(len);
                    return Err(e.into());
                }
            };
            self.buffer.truncate(len + n);
            self.encryptor.apply(&mut self.buffer[len..]);
            total += n;

            if n < room {
                break;
            }
        }

        trace!(bytes = total, buffered = self.buffer.len(), "Input stream filled");
        Ok(total)
    }

    /// Appends bytes produced locally (e.g. by decompression).
    pub fn push(&mut self, data: &[u8]) -> Result<(), StreamError> {
        let requested = self.buffer.len() + data.len();
        if requested > self.max_size {
            return Err(StreamError::CapacityExceeded {
                requested,
                max: self.max_size,
            });
        }
        let start = self.buffer.len();
        self.buffer.extend_from_slice(data);
        self.encryptor.apply(&mut self.buffer[start..]);
        Ok(())
    }

    /// The first `n` queued bytes, if that many are queued.
    pub fn peek(&self, n: usize) -> Option<&[u8]> {
        self.buffer.get(..n)
    }

    /// Removes and returns the first `n` bytes, if that many are queued.
    pub fn read(&mut self, n: usize) -> Option<Bytes> {
        if n > self.buffer.len() {
            return None;
        }
        Some(self.buffer.split_to(n).freeze())
    }

    /// Drops the first `n` bytes. Returns `false` if fewer are queued.
    pub fn skip(&mut self, n: usize) -> bool {
        if n > self.buffer.len() {
            return false;
        }
        self.buffer.advance(n);
        true
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buffer
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.buffer.capacity()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Drops queued bytes and returns to the floor capacity.
    pub fn clear(&mut self) {
        self.init();
    }

    pub fn compressor(&self) -> &Assistant {
        &self.compressor
    }

    pub fn compressor_mut(&mut self) -> &mut Assistant {
        &mut self.compressor
    }

    pub fn encrypt_enable(&mut self, enable: bool) {
        self.encryptor.enable(enable);
    }

    pub fn encrypt_set_key(&mut self, key: &[u8]) {
        self.encryptor.set_key(key);
    }

    pub fn encryptor(&self) -> &Encryptor {
        &self.encryptor
    }
}
