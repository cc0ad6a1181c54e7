//! Output Stream
//!
//! Packets are serialized into the output stream during a tick and written
//! to the socket in one `flush` at the end of it. A flush that would block
//! leaves the unsent tail queued for the next tick.

use crate::compression::{Assistant, Codec};
use crate::socket::Socket;
use crate::stream::{Encryptor, StreamError};
use bytes::{Buf, BytesMut};
use std::sync::Arc;
use tracing::trace;

/// Buffered, capacity-bounded queue of outbound bytes.
#[derive(Debug)]
pub struct OutputStream {
    buffer: BytesMut,
    default_size: usize,
    max_size: usize,
    compressor: Assistant,
    encryptor: Encryptor,
}

impl OutputStream {
    pub fn new(default_size: usize, max_size: usize) -> Self {
        Self::with_assistant(default_size, max_size, Assistant::default())
    }

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

    pub fn init(&mut self) {
        self.buffer = BytesMut::with_capacity(self.default_size);
        self.encryptor.reset();
    }

    /// Queues `data`, encrypting it when encryption is enabled.
    pub fn write(&mut self, data: &[u8]) -> Result<usize, StreamError> {
        let start = self.buffer.len();
        self.write_raw(data)?;
        self.encryptor.apply(&mut self.buffer[start..]);
        Ok(data.len())
    }

    /// Queues `data` untouched. Used for blocks that were already encrypted
    /// before compression.
    pub fn write_raw(&mut self, data: &[u8]) -> Result<usize, StreamError> {
        let requested = self.buffer.len() + data.len();
        if requested > self.max_size {
            return Err(StreamError::CapacityExceeded {
                requested,
                max: self.max_size,
            });
        }
        self.buffer.extend_from_slice(data);
        Ok(data.len())
    }

    /// Lets `fill` serialize straight into the queue.
    ///
    /// `reserve` bytes are made available to `fill`, which returns how many
    /// it used; the rest is trimmed off again. Nothing is queued if `fill`
    /// fails. The ceiling is checked against `reserve`.
    pub fn write_raw_with<E>(
        &mut self,
        reserve: usize,
        fill: impl FnOnce(&mut [u8]) -> Result<usize, E>,
    ) -> Result<usize, E>
    where
        E: From<StreamError>,
    {
        let start = self.buffer.len();
        let requested = start + reserve;
        if requested > self.max_size {
            return Err(StreamError::CapacityExceeded {
                requested,
                max: self.max_size,
            }
            .into());
        }

        self.buffer.resize(requested, 0);
        match fill(&mut self.buffer[start..]) {
            Ok(used) => {
                let used = used.min(reserve);
                self.buffer.truncate(start + used);
                Ok(used)
            }
            Err(e) => {
                self.buffer.truncate(start);
                Err(e)
            }
        }
    }

    /// Writes queued bytes until the socket would block.
    pub fn flush(&mut self, socket: &mut Socket) -> Result<usize, StreamError> {
        let mut total = 0;

        while !self.buffer.is_empty() {
            let n = socket.send(&self.buffer)?;
            if n == 0 {
                break;
            }
            self.buffer.advance(n);
            total += n;
        }

        if self.buffer.is_empty() && self.buffer.capacity() > self.default_size * 4 {
            self.buffer = BytesMut::with_capacity(self.default_size);
        }

        trace!(bytes = total, pending = self.buffer.len(), "Output stream flushed");
        Ok(total)
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

    pub fn max_size(&self) -> usize {
        self.max_size
    }

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

    /// The keystream, for callers that encrypt before compressing.
    pub fn encryptor_mut(&mut self) -> &mut Encryptor {
        &mut self.encryptor
    }
}
