//! In-Process Transport
//!
//! [`MemoryTransport::pair`] returns two connected endpoints backed by shared
//! byte queues. They behave like non-blocking sockets: reading an empty
//! queue yields `WouldBlock`, writing into a full queue yields `WouldBlock`,
//! and shutting down either end makes the other side read EOF.

use crate::socket::Transport;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};

#[derive(Debug)]
struct Pipe {
    data: VecDeque<u8>,
    capacity: usize,
    closed: bool,
}

impl Pipe {
    fn new(capacity: usize) -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Self {
            data: VecDeque::new(),
            capacity,
            closed: false,
        }))
    }
}

/// One end of an in-memory duplex byte channel.
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    rx: Arc<Mutex<Pipe>>,
    tx: Arc<Mutex<Pipe>>,
}

impl MemoryTransport {
    /// Creates two connected endpoints with unbounded queues.
    pub fn pair() -> (Self, Self) {
        Self::pair_with_capacity(usize::MAX)
    }

    /// Creates two connected endpoints whose queues hold at most `capacity`
    /// bytes each.
    pub fn pair_with_capacity(capacity: usize) -> (Self, Self) {
        let a_to_b = Pipe::new(capacity);
        let b_to_a = Pipe::new(capacity);
        let a = Self {
            rx: Arc::clone(&b_to_a),
            tx: Arc::clone(&a_to_b),
        };
        let b = Self {
            rx: a_to_b,
            tx: b_to_a,
        };
        (a, b)
    }

    /// Bytes waiting to be read on this end.
    pub fn pending(&self) -> usize {
        self.rx.lock().unwrap().data.len()
    }

    /// Drains everything waiting on this end.
    pub fn take_all(&self) -> Vec<u8> {
        self.rx.lock().unwrap().data.drain(..).collect()
    }
}

impl Read for MemoryTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut pipe = self.rx.lock().unwrap();
        if pipe.data.is_empty() {
            if pipe.closed {
                return Ok(0);
            }
            return Err(io::ErrorKind::WouldBlock.into());
        }
        pipe.data.read(buf)
    }
}

impl Write for MemoryTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut pipe = self.tx.lock().unwrap();
        if pipe.closed {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        let space = pipe.capacity.saturating_sub(pipe.data.len());
        if space == 0 {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let n = space.min(buf.len());
        pipe.data.extend(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for MemoryTransport {
    fn shutdown(&mut self) -> io::Result<()> {
        self.rx.lock().unwrap().closed = true;
        self.tx.lock().unwrap().closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_is_duplex() {
        let (mut a, mut b) = MemoryTransport::pair();
        a.write_all(b"ab").unwrap();
        b.write_all(b"cd").unwrap();

        assert_eq!(b.take_all(), b"ab");
        assert_eq!(a.take_all(), b"cd");
    }

    #[test]
    fn test_bounded_queue_would_block() {
        let (mut a, b) = MemoryTransport::pair_with_capacity(3);
        assert_eq!(a.write(b"hello").unwrap(), 3);
        let err = a.write(b"lo").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
        assert_eq!(b.pending(), 3);
    }

    #[test]
    fn test_shutdown_gives_eof() {
        let (mut a, mut b) = MemoryTransport::pair();
        let mut buf = [0u8; 4];
        assert_eq!(
            b.read(&mut buf).unwrap_err().kind(),
            io::ErrorKind::WouldBlock
        );

        a.shutdown().unwrap();
        assert_eq!(b.read(&mut buf).unwrap(), 0);
        assert_eq!(
            a.write(b"x").unwrap_err().kind(),
            io::ErrorKind::BrokenPipe
        );
    }
}
