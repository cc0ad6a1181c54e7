//! Connection Pool
//!
//! A fixed table of [`Connection`] slots driven by one `tick` call. Each tick
//! runs, for every occupied slot:
//!
//! ```text
//! process_input ─> process_command ─> process_output ─> heartbeat
//! ```
//!
//! The first step that fails disconnects the connection and frees its slot
//! for the next `add`. Slot ids are stable: slot `n` always carries id `n`.

use crate::compression::CompressMode;
use crate::config::ConnectionConfig;
use crate::connection::{Connection, ConnectionError, ConnectionStats, Listener};
use crate::protocol::Protocol;
use crate::socket::{SocketError, Transport};
use crate::time::{Clock, SystemClock};
use std::net::TcpStream;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors returned when admitting a connection.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Every slot is occupied
    #[error("connection pool is full (capacity: {capacity})")]
    Full { capacity: usize },

    /// The slot could not be initialized
    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// The transport could not be attached
    #[error("socket error: {0}")]
    Socket(#[from] SocketError),
}

/// Fixed-capacity table of connections sharing one protocol.
pub struct ConnectionPool {
    slots: Vec<Connection>,
    protocol: Arc<dyn Protocol>,
    stats: Arc<ConnectionStats>,
    listener: Arc<dyn Listener>,
    clock: Arc<dyn Clock>,
    compress_mode: CompressMode,
    safe_encrypt: bool,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("capacity", &self.slots.len())
            .field("active", &self.len())
            .field("compress_mode", &self.compress_mode)
            .field("stats", &self.stats.snapshot())
            .finish()
    }
}

impl ConnectionPool {
    /// Creates `capacity` empty slots (at most `i16::MAX`).
    pub fn new(capacity: usize, protocol: Arc<dyn Protocol>, config: ConnectionConfig) -> Self {
        Self::with_clock(capacity, protocol, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        capacity: usize,
        protocol: Arc<dyn Protocol>,
        config: ConnectionConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let capacity = capacity.min(i16::MAX as usize);
        let slots = (0..capacity)
            .map(|id| {
                let mut connection =
                    Connection::with_config(config.clone()).with_clock(Arc::clone(&clock));
                connection.set_id(id as i16);
                connection
            })
            .collect();

        let stats = Arc::new(ConnectionStats::new());
        let listener: Arc<dyn Listener> = stats.clone();

        Self {
            slots,
            protocol,
            stats,
            listener,
            clock,
            compress_mode: CompressMode::None,
            safe_encrypt: false,
        }
    }

    /// Compression mode applied to every connection admitted afterwards.
    pub fn set_compress_mode(&mut self, mode: CompressMode) {
        self.compress_mode = mode;
    }

    pub fn compress_mode(&self) -> CompressMode {
        self.compress_mode
    }

    /// When set, admitted connections must confirm encryption before their
    /// safe-encrypt deadline or be dropped by `tick`.
    pub fn set_require_safe_encrypt(&mut self, require: bool) {
        self.safe_encrypt = require;
    }

    /// Admits an accepted TCP stream.
    pub fn add_tcp(&mut self, stream: TcpStream) -> Result<i16, PoolError> {
        let peer = stream.peer_addr().ok();
        let id = self.reserve()?;
        if let Err(e) = self.slots[id as usize].socket_mut().attach_tcp(stream) {
            self.slots[id as usize].clear();
            return Err(e.into());
        }
        self.admit(id);
        info!(connection = id, peer = ?peer, "Connection added");
        Ok(id)
    }

    /// Admits any transport.
    pub fn add_transport(&mut self, transport: impl Transport + 'static) -> Result<i16, PoolError> {
        let id = self.reserve()?;
        self.slots[id as usize].socket_mut().attach(transport);
        self.admit(id);
        debug!(connection = id, "Connection added");
        Ok(id)
    }

    fn reserve(&mut self) -> Result<i16, PoolError> {
        let capacity = self.slots.len();
        let Some(connection) = self.slots.iter_mut().find(|c| c.is_empty()) else {
            warn!(capacity, "Connection pool is full");
            return Err(PoolError::Full { capacity });
        };
        connection.init(Some(Arc::clone(&self.protocol)))?;
        Ok(connection.id())
    }

    fn admit(&mut self, id: i16) {
        let now = self.clock.now_secs();
        let connection = &mut self.slots[id as usize];
        connection.set_empty(false);
        connection.set_listener(&self.listener);
        connection.compress_set_mode(self.compress_mode);
        if self.safe_encrypt {
            connection.arm_safe_encrypt(now);
        }
        self.stats.connection_opened();
    }

    /// Runs one processing round over every occupied slot.
    ///
    /// Returns the number of connections dropped during the round.
    pub fn tick(&mut self) -> usize {
        let now = self.clock.now_secs();
        let mut dropped = 0;

        for connection in self.slots.iter_mut().filter(|c| !c.is_empty()) {
            let result = connection
                .process_input()
                .and_then(|_| connection.process_command())
                .and_then(|_| connection.process_output())
                .and_then(|_| connection.heartbeat(now, 0));

            self.stats.bytes_read(connection.get_receive_bytes());
            self.stats.bytes_written(connection.get_send_bytes());

            if let Err(e) = result {
                debug!(connection = connection.id(), error = %e, "Dropping connection");
                connection.disconnect();
                dropped += 1;
            }
        }

        dropped
    }

    pub fn get(&self, id: i16) -> Option<&Connection> {
        let connection = self.slots.get(usize::try_from(id).ok()?)?;
        (!connection.is_empty()).then_some(connection)
    }

    pub fn get_mut(&mut self, id: i16) -> Option<&mut Connection> {
        let connection = self.slots.get_mut(usize::try_from(id).ok()?)?;
        (!connection.is_empty()).then_some(connection)
    }

    /// Disconnects one connection. Returns `false` if the slot is empty.
    pub fn disconnect(&mut self, id: i16) -> bool {
        match self.get_mut(id) {
            Some(connection) => {
                connection.disconnect();
                true
            }
            None => false,
        }
    }

    /// Disconnects every occupied slot.
    pub fn disconnect_all(&mut self) {
        for connection in self.slots.iter_mut().filter(|c| !c.is_empty()) {
            connection.disconnect();
        }
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|c| !c.is_empty()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn stats(&self) -> &Arc<ConnectionStats> {
        &self.stats
    }
}
