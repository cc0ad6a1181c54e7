//! Connection
//!
//! A [`Connection`] owns one socket and the streams layered on it, and is
//! driven by its tick loop in three steps:
//!
//! ```text
//!  socket ──fill──> [compressed input] ──Protocol::compress──> [plain input]
//!                                                                   │
//!                                                     Protocol::command (≤ quota)
//!                                                                   │
//!  socket <──flush── [output] <──────────Protocol::send─────────────┘
//! ```
//!
//! ## Lifecycle
//!
//! ```text
//! new() ──init(protocol)──> Ready ──disconnect()/clear()──> Disconnected
//!                             ▲                                  │
//!                             └──────────init(protocol)──────────┘
//! ```
//!
//! Once disconnected every processing step is a successful no-op; the tick
//! loop is expected to call `disconnect()` on any step that fails.
//!
//! ## Ownership
//!
//! The socket and all streams are owned here and dropped with the
//! connection. The protocol is shared (`Arc`) and the listener is held
//! weakly, so neither is kept alive by a connection.

use crate::compression::{Codec, CompressMode, Deflate};
use crate::config::{ConnectionConfig, COMPRESS_BUFFER_SIZE, ID_INVALID, UNCOMPRESS_BUFFER_SIZE};
use crate::connection::Listener;
use crate::packet::Packet;
use crate::protocol::{Protocol, ProtocolError};
use crate::socket::Socket;
use crate::stream::{InputStream, OutputStream, StreamError};
use crate::time::{Clock, SystemClock};
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, error, warn};

/// Errors reported by connection processing.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// No protocol was supplied or set
    #[error("connection has no protocol")]
    MissingProtocol,

    /// Input compression is enabled but its stream was never built
    #[error("compressed input stream is missing")]
    MissingCompressStream,

    /// Stream or socket failure
    #[error("stream error: {0}")]
    Stream(#[from] StreamError),

    /// The protocol failed
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Encryption was not confirmed before the deadline
    #[error("safe encrypt timed out (deadline {deadline}, now {now})")]
    SafeEncryptTimeout { deadline: u32, now: u32 },
}

/// Scratch buffers for inbound decompression.
///
/// `raw` is sized with the codec's expansion margin and holds one compressed
/// block; `plain` receives the decompressed bytes.
#[derive(Debug)]
pub struct CompressScratch {
    pub raw: Box<[u8]>,
    pub plain: Box<[u8]>,
}

impl CompressScratch {
    fn new() -> Self {
        Self {
            raw: vec![0u8; UNCOMPRESS_BUFFER_SIZE].into_boxed_slice(),
            plain: vec![0u8; COMPRESS_BUFFER_SIZE].into_boxed_slice(),
        }
    }
}

/// One managed client connection.
pub struct Connection {
    id: i16,
    manager_id: i16,
    socket: Socket,
    istream: InputStream,
    istream_compress: Option<InputStream>,
    ostream: OutputStream,
    protocol: Option<Arc<dyn Protocol>>,
    listener: Option<Weak<dyn Listener>>,

    empty: bool,
    disconnected: bool,
    ready: bool,

    compress_mode: CompressMode,
    scratch: Option<CompressScratch>,

    receive_bytes: u32,
    send_bytes: u32,

    packet_index: i8,
    execute_quota: u8,
    status: u8,
    safe_encrypt: bool,
    safe_encrypt_deadline: u32,
    param: String,

    config: ConnectionConfig,
    codec: Arc<dyn Codec>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("manager_id", &self.manager_id)
            .field("ready", &self.ready)
            .field("empty", &self.empty)
            .field("disconnected", &self.disconnected)
            .field("compress_mode", &self.compress_mode)
            .field("socket_valid", &self.socket.is_valid())
            .field("input_buffered", &self.istream.len())
            .field("output_buffered", &self.ostream.len())
            .finish()
    }
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

impl Connection {
    /// Creates an empty, not-ready connection with default settings.
    pub fn new() -> Self {
        Self::with_config(ConnectionConfig::default())
    }

    /// Creates an empty, not-ready connection.
    pub fn with_config(config: ConnectionConfig) -> Self {
        let codec: Arc<dyn Codec> = Arc::new(Deflate::default());
        Self {
            id: ID_INVALID,
            manager_id: ID_INVALID,
            socket: Socket::new(),
            istream: InputStream::with_codec(
                config.input_buffer_size,
                config.max_buffer_size,
                Arc::clone(&codec),
            ),
            istream_compress: None,
            ostream: OutputStream::with_codec(
                config.output_buffer_size,
                config.max_buffer_size,
                Arc::clone(&codec),
            ),
            protocol: None,
            listener: None,
            empty: true,
            disconnected: false,
            ready: false,
            compress_mode: CompressMode::None,
            scratch: None,
            receive_bytes: 0,
            send_bytes: 0,
            packet_index: 0,
            execute_quota: config.execute_quota,
            status: 0,
            safe_encrypt: false,
            safe_encrypt_deadline: 0,
            param: String::new(),
            config,
            codec,
            clock: Arc::new(SystemClock),
        }
    }

    /// Uses `clock` for heartbeat deadlines.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Uses `codec` for the streams built by the next `init`.
    pub fn with_codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = codec;
        self
    }

    /// Builds the socket and streams and marks the connection ready.
    ///
    /// Does nothing if already ready. Fails if no protocol is given.
    pub fn init(&mut self, protocol: Option<Arc<dyn Protocol>>) -> Result<(), ConnectionError> {
        if self.ready {
            return Ok(());
        }
        let protocol = protocol.ok_or(ConnectionError::MissingProtocol)?;

        self.socket = Socket::new();
        self.istream = InputStream::with_codec(
            self.config.input_buffer_size,
            self.config.max_buffer_size,
            Arc::clone(&self.codec),
        );
        self.istream.init();
        self.ostream = OutputStream::with_codec(
            self.config.output_buffer_size,
            self.config.max_buffer_size,
            Arc::clone(&self.codec),
        );
        self.ostream.init();
        self.istream_compress = None;
        self.protocol = Some(protocol);
        self.disconnected = false;
        self.ready = true;

        // The rebuilt streams start with compression off; re-derive their
        // flags from the mode chosen before init.
        let mode = self.compress_mode;
        self.compress_set_mode(mode);

        debug!(connection = self.id, "Connection initialized");
        Ok(())
    }

    /// Reads whatever the socket has and, with input compression on,
    /// decompresses complete blocks into the plain input stream.
    pub fn process_input(&mut self) -> Result<(), ConnectionError> {
        if self.disconnected {
            return Ok(());
        }

        let compressed = self.istream.compressor().is_enabled();
        let filled = if compressed {
            let Some(stream) = self.istream_compress.as_mut() else {
                error!(
                    connection = self.id,
                    "Input compression enabled but compressed stream is missing"
                );
                return Err(ConnectionError::MissingCompressStream);
            };
            stream.fill(&mut self.socket)
        } else {
            self.istream.fill(&mut self.socket)
        };

        let result = match filled {
            Ok(n) => {
                self.receive_bytes = self.receive_bytes.wrapping_add(n as u32);
                Ok(())
            }
            Err(e) => {
                error!(
                    connection = self.id,
                    error = %e,
                    socket_error = %self.socket.last_error_message(),
                    "Input stream fill failed"
                );
                Err(ConnectionError::Stream(e))
            }
        };

        if compressed && self.istream_compress.is_some() {
            let decompressed = self.process_input_compress();
            if result.is_ok() {
                decompressed?;
            }
        }
        result
    }

    fn process_input_compress(&mut self) -> Result<(), ConnectionError> {
        let protocol = self
            .protocol
            .clone()
            .ok_or(ConnectionError::MissingProtocol)?;
        let Some(mut scratch) = self.scratch.take() else {
            error!(connection = self.id, "Compression scratch buffers are missing");
            return Err(ConnectionError::MissingCompressStream);
        };

        let result = protocol.compress(self, &mut scratch.raw, &mut scratch.plain);
        self.scratch = Some(scratch);

        result.map_err(|e| {
            error!(connection = self.id, error = %e, "Input decompression failed");
            ConnectionError::Protocol(e)
        })
    }

    /// Writes queued output to the socket.
    pub fn process_output(&mut self) -> Result<(), ConnectionError> {
        if self.disconnected {
            return Ok(());
        }

        match self.ostream.flush(&mut self.socket) {
            Ok(n) => {
                self.send_bytes = self.send_bytes.wrapping_add(n as u32);
                Ok(())
            }
            Err(e) => {
                error!(
                    connection = self.id,
                    error = %e,
                    socket_error = %self.socket.last_error_message(),
                    "Output stream flush failed"
                );
                Err(ConnectionError::Stream(e))
            }
        }
    }

    /// Hands at most `execute_quota` packets to the protocol.
    pub fn process_command(&mut self) -> Result<(), ConnectionError> {
        if self.disconnected {
            return Ok(());
        }
        let protocol = self
            .protocol
            .clone()
            .ok_or(ConnectionError::MissingProtocol)?;
        protocol.command(self, self.execute_quota)?;
        Ok(())
    }

    /// Serializes `packet` into the output stream through the protocol.
    pub fn send(&mut self, packet: &dyn Packet) -> Result<(), ConnectionError> {
        if self.disconnected {
            return Ok(());
        }
        let protocol = self
            .protocol
            .clone()
            .ok_or(ConnectionError::MissingProtocol)?;
        protocol.send(self, packet)?;
        Ok(())
    }

    /// Checks the safe-encrypt deadline.
    ///
    /// `time` is the current time in seconds; `0` asks the clock. `flag` is
    /// reserved.
    pub fn heartbeat(&mut self, time: u32, _flag: u32) -> Result<(), ConnectionError> {
        if self.disconnected {
            return Ok(());
        }
        let now = if time == 0 { self.clock.now_secs() } else { time };
        if self.is_safe_encrypt_timeout(now) {
            warn!(
                connection = self.id,
                deadline = self.safe_encrypt_deadline,
                now,
                "Connection with safe encrypt timeout"
            );
            return Err(ConnectionError::SafeEncryptTimeout {
                deadline: self.safe_encrypt_deadline,
                now,
            });
        }
        Ok(())
    }

    /// Whether the safe-encrypt deadline has passed at `now`.
    pub fn is_safe_encrypt_timeout(&self, now: u32) -> bool {
        self.safe_encrypt_deadline != 0 && !self.safe_encrypt && now > self.safe_encrypt_deadline
    }

    /// Notifies the listener (once per ready period) and clears the
    /// connection.
    pub fn disconnect(&mut self) {
        if self.ready {
            if let Some(listener) = self.listener() {
                listener.on_disconnect(self.id);
            }
            debug!(connection = self.id, "Connection disconnected");
        }
        self.clear();
    }

    /// Closes the socket and resets every piece of per-client state,
    /// including the protocol, listener and stream keys; only identity and
    /// the scratch buffers survive. Idempotent; the connection can be
    /// `init`ed again afterwards.
    pub fn clear(&mut self) {
        self.socket.close();
        self.istream.clear();
        self.ostream.clear();
        self.encrypt_enable(false);
        self.encrypt_set_key(&[]);
        self.compress_set_mode(CompressMode::None);
        self.istream_compress = None;
        self.protocol = None;
        self.listener = None;
        self.manager_id = ID_INVALID;
        self.packet_index = 0;
        self.status = 0;
        self.execute_quota = self.config.execute_quota;
        self.receive_bytes = 0;
        self.send_bytes = 0;
        self.disconnected = true;
        self.empty = true;
        self.ready = false;
        self.safe_encrypt = false;
        self.safe_encrypt_deadline = 0;
        self.param.clear();
    }

    /// Switches which directions are compressed.
    ///
    /// The first time input compression is enabled the scratch buffers and
    /// the compressed input stream are allocated; they are kept afterwards.
    pub fn compress_set_mode(&mut self, mode: CompressMode) {
        self.compress_mode = mode;

        self.istream.compressor_mut().enable(mode.input_enabled());
        if mode.input_enabled() {
            if self.scratch.is_none() {
                self.scratch = Some(CompressScratch::new());
            }
            if self.istream_compress.is_none() {
                let mut stream = InputStream::with_codec(
                    self.config.input_buffer_size,
                    self.config.max_buffer_size,
                    Arc::clone(&self.codec),
                );
                stream.init();
                self.istream_compress = Some(stream);
            }
        }

        self.ostream.compressor_mut().enable(mode.output_enabled());
    }

    pub fn compress_mode(&self) -> CompressMode {
        self.compress_mode
    }

    /// Whether the scratch buffers have been allocated.
    pub fn has_compress_scratch(&self) -> bool {
        self.scratch.is_some()
    }

    pub fn encrypt_enable(&mut self, enable: bool) {
        self.istream.encrypt_enable(enable);
        self.ostream.encrypt_enable(enable);
    }

    pub fn encrypt_set_key(&mut self, key: &[u8]) {
        self.istream.encrypt_set_key(key);
        self.ostream.encrypt_set_key(key);
    }

    /// Wire bytes received since the last call. Resets the counter.
    pub fn get_receive_bytes(&mut self) -> u32 {
        std::mem::take(&mut self.receive_bytes)
    }

    /// Wire bytes sent since the last call. Resets the counter.
    pub fn get_send_bytes(&mut self) -> u32 {
        std::mem::take(&mut self.send_bytes)
    }

    /// Returns the current packet index and advances it, wrapping from
    /// `i8::MAX` to `i8::MIN`.
    pub fn packet_index(&mut self) -> i8 {
        let index = self.packet_index;
        self.packet_index = self.packet_index.wrapping_add(1);
        index
    }

    /// Whether a transport is attached.
    pub fn is_valid(&self) -> bool {
        self.socket.is_valid()
    }

    pub fn id(&self) -> i16 {
        self.id
    }

    pub fn set_id(&mut self, id: i16) {
        self.id = id;
    }

    pub fn manager_id(&self) -> i16 {
        self.manager_id
    }

    pub fn set_manager_id(&mut self, manager_id: i16) {
        self.manager_id = manager_id;
    }

    pub fn socket(&self) -> &Socket {
        &self.socket
    }

    pub fn socket_mut(&mut self) -> &mut Socket {
        &mut self.socket
    }

    pub fn is_empty(&self) -> bool {
        self.empty
    }

    pub fn set_empty(&mut self, empty: bool) {
        self.empty = empty;
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected
    }

    pub fn set_disconnected(&mut self, disconnected: bool) {
        self.disconnected = disconnected;
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn execute_quota(&self) -> u8 {
        self.execute_quota
    }

    pub fn set_execute_quota(&mut self, quota: u8) {
        self.execute_quota = quota;
    }

    pub fn status(&self) -> u8 {
        self.status
    }

    pub fn set_status(&mut self, status: u8) {
        self.status = status;
    }

    pub fn is_safe_encrypt(&self) -> bool {
        self.safe_encrypt
    }

    pub fn set_safe_encrypt(&mut self, safe: bool) {
        self.safe_encrypt = safe;
    }

    /// Encryption is confirmed or no deadline is armed.
    pub fn check_safe_encrypt(&self) -> bool {
        self.safe_encrypt || self.safe_encrypt_deadline == 0
    }

    pub fn safe_encrypt_deadline(&self) -> u32 {
        self.safe_encrypt_deadline
    }

    /// Sets the absolute deadline in seconds; `0` disarms it.
    pub fn set_safe_encrypt_deadline(&mut self, deadline: u32) {
        self.safe_encrypt_deadline = deadline;
    }

    /// Arms the deadline `safe_encrypt_timeout` after `now`.
    pub fn arm_safe_encrypt(&mut self, now: u32) {
        let deadline = now.saturating_add(self.config.safe_encrypt_timeout_secs());
        self.safe_encrypt_deadline = deadline.max(1);
    }

    pub fn param(&self) -> &str {
        &self.param
    }

    pub fn set_param(&mut self, param: impl Into<String>) {
        self.param = param.into();
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn istream(&self) -> &InputStream {
        &self.istream
    }

    pub fn istream_mut(&mut self) -> &mut InputStream {
        &mut self.istream
    }

    pub fn ostream(&self) -> &OutputStream {
        &self.ostream
    }

    pub fn ostream_mut(&mut self) -> &mut OutputStream {
        &mut self.ostream
    }

    pub fn istream_compress(&self) -> Option<&InputStream> {
        self.istream_compress.as_ref()
    }

    /// The compressed and plain input streams, borrowed together.
    pub fn compress_streams(&mut self) -> Option<(&mut InputStream, &mut InputStream)> {
        let compressed = self.istream_compress.as_mut()?;
        Some((compressed, &mut self.istream))
    }

    pub fn protocol(&self) -> Option<&Arc<dyn Protocol>> {
        self.protocol.as_ref()
    }

    pub fn set_protocol(&mut self, protocol: Arc<dyn Protocol>) {
        self.protocol = Some(protocol);
    }

    /// Registers the lifecycle sink. Only a weak reference is kept.
    pub fn set_listener(&mut self, listener: &Arc<dyn Listener>) {
        self.listener = Some(Arc::downgrade(listener));
    }

    /// The listener, if it is still alive.
    pub fn listener(&self) -> Option<Arc<dyn Listener>> {
        self.listener.as_ref().and_then(Weak::upgrade)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::WorkspaceManager;
    use crate::config::COMPRESSOR_HEADER_SIZE;
    use crate::connection::ConnectionStats;
    use crate::packet::RawPacket;
    use crate::protocol::{EchoHandler, FramedProtocol};
    use crate::socket::{MemoryTransport, Transport};
    use crate::time::ManualClock;
    use bytes::Bytes;
    use std::io::Write;

    fn protocol() -> Arc<dyn Protocol> {
        let workspace = Arc::new(WorkspaceManager::new(Arc::new(Deflate::default())));
        Arc::new(FramedProtocol::new(Arc::new(EchoHandler), workspace))
    }

    fn connected() -> (Connection, MemoryTransport) {
        let (local, remote) = MemoryTransport::pair();
        let mut connection = Connection::new();
        connection.set_id(3);
        connection.init(Some(protocol())).unwrap();
        connection.socket_mut().attach(local);
        connection.set_empty(false);
        (connection, remote)
    }

    fn frame(id: u16, body: &[u8]) -> Vec<u8> {
        FramedProtocol::encode_frame(&RawPacket::new(id, Bytes::copy_from_slice(body)))
            .unwrap()
            .to_vec()
    }

    fn compressed_block(plain: &[u8]) -> Vec<u8> {
        let codec = Deflate::default();
        let workspace = WorkspaceManager::new(Arc::new(codec));
        let work = workspace.local().unwrap();
        let mut out = vec![0u8; codec.max_compressed_len(plain.len())];
        let n = workspace.compress(plain, &mut out, &work).unwrap();
        let mut block = (n as u32).to_be_bytes().to_vec();
        block.extend_from_slice(&out[..n]);
        block
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    #[test]
    fn test_init_requires_protocol() {
        let mut connection = Connection::new();
        assert!(matches!(
            connection.init(None),
            Err(ConnectionError::MissingProtocol)
        ));
        assert!(!connection.is_ready());
    }

    #[test]
    fn test_init_is_idempotent() {
        let mut connection = Connection::new();
        connection.init(Some(protocol())).unwrap();
        connection.istream_mut().push(b"kept").unwrap();

        connection.init(Some(protocol())).unwrap();
        connection.init(None).unwrap();
        assert!(connection.is_ready());
        assert_eq!(connection.istream().as_slice(), b"kept");
    }

    #[test]
    fn test_clear_is_idempotent_and_resets_state() {
        let (mut connection, _remote) = connected();
        connection.set_manager_id(4);
        connection.set_status(2);
        connection.set_execute_quota(1);
        connection.set_param("guild=7");
        connection.set_safe_encrypt(true);
        connection.set_safe_encrypt_deadline(99);
        connection.compress_set_mode(CompressMode::All);
        connection.encrypt_enable(true);
        connection.encrypt_set_key(b"session");
        let listener: Arc<dyn Listener> = Arc::new(ConnectionStats::new());
        connection.set_listener(&listener);
        connection.packet_index();

        connection.clear();
        connection.clear();

        let fresh = Connection::new();
        assert_eq!(connection.manager_id(), fresh.manager_id());
        assert_eq!(connection.status(), fresh.status());
        assert_eq!(connection.execute_quota(), fresh.execute_quota());
        assert_eq!(connection.param(), fresh.param());
        assert_eq!(connection.is_safe_encrypt(), fresh.is_safe_encrypt());
        assert_eq!(connection.safe_encrypt_deadline(), 0);
        assert_eq!(connection.compress_mode(), CompressMode::None);
        assert!(connection.istream_compress().is_none());
        assert!(!connection.istream().encryptor().is_enabled());
        assert!(!connection.istream().encryptor().is_keyed());
        assert!(!connection.ostream().encryptor().is_keyed());
        assert_eq!(connection.protocol().is_some(), fresh.protocol().is_some());
        assert_eq!(connection.listener().is_some(), fresh.listener().is_some());
        assert!(!connection.is_valid());
        assert!(connection.is_empty());
        assert!(!connection.is_ready());
        assert!(connection.is_disconnected());
        assert_eq!(connection.packet_index(), 0);
        assert_eq!(connection.get_receive_bytes(), 0);
        assert_eq!(connection.get_send_bytes(), 0);

        // Scratch buffers live as long as the connection.
        assert!(connection.has_compress_scratch());
    }

    #[test]
    fn test_mode_set_before_init_survives_init() {
        let mut connection = Connection::new();
        connection.compress_set_mode(CompressMode::All);
        connection.init(Some(protocol())).unwrap();

        let mode = connection.compress_mode();
        assert_eq!(mode, CompressMode::All);
        assert_eq!(mode.input_enabled(), connection.istream().compressor().is_enabled());
        assert_eq!(mode.output_enabled(), connection.ostream().compressor().is_enabled());
        assert!(connection.istream_compress().is_some());
        assert!(connection.has_compress_scratch());
    }

    #[test]
    fn test_mode_before_init_decompresses_input() {
        let (local, mut remote) = MemoryTransport::pair();
        let mut connection = Connection::new();
        connection.compress_set_mode(CompressMode::Input);
        connection.init(Some(protocol())).unwrap();
        connection.socket_mut().attach(local);

        let plain = frame(3, b"early mode");
        remote.write_all(&compressed_block(&plain)).unwrap();
        connection.process_input().unwrap();
        assert_eq!(connection.istream().as_slice(), &plain[..]);
    }

    #[test]
    fn test_reinit_after_clear() {
        let (mut connection, _remote) = connected();
        connection.disconnect();
        assert!(connection.is_disconnected());

        connection.init(Some(protocol())).unwrap();
        assert!(connection.is_ready());
        assert!(!connection.is_disconnected());
        assert!(!connection.is_valid());

        let (local, mut remote) = MemoryTransport::pair();
        connection.socket_mut().attach(local);
        remote.write_all(b"abc").unwrap();
        connection.process_input().unwrap();
        assert_eq!(connection.istream().as_slice(), b"abc");
    }

    #[test]
    fn test_disconnected_steps_are_noops() {
        let (mut connection, _remote) = connected();
        connection.disconnect();

        assert!(connection.process_input().is_ok());
        assert!(connection.process_output().is_ok());
        assert!(connection.process_command().is_ok());
        assert!(connection.send(&RawPacket::new(1, Bytes::new())).is_ok());
        assert!(connection.heartbeat(0, 0).is_ok());
    }

    #[test]
    fn test_disconnect_notifies_listener_once() {
        let stats = Arc::new(ConnectionStats::new());
        stats.connection_opened();
        let listener: Arc<dyn Listener> = stats.clone();

        let (mut connection, _remote) = connected();
        connection.set_listener(&listener);
        connection.disconnect();
        connection.disconnect();

        assert_eq!(stats.snapshot().disconnects, 1);
        assert_eq!(stats.snapshot().active_connections, 0);
    }

    #[test]
    fn test_listener_is_weak() {
        let mut connection = Connection::new();
        {
            let listener: Arc<dyn Listener> = Arc::new(ConnectionStats::new());
            connection.set_listener(&listener);
            assert!(connection.listener().is_some());
        }
        assert!(connection.listener().is_none());
    }

    // ========================================================================
    // Input / Output
    // ========================================================================

    #[test]
    fn test_process_input_counts_bytes() {
        let (mut connection, mut remote) = connected();
        remote.write_all(&[0u8; 300]).unwrap();

        connection.process_input().unwrap();
        assert_eq!(connection.istream().len(), 300);
        assert_eq!(connection.get_receive_bytes(), 300);
        assert_eq!(connection.get_receive_bytes(), 0);
    }

    #[test]
    fn test_process_input_peer_closed() {
        let (mut connection, mut remote) = connected();
        remote.shutdown().unwrap();
        assert!(matches!(
            connection.process_input(),
            Err(ConnectionError::Stream(_))
        ));
        assert_eq!(connection.get_receive_bytes(), 0);
    }

    #[test]
    fn test_process_input_missing_compress_stream() {
        let (mut connection, _remote) = connected();
        connection.istream_mut().compressor_mut().enable(true);
        assert!(matches!(
            connection.process_input(),
            Err(ConnectionError::MissingCompressStream)
        ));
    }

    #[test]
    fn test_process_output_counts_bytes() {
        let (mut connection, remote) = connected();
        connection.send(&RawPacket::new(2, Bytes::from_static(b"pong"))).unwrap();
        connection.process_output().unwrap();

        assert_eq!(remote.take_all(), frame(2, b"pong"));
        assert_eq!(connection.get_send_bytes(), 10);
        assert_eq!(connection.get_send_bytes(), 0);
    }

    #[test]
    fn test_process_output_closed_peer() {
        let (mut connection, mut remote) = connected();
        remote.shutdown().unwrap();
        connection.ostream_mut().write(b"late").unwrap();
        assert!(connection.process_output().is_err());
    }

    #[test]
    fn test_echo_round_trip() {
        let (mut connection, mut remote) = connected();
        remote.write_all(&frame(7, b"hello")).unwrap();

        connection.process_input().unwrap();
        connection.process_command().unwrap();
        connection.process_output().unwrap();

        assert_eq!(remote.take_all(), frame(7, b"hello"));
    }

    #[test]
    fn test_execute_quota_bounds_command() {
        let (mut connection, mut remote) = connected();
        connection.set_execute_quota(2);
        for i in 0..5 {
            remote.write_all(&frame(i, b"x")).unwrap();
        }

        connection.process_input().unwrap();
        connection.process_command().unwrap();
        connection.process_output().unwrap();
        assert_eq!(remote.take_all().len(), 2 * 7);

        connection.process_command().unwrap();
        connection.process_command().unwrap();
        connection.process_output().unwrap();
        assert_eq!(remote.take_all().len(), 3 * 7);
    }

    #[test]
    fn test_encrypted_round_trip() {
        let (mut connection, mut remote) = connected();
        connection.encrypt_enable(true);
        connection.encrypt_set_key(b"shared-key");

        let mut wire = crate::stream::Encryptor::new();
        wire.enable(true);
        wire.set_key(b"shared-key");
        let mut request = frame(1, b"secret");
        wire.apply(&mut request);
        remote.write_all(&request).unwrap();

        connection.process_input().unwrap();
        connection.process_command().unwrap();
        connection.process_output().unwrap();

        let mut reply = remote.take_all();
        assert_ne!(reply, frame(1, b"secret"));
        let mut peer = crate::stream::Encryptor::new();
        peer.enable(true);
        peer.set_key(b"shared-key");
        peer.apply(&mut reply);
        assert_eq!(reply, frame(1, b"secret"));
    }

    // ========================================================================
    // Compression
    // ========================================================================

    #[test]
    fn test_compress_set_mode_allocates_lazily() {
        let (mut connection, _remote) = connected();
        assert!(!connection.has_compress_scratch());
        assert!(connection.istream_compress().is_none());

        connection.compress_set_mode(CompressMode::Output);
        assert!(!connection.has_compress_scratch());
        assert!(connection.ostream().compressor().is_enabled());
        assert!(!connection.istream().compressor().is_enabled());

        connection.compress_set_mode(CompressMode::Input);
        assert!(connection.has_compress_scratch());
        assert!(connection.istream_compress().is_some());
        assert!(connection.istream().compressor().is_enabled());
        assert!(!connection.ostream().compressor().is_enabled());

        connection.compress_set_mode(CompressMode::None);
        assert!(!connection.istream().compressor().is_enabled());
        assert!(connection.has_compress_scratch());
    }

    #[test]
    fn test_scratch_sizes() {
        let scratch = CompressScratch::new();
        assert_eq!(scratch.raw.len(), UNCOMPRESS_BUFFER_SIZE);
        assert_eq!(scratch.plain.len(), COMPRESS_BUFFER_SIZE);
        assert!(scratch.raw.len() > scratch.plain.len());
    }

    #[test]
    fn test_receive_bytes_count_wire_not_plain() {
        let (mut connection, mut remote) = connected();
        connection.compress_set_mode(CompressMode::All);

        // One frame of exactly 5000 plain bytes.
        let body: Vec<u8> = (0..5000 - 6).map(|i| (i % 7) as u8).collect();
        let plain = frame(11, &body);
        assert_eq!(plain.len(), 5000);

        // Pad the wire to exactly 2000 bytes with the start of a second block.
        let mut wire = compressed_block(&plain);
        assert!(wire.len() + COMPRESSOR_HEADER_SIZE < 2000);
        wire.extend_from_slice(&3000u32.to_be_bytes());
        wire.resize(2000, 0xaa);
        remote.write_all(&wire).unwrap();

        connection.process_input().unwrap();

        assert_eq!(connection.get_receive_bytes(), 2000);
        assert_eq!(connection.istream().len(), 5000);
        assert_eq!(connection.istream().as_slice(), &plain[..]);
    }

    #[test]
    fn test_compressed_echo_round_trip() {
        let (mut connection, mut remote) = connected();
        connection.compress_set_mode(CompressMode::All);

        let body = b"compressed hello ".repeat(64);
        remote.write_all(&compressed_block(&frame(5, &body))).unwrap();

        connection.process_input().unwrap();
        connection.process_command().unwrap();
        connection.process_output().unwrap();

        let reply = remote.take_all();
        let mut header = [0u8; 4];
        header.copy_from_slice(&reply[..4]);
        let n = u32::from_be_bytes(header) as usize;
        assert_eq!(reply.len(), 4 + n);

        let mut plain = vec![0u8; COMPRESS_BUFFER_SIZE];
        let m = Deflate::default().decompress(&reply[4..], &mut plain).unwrap();
        assert_eq!(&plain[..m], &frame(5, &body)[..]);
    }

    #[test]
    fn test_corrupt_block_fails_input() {
        let (mut connection, mut remote) = connected();
        connection.compress_set_mode(CompressMode::Input);

        let mut wire = 8u32.to_be_bytes().to_vec();
        wire.extend_from_slice(b"garbage!");
        remote.write_all(&wire).unwrap();

        assert!(matches!(
            connection.process_input(),
            Err(ConnectionError::Protocol(_))
        ));
        assert!(connection.has_compress_scratch());
    }

    // ========================================================================
    // Heartbeat / counters / misc
    // ========================================================================

    #[test]
    fn test_heartbeat_deadline() {
        let (mut connection, _remote) = connected();
        connection.set_safe_encrypt_deadline(1000);

        assert!(connection.heartbeat(999, 0).is_ok());
        assert!(connection.heartbeat(1000, 0).is_ok());
        assert!(matches!(
            connection.heartbeat(1001, 0),
            Err(ConnectionError::SafeEncryptTimeout {
                deadline: 1000,
                now: 1001
            })
        ));

        connection.set_safe_encrypt(true);
        assert!(connection.heartbeat(u32::MAX, 0).is_ok());
    }

    #[test]
    fn test_heartbeat_unarmed_never_fails() {
        let (mut connection, _remote) = connected();
        assert!(connection.check_safe_encrypt());
        assert!(connection.heartbeat(u32::MAX, 0).is_ok());
    }

    #[test]
    fn test_heartbeat_uses_clock() {
        let clock = Arc::new(ManualClock::new(500));
        let mut connection = Connection::new().with_clock(clock.clone());
        connection.init(Some(protocol())).unwrap();

        connection.arm_safe_encrypt(500);
        assert_eq!(connection.safe_encrypt_deadline(), 530);
        assert!(!connection.check_safe_encrypt());

        clock.set(530);
        assert!(connection.heartbeat(0, 0).is_ok());
        clock.set(531);
        assert!(connection.heartbeat(0, 0).is_err());
    }

    #[test]
    fn test_packet_index_wraps() {
        let mut connection = Connection::new();
        for expected in 0..=127i8 {
            assert_eq!(connection.packet_index(), expected);
        }
        assert_eq!(connection.packet_index(), -128);
        assert_eq!(connection.packet_index(), -127);
    }

    #[test]
    fn test_send_without_protocol() {
        let mut connection = Connection::new();
        assert!(matches!(
            connection.send(&RawPacket::new(1, Bytes::new())),
            Err(ConnectionError::MissingProtocol)
        ));
        assert!(matches!(
            connection.process_command(),
            Err(ConnectionError::MissingProtocol)
        ));
    }
}
