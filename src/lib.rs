//! # connkit - Tick-Driven Connection Core
//!
//! connkit is the per-client connection layer of a packet server: a socket,
//! buffered input and output streams with optional block compression and a
//! keyed stream transform, a pluggable packet protocol, and a shared
//! per-thread compression workspace.
//!
//! ## Features
//!
//! - **Non-blocking ticks**: every connection is advanced by synchronous
//!   `process_input / process_command / process_output / heartbeat` calls
//! - **Block compression**: independently switchable per direction, with
//!   length-prefixed blocks decompressed through fixed scratch buffers
//! - **Stream encryption**: a keyed symmetric transform applied as bytes
//!   enter and leave the streams
//! - **Bounded resources**: buffer ceilings, a per-tick packet quota and a
//!   hard cap on compression work memory
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              connkit                                    │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │ TCP Server  │───>│ Connection  │───>│  Protocol   │                  │
//! │  │ (main.rs)   │    │    Pool     │    │  + Handler  │                  │
//! │  └─────────────┘    └──────┬──────┘    └──────┬──────┘                  │
//! │                            │                  │                         │
//! │                            ▼                  ▼                         │
//! │  ┌──────────────────────────────────┐  ┌──────────────────────────┐    │
//! │  │           Connection             │  │    WorkspaceManager      │    │
//! │  │  Socket ─ InputStream(s)         │  │  per-thread work memory  │    │
//! │  │         ─ OutputStream           │  │  byte counters           │    │
//! │  │  Assistant / Encryptor per stream│  └──────────────────────────┘    │
//! │  └──────────────────────────────────┘                                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use connkit::compression::{Deflate, WorkspaceManager};
//! use connkit::config::ConnectionConfig;
//! use connkit::connection::ConnectionPool;
//! use connkit::protocol::{EchoHandler, FramedProtocol};
//! use std::sync::Arc;
//!
//! let workspace = Arc::new(WorkspaceManager::new(Arc::new(Deflate::default())));
//! workspace.init();
//! let protocol = Arc::new(FramedProtocol::new(Arc::new(EchoHandler), workspace));
//! let mut pool = ConnectionPool::new(1024, protocol, ConnectionConfig::default());
//!
//! // For each accepted connection...
//! pool.add_tcp(stream)?;
//!
//! // Every tick...
//! pool.tick();
//! ```
//!
//! ## Module Overview
//!
//! - [`connection`]: `Connection`, the tick-loop `ConnectionPool` and the
//!   `Listener` contract
//! - [`stream`]: buffered input/output streams and the stream transform
//! - [`compression`]: codec, per-stream assistant and the shared workspace
//! - [`protocol`]: the `Protocol` contract and the framed reference protocol
//! - [`packet`]: the `Packet` contract and deferred `PacketAsync` delivery
//! - [`socket`]: non-blocking transport wrapper and an in-memory transport
//! - [`config`]: sizing constants and `ConnectionConfig`
//! - [`time`]: wall clock and a settable clock for tests

pub mod compression;
pub mod config;
pub mod connection;
pub mod packet;
pub mod protocol;
pub mod socket;
pub mod stream;
pub mod time;

// Re-export commonly used types for convenience
pub use compression::{CompressMode, WorkspaceManager};
pub use config::ConnectionConfig;
pub use connection::{Connection, ConnectionError, ConnectionPool, ConnectionStats, Listener};
pub use packet::{Packet, PacketAsync, PacketFlag, RawPacket};
pub use protocol::{FramedProtocol, Protocol, ProtocolError};

/// The default port the connkit server listens on
pub const DEFAULT_PORT: u16 = 7400;

/// The default host the connkit server binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of connkit
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
