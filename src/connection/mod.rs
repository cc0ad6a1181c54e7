//! Connection Module
//!
//! One [`Connection`] per client, owning its socket and stream stack, and a
//! [`ConnectionPool`] that drives many of them from a single tick loop.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     TCP Listener                            │
//! │                    (main.rs)                                │
//! └──────────────────────┬──────────────────────────────────────┘
//!                        │ accept() ─> add_tcp()
//!                        ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 ConnectionPool::tick                        │
//! │                                                             │
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐        │
//! │  │ Input fill  │──>│  Protocol   │──>│Output flush │        │
//! │  │ + decompress│   │  command    │   │             │        │
//! │  └─────────────┘   └─────────────┘   └─────────────┘        │
//! │                                             │               │
//! │                                             ▼               │
//! │                                      ┌─────────────┐        │
//! │                                      │  Heartbeat  │        │
//! │                                      └─────────────┘        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use connkit::connection::ConnectionPool;
//! use connkit::protocol::{EchoHandler, FramedProtocol};
//!
//! let protocol = Arc::new(FramedProtocol::new(Arc::new(EchoHandler), workspace));
//! let mut pool = ConnectionPool::new(1024, protocol, ConnectionConfig::default());
//!
//! let (stream, _) = listener.accept().await?;
//! pool.add_tcp(stream.into_std()?)?;
//! pool.tick();
//! ```

pub mod conn;
pub mod listener;
pub mod pool;

pub use conn::{CompressScratch, Connection, ConnectionError};
pub use listener::{ConnectionStats, Listener, StatsSnapshot};
pub use pool::{ConnectionPool, PoolError};
