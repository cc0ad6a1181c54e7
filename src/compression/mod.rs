//! Compression Pipeline
//!
//! Compression in the connection core is split across three pieces:
//!
//! ```text
//! ┌──────────────────┐      ┌──────────────────┐      ┌──────────────────────┐
//! │    Assistant     │─────>│      Codec       │<─────│   WorkspaceManager   │
//! │ (per stream,     │      │ (block transform │      │ (shared, per-thread  │
//! │  on/off toggle)  │      │  into caller     │      │  work memory, byte   │
//! │                  │      │  buffers)        │      │  counters)           │
//! └──────────────────┘      └──────────────────┘      └──────────────────────┘
//! ```
//!
//! - [`Assistant`]: bound one-per-stream. The stream consults its flag but
//!   never runs the transform itself.
//! - [`Codec`]: block compressor writing into caller-supplied buffers with a
//!   known worst-case expansion. [`Deflate`] is the shipped implementation.
//! - [`WorkspaceManager`]: the one genuinely shared resource. Hands out one
//!   [`WorkMemory`] slot per thread, up to a hard maximum.
//!
//! [`CompressMode`] is the per-connection switch that decides which stream
//! assistants are enabled.

pub mod assistant;
pub mod codec;
pub mod workspace;

pub use assistant::Assistant;
pub use codec::{Codec, Deflate};
pub use workspace::{current_thread_key, WorkMemory, WorkspaceManager};

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors raised by codecs and the workspace manager.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CompressError {
    /// The output buffer cannot hold the result
    #[error("output buffer too small ({available} bytes)")]
    OutputTooSmall { available: usize },

    /// The compressed input is malformed or truncated
    #[error("corrupt compressed data: {0}")]
    Corrupt(String),

    /// The codec failed for another reason
    #[error("codec failure: {0}")]
    Codec(String),

    /// Work memory belongs to a different codec
    #[error("work memory was not created by this codec")]
    ForeignWorkMemory,

    /// Every work memory slot is taken
    #[error("compression workspace exhausted ({max} threads)")]
    WorkspaceExhausted { max: usize },
}

/// Which directions of a connection are compressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum CompressMode {
    #[default]
    None = 0,
    Input,
    Output,
    All,
}

impl CompressMode {
    /// Every mode, in discriminant order.
    pub const ALL_MODES: [CompressMode; 4] = [
        CompressMode::None,
        CompressMode::Input,
        CompressMode::Output,
        CompressMode::All,
    ];

    /// Whether inbound bytes arrive compressed.
    pub fn input_enabled(self) -> bool {
        matches!(self, CompressMode::Input | CompressMode::All)
    }

    /// Whether outbound bytes leave compressed.
    pub fn output_enabled(self) -> bool {
        matches!(self, CompressMode::Output | CompressMode::All)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CompressMode::None => "none",
            CompressMode::Input => "input",
            CompressMode::Output => "output",
            CompressMode::All => "all",
        }
    }
}

impl TryFrom<u8> for CompressMode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::ALL_MODES.get(value as usize).copied().ok_or(value)
    }
}

impl FromStr for CompressMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(CompressMode::None),
            "input" => Ok(CompressMode::Input),
            "output" => Ok(CompressMode::Output),
            "all" => Ok(CompressMode::All),
            other => Err(format!("unknown compress mode: {}", other)),
        }
    }
}

impl fmt::Display for CompressMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
