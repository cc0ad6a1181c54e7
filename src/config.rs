//! Sizing Constants and Connection Configuration
//!
//! Every buffer in the connection core is sized from the constants in this
//! module. The compression scratch sizes must stay exactly as they are: peers
//! size their compressed blocks against them.
//!
//! ## Scratch Buffer Naming
//!
//! The two compression scratch sizes carry historic names that are swapped
//! relative to what the buffers hold:
//!
//! ```text
//! UNCOMPRESS_BUFFER_SIZE (larger)  ->  holds a compressed block read off the wire
//! COMPRESS_BUFFER_SIZE   (1 MiB)   ->  receives the decompressed plain bytes
//! ```
//!
//! The larger buffer carries the worst-case expansion margin of the codec,
//! so any block produced from at most `COMPRESS_BUFFER_SIZE` plain bytes fits.

use std::time::Duration;

/// Plain bytes a single compressed block may expand to (1 MiB).
pub const COMPRESS_BUFFER_SIZE: usize = 1024 * 1024;

/// Size of the length header in front of every compressed block.
pub const COMPRESSOR_HEADER_SIZE: usize = 4;

/// Worst-case size of one compressed block including its header.
///
/// `C + C/16 + 64 + 3 + header`, the classic bound on how far a block codec
/// may expand incompressible input.
pub const UNCOMPRESS_BUFFER_SIZE: usize =
    COMPRESS_BUFFER_SIZE + COMPRESS_BUFFER_SIZE / 16 + 64 + 3 + COMPRESSOR_HEADER_SIZE;

/// Hard ceiling for any stream buffer (64 MiB)
pub const MAX_BUFFER_SIZE: usize = 64 * 1024 * 1024;

/// Default floor for input stream buffers (64 KB)
pub const INPUT_BUFFER_SIZE_DEFAULT: usize = 64 * 1024;

/// Default floor for output stream buffers (8 KB)
pub const OUTPUT_BUFFER_SIZE_DEFAULT: usize = 8 * 1024;

/// Packets drained from one connection per tick
pub const EXECUTE_COUNT_PER_TICK_DEFAULT: u8 = 12;

/// Seconds a connection may spend negotiating encryption
pub const SAFE_ENCRYPT_TIMEOUT_DEFAULT: u32 = 30;

/// Maximum number of threads holding compression work memory at once
pub const WORKSPACE_THREAD_MAX: usize = 1024;

/// Marker for "no id assigned"
pub const ID_INVALID: i16 = -1;

/// Per-connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Initial capacity of input streams
    pub input_buffer_size: usize,

    /// Initial capacity of the output stream
    pub output_buffer_size: usize,

    /// Ceiling no stream buffer may grow past
    pub max_buffer_size: usize,

    /// Packets handed to the protocol per `process_command` call
    pub execute_quota: u8,

    /// Window granted by `arm_safe_encrypt`
    pub safe_encrypt_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            input_buffer_size: INPUT_BUFFER_SIZE_DEFAULT,
            output_buffer_size: OUTPUT_BUFFER_SIZE_DEFAULT,
            max_buffer_size: MAX_BUFFER_SIZE,
            execute_quota: EXECUTE_COUNT_PER_TICK_DEFAULT,
            safe_encrypt_timeout: Duration::from_secs(SAFE_ENCRYPT_TIMEOUT_DEFAULT as u64),
        }
    }
}

impl ConnectionConfig {
    /// The safe-encrypt window in whole seconds, saturating at `u32::MAX`.
    pub fn safe_encrypt_timeout_secs(&self) -> u32 {
        u32::try_from(self.safe_encrypt_timeout.as_secs()).unwrap_or(u32::MAX)
    }
}
