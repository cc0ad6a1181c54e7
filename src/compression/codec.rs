//! Block Codecs
//!
//! A [`Codec`] compresses one block at a time into a caller-supplied output
//! slice. Nothing is allocated on the hot path: compression reuses the
//! per-thread state kept in a [`WorkMemory`], and decompression needs no
//! state at all.
//!
//! Every codec publishes its worst-case expansion through
//! [`Codec::max_compressed_len`]. Scratch buffers on the receiving side are
//! sized from that contract, so a codec must never write more than it
//! promises.

use crate::compression::{CompressError, WorkMemory};
use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};
use std::any::Any;
use std::fmt;

/// A block compressor with a fixed worst-case expansion.
pub trait Codec: Send + Sync + fmt::Debug {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Approximate bytes of working state one thread needs.
    fn work_memory_size(&self) -> usize;

    /// Creates the per-thread state stored in a [`WorkMemory`] slot.
    fn new_work_state(&self) -> Box<dyn Any + Send>;

    /// Largest block `compress` can produce from `input_len` bytes.
    fn max_compressed_len(&self, input_len: usize) -> usize;

    /// Compresses `input` into `output`, returning the bytes written.
    fn compress(
        &self,
        input: &[u8],
        output: &mut [u8],
        work: &WorkMemory,
    ) -> Result<usize, CompressError>;

    /// Decompresses one block produced by `compress`.
    fn decompress(&self, input: &[u8], output: &mut [u8]) -> Result<usize, CompressError>;
}

/// zlib-wrapped deflate blocks.
///
/// Incompressible input is emitted as stored blocks, so output never exceeds
/// the input by more than the block and stream framing.
#[derive(Debug, Clone, Copy)]
pub struct Deflate {
    level: Compression,
}

/// Bytes in a deflate stored block before another header is needed
const STORED_BLOCK_SPAN: usize = 16_383;

/// Header bytes of one stored block
const STORED_BLOCK_OVERHEAD: usize = 5;

/// zlib header plus Adler-32 trailer
const ZLIB_FRAMING: usize = 6;

impl Deflate {
    pub fn new(level: u32) -> Self {
        Self {
            level: Compression::new(level.min(9)),
        }
    }
}

impl Default for Deflate {
    fn default() -> Self {
        Self {
            level: Compression::fast(),
        }
    }
}

impl Codec for Deflate {
    fn name(&self) -> &'static str {
        "deflate"
    }

    fn work_memory_size(&self) -> usize {
        // Window plus hash chains of the deflate encoder.
        256 * 1024
    }

    fn new_work_state(&self) -> Box<dyn Any + Send> {
        Box::new(Compress::new(self.level, true))
    }

    fn max_compressed_len(&self, input_len: usize) -> usize {
        input_len
            + STORED_BLOCK_OVERHEAD * (input_len / STORED_BLOCK_SPAN + 1)
            + ZLIB_FRAMING
    }

    fn compress(
        &self,
        input: &[u8],
        output: &mut [u8],
        work: &WorkMemory,
    ) -> Result<usize, CompressError> {
        let mut state = work.state();
        let encoder = state
            .downcast_mut::<Compress>()
            .ok_or(CompressError::ForeignWorkMemory)?;
        encoder.reset();

        match encoder.compress(input, output, FlushCompress::Finish) {
            Ok(Status::StreamEnd) => Ok(encoder.total_out() as usize),
            Ok(_) => Err(CompressError::OutputTooSmall {
                available: output.len(),
            }),
            Err(e) => Err(CompressError::Codec(e.to_string())),
        }
    }

    fn decompress(&self, input: &[u8], output: &mut [u8]) -> Result<usize, CompressError> {
        let mut decoder = Decompress::new(true);

        match decoder.decompress(input, output, FlushDecompress::Finish) {
            Ok(Status::StreamEnd) => Ok(decoder.total_out() as usize),
            Ok(_) if decoder.total_out() as usize == output.len() => {
                Err(CompressError::OutputTooSmall {
                    available: output.len(),
                })
            }
            Ok(_) => Err(CompressError::Corrupt("truncated block".to_string())),
            Err(e) => Err(CompressError::Corrupt(e.to_string())),
        }
    }
}
