//! Per-Stream Compression Toggle

use crate::compression::{Codec, CompressError, Deflate, WorkMemory};
use std::sync::Arc;

/// Compression switch bound to one stream.
///
/// Holds no scratch memory: compression borrows a thread's [`WorkMemory`],
/// decompression needs none.
#[derive(Debug, Clone)]
pub struct Assistant {
    enabled: bool,
    codec: Arc<dyn Codec>,
}

impl Default for Assistant {
    fn default() -> Self {
        Self::new(Arc::new(Deflate::default()))
    }
}

impl Assistant {
    /// Creates a disabled assistant for `codec`.
    pub fn new(codec: Arc<dyn Codec>) -> Self {
        Self {
            enabled: false,
            codec,
        }
    }

    pub fn enable(&mut self, enable: bool) {
        self.enabled = enable;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn codec(&self) -> &Arc<dyn Codec> {
        &self.codec
    }

    pub fn compress(
        &self,
        input: &[u8],
        output: &mut [u8],
        work: &WorkMemory,
    ) -> Result<usize, CompressError> {
        self.codec.compress(input, output, work)
    }

    pub fn decompress(&self, input: &[u8], output: &mut [u8]) -> Result<usize, CompressError> {
        self.codec.decompress(input, output)
    }
}
