//! Compression Workspace Manager
//!
//! Block compression needs per-thread working state (the encoder's window and
//! hash chains). Allocating it for every block is wasteful, and sharing one
//! copy between threads would serialize them, so the manager keeps a bounded
//! table with one [`WorkMemory`] slot per thread.
//!
//! ## Locking
//!
//! ```text
//! alloc(thread)      ──> table lock, once per thread (cached by local())
//! compress/decompress ──> slot-local state only, counters updated after
//! ```
//!
//! The table never grows past its maximum. Once every slot is taken,
//! allocation fails with [`CompressError::WorkspaceExhausted`] instead of
//! waiting or growing.

use crate::compression::{Codec, CompressError};
use crate::config::WORKSPACE_THREAD_MAX;
use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, trace, warn};

static NEXT_MANAGER_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_THREAD_KEY: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_KEY: u64 = NEXT_THREAD_KEY.fetch_add(1, Ordering::Relaxed);
    static LOCAL_SLOTS: RefCell<Vec<CachedSlot>> = const { RefCell::new(Vec::new()) };
}

struct CachedSlot {
    manager: u64,
    generation: u64,
    memory: Arc<WorkMemory>,
}

/// A process-unique identity for the calling thread.
pub fn current_thread_key() -> u64 {
    THREAD_KEY.with(|key| *key)
}

/// Codec working state owned by one thread slot.
///
/// The state sits behind its own mutex, which only the owning thread ever
/// takes, so it is uncontended.
pub struct WorkMemory {
    slot: usize,
    thread_key: u64,
    size: usize,
    state: Mutex<Box<dyn Any + Send>>,
}

impl WorkMemory {
    /// Index of this slot in the manager's table.
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Thread identity the slot was allocated for.
    pub fn thread_key(&self) -> u64 {
        self.thread_key
    }

    /// Working-memory size the codec declared.
    pub fn size(&self) -> usize {
        self.size
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, Box<dyn Any + Send>> {
        self.state.lock().unwrap()
    }
}

impl fmt::Debug for WorkMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkMemory")
            .field("slot", &self.slot)
            .field("thread_key", &self.thread_key)
            .field("size", &self.size)
            .finish()
    }
}

#[derive(Default)]
struct Table {
    slots: Vec<Arc<WorkMemory>>,
    uncompress_size: u64,
    compress_size: u64,
    log_enabled: bool,
}

/// Shared allocator of per-thread codec work memory.
///
/// Construct one at startup and hand it to worker threads behind an `Arc`.
pub struct WorkspaceManager {
    id: u64,
    generation: AtomicU64,
    codec: Arc<dyn Codec>,
    max_threads: usize,
    table: Mutex<Table>,
}

impl fmt::Debug for WorkspaceManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let table = self.table.lock().unwrap();
        f.debug_struct("WorkspaceManager")
            .field("codec", &self.codec.name())
            .field("max_threads", &self.max_threads)
            .field("slots_used", &table.slots.len())
            .field("uncompress_size", &table.uncompress_size)
            .field("compress_size", &table.compress_size)
            .finish()
    }
}

impl WorkspaceManager {
    /// Creates a manager allowing up to 1024 threads.
    pub fn new(codec: Arc<dyn Codec>) -> Self {
        Self::with_capacity(codec, WORKSPACE_THREAD_MAX)
    }

    /// Creates a manager allowing up to `max_threads` threads.
    pub fn with_capacity(codec: Arc<dyn Codec>, max_threads: usize) -> Self {
        Self {
            id: NEXT_MANAGER_ID.fetch_add(1, Ordering::Relaxed),
            generation: AtomicU64::new(0),
            codec,
            max_threads,
            table: Mutex::new(Table::default()),
        }
    }

    /// Resets counters and reserves room for the slot table.
    pub fn init(&self) {
        let mut table = self.table.lock().unwrap();
        table.slots.reserve(self.max_threads.min(64));
        table.uncompress_size = 0;
        table.compress_size = 0;
    }

    /// Releases every slot. Handles already given out stay usable but are
    /// no longer tracked; `local()` allocates fresh ones afterwards.
    pub fn destroy(&self) {
        let mut table = self.table.lock().unwrap();
        let released = table.slots.len();
        table.slots.clear();
        self.generation.fetch_add(1, Ordering::Relaxed);
        debug!(released, "Compression workspace destroyed");
    }

    /// The codec this manager runs.
    pub fn codec(&self) -> &Arc<dyn Codec> {
        &self.codec
    }

    /// Maximum number of thread slots.
    pub fn max_threads(&self) -> usize {
        self.max_threads
    }

    /// High-water mark of slots in use.
    pub fn slots_used(&self) -> usize {
        self.table.lock().unwrap().slots.len()
    }

    /// Returns the slot for `thread_key`, allocating it on first use.
    pub fn alloc(&self, thread_key: u64) -> Result<Arc<WorkMemory>, CompressError> {
        let mut table = self.table.lock().unwrap();

        if let Some(memory) = table.slots.iter().find(|m| m.thread_key == thread_key) {
            return Ok(Arc::clone(memory));
        }

        if table.slots.len() >= self.max_threads {
            warn!(
                max = self.max_threads,
                thread_key, "Compression workspace exhausted"
            );
            return Err(CompressError::WorkspaceExhausted {
                max: self.max_threads,
            });
        }

        let memory = Arc::new(WorkMemory {
            slot: table.slots.len(),
            thread_key,
            size: self.codec.work_memory_size(),
            state: Mutex::new(self.codec.new_work_state()),
        });
        table.slots.push(Arc::clone(&memory));
        trace!(
            slot = memory.slot,
            thread_key,
            "Allocated compression work memory"
        );
        Ok(memory)
    }

    /// Returns the calling thread's slot, taking the table lock only the
    /// first time a thread asks.
    pub fn local(&self) -> Result<Arc<WorkMemory>, CompressError> {
        let generation = self.generation.load(Ordering::Relaxed);
        let cached = LOCAL_SLOTS.with(|slots| {
            slots
                .borrow()
                .iter()
                .find(|c| c.manager == self.id && c.generation == generation)
                .map(|c| Arc::clone(&c.memory))
        });
        if let Some(memory) = cached {
            return Ok(memory);
        }

        let memory = self.alloc(current_thread_key())?;
        LOCAL_SLOTS.with(|slots| {
            let mut slots = slots.borrow_mut();
            slots.retain(|c| c.manager != self.id);
            slots.push(CachedSlot {
                manager: self.id,
                generation,
                memory: Arc::clone(&memory),
            });
        });
        Ok(memory)
    }

    /// Compresses one block with `work` and records the sizes.
    pub fn compress(
        &self,
        input: &[u8],
        output: &mut [u8],
        work: &WorkMemory,
    ) -> Result<usize, CompressError> {
        let written = self.codec.compress(input, output, work)?;
        self.record(input.len(), written);
        Ok(written)
    }

    /// Decompresses one block and records the sizes.
    pub fn decompress(&self, input: &[u8], output: &mut [u8]) -> Result<usize, CompressError> {
        let written = self.codec.decompress(input, output)?;
        self.record(written, input.len());
        Ok(written)
    }

    pub fn add_uncompress_size(&self, size: u64) {
        self.table.lock().unwrap().uncompress_size += size;
    }

    pub fn add_compress_size(&self, size: u64) {
        self.table.lock().unwrap().compress_size += size;
    }

    /// Total plain bytes that passed through the codec.
    pub fn uncompress_size(&self) -> u64 {
        self.table.lock().unwrap().uncompress_size
    }

    /// Total compressed bytes that passed through the codec.
    pub fn compress_size(&self) -> u64 {
        self.table.lock().unwrap().compress_size
    }

    pub fn log_enable(&self, enable: bool) {
        self.table.lock().unwrap().log_enabled = enable;
    }

    pub fn is_log_enabled(&self) -> bool {
        self.table.lock().unwrap().log_enabled
    }

    fn record(&self, plain: usize, compressed: usize) {
        let mut table = self.table.lock().unwrap();
        table.uncompress_size += plain as u64;
        table.compress_size += compressed as u64;
        if table.log_enabled {
            debug!(
                codec = self.codec.name(),
                plain,
                compressed,
                "Compression block processed"
            );
        }
    }
}
