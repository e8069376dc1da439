//! Page-granular, anonymously mapped stacks for fibers.
//!
//! Every stack is a single private anonymous mapping with one inaccessible
//! guard page at the low end, so that running off the bottom of a fiber's
//! stack faults instead of silently corrupting a neighbour. The mapping is
//! owned by exactly one [`FiberStack`] and unmapped exactly once on drop.

use crate::error::{FiberError, invariant_violation};
use corosensei::stack::{Stack, StackPointer};
use std::io;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicUsize, Ordering};

#[cfg(not(unix))]
compile_error!("fibersched stacks are built on mmap and require a unix target");

/// Smallest usable stack handed out, regardless of what was requested.
pub const MIN_STACK_SIZE: usize = 16 * 1024;

static LIVE_STACKS: AtomicUsize = AtomicUsize::new(0);
static TOTAL_ALLOCATIONS: AtomicUsize = AtomicUsize::new(0);
static MAPPED_BYTES: AtomicUsize = AtomicUsize::new(0);

/// Process-wide stack accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackStats {
    /// Stacks currently mapped.
    pub live: usize,
    /// Stacks mapped since process start.
    pub total_allocations: usize,
    /// Bytes currently mapped, guard pages included.
    pub mapped_bytes: usize,
}

/// Returns a snapshot of the stack counters.
pub fn stats() -> StackStats {
    StackStats {
        live: LIVE_STACKS.load(Ordering::Relaxed),
        total_allocations: TOTAL_ALLOCATIONS.load(Ordering::Relaxed),
        mapped_bytes: MAPPED_BYTES.load(Ordering::Relaxed),
    }
}

/// Returns the OS page size.
pub fn page_size() -> usize {
    static PAGE_SIZE: OnceLock<usize> = OnceLock::new();
    *PAGE_SIZE.get_or_init(|| {
        // SAFETY: sysconf has no preconditions.
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if size <= 0 { 4096 } else { size as usize }
    })
}

/// A fiber stack: guard page followed by `usable_size` bytes of read/write memory.
pub struct FiberStack {
    /// Lowest address of the mapping (start of the guard page).
    mapping: *mut u8,
    /// Total mapping length, guard page included.
    mapping_len: usize,
}

// SAFETY: the mapping is exclusively owned by this value; only the thread
// currently running the owning fiber touches the memory.
unsafe impl Send for FiberStack {}

impl FiberStack {
    /// Maps a new stack of at least `size` usable bytes.
    pub fn allocate(size: usize) -> Result<Self, FiberError> {
        let page = page_size();
        let overflow = || FiberError::StackAllocation {
            requested: size,
            source: io::Error::new(io::ErrorKind::OutOfMemory, "stack size overflows usize"),
        };

        let usable = size
            .max(MIN_STACK_SIZE)
            .checked_next_multiple_of(page)
            .ok_or_else(overflow)?;
        let mapping_len = usable.checked_add(page).ok_or_else(overflow)?;

        // SAFETY: anonymous private mapping, no file descriptor involved.
        let mapping = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                mapping_len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if mapping == libc::MAP_FAILED {
            return Err(FiberError::StackAllocation {
                requested: size,
                source: io::Error::last_os_error(),
            });
        }

        // SAFETY: the first page lies within the mapping created above.
        if unsafe { libc::mprotect(mapping, page, libc::PROT_NONE) } != 0 {
            let source = io::Error::last_os_error();
            // SAFETY: same mapping and length as the mmap call.
            unsafe { libc::munmap(mapping, mapping_len) };
            return Err(FiberError::StackAllocation {
                requested: size,
                source,
            });
        }

        LIVE_STACKS.fetch_add(1, Ordering::Relaxed);
        TOTAL_ALLOCATIONS.fetch_add(1, Ordering::Relaxed);
        MAPPED_BYTES.fetch_add(mapping_len, Ordering::Relaxed);
        tracing::trace!(usable, mapping_len, "mapped fiber stack");

        Ok(FiberStack {
            mapping: mapping.cast::<u8>(),
            mapping_len,
        })
    }

    /// Lowest usable address (just above the guard page).
    pub fn bottom(&self) -> *const u8 {
        // SAFETY: the guard page is within the mapping.
        unsafe { self.mapping.add(page_size()) }
    }

    /// One past the highest usable address; stacks grow down from here.
    pub fn top(&self) -> *const u8 {
        // SAFETY: one-past-the-end of the mapping, never dereferenced.
        unsafe { self.mapping.add(self.mapping_len) }
    }

    /// Usable bytes, guard page excluded.
    pub fn usable_size(&self) -> usize {
        self.mapping_len - page_size()
    }
}

// SAFETY: `base` and `limit` describe memory owned by this value that stays
// mapped for as long as the value lives. The top is page aligned.
unsafe impl Stack for FiberStack {
    fn base(&self) -> StackPointer {
        StackPointer::new(self.top() as usize)
            .unwrap_or_else(|| invariant_violation("stack mapping at address zero"))
    }

    fn limit(&self) -> StackPointer {
        StackPointer::new(self.bottom() as usize)
            .unwrap_or_else(|| invariant_violation("stack mapping at address zero"))
    }
}

impl Drop for FiberStack {
    fn drop(&mut self) {
        // SAFETY: `mapping`/`mapping_len` come from a successful mmap that
        // has not been unmapped yet.
        unsafe {
            libc::munmap(self.mapping.cast::<libc::c_void>(), self.mapping_len);
        }
        LIVE_STACKS.fetch_sub(1, Ordering::Relaxed);
        MAPPED_BYTES.fetch_sub(self.mapping_len, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for FiberStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FiberStack")
            .field("bottom", &self.bottom())
            .field("usable_size", &self.usable_size())
            .finish()
    }
}
