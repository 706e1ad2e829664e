//! Platform memory: reserve/commit/decommit/free virtual ranges, page size,
//! fault handler / alt signal stack installation.

use crate::error::Result;

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        mod unix;
        pub(crate) use unix as imp;
    } else if #[cfg(windows)] {
        mod windows;
        pub(crate) use windows as imp;
    } else {
        compile_error!("mprompt has no platform memory backend for this target");
    }
}

/// Hint passed to [`reset`] describing how aggressively to reclaim a range
/// that the caller no longer needs but may reuse soon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ResetMode {
    /// Fully decommit (`stack_reset_decommits = true`).
    Decommit,
    /// Advise the OS the pages can be reclaimed lazily (`MADV_FREE` /
    /// `MEM_RESET`) without losing the reservation.
    Advise,
}

/// A reserved (but not necessarily committed) virtual address range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct VirtRange {
    pub base: *mut u8,
    pub size: usize,
}

impl VirtRange {
    pub fn end(&self) -> *mut u8 {
        unsafe { self.base.add(self.size) }
    }

    pub fn contains(&self, addr: *const u8) -> bool {
        let base = self.base as usize;
        let end = base + self.size;
        let addr = addr as usize;
        addr >= base && addr < end
    }
}

// SAFETY: a VirtRange is just an address range; the pages it describes are
// not concurrently mutated through this handle without external
// synchronization (gpool/gstack own their own locking).
unsafe impl Send for VirtRange {}
unsafe impl Sync for VirtRange {}

/// Reserve `size` bytes of address space with no access. `size` must already
/// be page-aligned by the caller.
pub(crate) fn reserve(size: usize) -> Result<VirtRange> {
    imp::reserve(size)
}

/// Make `[range.base, range.base + len)` readable and writable.
pub(crate) fn commit(base: *mut u8, len: usize) -> Result<()> {
    imp::commit(base, len)
}

/// Return physical pages backing `[base, base+len)` to the OS while keeping
/// the reservation (and its no-access/committed status at the VMA level)
/// intact for later `commit` calls.
pub(crate) fn decommit(base: *mut u8, len: usize) {
    imp::decommit(base, len)
}

/// Hint that `[base, base+len)` is reclaimable; semantics chosen by `mode`.
pub(crate) fn reset(base: *mut u8, len: usize, mode: ResetMode) {
    imp::reset(base, len, mode)
}

/// Release an entire reservation back to the OS.
pub(crate) fn free(range: VirtRange) {
    imp::free(range)
}

/// The platform's page size, queried once and cached.
pub fn page_size() -> usize {
    imp::page_size()
}

/// Round `n` up to the next multiple of the page size.
pub(crate) fn page_round_up(n: usize) -> usize {
    let p = page_size();
    (n + p - 1) & !(p - 1)
}

/// Round `n` down to the previous multiple of the page size.
pub(crate) fn page_round_down(n: usize) -> usize {
    let p = page_size();
    n & !(p - 1)
}
