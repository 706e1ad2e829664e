//! GPool: a large reservation subdivided into fixed-stride gstack slots,
//! enabling O(pools) accessibility checks from the fault handler.

use std::sync::atomic::{AtomicI16, AtomicPtr, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::error::Result;
use crate::platform::{self, VirtRange};

/// Slot count is capped so a free-index fits in 16 bits.
pub(crate) const GPOOL_MAX_SLOTS: usize = 32_000;

/// Default size of a single gpool reservation. Large enough to amortize the
/// mmap call across many stacklets while staying well under
/// `Config::gpool_max_size` in the common case.
const DEFAULT_POOL_RESERVATION: usize = 1024 * 1024 * 1024; // 1 GiB

/// Result of [`GPoolRegistry::check_access`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PoolAccess {
    /// The address is not inside any known pool.
    None,
    /// The address falls in a slot's no-access gap: stack overflow.
    OverflowGap,
    /// The address falls within a live slot's committed-or-growable region.
    UsableInSlot { slot_base: *mut u8, slot_size: usize },
    /// The address is in the pool's eagerly-committed header page.
    HeaderMeta,
}

// SAFETY: PoolAccess only carries address/size metadata.
unsafe impl Send for PoolAccess {}

/// One large reservation subdivided into `slot_stride`-sized slots. Slot 0
/// holds the pool header (free-stack + metadata) and is never handed out.
pub(crate) struct GPool {
    range: VirtRange,
    slot_stride: usize,
    slot_count: usize,
    gap_size: usize,
    /// Protects only the free-stack top index and the top-of-stack write —
    /// a very short critical section: push/pop one index.
    lock: Spinlock,
    /// LIFO of free slot indices (1-based; slot 0 is the header and is
    /// never pushed). Stored as `i16` so zero-initialized (demand-paged)
    /// memory already represents "all free" with no eager writes.
    free_stack: *mut AtomicI16,
    free_top: AtomicUsize,
    next: AtomicPtr<GPool>,
}

// SAFETY: all mutable access to the free-stack goes through `lock`, and the
// header page is only ever read after being committed once at pool
// creation.
unsafe impl Send for GPool {}
unsafe impl Sync for GPool {}

impl GPool {
    fn new(slot_size: usize, gap_size: usize, page_size: usize) -> Result<Box<GPool>> {
        let slot_stride = platform::page_round_up(slot_size) + gap_size;
        let slot_count = (DEFAULT_POOL_RESERVATION / slot_stride)
            .saturating_sub(1) // slot 0 is the header
            .min(GPOOL_MAX_SLOTS);
        let slot_count = slot_count.max(1);
        let reservation = slot_stride * (slot_count + 1);

        let range = platform::reserve(reservation)?;
        // The header page is the only eagerly committed page.
        platform::commit(range.base, page_size)?;

        // The free-stack lives in the header page, right after a small
        // fixed-size metadata prefix; demand-zeroed memory trivially
        // represents every slot as free (index != 0).
        let header_meta_bytes = std::mem::size_of::<usize>() * 4;
        let free_stack = unsafe { range.base.add(header_meta_bytes) as *mut AtomicI16 };

        let pool = Box::new(GPool {
            range,
            slot_stride,
            slot_count,
            gap_size,
            lock: Spinlock::new(),
            free_stack,
            free_top: AtomicUsize::new(slot_count),
            next: AtomicPtr::new(std::ptr::null_mut()),
        });

        // Demand-zeroed header page already encodes slots `1..=slot_count`
        // as the implicit free list (index i at free_stack[i-1] == i);
        // write it explicitly once so the invariant holds even if the OS
        // ever hands back non-zeroed pages (defensive, cheap: one page).
        for i in 0..slot_count {
            unsafe {
                (*pool.free_stack.add(i)).store((i + 1) as i16, Ordering::Relaxed);
            }
        }

        Ok(pool)
    }

    fn slot_base(&self, slot: usize) -> *mut u8 {
        unsafe { self.range.base.add(slot * self.slot_stride) }
    }

    fn slot_index_of(&self, addr: *const u8) -> Option<usize> {
        if !self.range.contains(addr) {
            return None;
        }
        let offset = addr as usize - self.range.base as usize;
        Some(offset / self.slot_stride)
    }

    fn alloc_slot(&self) -> Option<(*mut u8, usize)> {
        let _guard = self.lock.lock();
        let top = self.free_top.load(Ordering::Relaxed);
        if top == 0 {
            return None;
        }
        let idx = unsafe { (*self.free_stack.add(top - 1)).load(Ordering::Relaxed) };
        self.free_top.store(top - 1, Ordering::Relaxed);
        let usable = self.slot_stride - self.gap_size;
        Some((self.slot_base(idx as usize), usable))
    }

    fn free_slot(&self, base: *mut u8) {
        let Some(idx) = self.slot_index_of(base) else {
            debug_assert!(false, "free_slot: address not in this pool");
            return;
        };
        let _guard = self.lock.lock();
        let top = self.free_top.load(Ordering::Relaxed);
        unsafe {
            (*self.free_stack.add(top)).store(idx as i16, Ordering::Relaxed);
        }
        self.free_top.store(top + 1, Ordering::Relaxed);
    }

    fn check_access(&self, addr: *const u8) -> PoolAccess {
        let Some(idx) = self.slot_index_of(addr) else {
            return PoolAccess::None;
        };
        if idx == 0 {
            return PoolAccess::HeaderMeta;
        }
        let slot_base = self.slot_base(idx);
        let usable = self.slot_stride - self.gap_size;
        let offset_in_slot = addr as usize - slot_base as usize;
        if offset_in_slot < usable {
            PoolAccess::UsableInSlot {
                slot_base,
                slot_size: usable,
            }
        } else {
            PoolAccess::OverflowGap
        }
    }
}

/// A minimal test-and-test-and-set spinlock for the free-stack's short
/// critical sections.
struct Spinlock {
    locked: std::sync::atomic::AtomicBool,
}

struct SpinlockGuard<'a>(&'a Spinlock);

impl Spinlock {
    fn new() -> Self {
        Spinlock {
            locked: std::sync::atomic::AtomicBool::new(false),
        }
    }

    fn lock(&self) -> SpinlockGuard<'_> {
        loop {
            if self
                .locked
                .compare_exchange_weak(
                    false,
                    true,
                    Ordering::Acquire,
                    Ordering::Relaxed,
                )
                .is_ok()
            {
                return SpinlockGuard(self);
            }
            while self.locked.load(Ordering::Relaxed) {
                std::hint::spin_loop();
            }
        }
    }
}

impl Drop for SpinlockGuard<'_> {
    fn drop(&mut self) {
        self.0.locked.store(false, Ordering::Release);
    }
}

/// Global, process-wide list of gpools, newest first. Insertion uses a CAS loop; the walk used by
/// `check_access` only reads immutable-after-publication fields, so it takes
/// no lock.
pub(crate) struct GPoolRegistry {
    head: AtomicPtr<GPool>,
    // Serializes *creation* of new pools (the CAS above only protects the
    // link pointer, not the decision "do we need a new pool"); a regular
    // mutex is fine here since pool creation is rare and involves a
    // syscall, unlike the free-stack's hot path.
    grow_lock: Mutex<()>,
}

impl GPoolRegistry {
    pub(crate) const fn new() -> Self {
        GPoolRegistry {
            head: AtomicPtr::new(std::ptr::null_mut()),
            grow_lock: Mutex::new(()),
        }
    }

    pub(crate) fn alloc_slot(&self, slot_size: usize, gap_size: usize) -> Result<(*mut u8, usize)> {
        let page_size = platform::page_size();

        // Fast path: try existing pools, newest first.
        let mut cur = self.head.load(Ordering::Acquire);
        while !cur.is_null() {
            let pool = unsafe { &*cur };
            if let Some(slot) = pool.alloc_slot() {
                return Ok(slot);
            }
            cur = pool.next.load(Ordering::Acquire);
        }

        // Slow path: all pools full (or none exist yet); create one.
        let _guard = self.grow_lock.lock().unwrap();
        // Re-check: another thread may have grown the list while we waited.
        let mut cur = self.head.load(Ordering::Acquire);
        while !cur.is_null() {
            let pool = unsafe { &*cur };
            if let Some(slot) = pool.alloc_slot() {
                return Ok(slot);
            }
            cur = pool.next.load(Ordering::Acquire);
        }

        let new_pool = Box::into_raw(GPool::new(slot_size, gap_size, page_size)?);
        let slot = unsafe { &*new_pool }
            .alloc_slot()
            .expect("freshly created pool always has a free slot");

        loop {
            let head = self.head.load(Ordering::Acquire);
            unsafe { &*new_pool }.next.store(head, Ordering::Relaxed);
            if self
                .head
                .compare_exchange(head, new_pool, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                break;
            }
        }

        Ok(slot)
    }

    pub(crate) fn free_slot(&self, base: *mut u8) {
        let mut cur = self.head.load(Ordering::Acquire);
        while !cur.is_null() {
            let pool = unsafe { &*cur };
            if pool.range.contains(base) {
                pool.free_slot(base);
                return;
            }
            cur = pool.next.load(Ordering::Acquire);
        }
        debug_assert!(false, "free_slot: address not owned by any known gpool");
    }

    pub(crate) fn check_access(&self, addr: *const u8) -> PoolAccess {
        let mut cur = self.head.load(Ordering::Acquire);
        while !cur.is_null() {
            let pool = unsafe { &*cur };
            let access = pool.check_access(addr);
            if access != PoolAccess::None {
                return access;
            }
            cur = pool.next.load(Ordering::Acquire);
        }
        PoolAccess::None
    }
}

/// The process-wide gpool list, reclaimed only at process exit. We deliberately leak the registry's pools: there is no
/// safe point at which every gstack referencing a pool is guaranteed gone
/// before `main` returns, and the OS reclaims the mappings at process exit
/// regardless.
pub(crate) static REGISTRY: GPoolRegistry = GPoolRegistry::new();

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_and_free_slot_roundtrip() {
        let registry = GPoolRegistry::new();
        let (base, size) = registry
            .alloc_slot(64 * 1024, crate::config::DEFAULT_GAP_SIZE)
            .expect("alloc_slot");
        assert!(size >= 64 * 1024);
        match registry.check_access(base) {
            PoolAccess::UsableInSlot { .. } => {}
            other => panic!("expected UsableInSlot, got {other:?}"),
        }
        registry.free_slot(base);
    }

    #[test]
    fn header_page_reports_meta() {
        let registry = GPoolRegistry::new();
        let (_base, _) = registry
            .alloc_slot(64 * 1024, crate::config::DEFAULT_GAP_SIZE)
            .expect("alloc_slot");
        let head = registry.head.load(Ordering::Acquire);
        let pool = unsafe { &*head };
        assert_eq!(pool.check_access(pool.range.base), PoolAccess::HeaderMeta);
    }
}
