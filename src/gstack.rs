//! Gstack: allocation, caching, reset, save/restore of growable stacklets.

use std::cell::RefCell;
use std::ptr::NonNull;

use crate::config::ResolvedConfig;
use crate::error::Result;
use crate::gpool::{self, PoolAccess};
use crate::platform::{self, ResetMode, VirtRange};

/// Magic value written just past the initial commit boundary; if it's still
/// there on free, the stack never grew and we can skip decommitting the
/// (entirely untouched) growable region.
const CANARY: u64 = 0x6773_7461_636b_2121; // "gstack!!"

/// One growable stacklet: a reservation, a usable region bounded by two
/// no-access gaps, a committed watermark, and an inline "extra" region used
/// to embed the owning prompt's header.
pub(crate) struct Gstack {
    /// Whole reservation, including both gaps.
    reservation: VirtRange,
    /// `[usable_base, usable_base + usable_len)`, excluding both gaps.
    usable_base: *mut u8,
    usable_len: usize,
    /// Bytes committed so far, counted from `usable_base` upward regardless
    /// of stack growth direction (we normalize to "low address = base of
    /// committed region" here; §3 calls the high address on down-growing
    /// architectures the "base").
    committed: usize,
    initial_commit: usize,
    gap_size: usize,
    /// Size of the inline extra region carved out of the high end (for a
    /// down-growing stack) of the usable region.
    extra_size: usize,
    /// Whether this stacklet's slot came from a gpool (affects how `free`
    /// returns it to the platform).
    from_pool: bool,
}

// A Gstack is only ever touched by the thread that owns it; it is
// moved into thread-local structures, never shared.
unsafe impl Send for Gstack {}

impl Gstack {
    /// Allocate a fresh gstack (not from the cache) with at least
    /// `extra_bytes` of inline extra space, honoring `cfg.use_gpool`.
    pub(crate) fn new_fresh(cfg: &ResolvedConfig, extra_bytes: usize) -> Result<Box<Gstack>> {
        let page_size = platform::page_size();
        let extra_size = platform::page_round_up(extra_bytes.max(16));
        let requested_usable = cfg.stack_max_size + extra_size;
        let gap_size = cfg.stack_gap_size;

        let (reservation, usable_base, usable_len, from_pool) = if cfg.use_gpool {
            let (slot_base, slot_usable) =
                gpool::REGISTRY.alloc_slot(requested_usable, gap_size)?;
            // The slot already accounts for its own trailing gap; leading
            // isolation is provided by the previous slot's trailing gap
            // (or, for slot order reasons, by never placing index 0 — the
            // header — adjacent to a usable slot at offset 0).
            let reservation = VirtRange {
                base: slot_base,
                size: slot_usable + gap_size,
            };
            (reservation, slot_base, slot_usable, true)
        } else {
            let total = gap_size + platform::page_round_up(requested_usable) + gap_size;
            let reservation = platform::reserve(total)?;
            let usable_base = unsafe { reservation.base.add(gap_size) };
            let usable_len = total - 2 * gap_size;
            (reservation, usable_base, usable_len, false)
        };

        let initial_commit = platform::page_round_up(cfg.stack_initial_commit.max(page_size));
        let initial_commit = initial_commit.min(usable_len);

        // Commit from the *high* end on a down-growing stack, since that's
        // where execution starts; the low end (towards the limit) grows
        // into on demand via the fault handler.
        let commit_base = unsafe { usable_base.add(usable_len - initial_commit) };
        platform::commit(commit_base, initial_commit)?;

        // Place the canary one word below the extra region, inside the
        // initial commit, so a legitimate (non-overflowing) program never
        // disturbs it until the stack actually grows past that point.
        if initial_commit >= extra_size + std::mem::size_of::<u64>() {
            unsafe {
                let canary_ptr =
                    usable_base.add(usable_len - extra_size - std::mem::size_of::<u64>()) as *mut u64;
                canary_ptr.write(CANARY);
            }
        }

        Ok(Box::new(Gstack {
            reservation,
            usable_base,
            usable_len,
            committed: initial_commit,
            initial_commit,
            gap_size,
            extra_size,
            from_pool,
        }))
    }

    /// The highest usable address — the stack's "base" on a down-growing
    /// architecture, i.e. where execution starts.
    pub(crate) fn base(&self) -> *mut u8 {
        unsafe { self.usable_base.add(self.usable_len - self.extra_size) }
    }

    /// The lowest usable address — the stack's "limit".
    pub(crate) fn limit(&self) -> *mut u8 {
        self.usable_base
    }

    /// Pointer to the inline extra region.
    pub(crate) fn extra(&self) -> NonNull<u8> {
        let ptr = unsafe { self.usable_base.add(self.usable_len - self.extra_size) };
        NonNull::new(ptr).expect("usable_base is never null")
    }

    pub(crate) fn extra_len(&self) -> usize {
        self.extra_size
    }

    pub(crate) fn gap_size(&self) -> usize {
        self.gap_size
    }

    /// The address one past the committed-down-to watermark, i.e. the
    /// current guard boundary the fault handler grows past.
    pub(crate) fn committed_floor(&self) -> *mut u8 {
        unsafe { self.usable_base.add(self.usable_len - self.committed) }
    }

    pub(crate) fn reservation_base(&self) -> *mut u8 {
        self.reservation.base
    }

    pub(crate) fn contains(&self, addr: *const u8) -> bool {
        let lo = self.reservation.base as usize;
        let hi = lo + self.reservation.size;
        let a = addr as usize;
        a >= lo && a < hi
    }

    /// Commit additional pages so that `addr` becomes accessible, applying
    /// the quadratic-growth cap. Called only from the fault handler's
    /// decision procedure.
    pub(crate) fn grow_to_include(&mut self, addr: *const u8, fast: bool) -> Result<()> {
        let floor = self.committed_floor() as usize;
        debug_assert!((addr as usize) < floor, "grow_to_include: already committed");

        let needed_from_limit = floor - (addr as usize) + platform::page_size();
        let available = self.usable_len - self.committed;

        let grow_by = if fast {
            let doubled = self.committed; // double the currently-used region
            doubled.min(1024 * 1024).max(needed_from_limit)
        } else {
            needed_from_limit
        };
        let grow_by = platform::page_round_up(grow_by).min(available);

        if grow_by < needed_from_limit {
            return Err(crate::error::Error::stack_overflow(addr as usize));
        }

        let new_commit_base = unsafe { self.usable_base.add(self.usable_len - self.committed - grow_by) };
        platform::commit(new_commit_base, grow_by)?;
        self.committed += grow_by;
        Ok(())
    }

    /// Whether the stack grew past its initial commit since allocation
    ///: if the canary is gone, it must have been
    /// overwritten by real use of the grown region.
    fn grew_past_initial_commit(&self) -> bool {
        if self.initial_commit < self.extra_size + std::mem::size_of::<u64>() {
            // No canary was ever written (extra region too large relative
            // to the initial commit); be conservative and assume growth.
            return true;
        }
        let canary_ptr = unsafe {
            self.usable_base
                .add(self.usable_len - self.extra_size - std::mem::size_of::<u64>())
                as *mut u64
        };
        unsafe { canary_ptr.read() } != CANARY || self.committed != self.initial_commit
    }

    /// Reset this stack's growable region back to its initial-commit state
    /// before returning it to the cache, applying `mode` only to the pages
    /// committed beyond the initial commit.
    fn reset_for_cache(&mut self, mode: ResetMode) {
        if !self.grew_past_initial_commit() {
            return;
        }
        let grown_len = self.committed - self.initial_commit;
        if grown_len > 0 {
            let grown_base = self.usable_base;
            platform::reset(grown_base, grown_len, mode);
            self.committed = self.initial_commit;
        }
        if self.initial_commit >= self.extra_size + std::mem::size_of::<u64>() {
            let canary_ptr = unsafe {
                self.usable_base
                    .add(self.usable_len - self.extra_size - std::mem::size_of::<u64>())
                    as *mut u64
            };
            unsafe { canary_ptr.write(CANARY) };
        }
    }

    fn release_to_platform(self: Box<Self>) {
        if self.from_pool {
            gpool::REGISTRY.free_slot(self.reservation.base);
        } else {
            platform::free(self.reservation);
        }
    }

    /// Copy out the live stack bytes from `sp` up to [`Gstack::base`] into a
    /// heap buffer, for multi-shot resumption capture.
    pub(crate) fn save_from(&self, sp: *const u8) -> Result<SavedSlice> {
        debug_assert!(self.contains(sp));
        let base = self.base();
        let len = base as usize - sp as usize;
        let mut buf = vec![0u8; len].into_boxed_slice();
        unsafe {
            std::ptr::copy_nonoverlapping(sp, buf.as_mut_ptr(), len);
        }
        Ok(SavedSlice { sp: sp as usize, buf })
    }

    /// Write a previously [`Gstack::save_from`]'d slice back onto this
    /// stack at its original address.
    pub(crate) fn restore_into(&self, slice: &SavedSlice) {
        debug_assert!(self.contains(slice.sp as *const u8));
        unsafe {
            std::ptr::copy_nonoverlapping(slice.buf.as_ptr(), slice.sp as *mut u8, slice.buf.len());
        }
    }
}

/// A captured copy of part of a gstack's live bytes.
pub(crate) struct SavedSlice {
    /// The stack pointer address the bytes were copied from (and must be
    /// restored to, since the gstack's address never changes across save
    /// points in this design — a gstack is not moved, only its contents
    /// are snapshotted and replayed).
    sp: usize,
    buf: Box<[u8]>,
}

impl SavedSlice {
    /// The stack pointer this slice was captured from and must be restored
    /// to before the corresponding register context is re-entered.
    pub(crate) fn sp(&self) -> *mut u8 {
        self.sp as *mut u8
    }
}

/// Per-thread cache of free gstacks plus the delayed-free list for stacks
/// whose destructors are still running during a panic unwind.
pub(crate) struct GstackCache {
    free: Vec<Box<Gstack>>,
    cap: usize,
    delayed: Vec<Box<Gstack>>,
}

impl GstackCache {
    fn new(cap: usize) -> Self {
        GstackCache {
            free: Vec::new(),
            cap,
            delayed: Vec::new(),
        }
    }

    /// Cache-first allocation: pop a cached gstack whose extra region is
    /// big enough, otherwise allocate fresh.
    fn alloc(&mut self, cfg: &ResolvedConfig, extra_bytes: usize) -> Result<Box<Gstack>> {
        self.drain_delayed_if_safe();
        if let Some(pos) = self.free.iter().position(|g| g.extra_size >= extra_bytes) {
            return Ok(self.free.swap_remove(pos));
        }
        Gstack::new_fresh(cfg, extra_bytes)
    }

    /// Return a gstack to the cache (or the platform if full / delayed
    /// during unwind).
    fn free(&mut self, cfg: &ResolvedConfig, mut stack: Box<Gstack>, delay: bool) {
        if delay || std::thread::panicking() {
            self.delayed.push(stack);
            return;
        }

        let mode = if cfg.stack_reset_decommits {
            ResetMode::Decommit
        } else {
            ResetMode::Advise
        };
        stack.reset_for_cache(mode);

        if self.free.len() < self.cap {
            self.free.push(stack);
        } else {
            stack.release_to_platform();
        }
    }

    fn drain_delayed_if_safe(&mut self) {
        if std::thread::panicking() {
            return;
        }
        for stack in self.delayed.drain(..) {
            stack.release_to_platform();
        }
    }

    /// Flush both the delayed-free list and the cache itself to the
    /// platform.
    fn clear(&mut self) {
        self.drain_delayed_if_safe();
        for stack in self.free.drain(..) {
            stack.release_to_platform();
        }
    }

    fn from_config(cfg: &ResolvedConfig) -> Self {
        let cap = if cfg.stack_cache_count < 0 {
            0
        } else {
            cfg.stack_cache_count as usize
        };
        GstackCache::new(cap)
    }
}

thread_local! {
    static CACHE: RefCell<Option<GstackCache>> = const { RefCell::new(None) };
}

fn with_cache<R>(f: impl FnOnce(&mut GstackCache, &ResolvedConfig) -> R) -> R {
    let cfg = crate::config::get();
    CACHE.with(|cell| {
        let mut borrow = cell.borrow_mut();
        let cache = borrow.get_or_insert_with(|| GstackCache::from_config(&cfg));
        f(cache, &cfg)
    })
}

/// Allocate a gstack with at least `extra_bytes` of inline extra space,
/// serving from this thread's cache first.
pub(crate) fn alloc(extra_bytes: usize) -> Result<Box<Gstack>> {
    with_cache(|cache, cfg| cache.alloc(cfg, extra_bytes))
}

/// Return a gstack to this thread's cache, the delayed-free list, or the
/// platform.
pub(crate) fn free(stack: Box<Gstack>, delay: bool) {
    with_cache(|cache, cfg| cache.free(cfg, stack, delay))
}

/// Flush this thread's cache and delayed-free list, called from thread teardown.
pub(crate) fn clear_cache() {
    CACHE.with(|cell| {
        if let Some(cache) = cell.borrow_mut().as_mut() {
            cache.clear();
        }
    });
}

/// Locate the gstack (if any) whose reservation contains `addr`, for the
/// fault handler's decision procedure. Only consults
/// gpool-backed stacks via [`gpool::REGISTRY::check_access`] plus, for
/// overcommit-mode single reservations, the currently executing stack
/// recorded by [`crate::thread_state`].
pub(crate) fn classify_address(addr: *const u8) -> PoolAccess {
    gpool::REGISTRY.check_access(addr)
}

thread_local! {
    /// Stacks currently entered on this thread, most-recently-entered last
    ///. Only needed to find non-gpool-backed stacks, since
    /// gpool-backed ones are already found via `gpool::REGISTRY`; consulted
    /// regardless of backing to keep the fault handler's lookup uniform.
    static ACTIVE: RefCell<Vec<*mut Gstack>> = const { RefCell::new(Vec::new()) };
}

/// Record that `stack` is now the innermost entered gstack on this thread.
/// Paired with [`pop_active`], called by the prompt engine around
/// entering/resuming a prompt.
pub(crate) fn push_active(stack: *mut Gstack) {
    ACTIVE.with(|a| a.borrow_mut().push(stack));
}

/// Undo the most recent [`push_active`].
pub(crate) fn pop_active() {
    ACTIVE.with(|a| {
        a.borrow_mut().pop();
    });
}

/// Find the innermost active gstack (if any) on this thread containing
/// `addr`, searched from most- to least-recently entered.
pub(crate) fn find_active_containing(addr: *const u8) -> Option<*mut Gstack> {
    ACTIVE.with(|a| {
        a.borrow()
            .iter()
            .rev()
            .find(|&&g| unsafe { &*g }.contains(addr))
            .copied()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cfg() -> ResolvedConfig {
        crate::config::Config {
            stack_max_size: 256 * 1024,
            stack_initial_commit: platform::page_size(),
            stack_gap_size: 64 * 1024,
            stack_cache_count: 2,
            ..Default::default()
        }
        .resolve(platform::page_size())
    }

    #[test]
    fn fresh_alloc_is_usable_and_bounded() {
        let cfg = test_cfg();
        let stack = Gstack::new_fresh(&cfg, 256).expect("alloc");
        assert!(stack.extra_size >= 256);
        assert!(stack.committed <= stack.usable_len);
        unsafe {
            let p = stack.committed_floor();
            p.write(1);
        }
    }

    #[test]
    fn cache_roundtrip_reuses_stack() {
        let cfg = test_cfg();
        let stack = Gstack::new_fresh(&cfg, 64).unwrap();
        let reservation_addr = stack.reservation_base();
        free(stack, false);
        let reused = alloc(64).unwrap();
        assert_eq!(reused.reservation_base(), reservation_addr);
        free(reused, false);
        clear_cache();
    }

    #[test]
    fn save_restore_roundtrip() {
        let cfg = test_cfg();
        let stack = Gstack::new_fresh(&cfg, 64).unwrap();
        let sp = unsafe { stack.base().sub(64) };
        unsafe {
            for i in 0..64u8 {
                sp.add(i as usize).write(i);
            }
        }
        let saved = stack.save_from(sp).unwrap();
        unsafe {
            for i in 0..64u8 {
                sp.add(i as usize).write(0);
            }
        }
        stack.restore_into(&saved);
        unsafe {
            for i in 0..64u8 {
                assert_eq!(sp.add(i as usize).read(), i);
            }
        }
    }
}
