//! POSIX platform memory backend, grounded on the `mmap`/`mprotect` usage in
//! wasmtime's fiber-stack allocator (see DESIGN.md).

use std::io;
use std::ptr;
use std::sync::OnceLock;

use rustix::mm::{self, MapFlags, MprotectFlags, ProtFlags};

use crate::error::{Error, Result};
use crate::platform::{ResetMode, VirtRange};

pub(crate) fn reserve(size: usize) -> Result<VirtRange> {
    // SAFETY: anonymous, no-access reservation; no aliasing concerns since
    // the mapping is freshly created.
    let ptr = unsafe {
        mm::mmap_anonymous(
            ptr::null_mut(),
            size,
            ProtFlags::empty(),
            MapFlags::PRIVATE,
        )
    };
    match ptr {
        Ok(base) => Ok(VirtRange {
            base: base.cast(),
            size,
        }),
        Err(err) => Err(oom_from_errno(size, err)),
    }
}

pub(crate) fn commit(base: *mut u8, len: usize) -> Result<()> {
    // SAFETY: caller guarantees `[base, base+len)` lies within a prior
    // `reserve` of at least that length.
    let result = unsafe {
        mm::mprotect(
            base.cast(),
            len,
            MprotectFlags::READ | MprotectFlags::WRITE,
        )
    };
    result.map_err(|err| oom_from_errno(len, err))
}

pub(crate) fn decommit(base: *mut u8, len: usize) {
    // Reinstate no-access and let the kernel reclaim physical pages; the
    // reservation itself stays alive for a later `commit`.
    unsafe {
        let _ = mm::mprotect(base.cast(), len, MprotectFlags::empty());
        let _ = mm::madvise(base.cast(), len, mm::Advice::DontNeed);
    }
}

pub(crate) fn reset(base: *mut u8, len: usize, mode: ResetMode) {
    match mode {
        ResetMode::Decommit => decommit(base, len),
        // `rustix` maps `Advice::Free` to `MADV_FREE` on Linux/BSD and to
        // `MADV_FREE_REUSABLE` on macOS; both hint the range is reclaimable
        // without losing the reservation.
        ResetMode::Advise => unsafe {
            let _ = mm::madvise(base.cast(), len, mm::Advice::Free);
        },
    }
}

pub(crate) fn free(range: VirtRange) {
    unsafe {
        let _ = mm::munmap(range.base.cast(), range.size);
    }
}

pub(crate) fn page_size() -> usize {
    static PAGE_SIZE: OnceLock<usize> = OnceLock::new();
    *PAGE_SIZE.get_or_init(rustix::param::page_size)
}

fn oom_from_errno(size: usize, err: rustix::io::Errno) -> Error {
    let advise_vma_limit = io::Error::from(err).raw_os_error() == Some(libc::ENOMEM);
    Error::oom(size, advise_vma_limit)
}

/// Install the process-wide `SIGSEGV`/`SIGBUS` fault handler; delegates to
/// [`crate::fault`].
pub(crate) fn install_fault_handler() -> Result<()> {
    crate::fault::install()
}

/// Install a per-thread alternate signal stack so the fault handler can run
/// even when the faulting thread has exhausted its own stack.
pub(crate) fn install_alt_signal_stack() -> Result<()> {
    crate::fault::install_alt_stack()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_commit_roundtrip() {
        let page = page_size();
        let range = reserve(page * 4).expect("reserve");
        commit(range.base, page).expect("commit");
        unsafe {
            range.base.write(0x42);
            assert_eq!(range.base.read(), 0x42);
        }
        decommit(range.base, page);
        free(range);
    }

    #[test]
    fn page_rounding() {
        let p = page_size();
        assert_eq!(super::super::page_round_up(1), p);
        assert_eq!(super::super::page_round_up(p), p);
        assert_eq!(super::super::page_round_up(p + 1), 2 * p);
        assert_eq!(super::super::page_round_down(p + 1), p);
    }
}
