//! Windows backend: `VirtualAlloc`/`VirtualProtect`/`VirtualFree`,
//! `MEM_RESET`, and the vectored exception handler install point used by the
//! fault classifier. Field/offset reasoning for the CONTEXT/TIB layout is
//! recorded in `DESIGN.md`; the allocation calls themselves follow the
//! standard `VirtualAlloc(MEM_RESERVE)` + `VirtualAlloc(MEM_COMMIT)`
//! two-step idiom.

use std::ptr;
use std::sync::OnceLock;

use windows_sys::Win32::Foundation::GetLastError;
use windows_sys::Win32::System::Memory::{
    VirtualAlloc, VirtualFree, VirtualProtect, MEM_COMMIT, MEM_DECOMMIT, MEM_RELEASE,
    MEM_RESERVE, MEM_RESET, PAGE_NOACCESS, PAGE_READWRITE,
};
use windows_sys::Win32::System::SystemInformation::{GetSystemInfo, SYSTEM_INFO};

use crate::error::{Error, Result};
use crate::platform::{ResetMode, VirtRange};

pub(crate) fn reserve(size: usize) -> Result<VirtRange> {
    // SAFETY: FFI call with a null base address and no prior mapping to race
    // against; `VirtualAlloc` is safe to call from any thread.
    let base = unsafe { VirtualAlloc(ptr::null(), size, MEM_RESERVE, PAGE_NOACCESS) };
    if base.is_null() {
        Err(oom_from_last_error(size))
    } else {
        Ok(VirtRange {
            base: base.cast(),
            size,
        })
    }
}

pub(crate) fn commit(base: *mut u8, len: usize) -> Result<()> {
    // SAFETY: caller guarantees `[base, base+len)` lies within a prior
    // reservation.
    let result = unsafe { VirtualAlloc(base.cast(), len, MEM_COMMIT, PAGE_READWRITE) };
    if result.is_null() {
        Err(oom_from_last_error(len))
    } else {
        Ok(())
    }
}

pub(crate) fn decommit(base: *mut u8, len: usize) {
    unsafe {
        let _ = VirtualFree(base.cast(), len, MEM_DECOMMIT);
    }
}

pub(crate) fn reset(base: *mut u8, len: usize, mode: ResetMode) {
    match mode {
        ResetMode::Decommit => decommit(base, len),
        ResetMode::Advise => unsafe {
            // MEM_RESET discards the contents without releasing the
            // reservation; a subsequent touch re-commits lazily.
            let _ = VirtualAlloc(base.cast(), len, MEM_RESET, PAGE_READWRITE);
        },
    }
}

pub(crate) fn free(range: VirtRange) {
    unsafe {
        let _ = VirtualFree(range.base.cast(), 0, MEM_RELEASE);
    }
}

pub(crate) fn page_size() -> usize {
    static PAGE_SIZE: OnceLock<usize> = OnceLock::new();
    *PAGE_SIZE.get_or_init(|| {
        // SAFETY: `info` is fully initialized by `GetSystemInfo` before use.
        unsafe {
            let mut info: SYSTEM_INFO = std::mem::zeroed();
            GetSystemInfo(&mut info);
            info.dwPageSize as usize
        }
    })
}

fn oom_from_last_error(size: usize) -> Error {
    let code = unsafe { GetLastError() };
    // ERROR_NOT_ENOUGH_MEMORY / ERROR_COMMITMENT_LIMIT
    let advise_vma_limit = code == 8 || code == 1455;
    Error::oom(size, advise_vma_limit)
}

/// Install the process-wide vectored exception handler; delegates to
/// [`crate::fault`].
pub(crate) fn install_fault_handler() -> Result<()> {
    crate::fault::install()
}

/// Windows has no per-thread alternate signal stack concept; the vectored
/// exception handler runs on the faulting thread's own stack using the
/// guaranteed stack margin reserved via `SetThreadStackGuarantee`.
pub(crate) fn install_alt_signal_stack() -> Result<()> {
    crate::fault::install_alt_stack()
}
