//! Fault handler: turns a page fault on a growable gstack into an on-demand
//! commit, and everything else into a stack-overflow report or a forward to
//! whatever handler was installed before us.

#[cfg(target_os = "macos")]
use std::sync::atomic::{AtomicBool, Ordering};

use once_cell::sync::OnceCell;

use crate::error::Result;
use crate::gpool::PoolAccess;
use crate::gstack;

/// Outcome of [`classify`] for a faulting address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FaultDecision {
    /// The address is inside a no-access gap: genuine stack overflow.
    Overflow,
    /// The address is in a pool's lazily-initialized header page.
    CommitHeaderPage { base: *mut u8, len: usize },
    /// The address is below a live gstack's committed watermark and can be
    /// grown into.
    Grow { stack: *mut gstack::Gstack },
    /// Not ours; forward to whatever handler ran before us.
    Forward,
}

// SAFETY: FaultDecision only carries address/size/pointer metadata produced
// and consumed on the same thread that took the fault.
unsafe impl Send for FaultDecision {}

/// Classifies the fault, but does not itself commit memory: that's applied
/// by the caller via [`gstack::Gstack::grow_to_include`] since that needs a
/// `&mut` borrow the classifier itself must not hold across the unsafe
/// pointer dereference here.
pub(crate) fn classify(addr: *const u8) -> FaultDecision {
    let page = crate::platform::page_round_down(addr as usize) as *const u8;

    match crate::gpool::REGISTRY.check_access(page) {
        PoolAccess::OverflowGap => return FaultDecision::Overflow,
        PoolAccess::HeaderMeta => {
            let page_size = crate::platform::page_size();
            // The containing pool's header page starts at the page-aligned
            // pool base; `check_access` already told us `page` lies in slot
            // 0, i.e. `page` itself is inside that header page.
            return FaultDecision::CommitHeaderPage {
                base: page as *mut u8,
                len: page_size,
            };
        }
        PoolAccess::UsableInSlot { .. } => {
            if let Some(stack) = gstack::find_active_containing(page) {
                return FaultDecision::Grow { stack };
            }
            return FaultDecision::Forward;
        }
        PoolAccess::None => {}
    }

    if let Some(stack) = gstack::find_active_containing(page) {
        let stack_ref = unsafe { &*stack };
        if (page as usize) < stack_ref.committed_floor() as usize
            && (page as usize) >= stack_ref.reservation_base() as usize
        {
            return FaultDecision::Grow { stack };
        }
        return FaultDecision::Overflow;
    }

    FaultDecision::Forward
}

/// Apply a [`FaultDecision::Grow`]/[`FaultDecision::CommitHeaderPage`]
/// decision. Called from the signal handler with
/// `fast = true` (quadratic growth) and from any explicit pre-commit path
/// with `fast = false`.
fn handle(addr: *const u8, decision: FaultDecision, fast: bool) -> std::result::Result<(), ()> {
    match decision {
        FaultDecision::CommitHeaderPage { base, len } => {
            crate::platform::commit(base, len).map_err(|_| ())
        }
        FaultDecision::Grow { stack } => {
            let stack = unsafe { &mut *stack };
            stack.grow_to_include(addr, fast).map_err(|_| ())
        }
        FaultDecision::Overflow | FaultDecision::Forward => Err(()),
    }
}

static INSTALLED: OnceCell<()> = OnceCell::new();

/// Install the process-wide fault handler exactly once.
pub(crate) fn install() -> Result<()> {
    INSTALLED.get_or_try_init(imp::install_process_handler)?;
    Ok(())
}

/// Install this thread's alternate signal stack (POSIX only; a no-op stub
/// on Windows, which has no such concept — see `detail::windows_x86_64`'s
/// module doc for the TIB-based analogue).
pub(crate) fn install_alt_stack() -> Result<()> {
    imp::install_thread_alt_stack()
}

#[cfg(unix)]
mod imp {
    use std::cell::Cell;
    use std::ptr;

    use crate::error::{Error, Result};

    use super::{classify, handle, FaultDecision};

    static PREV_SEGV: std::sync::OnceLock<libc::sigaction> = std::sync::OnceLock::new();
    static PREV_BUS: std::sync::OnceLock<libc::sigaction> = std::sync::OnceLock::new();

    const ALT_STACK_SIZE: usize = 64 * 1024;

    thread_local! {
        static ALT_STACK: Cell<*mut libc::c_void> = const { Cell::new(ptr::null_mut()) };
    }

    pub(super) fn install_process_handler() -> Result<()> {
        unsafe {
            let mut action: libc::sigaction = std::mem::zeroed();
            action.sa_sigaction = handler as usize;
            action.sa_flags = libc::SA_SIGINFO | libc::SA_ONSTACK;
            libc::sigemptyset(&mut action.sa_mask);

            let mut prev_segv: libc::sigaction = std::mem::zeroed();
            if libc::sigaction(libc::SIGSEGV, &action, &mut prev_segv) != 0 {
                return Err(Error::Misuse("sigaction(SIGSEGV) failed"));
            }
            let _ = PREV_SEGV.set(prev_segv);

            let mut prev_bus: libc::sigaction = std::mem::zeroed();
            if libc::sigaction(libc::SIGBUS, &action, &mut prev_bus) != 0 {
                return Err(Error::Misuse("sigaction(SIGBUS) failed"));
            }
            let _ = PREV_BUS.set(prev_bus);
        }
        tracing::debug!("installed SIGSEGV/SIGBUS fault handler");
        Ok(())
    }

    pub(super) fn install_thread_alt_stack() -> Result<()> {
        ALT_STACK.with(|cell| -> Result<()> {
            if !cell.get().is_null() {
                return Ok(());
            }
            unsafe {
                let layout = std::alloc::Layout::from_size_align(ALT_STACK_SIZE, 16).unwrap();
                let base = std::alloc::alloc(layout);
                if base.is_null() {
                    return Err(Error::oom(ALT_STACK_SIZE, false));
                }
                let stack = libc::stack_t {
                    ss_sp: base as *mut libc::c_void,
                    ss_flags: 0,
                    ss_size: ALT_STACK_SIZE,
                };
                if libc::sigaltstack(&stack, ptr::null_mut()) != 0 {
                    std::alloc::dealloc(base, layout);
                    return Err(Error::Misuse("sigaltstack failed"));
                }
                cell.set(base as *mut libc::c_void);
            }
            Ok(())
        })
    }

    /// Async-signal-safe handler entry point: only page classification,
    /// `mprotect`, and a possible forward to the previous handler — no
    /// allocation, no `tracing`.
    extern "C" fn handler(sig: libc::c_int, info: *mut libc::siginfo_t, ctx: *mut libc::c_void) {
        let addr = unsafe { (*info).si_addr() } as *const u8;
        let decision = classify(addr);

        match decision {
            FaultDecision::Overflow => report_overflow_and_abort(addr),
            FaultDecision::Forward => forward(sig, info, ctx),
            FaultDecision::Grow { .. } | FaultDecision::CommitHeaderPage { .. } => {
                if handle(addr, decision, true).is_err() {
                    report_overflow_and_abort(addr);
                }
            }
        }
    }

    fn forward(sig: libc::c_int, info: *mut libc::siginfo_t, ctx: *mut libc::c_void) {
        let prev = if sig == libc::SIGSEGV {
            PREV_SEGV.get()
        } else {
            PREV_BUS.get()
        };
        match prev {
            Some(prev) if prev.sa_sigaction != libc::SIG_DFL && prev.sa_sigaction != libc::SIG_IGN => {
                unsafe {
                    let f: extern "C" fn(libc::c_int, *mut libc::siginfo_t, *mut libc::c_void) =
                        std::mem::transmute(prev.sa_sigaction);
                    f(sig, info, ctx);
                }
            }
            _ => unsafe {
                libc::signal(sig, libc::SIG_DFL);
                libc::raise(sig);
            },
        }
    }

    fn report_overflow_and_abort(addr: *const u8) -> ! {
        // Not safe to use `tracing` from signal context; write directly.
        let msg = b"mprompt: stack overflow\n";
        unsafe {
            libc::write(libc::STDERR_FILENO, msg.as_ptr() as *const libc::c_void, msg.len());
        }
        let _ = addr;
        unsafe { libc::abort() }
    }
}

#[cfg(windows)]
mod imp {
    use crate::error::{Error, Result};

    use super::{classify, handle, FaultDecision};
    use windows_sys::Win32::System::Diagnostics::Debug::{
        AddVectoredExceptionHandler, EXCEPTION_CONTINUE_EXECUTION, EXCEPTION_CONTINUE_SEARCH,
        EXCEPTION_POINTERS,
    };

    pub(super) fn install_process_handler() -> Result<()> {
        // SAFETY: registers a process-wide vectored handler; `1` runs it
        // first, ahead of any handler already installed by the host.
        let handle = unsafe { AddVectoredExceptionHandler(1, Some(handler)) };
        if handle.is_null() {
            return Err(Error::Misuse("AddVectoredExceptionHandler failed"));
        }
        tracing::debug!("installed vectored exception handler");
        Ok(())
    }

    pub(super) fn install_thread_alt_stack() -> Result<()> {
        // Windows has no per-thread alternate signal stack; the vectored
        // handler runs on the faulting thread using the guard-page margin
        // the OS itself reserves.
        Ok(())
    }

    unsafe extern "system" fn handler(info: *mut EXCEPTION_POINTERS) -> i32 {
        let record = unsafe { &*(*info).ExceptionRecord };
        // STATUS_ACCESS_VIOLATION == 0xC0000005; the faulting address is the
        // exception record's second information parameter.
        if record.ExceptionCode as u32 != 0xC000_0005 || record.NumberParameters < 2 {
            return EXCEPTION_CONTINUE_SEARCH;
        }
        let addr = record.ExceptionInformation[1] as *const u8;
        let decision = classify(addr);
        match decision {
            FaultDecision::Overflow | FaultDecision::Forward => EXCEPTION_CONTINUE_SEARCH,
            FaultDecision::Grow { .. } | FaultDecision::CommitHeaderPage { .. } => {
                if handle(addr, decision, true).is_ok() {
                    EXCEPTION_CONTINUE_EXECUTION
                } else {
                    EXCEPTION_CONTINUE_SEARCH
                }
            }
        }
    }
}

/// Whether this process is currently running under a debugger.
/// We detect the condition via the standard `P_TRACED` flag but do not
/// install a Mach port — no dependency in this crate's stack speaks the Mach
/// exception-port protocol, so under a debugger on macOS we fall back to the
/// POSIX path and log once that growth may not work correctly (Open
/// Question, resolved in DESIGN.md).
#[cfg(target_os = "macos")]
pub(crate) fn debugger_attached() -> bool {
    static WARNED: AtomicBool = AtomicBool::new(false);
    let traced = unsafe {
        let mut info: libc::kinfo_proc = std::mem::zeroed();
        let mut size = std::mem::size_of::<libc::kinfo_proc>();
        let mut mib = [
            libc::CTL_KERN,
            libc::KERN_PROC,
            libc::KERN_PROC_PID,
            libc::getpid(),
        ];
        let ok = libc::sysctl(
            mib.as_mut_ptr(),
            mib.len() as u32,
            &mut info as *mut _ as *mut libc::c_void,
            &mut size,
            std::ptr::null_mut(),
            0,
        ) == 0;
        ok && (info.kp_proc.p_flag & libc::P_TRACED) != 0
    };
    if traced && !WARNED.swap(true, Ordering::Relaxed) {
        tracing::warn!("debugger attached: Mach exception port fallback not implemented, relying on SIGSEGV handler");
    }
    traced
}

#[cfg(not(target_os = "macos"))]
pub(crate) fn debugger_attached() -> bool {
    false
}
