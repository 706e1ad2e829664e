//! Register context: architecture-specific save/restore of callee-saved
//! registers plus a controlled jump onto a foreign stack.
//!
//! `RegContext` owns a `swap`/`swap_link`/`init_with` trio that routes
//! through [`crate::detail`]'s per-architecture backend and carries a raw
//! stack pointer instead of a generator-specific `StackPointer` newtype.

use crate::detail::{self, Registers};
use crate::gstack::Gstack;

/// The first argument is the value being threaded through the swap (the
/// resumption's carried argument); the second is the stack pointer of the
/// context being entered. Architecture backends use this as the bootstrap
/// entry-point signature.
pub(crate) type InitFn = unsafe extern "C" fn(usize, *mut u8);

/// An opaque snapshot of one context's callee-saved registers, instruction
/// pointer, and stack pointer.
#[derive(Debug)]
pub(crate) struct RegContext {
    regs: Registers,
}

impl RegContext {
    /// A context representing "the current thread, before ever entering a
    /// prompt" — used as the very first parent context.
    pub(crate) fn root() -> RegContext {
        RegContext {
            regs: Registers::root(),
        }
    }

    /// An empty context for a not-yet-entered prompt.
    pub(crate) fn empty() -> RegContext {
        RegContext {
            regs: Registers::new(),
        }
    }

    #[inline]
    pub(crate) fn set_sp(&mut self, sp: *mut u8) {
        self.regs.set_sp(sp)
    }

    pub(crate) fn sp(&self) -> *mut u8 {
        self.regs.sp()
    }

    /// Prefetch the top of this context's stack, hiding some of the cache
    /// miss latency of an imminent swap into it.
    #[inline]
    pub(crate) fn prefetch(&self) {
        self.regs.prefetch();
    }

    /// Prepare `self` so that the *first* [`RegContext::swap`]/[`RegContext::swap_link`]
    /// into it calls `entry` with the gstack's top as its stack pointer.
    #[inline]
    pub(crate) fn init_with(&mut self, entry: InitFn, stack: &Gstack) {
        // this sets up the initial call frame; the actual call happens the
        // first time a peer swaps into this context.
        unsafe { detail::initialize_call_frame(&mut self.regs, entry, stack) };
    }

    /// Switch execution onto `dst`, passing `arg` through, and return once a
    /// peer calls `swap`/`swap_link` back. This is the primitive both
    /// `Prompt::resume` and `Prompt::yield_` build on: saving and
    /// immediately restoring preserves all callee-saved registers, so it
    /// behaves as if the saver returned normally.
    ///
    /// # Safety
    /// `dst` must describe a context previously produced by `init_with` (not
    /// yet entered) or captured by a prior `swap`/`swap_link` that suspended
    /// this same context; every higher-level prompt-chain invariant is the
    /// caller's responsibility — this function only moves
    /// registers and control flow.
    #[inline]
    pub(crate) unsafe fn swap(dst: &mut RegContext, arg: usize) -> usize {
        let sp = dst.regs.sp();
        let (ret, new_sp) = unsafe { detail::swap(arg, sp) };
        dst.regs.set_sp(new_sp);
        ret
    }

    /// Like [`RegContext::swap`], but also links the call stacks together by
    /// writing the current stack bottom into the new stack's unwind-linking
    /// slot, so a frame-pointer/DWARF unwinder can walk from the entered
    /// prompt back into its resumer.
    ///
    /// # Safety
    /// Same obligations as [`RegContext::swap`]; `stack_base` must be the
    /// current top of the stack being entered.
    #[inline]
    pub(crate) unsafe fn swap_link(dst: &mut RegContext, stack_base: *mut u8, arg: usize) -> usize {
        let sp = dst.regs.sp();
        let (ret, new_sp) = unsafe { detail::swap_link(arg, sp, stack_base) };
        dst.regs.set_sp(new_sp);
        ret
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn test_gstack() -> Box<Gstack> {
        let cfg = Config {
            stack_max_size: 256 * 1024,
            stack_initial_commit: crate::platform::page_size(),
            stack_gap_size: 64 * 1024,
            ..Default::default()
        }
        .resolve(crate::platform::page_size());
        Gstack::new_fresh(&cfg, 0).expect("alloc")
    }

    unsafe extern "C" fn echo_loop(arg: usize, sp: *mut u8) {
        // `sp` is the parent's stack pointer as captured by the first
        // `swap_link`/`swap` into this context; reconstruct a RegContext so
        // we can swap back into the caller repeatedly.
        let mut parent = RegContext::root();
        parent.set_sp(sp);
        let mut out = arg;
        loop {
            // SAFETY: `parent` was captured by the swap that entered this
            // function, so swapping back into it resumes the caller.
            let next = unsafe { RegContext::swap(&mut parent, out) };
            if next == 0 {
                return;
            }
            out = next;
        }
    }

    #[test]
    fn swap_link_roundtrip_echoes_argument() {
        let stack = test_gstack();
        let mut ctx = RegContext::empty();
        ctx.init_with(echo_loop, &stack);

        // SAFETY: `ctx` was just initialized with `init_with` and has never
        // been entered.
        let ret = unsafe { RegContext::swap_link(&mut ctx, stack.base(), 42) };
        assert_eq!(ret, 42);
        let ret = unsafe { RegContext::swap_link(&mut ctx, stack.base(), 43) };
        assert_eq!(ret, 43);
        unsafe { RegContext::swap_link(&mut ctx, stack.base(), 0) };
    }
}
