//! Process-wide and per-thread lifecycle hooks.
//!
//! Two jobs live here: [`install_process_hooks`] runs the handful of
//! one-time, process-global setup steps the first time [`crate::config::init`]
//! or [`crate::config::get`] touches this crate, and [`ensure_thread_ready`]
//! lazily prepares each thread the first time it enters a prompt, registering
//! a teardown guard that flushes this thread's gstack cache and checks for a leaked prompt chain when the thread exits.

use std::cell::Cell;

struct ThreadGuard {
    ready: Cell<bool>,
}

impl ThreadGuard {
    const fn new() -> Self {
        ThreadGuard {
            ready: Cell::new(false),
        }
    }
}

impl Drop for ThreadGuard {
    fn drop(&mut self) {
        // A thread should never exit with a prompt still suspended on it
        // (nothing would ever resume it again). This is
        // debug-checked rather than enforced because panicking or aborting
        // from a thread-local destructor is worse than the leak it would be
        // catching; release builds simply leave the gstack(s) for the
        // process allocator to reclaim at exit.
        debug_assert!(
            crate::prompt::prompt_parent(None).is_none(),
            "mprompt: thread exited with an active prompt chain"
        );
        crate::gstack::clear_cache();
    }
}

thread_local! {
    static THREAD_GUARD: ThreadGuard = const { ThreadGuard::new() };
}

/// Make sure this thread's alternate signal stack is installed and its
/// teardown guard is registered.
/// Idempotent and cheap enough to call on every [`crate::prompt::prompt`]/
/// [`crate::prompt::resume`].
pub(crate) fn ensure_thread_ready() {
    THREAD_GUARD.with(|guard| {
        if guard.ready.replace(true) {
            return;
        }
        if let Err(err) = crate::fault::install_alt_stack() {
            tracing::warn!(%err, "failed to install this thread's alternate signal stack");
        }
    });
}

/// Process-wide one-time hooks: install the fault handler that
/// turns a growable gstack's page faults into on-demand commits. Called from
/// [`crate::config::init`]/[`crate::config::get`] behind their own
/// once-only `OnceCell`, so this itself does not need to be idempotent-guarded
/// again here.
pub(crate) fn install_process_hooks() {
    if let Err(err) = crate::fault::install() {
        tracing::error!(%err, "failed to install mprompt's process-wide fault handler");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_thread_ready_is_idempotent() {
        ensure_thread_ready();
        ensure_thread_ready();
    }
}
