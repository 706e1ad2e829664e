//! Error taxonomy for the gstack allocator and prompt engine.

use std::fmt;

/// Result type used throughout the public API.
pub type Result<T> = std::result::Result<T, Error>;

/// The kinds of failure this crate surfaces to callers.
///
/// `MisuseContract` violations (resuming a consumed resumption, yielding to a
/// non-ancestor, cross-thread use) are `debug_assert!`-enforced instead of
/// being routed through this enum in release builds: asserting in debug and
/// leaving the behavior undefined in release avoids paying for the check on
/// the hot yield/resume path.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Reserving or committing virtual memory failed.
    #[error(
        "out of memory reserving/committing {size} bytes{}",
        if *.advise_vma_limit { " (consider raising vm.max_map_count or the process's address space limit)" } else { "" }
    )]
    OutOfMemory {
        size: usize,
        advise_vma_limit: bool,
    },

    /// A gstack's no-access gap was touched. Fatal: the thread cannot safely
    /// continue running on this stack.
    #[error("stack overflow detected at address {addr:#x}")]
    StackOverflow { addr: usize },

    /// A contract violation that a debug build would have caught with
    /// `debug_assert!`; surfaced here only for the paths that can detect and
    /// report it cheaply outside the hot path (e.g. `init` called twice).
    #[error("misuse of the prompt/resumption contract: {0}")]
    Misuse(&'static str),

    /// `init` was called a second time with settings that differ from the
    /// first call.
    #[error("mprompt::init called twice with different configuration")]
    AlreadyInitialized,
}

impl Error {
    pub(crate) fn oom(size: usize, advise_vma_limit: bool) -> Self {
        tracing::warn!(size, advise_vma_limit, "out of memory");
        Error::OutOfMemory {
            size,
            advise_vma_limit,
        }
    }

    pub(crate) fn stack_overflow(addr: usize) -> Self {
        tracing::error!(addr = format_args!("{addr:#x}"), "stack overflow");
        Error::StackOverflow { addr }
    }
}

/// A carried exception propagating across a prompt boundary. This is not part of [`Error`]: it is caught at
/// a prompt's entry trampoline with `std::panic::catch_unwind` and rethrown
/// at the resume site with `std::panic::resume_unwind`, the stand-in this
/// crate uses for a native exception mechanism.
pub(crate) struct CarriedPanic(pub Box<dyn std::any::Any + Send + 'static>);

impl fmt::Debug for CarriedPanic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CarriedPanic").finish_non_exhaustive()
    }
}
