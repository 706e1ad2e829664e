//! Resumptions: the single-shot, move-only [`Resumption`] and the
//! refcounted, replayable [`MResumption`].
//!
//! Both wrap a raw [`crate::prompt::PromptInner`] pointer and are deliberately
//! `!Send + !Sync`: a resumption is only ever valid on the thread that
//! captured it.

use std::any::Any;
use std::cell::RefCell;
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::rc::Rc;

use crate::error::CarriedPanic;
use crate::gstack::SavedSlice;
use crate::prompt::PromptInner;

pub(crate) type BoxedAny = Box<dyn Any + Send>;

/// What a suspended prompt hands back to whoever resumes it.
/// The `Yield` variant is a zero-argument closure that already captures the
/// user's `fn_`, the freshly built resumption handle, and the yield
/// argument, so the caller driving `resume`/`mresume` only has to call it
/// and downcast the result to `R` (see `prompt::resume_raw`'s caller).
pub(crate) enum ToResumer {
    Return(BoxedAny),
    Exception(CarriedPanic),
    Yield(Box<dyn FnOnce() -> BoxedAny>),
}

/// Thrown from inside [`myield_drop`] machinery to unwind an abandoned
/// multi-shot resumption's captured chain without surfacing a user-visible
/// exception.
/// The prompt entry trampoline's `catch_unwind` recognizes this type
/// specifically and swallows it.
pub(crate) struct AbandonUnwind;

/// A single-shot resumption: consumes exactly one of [`resume`],
/// [`resume_tail`], or being dropped.
/// Move-only — there is no `Clone`.
pub struct Resumption<RA, R> {
    pub(crate) inner: Option<NonNull<PromptInner>>,
    pub(crate) _marker: PhantomData<fn(RA) -> R>,
}

impl<RA, R> Resumption<RA, R> {
    pub(crate) fn from_raw(inner: NonNull<PromptInner>) -> Self {
        Resumption {
            inner: Some(inner),
            _marker: PhantomData,
        }
    }

    pub(crate) fn into_raw(mut self) -> NonNull<PromptInner> {
        self.inner
            .take()
            .expect("resumption already consumed")
    }
}

impl<RA, R> Drop for Resumption<RA, R> {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            // Dropping a fresh/consumed resumption without resuming it must
            // still run the captured chain's local destructors exactly once.
            crate::prompt::abandon_single_shot(inner);
        }
    }
}

/// A multi-shot resumption: replayable, refcounted, `Clone`-able within a
/// thread. Resuming it restores a
/// previously saved stack snapshot before replaying, except on the very
/// first use when the original stack bytes are still live.
pub struct MResumption<RA, R> {
    pub(crate) state: Rc<RefCell<MState>>,
    pub(crate) _marker: PhantomData<fn(RA) -> R>,
}

impl<RA, R> Clone for MResumption<RA, R> {
    fn clone(&self) -> Self {
        MResumption {
            state: Rc::clone(&self.state),
            _marker: PhantomData,
        }
    }
}

/// Shared state behind every live handle to one multi-shot resumption.
///
/// `slice` is captured *eagerly*, at the moment the resumption is created.
/// This engine captures unconditionally rather than lazily: a single
/// prompt's gstack can be the target of several distinct,
/// independently-resumable continuations minted by repeated `myield` calls
/// at different recursion depths (an N-queens-style backtracking search
/// exercises exactly this), and by the time a later `mresume` runs, an
/// intervening deeper yield may already have overwritten the bytes a lazy
/// capture would have relied on still being pristine. See `DESIGN.md` for
/// the tradeoff.
pub(crate) struct MState {
    pub(crate) prompt: NonNull<PromptInner>,
    pub(crate) slice: SavedSlice,
    pub(crate) resume_count: u32,
    /// Bumped on every non-tail resume of the owning prompt so a cached
    /// tail-return point can be invalidated.
    pub(crate) tail_generation: u32,
}

impl<RA, R> MResumption<RA, R> {
    pub(crate) fn new(prompt: NonNull<PromptInner>, slice: SavedSlice) -> Self {
        MResumption {
            state: Rc::new(RefCell::new(MState {
                prompt,
                slice,
                resume_count: 0,
                tail_generation: 0,
            })),
            _marker: PhantomData,
        }
    }

    pub(crate) fn live_handles(&self) -> usize {
        Rc::strong_count(&self.state)
    }

    /// Extract the shared state without running `Drop` — used by
    /// `mresume_tail`, which must not release this handle until the tail
    /// call it unwinds with has actually been resumed (see `prompt::TailCall`).
    pub(crate) fn into_state(self) -> Rc<RefCell<MState>> {
        let this = std::mem::ManuallyDrop::new(self);
        unsafe { std::ptr::read(&this.state) }
    }
}

/// Only the last live handle's drop matters; `Rc`'s own refcounting already
/// keeps `state` alive for everyone else. Shared between `MResumption`'s own
/// `Drop` impl and `mresume_tail`'s deferred release (see `into_state`).
pub(crate) fn release_mstate(state: &Rc<RefCell<MState>>) {
    if Rc::strong_count(state) == 1 {
        let guard = state.borrow();
        if guard.resume_count == 0 {
            crate::prompt::abandon_multi_shot(guard.prompt, &guard.slice);
        } else {
            crate::prompt::destroy_prompt(guard.prompt);
        }
    }
}

impl<RA, R> Drop for MResumption<RA, R> {
    fn drop(&mut self) {
        release_mstate(&self.state);
    }
}
