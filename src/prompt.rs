//! The prompt engine: create/enter, resume/resume-tail, yield, and the
//! per-thread prompt chain.
//!
//! A `Prompt<A, R>` is a thin, `Copy` handle to a type-erased
//! [`PromptInner`] that lives for the prompt's whole lifetime on its own
//! gstack. Values crossing the yield/resume boundary are type-erased to
//! `Box<dyn Any + Send>` and downcast back at the one call site (either end
//! of a single `yield_`/`resume` pair) that knows the concrete type — the
//! engine itself never needs to know `A`, `Y`, `RA`, or `R`.

use std::any::Any;
use std::cell::{Cell, UnsafeCell};
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::ptr::NonNull;

use crate::error::CarriedPanic;
use crate::gstack::{self, Gstack, SavedSlice};
use crate::reg_context::RegContext;
use crate::resumption::{AbandonUnwind, BoxedAny, MResumption, Resumption, ToResumer};

thread_local! {
    /// Innermost active prompt on this thread, or null.
    static CHAIN: Cell<*mut PromptInner> = const { Cell::new(std::ptr::null_mut()) };
}

/// The type-erased prompt control block. One is heap-allocated per prompt
/// for the lifetime of [`prompt`]'s call. It carries two separate
/// [`RegContext`] fields: `ctx` for `resume`'s direction and `return_ctx` for
/// `yield_`'s, each a plain ping-pong handle updated purely as a side effect
/// of `RegContext::swap` — see the fields' own doc comments.
pub(crate) struct PromptInner {
    gstack: Cell<Option<Box<Gstack>>>,
    /// Where `resume`/`resume_tail` jump to re-enter this prompt. Always
    /// holds this prompt's own latest suspension point (or, before the
    /// first entry, the bootstrap frame `init_with` built).
    ctx: UnsafeCell<RegContext>,
    /// Where `yield_`/`myield` jump to hand control back to whoever is
    /// currently driving this prompt. A single `RegContext` can't serve
    /// both directions: the resumer's own continuation isn't something this
    /// prompt's body has a field for until the entry trampoline is handed
    /// the resumer's stack pointer as a plain argument (the same scheme
    /// `reg_context.rs`'s own test builds its local `dst` context from), so
    /// this field is seeded from that argument on first
    /// entry and kept current afterwards purely as a side effect of
    /// `RegContext::swap`'s own bookkeeping.
    return_ctx: UnsafeCell<RegContext>,
    parent: Cell<*mut PromptInner>,
    top: Cell<*mut PromptInner>,
    to_resumer: Cell<Option<ToResumer>>,
    resume_arg: Cell<Option<BoxedAny>>,
}

type InnerClosure = Box<dyn FnOnce(*mut u8) + Send>;

unsafe extern "C" fn trampoline_entry(arg: usize, parent_sp: *mut u8) {
    let closure: InnerClosure = unsafe { *Box::from_raw(arg as *mut InnerClosure) };
    closure(parent_sp);
    unreachable!("mprompt: a finished prompt's stack must never be re-entered");
}

impl PromptInner {
    fn create_fresh() -> NonNull<PromptInner> {
        let gstack = gstack::alloc(0).expect("mprompt: gstack allocation failed");
        let boxed = Box::new(PromptInner {
            gstack: Cell::new(Some(gstack)),
            ctx: UnsafeCell::new(RegContext::empty()),
            return_ctx: UnsafeCell::new(RegContext::empty()),
            parent: Cell::new(std::ptr::null_mut()),
            top: Cell::new(std::ptr::null_mut()),
            to_resumer: Cell::new(None),
            resume_arg: Cell::new(None),
        });
        let ptr = NonNull::from(Box::leak(boxed));
        // Fresh: `top = self`, so the first resume's
        // `current_top = P.top` lands exactly on `P`.
        unsafe { (*ptr.as_ptr()).top.set(ptr.as_ptr()) };
        ptr
    }

    fn init_entry(&self, closure: InnerClosure) {
        let stack_ref = self.gstack.take().expect("fresh prompt always owns a gstack");
        unsafe {
            (*self.ctx.get()).init_with(trampoline_entry, &stack_ref);
        }
        self.gstack.set(Some(stack_ref));
        // Stash the closure pointer where `resume_raw` can find it for the
        // one and only fresh-entry swap.
        let raw = Box::into_raw(Box::new(closure)) as usize;
        self.resume_arg.set(Some(Box::new(RawEntryArg(raw))));
    }

    fn stack_base(&self) -> *mut u8 {
        let stack = self.gstack.take().expect("prompt's gstack missing mid-resume");
        let base = stack.base();
        self.gstack.set(Some(stack));
        base
    }

    fn as_raw_gstack(&self) -> *mut Gstack {
        let stack = self.gstack.take().expect("prompt's gstack missing mid-resume");
        let ptr = stack.as_ref() as *const Gstack as *mut Gstack;
        self.gstack.set(Some(stack));
        ptr
    }

    fn destroy(ptr: NonNull<PromptInner>) {
        unsafe {
            let inner = Box::from_raw(ptr.as_ptr());
            if let Some(stack) = inner.gstack.into_inner() {
                let in_unwind = std::thread::panicking();
                gstack::free(stack, in_unwind);
            }
        }
    }
}

/// Sentinel payload used only for the first, fresh-entry swap: carries the
/// raw pointer to the boxed bootstrap closure through the same
/// `resume_arg` cell every later resume uses for its typed argument.
struct RawEntryArg(usize);

/// A handle to a live prompt, valid for the duration of its body (from
/// inside `start` or any `yield_` continuation it schedules). `Copy` because
/// nothing about holding it mutates or consumes the underlying prompt.
pub struct Prompt<A, R> {
    inner: NonNull<PromptInner>,
    _marker: PhantomData<fn(A) -> R>,
}

impl<A, R> Clone for Prompt<A, R> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<A, R> Copy for Prompt<A, R> {}

/// An opaque prompt identity for ancestry checks.
/// Carries no type information since an ancestor's `A`/`R` are generally
/// different from the caller's.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptId(pub(crate) NonNull<PromptInner>);

impl<A, R> Prompt<A, R> {
    pub fn id(&self) -> PromptId {
        PromptId(self.inner)
    }

    /// Yield to this (active ancestor) prompt, running `fn_(resumption,
    /// arg)` on the stack of whoever is currently driving it via
    /// `resume`/`resume_tail`, and return whatever that resumer later
    /// supplies via `resume`/`resume_tail`.
    pub fn yield_<Y, RA>(&self, fn_: impl FnOnce(Resumption<RA, R>, Y) -> R + 'static, arg: Y) -> RA
    where
        Y: 'static,
        RA: Send + 'static,
        R: Send + 'static,
    {
        let target = self.inner;
        let thunk: Box<dyn FnOnce() -> BoxedAny> = Box::new(move || {
            let resumption = Resumption::from_raw(target);
            let result: R = fn_(resumption, arg);
            Box::new(result) as BoxedAny
        });
        let ra = yield_raw(target.as_ptr(), ToResumer::Yield(thunk));
        *ra.downcast::<RA>()
            .unwrap_or_else(|_| panic!("mprompt: resume argument type mismatch"))
    }

    /// Multi-shot counterpart of [`Prompt::yield_`].
    pub fn myield<Y, RA>(
        &self,
        fn_: impl FnOnce(MResumption<RA, R>, Y) -> R + 'static,
        arg: Y,
    ) -> RA
    where
        Y: 'static,
        RA: Send + 'static,
        R: Send + 'static,
    {
        let target = self.inner;
        let thunk: Box<dyn FnOnce() -> BoxedAny> = Box::new(move || {
            // Captured here, on the resumer's side, strictly after
            // `yield_raw`'s swap has handed control back — this prompt's
            // `ctx` field already reflects the suspension point we just
            // left, and nothing else touches the gstack in between (see
            // `MState`'s doc comment for why this must be eager rather than
            // deferred to the first `mresume`).
            let pr = unsafe { &*target.as_ptr() };
            let sp = unsafe { (*pr.ctx.get()).sp() };
            let stack = pr.gstack.take().expect("suspended prompt owns its gstack");
            let slice = stack.save_from(sp).expect("mprompt: save_from failed");
            pr.gstack.set(Some(stack));
            let resumption = MResumption::new(target, slice);
            let result: R = fn_(resumption, arg);
            Box::new(result) as BoxedAny
        });
        let ra = yield_raw(target.as_ptr(), ToResumer::Yield(thunk));
        *ra.downcast::<RA>()
            .unwrap_or_else(|_| panic!("mprompt: resume argument type mismatch"))
    }

    /// Run `hook` inside this prompt's own suspended frame, then tear the
    /// prompt down. Intended
    /// for the excluded host layer's abort path, not ordinary control flow.
    pub fn run_unwind_hook(&self, hook: impl FnOnce() + Send + 'static) {
        force_unwind_with(self.inner, Box::new(UnwindHook(Box::new(hook))));
    }
}

/// Create a fresh prompt and immediately enter it: equivalent to `create`
/// followed by the first `resume`.
pub fn prompt<A, R>(start: impl FnOnce(Prompt<A, R>, A) -> R + Send + 'static, arg: A) -> R
where
    A: Send + 'static,
    R: Send + 'static,
{
    crate::thread_state::ensure_thread_ready();
    let inner = PromptInner::create_fresh();
    let handle = Prompt {
        inner,
        _marker: PhantomData,
    };
    let closure: InnerClosure = Box::new(move |parent_sp: *mut u8| {
        let pr = unsafe { &*inner.as_ptr() };
        // Seed the handle back to our resumer before running any user code,
        // since `yield_`/`myield` may need it at any point inside `start`.
        unsafe {
            let mut rc = RegContext::root();
            rc.set_sp(parent_sp);
            *pr.return_ctx.get() = rc;
        }
        let result = panic::catch_unwind(AssertUnwindSafe(|| start(handle, arg)));
        let to_resumer = match result {
            Ok(v) => ToResumer::Return(Box::new(v)),
            Err(e) if e.downcast_ref::<AbandonUnwind>().is_some() => {
                // An abandoned multi-shot resumption unwound this chain to
                // run destructors; nothing to report upward.
                ToResumer::Return(Box::new(()))
            }
            Err(e) => ToResumer::Exception(CarriedPanic(e)),
        };
        pr.to_resumer.set(Some(to_resumer));
        let return_ctx_ptr = pr.return_ctx.get();
        unsafe { RegContext::swap(&mut *return_ctx_ptr, 0) };
        unreachable!("mprompt: a finished prompt's stack must never be re-entered");
    });
    unsafe { (*inner.as_ptr()).init_entry(closure) };

    let to_resumer = resume_raw(inner.as_ptr());
    drive_result(inner, to_resumer)
}

/// Thrown by [`resume_tail`]/[`mresume_tail`] instead of recursing into a
/// fresh `resume_raw`/dispatch pair. Caught by the nearest
/// `drive_result`/`drive_mresult` loop iteration still on the native stack,
/// which resumes the carried target in its own place rather than nesting —
/// this is what keeps a long chain of tail resumes at O(1) driving-stack
/// depth instead of one frame per resumption.
///
/// `release` carries a tail-resumed `MResumption`'s shared state, extracted
/// via `into_state` rather than dropped normally, so it isn't released until
/// *after* `target` has actually been resumed — releasing it as part of the
/// unwind itself would tear the prompt down before the trampoline gets a
/// chance to resume it. Single-shot `resume_tail` has nothing to carry here:
/// `Resumption::into_raw` already disarms its own `Drop`.
struct TailCall {
    target: NonNull<PromptInner>,
    release: Option<std::rc::Rc<std::cell::RefCell<crate::resumption::MState>>>,
}

// SAFETY: carries only a prompt pointer and an `Rc` that is never touched
// off-thread; thrown and caught on the same thread (resumptions are
// themselves `!Send`).
unsafe impl Send for TailCall {}

/// Run `thunk`, catching a `TailCall` unwind and reporting it distinctly
/// from either a normal result or a genuine user panic.
enum StepOutcome<R> {
    Done(R),
    Tail(TailCall),
}

fn run_yield_step<R: Send + 'static>(thunk: Box<dyn FnOnce() -> BoxedAny>) -> StepOutcome<R> {
    match panic::catch_unwind(AssertUnwindSafe(thunk)) {
        Ok(v) => StepOutcome::Done(
            *v.downcast::<R>()
                .unwrap_or_else(|_| panic!("mprompt: yield handler return type mismatch")),
        ),
        Err(payload) => match payload.downcast::<TailCall>() {
            Ok(tail) => StepOutcome::Tail(*tail),
            Err(other) => panic::resume_unwind(other),
        },
    }
}

/// Resume `tail.target` and only then release any carried `MResumption`
/// state, preserving the order a non-tail `mresume` call would have had
/// (round-trip first, release at the very end).
fn resume_tail_call(tail: TailCall) -> (NonNull<PromptInner>, ToResumer) {
    let to_resumer = resume_raw(tail.target.as_ptr());
    if let Some(state) = tail.release {
        crate::resumption::release_mstate(&state);
    }
    (tail.target, to_resumer)
}

fn drive_result<R: Send + 'static>(inner: NonNull<PromptInner>, to_resumer: ToResumer) -> R {
    let mut current = inner;
    let mut to_resumer = to_resumer;
    loop {
        match to_resumer {
            ToResumer::Return(v) => {
                PromptInner::destroy(current);
                return *v
                    .downcast::<R>()
                    .unwrap_or_else(|_| panic!("mprompt: prompt return type mismatch"));
            }
            ToResumer::Exception(panic) => {
                PromptInner::destroy(current);
                panic::resume_unwind(panic.0)
            }
            ToResumer::Yield(thunk) => match run_yield_step::<R>(thunk) {
                StepOutcome::Done(v) => return v,
                StepOutcome::Tail(tail) => {
                    let (target, next) = resume_tail_call(tail);
                    current = target;
                    to_resumer = next;
                }
            },
        }
    }
}

/// Resume a single-shot resumption, growing the native driving stack by one
/// frame (this call's own) for the duration of the resumed prompt's run.
pub fn resume<RA, R>(r: Resumption<RA, R>, arg: RA) -> R
where
    RA: Send + 'static,
    R: Send + 'static,
{
    let inner = r.into_raw();
    unsafe { (*inner.as_ptr()).resume_arg.set(Some(Box::new(arg))) };
    let to_resumer = resume_raw(inner.as_ptr());
    drive_result(inner, to_resumer)
}

/// Tail-resume a single-shot resumption from inside its own yield handler.
/// Unlike [`resume`], this never recurses: it stashes the argument and
/// unwinds with a [`TailCall`], which the enclosing `drive_result` loop
/// catches and turns into another `resume_raw` call in its own stack frame.
/// A chain of `resume_tail` calls therefore runs in O(1) driving-stack
/// depth no matter how deep it goes.
pub fn resume_tail<RA, R>(r: Resumption<RA, R>, arg: RA) -> R
where
    RA: Send + 'static,
    R: Send + 'static,
{
    let inner = r.into_raw();
    unsafe { (*inner.as_ptr()).resume_arg.set(Some(Box::new(arg))) };
    panic::resume_unwind(Box::new(TailCall {
        target: inner,
        release: None,
    }))
}

/// Restore the eagerly-captured slice (see `MState`'s doc comment) and bump
/// the shared bookkeeping, shared by `mresume` and `mresume_tail` — both
/// need the same preamble before handing control to `resume_raw`.
fn restore_for_mresume<RA, R>(r: &MResumption<RA, R>) -> NonNull<PromptInner> {
    let mut state = r.state.borrow_mut();
    let inner_ref = unsafe { &*state.prompt.as_ptr() };
    let stack_ref = inner_ref.gstack.take().expect("suspended prompt owns its gstack");
    stack_ref.restore_into(&state.slice);
    unsafe { (*inner_ref.ctx.get()).set_sp(state.slice.sp()) };
    inner_ref.gstack.set(Some(stack_ref));
    state.resume_count += 1;
    state.tail_generation += 1;
    state.prompt
}

/// Multi-shot counterpart of `drive_result`. The underlying prompt is never
/// destroyed here: a sibling handle may still need to replay it, so teardown
/// happens only when the last live `MResumption` handle drops (see
/// `destroy_prompt`/`abandon_multi_shot`).
fn drive_mresult<R: Send + 'static>(mut to_resumer: ToResumer) -> R {
    loop {
        match to_resumer {
            ToResumer::Return(v) => {
                return *v
                    .downcast::<R>()
                    .unwrap_or_else(|_| panic!("mprompt: prompt return type mismatch"));
            }
            ToResumer::Exception(panic) => panic::resume_unwind(panic.0),
            ToResumer::Yield(thunk) => match run_yield_step::<R>(thunk) {
                StepOutcome::Done(v) => return v,
                StepOutcome::Tail(tail) => {
                    let (_, next) = resume_tail_call(tail);
                    to_resumer = next;
                }
            },
        }
    }
}

/// Multi-shot `mresume`: restore the eagerly-captured slice, then resume
/// normally. This engine always restores unconditionally rather than trying
/// to detect whether the bytes are already correct — the slice was already
/// captured at `myield` time, and a restore onto bytes that happen to
/// already match is harmless.
pub fn mresume<RA, R>(r: MResumption<RA, R>, arg: RA) -> R
where
    RA: Send + 'static,
    R: Send + 'static,
{
    let inner = restore_for_mresume(&r);
    unsafe { (*inner.as_ptr()).resume_arg.set(Some(Box::new(arg))) };
    let to_resumer = resume_raw(inner.as_ptr());
    drive_mresult(to_resumer)
}

/// Tail-resume a multi-shot resumption from inside its own yield handler.
/// Does the same restore preamble as [`mresume`], then unwinds with a
/// [`TailCall`] instead of calling `resume_raw` itself — caught by the
/// enclosing `drive_mresult` loop, keeping a chain of tail resumes at O(1)
/// driving-stack depth the same way `resume_tail` does for the single-shot
/// case.
pub fn mresume_tail<RA, R>(r: MResumption<RA, R>, arg: RA) -> R
where
    RA: Send + 'static,
    R: Send + 'static,
{
    let inner = restore_for_mresume(&r);
    unsafe { (*inner.as_ptr()).resume_arg.set(Some(Box::new(arg))) };
    panic::resume_unwind(Box::new(TailCall {
        target: inner,
        release: Some(r.into_state()),
    }))
}

pub fn mresume_dup<RA, R>(r: &MResumption<RA, R>) -> MResumption<RA, R> {
    r.clone()
}

pub fn mresume_resume_count<RA, R>(r: &MResumption<RA, R>) -> u32 {
    r.state.borrow().resume_count
}

/// Whether dropping `r` right now would trigger the unwind-on-abandon path.
pub fn mresume_should_unwind<RA, R>(r: &MResumption<RA, R>) -> bool {
    r.live_handles() == 1 && r.state.borrow().resume_count == 0
}

pub fn mresume_drop<RA, R>(r: MResumption<RA, R>) {
    drop(r)
}

/// Walk the active chain from `p`'s parent (or, given `None`, from the
/// current top) one step outward.
pub fn prompt_parent(p: Option<PromptId>) -> Option<PromptId> {
    let ptr = match p {
        Some(id) => unsafe { (*id.0.as_ptr()).parent.get() },
        None => CHAIN.with(|c| c.get()),
    };
    NonNull::new(ptr).map(PromptId)
}

/// The innermost prompt currently active on this thread, if any. Equivalent to `prompt_parent(None)`, named for
/// the excluded host layer's own vocabulary.
pub fn prompt_current() -> Option<PromptId> {
    prompt_parent(None)
}

/// An opaque snapshot of a suspended prompt's live stack bytes, captured
/// "for foreign reasons" by a host integration layer outside the normal
/// `myield`/`mresume` flow.
pub struct ForeignSlice(SavedSlice);

/// Snapshot `id`'s current suspension point. `id` must name a
/// currently-suspended prompt (any ancestor reachable via `prompt_parent`);
/// behavior is undefined otherwise.
pub fn save_foreign_stack(id: PromptId) -> ForeignSlice {
    let pr = unsafe { &*id.0.as_ptr() };
    let sp = unsafe { (*pr.ctx.get()).sp() };
    let stack = pr.gstack.take().expect("suspended prompt owns its gstack");
    let slice = stack.save_from(sp).expect("mprompt: save_from failed");
    pr.gstack.set(Some(stack));
    ForeignSlice(slice)
}

/// Write a previously [`save_foreign_stack`]'d snapshot back onto `id`'s
/// gstack at its original address.
pub fn restore_foreign_stack(id: PromptId, slice: &ForeignSlice) {
    let pr = unsafe { &*id.0.as_ptr() };
    let stack = pr.gstack.take().expect("suspended prompt owns its gstack");
    stack.restore_into(&slice.0);
    unsafe { (*pr.ctx.get()).set_sp(slice.0.sp()) };
    pr.gstack.set(Some(stack));
}

/// Link `p` into the chain, perform one register-context swap, unlink, and
/// return whatever the other side left in `to_resumer`.
fn resume_raw(p: *mut PromptInner) -> ToResumer {
    let pr = unsafe { &*p };
    let cur_top = CHAIN.with(|c| c.get());
    pr.parent.set(cur_top);
    let new_top = pr.top.replace(std::ptr::null_mut());
    CHAIN.with(|c| c.set(new_top));

    gstack::push_active(pr.as_raw_gstack());
    let stack_base = pr.stack_base();

    let arg = pr.resume_arg.take();
    let raw_arg = match arg {
        Some(boxed) => match boxed.downcast::<RawEntryArg>() {
            Ok(entry) => entry.0,
            Err(boxed) => {
                pr.resume_arg.set(Some(boxed));
                0
            }
        },
        None => 0,
    };

    let ctx_ptr = pr.ctx.get();
    unsafe { RegContext::swap_link(&mut *ctx_ptr, stack_base, raw_arg) };

    gstack::pop_active();
    CHAIN.with(|c| c.set(cur_top));

    pr.to_resumer
        .take()
        .expect("mprompt: prompt resumed without recording a transfer")
}

/// Suspend the currently running prompt `p`, recording `to_resumer` for
/// whoever is driving it, and block until a later `resume`/`mresume`
/// delivers a fresh argument.
fn yield_raw(p: *mut PromptInner, to_resumer: ToResumer) -> BoxedAny {
    let pr = unsafe { &*p };
    let cur_top = CHAIN.with(|c| c.get());
    pr.top.set(cur_top);
    CHAIN.with(|c| c.set(pr.parent.get()));
    pr.parent.set(std::ptr::null_mut());

    pr.to_resumer.set(Some(to_resumer));
    let return_ctx_ptr = pr.return_ctx.get();
    unsafe { RegContext::swap(&mut *return_ctx_ptr, 0) };

    let arg = pr
        .resume_arg
        .take()
        .expect("mprompt: prompt resumed without an argument");
    if arg.is::<AbandonUnwind>() {
        // Waking up from an abandoned resumption's forced unwind: unwind right here so every local destructor between this
        // point and the prompt's entry trampoline runs exactly once.
        panic::resume_unwind(arg);
    }
    match arg.downcast::<UnwindHook>() {
        Ok(hook) => {
            // Run the host's hook inside this very frame, then unwind
            // exactly as an ordinary abandon would.
            (hook.0)();
            panic::resume_unwind(Box::new(AbandonUnwind));
        }
        Err(arg) => arg,
    }
}

/// Force-unwind an abandoned prompt chain so its local destructors run
/// exactly once, without surfacing a user-visible panic.
fn force_unwind_and_destroy(inner: NonNull<PromptInner>) {
    force_unwind_with(inner, Box::new(AbandonUnwind));
}

/// Re-enter a suspended chain with `sentinel` stashed where `yield_raw` looks
/// for it, then tear the prompt down once the unwind it triggers reaches the
/// entry trampoline's `catch_unwind`.
fn force_unwind_with(inner: NonNull<PromptInner>, sentinel: Box<dyn Any + Send>) {
    unsafe { (*inner.as_ptr()).to_resumer.set(None) };
    unsafe { (*inner.as_ptr()).resume_arg.set(Some(sentinel)) };
    let to_resumer = resume_raw(inner.as_ptr());
    match to_resumer {
        ToResumer::Return(_) => PromptInner::destroy(inner),
        ToResumer::Exception(_) => PromptInner::destroy(inner),
        ToResumer::Yield(_) => {
            // A nested ancestor yielded instead of unwinding further; this
            // should not happen for a pure abandon-unwind since nothing
            // calls `yield_`/`myield` again on the way out, but guard
            // against it rather than leaking silently.
            debug_assert!(false, "mprompt: abandon-unwind observed an unexpected yield");
        }
    }
}

/// Sentinel carrying a host-supplied closure to run inside a suspended
/// chain's own frame before it unwinds. Recognized by `yield_raw` the same way `AbandonUnwind` is.
pub(crate) struct UnwindHook(pub(crate) Box<dyn FnOnce() + Send>);

pub(crate) fn abandon_single_shot(inner: NonNull<PromptInner>) {
    force_unwind_and_destroy(inner);
}

/// Tear down a multi-shot prompt's underlying `PromptInner` once the last
/// live `MResumption` handle drops after at least one successful resume
/// (no unwind needed: the body already ran its own destructors through a
/// normal `Return`/`Exception` dispatch).
pub(crate) fn destroy_prompt(inner: NonNull<PromptInner>) {
    PromptInner::destroy(inner);
}

/// Restore an eagerly-captured slice and force-unwind it: the resumption was never
/// resumed, so its slice is still exactly the one `myield` captured.
pub(crate) fn abandon_multi_shot(inner: NonNull<PromptInner>, slice: &SavedSlice) {
    let pr = unsafe { &*inner.as_ptr() };
    let stack = pr.gstack.take().expect("suspended prompt owns its gstack");
    stack.restore_into(slice);
    unsafe { (*pr.ctx.get()).set_sp(slice.sp()) };
    pr.gstack.set(Some(stack));
    force_unwind_and_destroy(inner);
}
