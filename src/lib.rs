//! `mprompt` — multi-prompt delimited control with in-place growable
//! stacklets.
//!
//! A *prompt* is an entry point onto its own growable native stack
//! ("gstack"). Code running inside a prompt can call [`Prompt::yield_`] or
//! [`Prompt::myield`] to suspend itself back to whoever is currently driving
//! it, handing over a value and a resumption handle. A single-shot
//! [`Resumption`] can be resumed (or tail-resumed) exactly once; a
//! [`MResumption`] can be cloned and resumed more than once, replaying from
//! a saved stack snapshot on every replay after the first.
//!
//! ```
//! mprompt::init_default().unwrap();
//!
//! let sum = mprompt::prompt(|p, start: i32| {
//!     let doubled = p.yield_(|r, n: i32| mprompt::resume(r, n * 2), start);
//!     start + doubled
//! }, 21);
//! assert_eq!(sum, 21 + 42);
//! ```
//!
//! See `DESIGN.md` for the grounding of each module and `SPEC_FULL.md` for
//! the full requirements this crate implements.

mod config;
mod detail;
mod error;
mod fault;
mod gpool;
mod gstack;
mod platform;
mod prompt;
mod reg_context;
mod resumption;
mod thread_state;

pub use config::{init, init_default, Config, ConfigBuilder};
pub use error::{Error, Result};
pub use prompt::{
    mresume, mresume_drop, mresume_dup, mresume_resume_count, mresume_should_unwind,
    mresume_tail, prompt, prompt_current, prompt_parent, resume, resume_tail,
    restore_foreign_stack, save_foreign_stack, ForeignSlice, Prompt, PromptId,
};
pub use resumption::{MResumption, Resumption};
