//! Architecture dispatch for the register-context primitives. Each backend
//! exports `Registers`, `initialize_call_frame`, `swap`, and `swap_link`
//! with the signatures used by [`crate::reg_context`].

cfg_if::cfg_if! {
    if #[cfg(all(target_arch = "x86_64", unix))] {
        mod x86_64;
        pub(crate) use self::x86_64::*;
    } else if #[cfg(all(target_arch = "x86_64", windows))] {
        mod windows_x86_64;
        pub(crate) use self::windows_x86_64::*;
    } else if #[cfg(all(target_arch = "aarch64", unix))] {
        mod aarch64;
        pub(crate) use self::aarch64::*;
    } else {
        compile_error!("mprompt has no register-context backend for this target");
    }
}
