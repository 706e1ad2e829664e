//! Process-wide configuration.

use once_cell::sync::OnceCell;

use crate::error::{Error, Result};

/// The size of the no-access gap placed between adjacent gstacks, and at the
/// outer edges of a gpool reservation.
pub const DEFAULT_GAP_SIZE: usize = 64 * 1024;

/// Default maximum size of a single stacklet's reservation.
pub const DEFAULT_STACK_MAX_SIZE: usize = 8 * 1024 * 1024;

/// Default size of the guaranteed stack margin reserved for MSVC exception
/// unwinding on Windows.
pub const DEFAULT_EXN_GUARANTEED: usize = 32 * 1024;

/// Default number of gstacks kept in each thread's free cache.
pub const DEFAULT_STACK_CACHE_COUNT: i32 = 4;

/// Default gpool reservation ceiling.
pub const DEFAULT_GPOOL_MAX_SIZE: u64 = 256 * 1024 * 1024 * 1024;

/// Process-wide configuration, set once via [`crate::init`].
///
/// Every field defaults to zero/false in [`Default`]; [`Config::resolve`]
/// fills in the documented defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    pub gpool_enable: bool,
    pub stack_use_overcommit: bool,
    pub stack_reset_decommits: bool,
    pub stack_grow_fast: bool,
    pub gpool_max_size: u64,
    pub stack_max_size: usize,
    pub stack_initial_commit: usize,
    pub stack_gap_size: usize,
    pub stack_exn_guaranteed: usize,
    pub stack_cache_count: i32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            gpool_enable: false,
            stack_use_overcommit: false,
            stack_reset_decommits: false,
            stack_grow_fast: false,
            gpool_max_size: 0,
            stack_max_size: 0,
            stack_initial_commit: 0,
            stack_gap_size: 0,
            stack_exn_guaranteed: 0,
            stack_cache_count: 0,
        }
    }
}

impl Config {
    /// Fill in defaults for any zero-valued field, and apply the Linux
    /// overcommit probe when the caller did not explicitly request pool
    /// usage or overcommit.
    pub(crate) fn resolve(mut self, page_size: usize) -> ResolvedConfig {
        if self.gpool_max_size == 0 {
            self.gpool_max_size = DEFAULT_GPOOL_MAX_SIZE;
        }
        if self.stack_max_size == 0 {
            self.stack_max_size = DEFAULT_STACK_MAX_SIZE;
        }
        if self.stack_initial_commit == 0 {
            self.stack_initial_commit = page_size;
        }
        if self.stack_gap_size == 0 {
            self.stack_gap_size = DEFAULT_GAP_SIZE;
        }
        if self.stack_exn_guaranteed == 0 {
            self.stack_exn_guaranteed = DEFAULT_EXN_GUARANTEED;
        }
        if self.stack_cache_count == 0 {
            self.stack_cache_count = DEFAULT_STACK_CACHE_COUNT;
        }

        let overcommit = self.stack_use_overcommit || probe_overcommit();
        let use_gpool = self.gpool_enable || !overcommit;

        ResolvedConfig {
            raw: self,
            use_gpool,
        }
    }
}

/// [`Config`] after defaults and platform probing have been applied.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ResolvedConfig {
    pub raw: Config,
    pub use_gpool: bool,
}

impl std::ops::Deref for ResolvedConfig {
    type Target = Config;
    fn deref(&self) -> &Config {
        &self.raw
    }
}

/// Builder mirroring [`Config`]'s fields one setter at a time.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        ConfigBuilder::default()
    }

    pub fn gpool_enable(mut self, v: bool) -> Self {
        self.config.gpool_enable = v;
        self
    }

    pub fn stack_use_overcommit(mut self, v: bool) -> Self {
        self.config.stack_use_overcommit = v;
        self
    }

    pub fn stack_reset_decommits(mut self, v: bool) -> Self {
        self.config.stack_reset_decommits = v;
        self
    }

    pub fn stack_grow_fast(mut self, v: bool) -> Self {
        self.config.stack_grow_fast = v;
        self
    }

    pub fn gpool_max_size(mut self, v: u64) -> Self {
        self.config.gpool_max_size = v;
        self
    }

    pub fn stack_max_size(mut self, v: usize) -> Self {
        self.config.stack_max_size = v;
        self
    }

    pub fn stack_initial_commit(mut self, v: usize) -> Self {
        self.config.stack_initial_commit = v;
        self
    }

    pub fn stack_gap_size(mut self, v: usize) -> Self {
        self.config.stack_gap_size = v;
        self
    }

    pub fn stack_exn_guaranteed(mut self, v: usize) -> Self {
        self.config.stack_exn_guaranteed = v;
        self
    }

    pub fn stack_cache_count(mut self, v: i32) -> Self {
        self.config.stack_cache_count = v;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

/// Probe `/proc/sys/vm/overcommit_memory`: mode `2` is strict accounting
/// (no overcommit); any other value, or a read failure, is treated as
/// overcommit being in effect.
#[cfg(target_os = "linux")]
fn probe_overcommit() -> bool {
    match std::fs::read_to_string("/proc/sys/vm/overcommit_memory") {
        Ok(contents) => contents.trim() != "2",
        Err(err) => {
            tracing::debug!(%err, "could not read overcommit_memory, assuming overcommit");
            true
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn probe_overcommit() -> bool {
    // macOS and Windows both effectively overcommit for MAP_PRIVATE/MEM_RESERVE
    // anonymous mappings until first touch.
    true
}

static CONFIG: OnceCell<ResolvedConfig> = OnceCell::new();

/// Apply configuration for the whole process. Idempotent: a second call with
/// an identical `config` is a silent no-op; a second call with a *different*
/// config returns [`Error::AlreadyInitialized`].
pub fn init(config: Config) -> Result<()> {
    let page_size = crate::platform::page_size();
    let resolved = config.resolve(page_size);
    match CONFIG.set(resolved) {
        Ok(()) => {
            tracing::debug!(?config, use_gpool = resolved.use_gpool, "mprompt initialized");
            crate::thread_state::install_process_hooks();
            Ok(())
        }
        Err(_) => {
            let existing = CONFIG.get().expect("OnceCell just failed to set");
            if existing.raw == config {
                tracing::warn!("mprompt::init called again with identical configuration");
                Ok(())
            } else {
                Err(Error::AlreadyInitialized)
            }
        }
    }
}

/// [`init`] with [`Config::default()`].
pub fn init_default() -> Result<()> {
    init(Config::default())
}

/// Fetch the resolved configuration, applying defaults lazily if `init` was
/// never called explicitly.
pub(crate) fn get() -> ResolvedConfig {
    match CONFIG.get() {
        Some(c) => *c,
        None => {
            let page_size = crate::platform::page_size();
            let resolved = Config::default().resolve(page_size);
            // Racing initializers converge on whichever resolved config wins;
            // both are the same default, so this is harmless.
            let _ = CONFIG.set(resolved);
            crate::thread_state::install_process_hooks();
            *CONFIG.get().unwrap()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_zero_fields() {
        let resolved = Config::default().resolve(4096);
        assert_eq!(resolved.stack_max_size, DEFAULT_STACK_MAX_SIZE);
        assert_eq!(resolved.stack_gap_size, DEFAULT_GAP_SIZE);
        assert_eq!(resolved.stack_initial_commit, 4096);
        assert_eq!(resolved.stack_cache_count, DEFAULT_STACK_CACHE_COUNT);
    }

    #[test]
    fn explicit_fields_survive_resolve() {
        let cfg = ConfigBuilder::new()
            .stack_max_size(1 << 20)
            .stack_cache_count(8)
            .build();
        let resolved = cfg.resolve(4096);
        assert_eq!(resolved.stack_max_size, 1 << 20);
        assert_eq!(resolved.stack_cache_count, 8);
    }
}
