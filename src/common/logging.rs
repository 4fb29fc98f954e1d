//! Logging setup for the `scatha` binary.
//!
//! The library itself only ever calls the `log` facade macros; whether those
//! go anywhere is entirely up to whoever links the library in. The CLI binary
//! is the one caller that actually installs a logger.

/// Installs `env_logger` as the global logger, honoring `RUST_LOG` and
/// defaulting to `warn` when unset. Safe to call more than once; subsequent
/// calls are no-ops.
pub fn init(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp(None)
        .try_init();
}
