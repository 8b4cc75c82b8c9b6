//! Logging bootstrap shared by binaries and integration tests.

use env_logger::{Builder, Env};

/// Initialise the global logger, honouring `RUST_LOG` and falling back to `default_level`.
///
/// Safe to call more than once; later calls are ignored.
pub fn init(default_level: &str) {
    let env = Env::default().default_filter_or(default_level);
    let _ = Builder::from_env(env)
        .format_timestamp_secs()
        .format_target(false)
        .try_init();
}

/// Logger for tests: captured output, debug level unless `RUST_LOG` says otherwise.
pub fn init_for_tests() {
    let _ = Builder::from_env(Env::default().default_filter_or("debug"))
        .is_test(true)
        .try_init();
}
