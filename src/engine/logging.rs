//! Tracing bootstrap
//!
//! Installs a `tracing-subscriber` formatter once per process. `RUST_LOG` wins over
//! the default level when set.

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;

static INIT: OnceCell<()> = OnceCell::new();

/// Default filter directive for the given verbosity
pub fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "airpouch_lib=debug,airpouch_cli=debug"
    } else {
        "airpouch_lib=warn"
    }
}

/// Initialize logging to stderr. Later calls are no-ops.
pub fn init_tracing(verbose: bool) {
    INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));
        // another subscriber may already be installed by an embedding application
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .try_init();
    });
}
