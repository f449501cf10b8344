use std::sync::Once;

use tracing_subscriber::EnvFilter;

/// Filter directives for the binding's log output, e.g. `ipcbridge_core=debug`.
pub const ENV_LOG: &str = "IPCBRIDGE_LOG";

static INIT: Once = Once::new();

/// Install a stderr subscriber once per process. A subscriber installed by
/// the host process takes precedence.
pub(crate) fn init_logging() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env(ENV_LOG).unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(filter)
            .with_ansi(false)
            .with_target(false)
            .try_init();
    });
}
