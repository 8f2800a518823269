use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "PATCHBAY_LOG";

/// Installs the fmt subscriber. The filter comes from `PATCHBAY_LOG` and
/// defaults to `info`.
pub fn init() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .init();
}
