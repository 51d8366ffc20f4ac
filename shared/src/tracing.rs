use std::sync::Once;
use tracing_subscriber::EnvFilter;

/// Initializes the global subscriber from an env-filter style directive
/// string. Idempotent so tests can call it freely.
pub fn initialize(filter: &str) {
    static ONCE: Once = Once::new();
    let filter = filter.to_string();
    ONCE.call_once(move || {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::new(filter))
            // No ansi color codes, the log aggregator chokes on them.
            .with_ansi(false)
            .init();
    });
}
