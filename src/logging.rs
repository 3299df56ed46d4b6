//! Subscriber setup for binaries embedding the engine. The library itself
//! only emits `tracing` events and never installs a subscriber.

use tracing_subscriber::EnvFilter;

/// Environment variable holding an `EnvFilter` directive.
pub const LOG_ENV: &str = "CTXWATCH_LOG";

/// Filter from `CTXWATCH_LOG`, else `info` (or `debug` when verbose).
pub fn build_filter(verbose: bool) -> EnvFilter {
    let fallback = if verbose { "debug" } else { "info" };
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(fallback))
}

/// Install a stderr fmt subscriber. Later calls are no-ops.
pub fn init_logging(verbose: bool) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(build_filter(verbose))
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_levels() {
        if std::env::var(LOG_ENV).is_ok() {
            return;
        }
        assert_eq!(build_filter(false).to_string(), "info");
        assert_eq!(build_filter(true).to_string(), "debug");
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init_logging(false);
        init_logging(true);
    }
}
