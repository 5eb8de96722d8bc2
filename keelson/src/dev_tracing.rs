//! Opt-in log output for tests, examples and debugging sessions.

/// Development helper: initialize tracing subscriber when `RUST_LOG` is set.
///
/// Tests and examples can call `keelson::dev_tracing::init_tracing()` to see
/// endpoint lifecycle events (start, close, delayed close, heartbeat
/// timeouts, registry sweeps). This is a no-op when `RUST_LOG` is not set or
/// when a global subscriber is already installed.
pub fn init_tracing() {
    use std::env;

    if env::var("RUST_LOG").is_ok() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_thread_names(true)
            .try_init();
    }
}
