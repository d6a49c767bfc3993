use std::sync::OnceLock;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Installs the global subscriber writing to stderr, so stdout carries only model output.
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init_tracing(level: &str) {
    static TRACE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

    let (non_blocking, guard) = tracing_appender::non_blocking(std::io::stderr());
    let _ = TRACE_GUARD.set(guard);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let init_result = tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(non_blocking),
        )
        .try_init();
    if let Err(error) = init_result {
        eprintln!("warning: failed to initialize tracing subscriber: {error}");
    }
}
