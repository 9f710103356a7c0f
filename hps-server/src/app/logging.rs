//! Tracing subscriber setup.

use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// Installs the global subscriber.
///
/// `RUST_LOG` wins over `default_directive`, which comes from the `LogLevel` config key.
pub(super) fn init(default_directive: &str) {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(default_directive)
    };
    let subscriber = tracing_subscriber::registry().with(filter).with(
        fmt::layer()
            .with_target(true)
            .with_thread_names(true),
    );
    // A subscriber installed earlier (tests, embedding) stays in place.
    let _ = subscriber.try_init();
}
