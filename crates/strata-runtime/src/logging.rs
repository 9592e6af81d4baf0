//! Tracing subscriber setup

use crate::config::LoggingConfig;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured level. Output goes to
/// stderr. Returns `false` when a subscriber was already installed.
pub fn init_logging(config: &LoggingConfig) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let layer = match (config.format.as_str(), config.timestamps) {
        ("json", true) => fmt::layer().json().with_writer(std::io::stderr).boxed(),
        ("json", false) => fmt::layer()
            .json()
            .without_time()
            .with_writer(std::io::stderr)
            .boxed(),
        (_, true) => fmt::layer().with_writer(std::io::stderr).boxed(),
        (_, false) => fmt::layer()
            .without_time()
            .with_writer(std::io::stderr)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init()
        .is_ok()
}
