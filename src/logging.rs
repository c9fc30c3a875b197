//! Tracing subscriber setup for the binary.

use std::sync::Once;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

static INIT_ONCE: Once = Once::new();

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
/// Later calls are ignored.
pub fn init_logging(config: &LoggingConfig) {
    INIT_ONCE.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

        let result = if config.json {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .try_init()
        } else {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .try_init()
        };

        if let Err(err) = result {
            eprintln!("logging already initialised: {}", err);
        }
    });
}
