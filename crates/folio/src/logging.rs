//! Tracing subscriber setup for hosts embedding the data layer.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install a global fmt subscriber.
///
/// `RUST_LOG` wins over `default_filter` (e.g. `"info"` or `"folio=debug"`).
/// Returns `false` if a global subscriber was already installed, so calling
/// this from every test is harmless.
pub fn init_logging(default_filter: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init()
        .is_ok()
}
