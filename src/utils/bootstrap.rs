//! Bootstrap utilities for drover binaries.
//!
//! Shared initialization code for the master and worker binaries.

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing with the DROVER_LOG environment variable.
///
/// Falls back to the given level (normally the configured `log_level`) if
/// DROVER_LOG is not set or not parseable, and to `info` if that level is
/// itself invalid, so a typo in the configuration never silences logging.
pub fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_env("DROVER_LOG").unwrap_or_else(|_| {
        EnvFilter::default().add_directive(configured_level(default_level).into())
    });
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Parse a configured log level strictly, falling back to `info`.
fn configured_level(level: &str) -> LevelFilter {
    level.parse().unwrap_or(LevelFilter::INFO)
}
