// src/logging.rs

use tracing::Level;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

/// Install a console subscriber logging at `level`; `RUST_LOG` overrides it.
///
/// Returns false if a global subscriber was already installed, which is
/// harmless (tests call this repeatedly).
pub fn init(level: Level) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_ascii_lowercase()));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .try_init()
        .is_ok()
}
