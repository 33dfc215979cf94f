//! Tracing subscriber setup for hosts embedding cairn.
//!
//! The library only emits events; a CLI or service calls one of these
//! once at startup.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Environment variable holding the log filter directive.
pub const LOG_ENV: &str = "CAIRN_LOG";

fn filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("cairn=debug")
        } else {
            EnvFilter::new("cairn=warn")
        }
    })
}

/// Install a human-readable subscriber.
///
/// Returns `false` if a global subscriber was already set.
pub fn init(verbose: bool) -> bool {
    tracing_subscriber::registry()
        .with(filter(verbose))
        .with(fmt::layer().with_target(false).without_time())
        .try_init()
        .is_ok()
}

/// Install a JSON subscriber, one event per line.
pub fn init_json(verbose: bool) -> bool {
    tracing_subscriber::registry()
        .with(filter(verbose))
        .with(fmt::layer().json().with_current_span(false))
        .try_init()
        .is_ok()
}
