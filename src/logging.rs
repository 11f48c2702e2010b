//! tracing subscriber setup
//!
//! `RUST_LOG` sets the filter (default `info`); `LOG_FORMAT=json` switches
//! to one JSON object per line.

use std::env;
use tracing_subscriber::EnvFilter;

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

fn json_requested() -> bool {
    env::var("LOG_FORMAT").map_or(false, |v| v.eq_ignore_ascii_case("json"))
}

/// Install the global subscriber. Later calls are no-ops.
pub fn init() {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_target(true);

    // try_init fails only if a subscriber is already installed
    let _ = if json_requested() {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}
