//! Logging setup shared by the Syndic binaries
//!
//! Output always goes to stderr so command output stays pipeable. The level
//! comes from `RUST_LOG` or `SYNDIC_LOG_LEVEL` (env-filter directives), with
//! a per-binary fallback; `SYNDIC_LOG_FORMAT=json` switches to one JSON
//! object per line for log shippers.
//!
//! ```bash
//! SYNDIC_LOG_FORMAT=json SYNDIC_LOG_LEVEL=debug syndicd --once
//! ```

use tracing_subscriber::EnvFilter;

/// Install the global subscriber.
///
/// `fallback_level` applies when neither `RUST_LOG` nor `SYNDIC_LOG_LEVEL`
/// is set: the daemon runs at "info", the CLI at "error", and both drop to
/// "debug" under --verbose.
///
/// # Panics
///
/// Panics if a subscriber is already installed.
pub fn init(fallback_level: &str) {
    let directives =
        std::env::var("SYNDIC_LOG_LEVEL").unwrap_or_else(|_| fallback_level.to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&directives));

    if json_output() {
        tracing_subscriber::fmt()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .init();
    }
}

/// [`init`] at the daemon's default "info" level
pub fn init_default() {
    init("info");
}

fn json_output() -> bool {
    std::env::var("SYNDIC_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}
