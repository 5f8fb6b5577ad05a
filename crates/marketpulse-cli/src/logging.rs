//! Tracing subscriber setup.
//!
//! - `RUST_LOG`: level filter, default `info`
//! - `MARKETPULSE_LOG_FORMAT`: `json` for JSON lines, anything else for human-readable output
//!
//! Logs go to stderr; stdout carries only command results.

use tracing_subscriber::EnvFilter;

pub fn init_logging() {
    let format = std::env::var("MARKETPULSE_LOG_FORMAT").unwrap_or_default();
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let result = if wants_json(&format) {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .json()
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .try_init()
    };

    if let Err(error) = result {
        eprintln!("warning: logging already initialised: {error}");
    }
}

fn wants_json(format: &str) -> bool {
    format.trim().eq_ignore_ascii_case("json")
}
