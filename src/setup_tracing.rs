//! Process-wide tracing setup.

use std::fs::OpenOptions;
use std::sync::Arc;

use time::format_description::parse;
use tracing_subscriber::fmt::time::OffsetTime;
use tracing_subscriber::EnvFilter;

/// Initialize the subscriber. The level comes from configuration
/// (`RUST_LOG` overrides it); an optional log file redirects output
/// with ANSI colors disabled.
pub fn setup_tracing(log_level: &str, log_file: Option<&str>) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_lowercase()));

    let timer = OffsetTime::new(
        time::UtcOffset::current_local_offset().unwrap_or(time::UtcOffset::UTC),
        parse("[hour]:[minute]:[second].[subsecond digits:2]").unwrap(),
    );

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_level(true)
        .with_timer(timer)
        .compact();

    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .unwrap_or_else(|e| panic!("Failed to open log file '{path}': {e}"));
            builder.with_ansi(false).with_writer(Arc::new(file)).init();
        }
        None => builder.with_ansi(true).init(),
    }
}
