//! Diagnostics setup and the transcript format for unhandled lines.
//!
//! Diagnostics go through `tracing` to stderr. `RUST_LOG` wins over the
//! configured level when it is set.

use crate::config::LoggingConfig;
use crate::irc::Message;
use tracing_subscriber::EnvFilter;

fn build_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level))
}

/// Install the global subscriber. Later calls are no-ops.
pub fn init(config: &LoggingConfig) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(build_filter(config))
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// One transcript line: `[<timestamp>] <wire form>`.
pub fn transcript_line(timestamp_format: &str, message: &Message) -> String {
    let stamp = chrono::Local::now().format(timestamp_format).to_string();
    format_transcript(&stamp, message)
}

fn format_transcript(stamp: &str, message: &Message) -> String {
    format!("[{}] {}", stamp, message)
}
