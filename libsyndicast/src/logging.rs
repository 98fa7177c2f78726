//! Logging setup for the Syndicast binaries
//!
//! The worker daemon logs continuously (text for a terminal, json for a
//! log shipper), while the operator CLI stays quiet unless asked so its
//! stdout output remains pipeable. Both write to stderr. A filter set in
//! `SYNDICAST_LOG` (tracing directive syntax, e.g. `debug,sqlx=warn`)
//! replaces the built-in defaults entirely.

use std::str::FromStr;

use tracing_subscriber::EnvFilter;

pub const LOG_FILTER_ENV: &str = "SYNDICAST_LOG";

/// Daemon defaults when no override is set: engine at info, the noisy
/// dependency targets damped.
const DAEMON_DIRECTIVES: &str = "info,sqlx=warn,hyper=warn,reqwest=warn";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Plain text lines, no color
    Text,
    /// One JSON object per line
    Json,
    /// Multi-line colored output for development
    Pretty,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            other => Err(format!(
                "unknown log format '{}' (expected text, json, or pretty)",
                other
            )),
        }
    }
}

fn filter(verbose: bool, default_directives: &str) -> EnvFilter {
    if verbose {
        return EnvFilter::new("debug,sqlx=info,hyper=info");
    }
    EnvFilter::try_from_env(LOG_FILTER_ENV)
        .unwrap_or_else(|_| EnvFilter::new(default_directives))
}

/// Initialize logging for the worker daemon. Call once at startup;
/// panics if a subscriber is already installed.
pub fn init_daemon(format: LogFormat, verbose: bool) {
    let filter = filter(verbose, DAEMON_DIRECTIVES);
    match format {
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .json()
                .flatten_event(true)
                .with_current_span(true)
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::fmt()
                .pretty()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_target(false)
                .init();
        }
    }
}

/// Initialize logging for the operator CLI: errors only unless verbose,
/// no timestamps, so warnings read like normal tool diagnostics.
pub fn init_cli(verbose: bool) {
    tracing_subscriber::fmt()
        .with_env_filter(filter(verbose, "error"))
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();
}
