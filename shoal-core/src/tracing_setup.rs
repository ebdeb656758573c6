//! Tracing setup for shoal nodes.
//!
//! A development swarm runs several processes on one machine (one index,
//! many peers), so each node writes its own debug log named after its
//! role and port instead of sharing a single file. One-shot commands
//! (search, upload) skip the file layer entirely.

use std::fs;
use std::path::Path;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

/// Console log levels selectable from the CLI.
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
pub enum CliLogLevel {
    /// Only error messages
    Error,
    /// Warning and error messages
    Warn,
    /// Informational, warning, and error messages
    #[default]
    Info,
    /// Debug and everything above
    Debug,
    /// All messages including detailed tracing
    Trace,
}

impl CliLogLevel {
    /// Env-filter directive equivalent of this level.
    pub fn as_directive(self) -> &'static str {
        match self {
            CliLogLevel::Error => "error",
            CliLogLevel::Warn => "warn",
            CliLogLevel::Info => "info",
            CliLogLevel::Debug => "debug",
            CliLogLevel::Trace => "trace",
        }
    }
}

impl std::fmt::Display for CliLogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_directive())
    }
}

/// Initialize tracing for one node process.
///
/// The console layer honors `RUST_LOG` when set and falls back to
/// `level` otherwise. When `node_name` is given (e.g. `peer-7001`), a
/// debug-level log is additionally written to `logs/<node_name>.log`,
/// overwriting the previous run of that node; concurrent index and peer
/// processes therefore never clobber each other's logs.
///
/// # Errors
/// - `std::io::Error` - the logs directory or the node's log file could
///   not be created
pub fn init_tracing(level: CliLogLevel, node_name: Option<&str>) -> std::io::Result<()> {
    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_directive()));
    let console_layer = fmt::layer().with_target(true).with_filter(console_filter);

    let file_layer = match node_name {
        Some(name) => {
            let logs_dir = Path::new("logs");
            fs::create_dir_all(logs_dir)?;
            let log_file = fs::File::create(logs_dir.join(format!("{name}.log")))?;
            let filter = EnvFilter::new("debug");
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(true)
                    .with_writer(log_file)
                    .with_filter(filter),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .init();

    if let Some(name) = node_name {
        tracing::info!("tracing initialized, debug log at logs/{name}.log");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directives_cover_every_level() {
        let levels = [
            CliLogLevel::Error,
            CliLogLevel::Warn,
            CliLogLevel::Info,
            CliLogLevel::Debug,
            CliLogLevel::Trace,
        ];
        for level in levels {
            // Every directive must be a valid env-filter expression.
            assert!(level.as_directive().parse::<EnvFilter>().is_ok());
            assert_eq!(level.to_string(), level.as_directive());
        }
    }

    #[test]
    fn default_level_is_info() {
        assert_eq!(CliLogLevel::default().as_directive(), "info");
    }
}
