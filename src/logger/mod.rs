//! Human-readable tracing output plus the announce log consumed by the bot.

pub mod announce;

use std::fs::{self, OpenOptions};
use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::sync::{Arc, Once};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Subscriber settings resolved from CLI flags and config.
#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    /// Default filter directive when `RUST_LOG` is unset (`info`, `debug`, `warn`).
    pub default_level: &'static str,
    /// Optional append-only log file; written without ANSI colours.
    pub log_file: Option<PathBuf>,
    /// Allow ANSI colours on stderr when it is a terminal.
    pub color: bool,
}

impl LogOptions {
    /// Map `-v`/`-q` onto a default level.
    #[must_use]
    pub const fn level_for(verbose: bool, quiet: bool) -> &'static str {
        if verbose {
            "debug"
        } else if quiet {
            "warn"
        } else {
            "info"
        }
    }
}

/// Install the global subscriber. Later calls are no-ops.
///
/// A log file that cannot be opened is reported on stderr and skipped; the
/// process keeps logging to stderr alone.
pub fn init_tracing(options: &LogOptions) {
    INIT.call_once(|| {
        let default_level = if options.default_level.is_empty() {
            "info"
        } else {
            options.default_level
        };
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

        let stderr_layer = fmt::layer()
            .with_writer(io::stderr)
            .with_target(false)
            .with_ansi(options.color && io::stderr().is_terminal());

        let file_layer = options.log_file.as_ref().and_then(|path| {
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
            {
                let _ = fs::create_dir_all(parent);
            }
            match OpenOptions::new().create(true).append(true).open(path) {
                Ok(file) => Some(
                    fmt::layer()
                        .with_writer(Arc::new(file))
                        .with_ansi(false),
                ),
                Err(err) => {
                    eprintln!("stb: log file {} unavailable: {err}", path.display());
                    None
                }
            }
        });

        let _ = tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .try_init();
    });
}
