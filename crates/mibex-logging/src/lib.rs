//! Centralized logging configuration for mibex
//!
//! Wraps `tracing` and `tracing-subscriber` so every embedder initializes
//! logging the same way.
//!
//! # Usage
//!
//! ```rust,ignore
//! use mibex_logging::{init, LogConfig, LogOutput};
//!
//! // Simple initialization with defaults
//! init(LogConfig::default());
//!
//! // Debug session transcript on stderr (stdout may belong to the host IDE)
//! init(LogConfig::new().debug(true).output(LogOutput::Stderr));
//! ```

use tracing_subscriber::EnvFilter;

// Re-export tracing macros for standardized imports
pub use tracing::{debug, error, info, span, trace, warn, Level};

/// Output destination for logs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogOutput {
    /// Write logs to stdout (default)
    #[default]
    Stdout,
    /// Write logs to stderr (when stdout belongs to the embedding host)
    Stderr,
}

/// Configuration for logging initialization
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Enable debug-level logging (overrides default_level)
    pub debug: bool,
    /// Default log level when RUST_LOG is not set
    pub default_level: String,
    /// Output destination
    pub output: LogOutput,
    /// Show module target in log output
    pub show_target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            debug: false,
            default_level: "info".to_string(),
            output: LogOutput::Stdout,
            show_target: false,
        }
    }
}

impl LogConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable debug-level logging
    pub fn debug(mut self, enabled: bool) -> Self {
        self.debug = enabled;
        self
    }

    /// Set the default log level (used when RUST_LOG is not set)
    pub fn default_level(mut self, level: impl Into<String>) -> Self {
        self.default_level = level.into();
        self
    }

    /// Set the output destination
    pub fn output(mut self, output: LogOutput) -> Self {
        self.output = output;
        self
    }

    /// Show or hide module target in log output
    pub fn show_target(mut self, show: bool) -> Self {
        self.show_target = show;
        self
    }

    fn build_filter(&self) -> EnvFilter {
        if self.debug {
            EnvFilter::new("debug")
        } else {
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&self.default_level))
        }
    }
}

/// Initialize the logging system with the given configuration.
///
/// Call once at startup. Safe to call again (the second call is a no-op,
/// which keeps test binaries that initialize per-test from panicking).
///
/// # Environment variables
///
/// - `RUST_LOG`: override log level (e.g. `RUST_LOG=mibex_session=trace`)
pub fn init(config: LogConfig) {
    let filter = config.build_filter();
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.show_target);

    let result = match config.output {
        LogOutput::Stdout => builder.try_init(),
        LogOutput::Stderr => builder.with_writer(std::io::stderr).try_init(),
    };
    // Already-initialized is fine; anything else is too early for tracing
    if let Err(e) = result {
        eprintln!("mibex-logging: subscriber not installed: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_twice_does_not_panic() {
        init(LogConfig::new().output(LogOutput::Stderr));
        init(LogConfig::new().debug(true));
    }

    #[test]
    fn builder_chain_sets_fields() {
        let config = LogConfig::new()
            .debug(true)
            .default_level("warn")
            .show_target(true)
            .output(LogOutput::Stderr);
        assert!(config.debug);
        assert_eq!(config.default_level, "warn");
        assert!(config.show_target);
        assert_eq!(config.output, LogOutput::Stderr);
    }
}
