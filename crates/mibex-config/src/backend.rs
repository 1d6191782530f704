//! Backend launch configuration and the per-variant capability table
//!
//! Backend variants (gdb, lldb-mi, vendor forks) differ in which MI commands
//! they implement and which protocol quirks they exhibit. Instead of
//! subclass-style overrides, every difference is a named flag on
//! [`BackendCapabilities`]; services consult the flags and pick fallbacks.
//! Nothing in the engine matches on a backend identity string.

use crate::constants::{DEFAULT_BACKEND_ARGS, DEFAULT_BACKEND_PROGRAM};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// How the backend subprocess is launched
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Backend executable
    #[serde(default = "default_program")]
    pub program: String,
    /// Arguments (must select an MI interpreter on stdio)
    #[serde(default = "default_args")]
    pub args: Vec<String>,
    /// Working directory for the subprocess
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    /// Extra environment variables
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Capability table for this backend variant
    #[serde(default)]
    pub capabilities: BackendCapabilities,
}

fn default_program() -> String {
    DEFAULT_BACKEND_PROGRAM.to_string()
}

fn default_args() -> Vec<String> {
    DEFAULT_BACKEND_ARGS.iter().map(|s| s.to_string()).collect()
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: default_args(),
            cwd: None,
            env: HashMap::new(),
            capabilities: BackendCapabilities::default(),
        }
    }
}

impl BackendConfig {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn capabilities(mut self, capabilities: BackendCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }
}

/// Per-variant declaration of supported MI features and known quirks.
///
/// Each field is an independent, testable flag. Presets below are plain
/// constructors a caller may start from and adjust.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendCapabilities {
    /// Backend implements `-list-thread-groups --available`; when false the
    /// registry falls back to OS-level process enumeration.
    #[serde(default = "yes")]
    pub supports_process_list: bool,
    /// Backend can modify an installed breakpoint in place
    /// (`-break-condition`, `-break-enable`). When false, attribute changes
    /// are applied by remove-then-reinsert.
    #[serde(default = "yes")]
    pub supports_breakpoint_modification: bool,
    /// Backend has a jump primitive (`-exec-jump`); "resume at line" is
    /// rejected up front without it.
    #[serde(default = "yes")]
    pub supports_jump: bool,
    /// Backend's argument parser chokes on a leading path separator inside a
    /// quoted location; the command serializer strips it when set.
    #[serde(default)]
    pub strip_leading_path_separator: bool,
    /// Backend is known to deliver thread-group exit notifications twice;
    /// the run-control tracker absorbs duplicates either way, this flag
    /// downgrades the log level for the expected second delivery.
    #[serde(default)]
    pub sends_duplicate_exit_events: bool,
}

fn yes() -> bool {
    true
}

impl Default for BackendCapabilities {
    fn default() -> Self {
        Self::gdb()
    }
}

impl BackendCapabilities {
    /// Stock GDB: full MI feature set, no known quirks
    pub fn gdb() -> Self {
        Self {
            supports_process_list: true,
            supports_breakpoint_modification: true,
            supports_jump: true,
            strip_leading_path_separator: false,
            sends_duplicate_exit_events: false,
        }
    }

    /// lldb-mi: no native process listing, no in-place breakpoint edits,
    /// no jump primitive, plus its two known protocol quirks
    pub fn lldb_mi() -> Self {
        Self {
            supports_process_list: false,
            supports_breakpoint_modification: false,
            supports_jump: false,
            strip_leading_path_separator: true,
            sends_duplicate_exit_events: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_backend_runs_gdb_in_mi_mode() {
        let config = BackendConfig::default();
        assert_eq!(config.program, "gdb");
        assert!(config.args.iter().any(|a| a.contains("--interpreter=mi")));
    }

    #[test]
    fn capability_presets_differ() {
        assert!(BackendCapabilities::gdb().supports_jump);
        assert!(!BackendCapabilities::lldb_mi().supports_jump);
    }

    #[test]
    fn capabilities_deserialize_with_defaults() {
        let caps: BackendCapabilities = toml::from_str("supports_jump = false").unwrap();
        assert!(!caps.supports_jump);
        assert!(caps.supports_process_list);
        assert!(!caps.strip_leading_path_separator);
    }
}
