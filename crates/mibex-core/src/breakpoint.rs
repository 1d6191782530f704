//! Breakpoint records and identities
//!
//! A record tracks one logical (user-level) breakpoint through its install
//! lifecycle: `Pending → Installed → Removed`, with `Pending → Failed` and
//! `Installed → Failed` error edges. `Failed` is terminal; the record keeps
//! its platform attributes so the user can inspect what was asked for.
//!
//! Invariant: a backend reference exists iff the state is `Installed`.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Platform attribute keys understood by the default translator
pub mod attrs {
    pub const SOURCE: &str = "source";
    pub const LINE: &str = "line";
    pub const FUNCTION: &str = "function";
    pub const VARIABLE: &str = "variable";
    pub const CONDITION: &str = "condition";
    pub const ENABLED: &str = "enabled";
    pub const IGNORE_COUNT: &str = "ignore_count";
}

/// Opaque platform attribute map (marker attributes from the IDE side)
pub type AttributeMap = IndexMap<String, serde_json::Value>;

/// What a logical breakpoint *is*, for duplicate detection.
///
/// Line breakpoints are keyed by `(path, line)`; watchpoints by
/// `(function, variable)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BreakpointIdentity {
    Line { path: String, line: u32 },
    Watch { function: String, variable: String },
}

impl BreakpointIdentity {
    pub fn line(path: impl Into<String>, line: u32) -> Self {
        Self::Line {
            path: path.into(),
            line,
        }
    }

    pub fn watch(function: impl Into<String>, variable: impl Into<String>) -> Self {
        Self::Watch {
            function: function.into(),
            variable: variable.into(),
        }
    }

    pub fn kind(&self) -> BreakpointKind {
        match self {
            Self::Line { .. } => BreakpointKind::Line,
            Self::Watch { .. } => BreakpointKind::Watch,
        }
    }
}

impl fmt::Display for BreakpointIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Line { path, line } => write!(f, "{path}:{line}"),
            Self::Watch { function, variable } => write!(f, "{function}::{variable}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BreakpointKind {
    Line,
    Watch,
}

/// Install lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstallState {
    /// Insert command queued, no backend reference yet
    Pending,
    /// Backend acknowledged; reference held
    Installed,
    /// Removed from the backend; record about to be discarded
    Removed,
    /// Terminal error state; attributes preserved for inspection
    Failed,
}

/// The backend's handle for an installed breakpoint (MI breakpoint number,
/// kept opaque — only ever echoed back at the backend).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BackendRef(pub String);

impl fmt::Display for BackendRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One logical breakpoint's full state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakpointRecord {
    pub identity: BreakpointIdentity,
    pub attributes: AttributeMap,
    pub backend_ref: Option<BackendRef>,
    pub state: InstallState,
}

impl BreakpointRecord {
    /// Fresh record in `Pending` with no backend reference
    pub fn pending(identity: BreakpointIdentity, attributes: AttributeMap) -> Self {
        Self {
            identity,
            attributes,
            backend_ref: None,
            state: InstallState::Pending,
        }
    }

    /// `Pending → Installed`, storing the backend reference
    pub fn mark_installed(&mut self, backend_ref: BackendRef) {
        debug_assert_eq!(self.state, InstallState::Pending);
        self.backend_ref = Some(backend_ref);
        self.state = InstallState::Installed;
    }

    /// Error edge into terminal `Failed`; the reference is dropped because
    /// the backend no longer owns anything for this record.
    pub fn mark_failed(&mut self) {
        self.backend_ref = None;
        self.state = InstallState::Failed;
    }

    /// `Installed → Removed`
    pub fn mark_removed(&mut self) {
        debug_assert_eq!(self.state, InstallState::Installed);
        self.backend_ref = None;
        self.state = InstallState::Removed;
    }

    pub fn is_installed(&self) -> bool {
        self.state == InstallState::Installed
    }

    /// Enabled unless the attributes say otherwise
    pub fn enabled(&self) -> bool {
        self.attributes
            .get(attrs::ENABLED)
            .and_then(|v| v.as_bool())
            .unwrap_or(true)
    }
}
