//! Domain model for the mibex debug engine
//!
//! This crate holds the value types every other layer shares:
//! - the hierarchical [`Context`] model with structural identity and interning
//! - [`SessionEvent`]/[`DebugEvent`] published by a session
//! - breakpoint records with their install-state machine
//! - per-context [`RunState`]
//! - the engine-wide error taxonomy
//!
//! Everything here is immutable value data; behavior (dispatch, mediation,
//! tracking) lives in `mibex-session`.

mod breakpoint;
mod context;
mod error;
mod event;
mod run_state;

pub use breakpoint::{
    attrs, AttributeMap, BackendRef, BreakpointIdentity, BreakpointKind, BreakpointRecord,
    InstallState,
};
pub use context::{Context, ContextInterner, ContextKind, ContextKindTag, SessionId};
pub use error::{Error, Result};
pub use event::{DebugEvent, DebugEventKind, FrameInfo, SessionEvent, StopReason};
pub use run_state::{RunState, StepKind};
