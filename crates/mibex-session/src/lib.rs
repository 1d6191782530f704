//! Debug session engine over an MI backend
//!
//! This crate is the behavioral half of the engine: `mibex-mi` gives it the
//! wire codec, `mibex-core` the shared domain model, `mibex-config` the
//! launch settings and backend capability table. What lives here:
//!
//! - [`Dispatcher`]: serialized command queue with token correlation
//! - [`EventRouter`]: synchronous listener dispatch plus bounded subscriber
//!   channels
//! - [`BreakpointMediator`]: marker-to-backend breakpoint lifecycle
//! - [`RunControlTracker`]: per-context run state machine
//! - [`ProcessRegistry`]: process/thread identity bookkeeping
//! - [`Session`]: the façade wiring them together over one backend process

pub mod breakpoints;
pub mod dispatcher;
pub mod registry;
pub mod router;
pub mod run_control;
pub mod session;

pub use breakpoints::{AttributeTranslator, BreakpointMediator, CAttributeTranslator};
pub use dispatcher::{BackendRecord, CancelHandle, CommandResult, Dispatcher, PendingCommand};
pub use registry::{ProcessEnumerator, ProcessInfo, ProcessRegistry, SystemProcessEnumerator};
pub use router::{EventRouter, KindFilter, ListenerId, RouterHandle};
pub use run_control::RunControlTracker;
pub use session::Session;
