//! Default constants for mibex configuration
//!
//! Centralizes the defaults used throughout the engine, providing a single
//! source of truth. Everything that is configurable should be here.

// ============================================================================
// TIMEOUTS
// ============================================================================

/// Default per-command timeout in milliseconds.
///
/// MI backends are normally quick, but symbol loading for a large binary can
/// stall the first `-break-insert` for a long time; tens of seconds is the
/// conventional window.
pub const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 30_000;

/// Timeout for graceful backend shutdown (`-gdb-exit` then reap)
pub const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 5_000;

// ============================================================================
// CHANNEL CAPACITIES
// ============================================================================

/// Capacity of the dispatcher's outgoing command queue.
///
/// Bounded so a caller flooding commands blocks instead of growing memory;
/// the backend reads one command at a time anyway.
pub const DEFAULT_COMMAND_QUEUE_CAPACITY: usize = 64;

/// Capacity of the reader-to-session-pump record channel.
///
/// If the pump is saturated the reader loop blocks, which in turn blocks
/// the backend once its own output buffer fills. That is the intended
/// backpressure path; no unbounded growth.
pub const DEFAULT_RECORD_CHANNEL_CAPACITY: usize = 256;

/// Capacity of per-subscriber event channels
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

// ============================================================================
// ENVIRONMENT VARIABLES
// ============================================================================

/// Config file path override
pub const ENV_MIBEX_CONFIG: &str = "MIBEX_CONFIG";

/// Log filter override (standard EnvFilter syntax)
pub const ENV_MIBEX_LOG: &str = "MIBEX_LOG";

// ============================================================================
// BACKEND DEFAULTS
// ============================================================================

/// Default backend executable when none is configured
pub const DEFAULT_BACKEND_PROGRAM: &str = "gdb";

/// Arguments that put a GDB-family backend into MI mode on stdio
pub const DEFAULT_BACKEND_ARGS: &[&str] = &["--interpreter=mi2", "--quiet", "--nx"];
