//! Session-level configuration (timeouts, queue capacities)

use crate::constants::{
    DEFAULT_COMMAND_QUEUE_CAPACITY, DEFAULT_COMMAND_TIMEOUT_MS, DEFAULT_EVENT_CHANNEL_CAPACITY,
    DEFAULT_RECORD_CHANNEL_CAPACITY, DEFAULT_SHUTDOWN_TIMEOUT_MS,
};
use serde::{Deserialize, Serialize};

/// Session configuration
///
/// Passed explicitly into session construction; there is no process-wide
/// mutable configuration state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Per-command timeout in milliseconds. A command that produces no
    /// result record within this window fails with `Timeout`; it is never
    /// retransmitted.
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
    /// Graceful shutdown window before the subprocess is reaped
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
    /// Outgoing command queue capacity (bounded, backpressure on overflow)
    #[serde(default = "default_command_queue_capacity")]
    pub command_queue_capacity: usize,
    /// Reader-to-pump record channel capacity
    #[serde(default = "default_record_channel_capacity")]
    pub record_channel_capacity: usize,
    /// Per-subscriber event channel capacity
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

fn default_command_timeout_ms() -> u64 {
    DEFAULT_COMMAND_TIMEOUT_MS
}

fn default_shutdown_timeout_ms() -> u64 {
    DEFAULT_SHUTDOWN_TIMEOUT_MS
}

fn default_command_queue_capacity() -> usize {
    DEFAULT_COMMAND_QUEUE_CAPACITY
}

fn default_record_channel_capacity() -> usize {
    DEFAULT_RECORD_CHANNEL_CAPACITY
}

fn default_event_channel_capacity() -> usize {
    DEFAULT_EVENT_CHANNEL_CAPACITY
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            command_timeout_ms: default_command_timeout_ms(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            command_queue_capacity: default_command_queue_capacity(),
            record_channel_capacity: default_record_channel_capacity(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

impl SessionConfig {
    pub fn command_timeout_ms(mut self, ms: u64) -> Self {
        self.command_timeout_ms = ms;
        self
    }
}
