//! Session events
//!
//! Everything the engine learns from the backend's out-of-band records is
//! published as a [`SessionEvent`]: an immutable payload plus the context
//! that originated it and a UTC timestamp. Presentation layers subscribe to
//! these; the engine's own services (run control, breakpoint mediator,
//! process registry) consume them on the session pump before fan-out.

use crate::context::Context;
use chrono::{DateTime, Utc};
use mibex_mi::{MiValue, StreamChannel};
use std::fmt;

/// Why the target stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    BreakpointHit { number: u32 },
    WatchpointTrigger { number: u32 },
    EndSteppingRange,
    FunctionFinished,
    SignalReceived { signal: String },
    Exited { code: Option<i32> },
    /// Reason string this engine does not model specially; kept verbatim
    Other(String),
}

impl StopReason {
    /// Decode an MI `reason="..."` field plus its sibling results.
    pub fn from_mi(reason: &str, results: &mibex_mi::MiResults) -> Self {
        let field_u32 = |key: &str| {
            results
                .get(key)
                .and_then(MiValue::as_str)
                .and_then(|s| s.parse().ok())
        };
        match reason {
            "breakpoint-hit" => Self::BreakpointHit {
                number: field_u32("bkptno").unwrap_or(0),
            },
            "watchpoint-trigger" | "access-watchpoint-trigger" | "read-watchpoint-trigger" => {
                Self::WatchpointTrigger {
                    number: results
                        .get("wpt")
                        .and_then(|wpt| wpt.field_u32("number"))
                        .unwrap_or(0),
                }
            }
            "end-stepping-range" => Self::EndSteppingRange,
            "function-finished" => Self::FunctionFinished,
            "signal-received" => Self::SignalReceived {
                signal: results
                    .get("signal-name")
                    .and_then(MiValue::as_str)
                    .unwrap_or("UNKNOWN")
                    .to_string(),
            },
            "exited" | "exited-normally" | "exited-signalled" => Self::Exited {
                code: results
                    .get("exit-code")
                    .and_then(MiValue::as_str)
                    .and_then(|s| parse_exit_code(s)),
            },
            other => Self::Other(other.to_string()),
        }
    }
}

// GDB reports exit codes in octal ("01" or "0177"); plain decimal otherwise.
fn parse_exit_code(s: &str) -> Option<i32> {
    if let Some(octal) = s.strip_prefix('0') {
        if octal.is_empty() {
            return Some(0);
        }
        if let Ok(code) = i32::from_str_radix(octal, 8) {
            return Some(code);
        }
    }
    s.parse().ok()
}

/// Source position of a stopped thread
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameInfo {
    pub addr: Option<String>,
    pub func: Option<String>,
    pub file: Option<String>,
    pub line: Option<u32>,
}

impl FrameInfo {
    /// Decode an MI `frame={...}` tuple.
    pub fn from_mi(frame: &MiValue) -> Self {
        Self {
            addr: frame.field_str("addr").map(str::to_string),
            func: frame.field_str("func").map(str::to_string),
            file: frame
                .field_str("fullname")
                .or_else(|| frame.field_str("file"))
                .map(str::to_string),
            line: frame.field_u32("line"),
        }
    }
}

/// The event payload union
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebugEvent {
    Stopped {
        reason: StopReason,
        frame: Option<FrameInfo>,
    },
    Running,
    BreakpointChanged {
        number: u32,
    },
    ThreadCreated {
        id: u32,
    },
    ThreadExited {
        id: u32,
    },
    Detached,
    BackendExited,
    /// Console/target/log output, forwarded for display only
    Stream {
        channel: StreamChannel,
        text: String,
    },
    /// A malformed MI line, recovered and reported as a diagnostic
    ParseFailure {
        line: String,
    },
}

impl DebugEvent {
    pub fn kind(&self) -> DebugEventKind {
        match self {
            Self::Stopped { .. } => DebugEventKind::Stopped,
            Self::Running => DebugEventKind::Running,
            Self::BreakpointChanged { .. } => DebugEventKind::BreakpointChanged,
            Self::ThreadCreated { .. } => DebugEventKind::ThreadCreated,
            Self::ThreadExited { .. } => DebugEventKind::ThreadExited,
            Self::Detached => DebugEventKind::Detached,
            Self::BackendExited => DebugEventKind::BackendExited,
            Self::Stream { .. } => DebugEventKind::Stream,
            Self::ParseFailure { .. } => DebugEventKind::ParseFailure,
        }
    }
}

/// Payload-free event discriminant, used for listener filters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DebugEventKind {
    Stopped,
    Running,
    BreakpointChanged,
    ThreadCreated,
    ThreadExited,
    Detached,
    BackendExited,
    Stream,
    ParseFailure,
}

impl DebugEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Running => "running",
            Self::BreakpointChanged => "breakpoint_changed",
            Self::ThreadCreated => "thread_created",
            Self::ThreadExited => "thread_exited",
            Self::Detached => "detached",
            Self::BackendExited => "backend_exited",
            Self::Stream => "stream",
            Self::ParseFailure => "parse_failure",
        }
    }
}

impl fmt::Display for DebugEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event plus its originating context and arrival time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEvent {
    pub context: Context,
    pub event: DebugEvent,
    pub timestamp: DateTime<Utc>,
}

impl SessionEvent {
    pub fn new(context: Context, event: DebugEvent) -> Self {
        Self {
            context,
            event,
            timestamp: Utc::now(),
        }
    }

    pub fn kind(&self) -> DebugEventKind {
        self.event.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mibex_mi::{parse_line, MiRecord};

    fn stopped_results(line: &str) -> mibex_mi::MiResults {
        match parse_line(line).unwrap() {
            MiRecord::Async { results, .. } => results,
            other => panic!("expected async record, got {other:?}"),
        }
    }

    #[test]
    fn decodes_breakpoint_hit() {
        let results = stopped_results(
            r#"*stopped,reason="breakpoint-hit",bkptno="1",thread-id="0",frame={addr="0x08048468",func="main",line="4"}"#,
        );
        let reason = StopReason::from_mi("breakpoint-hit", &results);
        assert_eq!(reason, StopReason::BreakpointHit { number: 1 });

        let frame = FrameInfo::from_mi(results.get("frame").unwrap());
        assert_eq!(frame.func.as_deref(), Some("main"));
        assert_eq!(frame.line, Some(4));
        assert_eq!(frame.addr.as_deref(), Some("0x08048468"));
    }

    #[test]
    fn decodes_signal_and_exit_reasons() {
        let results = stopped_results(r#"*stopped,reason="signal-received",signal-name="SIGSEGV""#);
        assert_eq!(
            StopReason::from_mi("signal-received", &results),
            StopReason::SignalReceived {
                signal: "SIGSEGV".into()
            }
        );

        let results = stopped_results(r#"*stopped,reason="exited",exit-code="01""#);
        assert_eq!(
            StopReason::from_mi("exited", &results),
            StopReason::Exited { code: Some(1) }
        );
    }

    #[test]
    fn unknown_reason_is_preserved_verbatim() {
        let results = stopped_results(r#"*stopped,reason="vendor-specific-pause""#);
        assert_eq!(
            StopReason::from_mi("vendor-specific-pause", &results),
            StopReason::Other("vendor-specific-pause".into())
        );
    }

    #[test]
    fn frame_prefers_fullname_over_file() {
        let results = stopped_results(
            r#"*stopped,reason="end-stepping-range",frame={file="main.c",fullname="/src/main.c",line="9"}"#,
        );
        let frame = FrameInfo::from_mi(results.get("frame").unwrap());
        assert_eq!(frame.file.as_deref(), Some("/src/main.c"));
    }
}
