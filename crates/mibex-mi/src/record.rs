//! Parsed MI output records
//!
//! Three protocol-significant record classes plus the `(gdb)` prompt line:
//!
//! ```text
//! result  ::= [token] "^" result-class ("," result)*
//! async   ::= [token] ("*" | "=") async-class ("," result)*
//! stream  ::= ("~" | "@" | "&") c-string
//! ```

use crate::value::MiResults;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Class of a result record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultClass {
    Done,
    Running,
    Connected,
    Error,
    Exit,
}

impl ResultClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Done => "done",
            Self::Running => "running",
            Self::Connected => "connected",
            Self::Error => "error",
            Self::Exit => "exit",
        }
    }
}

impl FromStr for ResultClass {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        match s {
            "done" => Ok(Self::Done),
            "running" => Ok(Self::Running),
            "connected" => Ok(Self::Connected),
            "error" => Ok(Self::Error),
            "exit" => Ok(Self::Exit),
            _ => Err(()),
        }
    }
}

impl fmt::Display for ResultClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `*` records report execution state changes; `=` records report
/// everything else (thread/breakpoint/library notifications).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AsyncKind {
    Exec,
    Notify,
}

/// Stream record channel: console (`~`), target (`@`), log (`&`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamChannel {
    Console,
    Target,
    Log,
}

impl StreamChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Console => "console",
            Self::Target => "target",
            Self::Log => "log",
        }
    }
}

/// One parsed MI output line
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum MiRecord {
    /// Tagged reply to a previously submitted command
    Result {
        token: Option<u32>,
        class: ResultClass,
        results: MiResults,
    },
    /// Out-of-band notification
    Async {
        token: Option<u32>,
        kind: AsyncKind,
        class: String,
        results: MiResults,
    },
    /// Display text, not protocol-significant
    Stream {
        channel: StreamChannel,
        text: String,
    },
    /// The `(gdb)` terminator line; consumed and dropped
    Prompt,
}

impl MiRecord {
    /// Token carried by this record, if any
    pub fn token(&self) -> Option<u32> {
        match self {
            MiRecord::Result { token, .. } | MiRecord::Async { token, .. } => *token,
            _ => None,
        }
    }
}
