//! Run-control state for execution contexts

use serde::{Deserialize, Serialize};
use std::fmt;

/// Execution state of a thread or container context.
///
/// `Exited` is absorbing: once reached, no further transition is permitted.
/// Backends are known to double-deliver exit notifications; the tracker
/// relies on this invariant to ignore the replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunState {
    Running,
    Suspended,
    Stepping,
    Exited,
}

impl RunState {
    /// Whether a transition out of `self` into `next` is legal
    pub fn can_transition_to(self, next: RunState) -> bool {
        match self {
            RunState::Exited => false,
            _ => self != next || next == RunState::Exited,
        }
    }

    pub fn is_exited(self) -> bool {
        self == RunState::Exited
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Suspended => "suspended",
            Self::Stepping => "stepping",
            Self::Exited => "exited",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Granularity of a step request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepKind {
    /// `-exec-step`: into calls
    Into,
    /// `-exec-next`: over calls
    Over,
    /// `-exec-finish`: out of the current frame
    Out,
}

impl StepKind {
    /// MI operation implementing this step
    pub fn operation(self) -> &'static str {
        match self {
            Self::Into => "exec-step",
            Self::Over => "exec-next",
            Self::Out => "exec-finish",
        }
    }
}
