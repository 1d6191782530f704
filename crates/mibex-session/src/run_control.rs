//! Run-control state tracking
//!
//! One [`RunState`] per execution context (threads and their containers),
//! driven by stop/running events from the pump. Exit states are absorbing:
//! known backends double-deliver exit notifications, and replaying any
//! event against an exited context is ignored rather than corrupting state.
//!
//! Ancestry convention: a `Stopped` event suspends both the target thread
//! and its container; `Running` resumes both. This keeps the container from
//! claiming to run while every thread in it is suspended, and vice versa.

use mibex_config::BackendCapabilities;
use mibex_core::{Context, ContextKindTag, RunState};
use std::collections::HashMap;
use tracing::{debug, trace, warn};

pub struct RunControlTracker {
    states: HashMap<Context, RunState>,
    capabilities: BackendCapabilities,
}

impl RunControlTracker {
    pub fn new(capabilities: BackendCapabilities) -> Self {
        Self {
            states: HashMap::new(),
            capabilities,
        }
    }

    /// Current state, if the context is tracked
    pub fn state(&self, ctx: &Context) -> Option<RunState> {
        self.states.get(ctx).copied()
    }

    /// A newly observed thread or container starts out running
    pub fn context_created(&mut self, ctx: &Context) {
        trace!(context = %ctx, "tracking new execution context");
        self.states.entry(ctx.clone()).or_insert(RunState::Running);
    }

    /// Whether "resume at a different line/address" can work at all on this
    /// backend. Callers check this before issuing a doomed jump request.
    pub fn can_resume_at_location(&self) -> bool {
        self.capabilities.supports_jump
    }

    /// Apply a stop: the thread and, by convention, its container suspend.
    pub fn stopped(&mut self, ctx: &Context) {
        self.transition(ctx, RunState::Suspended);
        if let Some(container) = ctx.ancestor_of_kind(ContextKindTag::Container) {
            if container != *ctx {
                self.transition(&container, RunState::Suspended);
            }
        }
    }

    /// Apply a resume: thread and container run again.
    pub fn running(&mut self, ctx: &Context) {
        self.transition(ctx, RunState::Running);
        if let Some(container) = ctx.ancestor_of_kind(ContextKindTag::Container) {
            if container != *ctx {
                self.transition(&container, RunState::Running);
            }
        }
    }

    /// A backend-confirmed step request: stepping until the matching stop.
    pub fn stepping(&mut self, ctx: &Context) {
        self.transition(ctx, RunState::Stepping);
    }

    /// The context's entity exited. Absorbing; duplicates are ignored.
    pub fn exited(&mut self, ctx: &Context) {
        self.transition(ctx, RunState::Exited);
    }

    /// Backend gone: every live context exits, each exactly once. Returns
    /// the contexts that actually transitioned.
    pub fn mark_all_exited(&mut self) -> Vec<Context> {
        let mut transitioned = Vec::new();
        for (ctx, state) in self.states.iter_mut() {
            if !state.is_exited() {
                *state = RunState::Exited;
                transitioned.push(ctx.clone());
            }
        }
        transitioned
    }

    fn transition(&mut self, ctx: &Context, next: RunState) {
        let entry = self.states.entry(ctx.clone()).or_insert(RunState::Running);
        let current = *entry;

        if current == next {
            return;
        }
        if current.is_exited() {
            // Tolerated: some backends replay exit/stop notifications.
            // Logged and dropped, never applied.
            if self.capabilities.sends_duplicate_exit_events {
                debug!(context = %ctx, attempted = %next, "event for exited context ignored (known backend quirk)");
            } else {
                warn!(context = %ctx, attempted = %next, "event for exited context ignored");
            }
            return;
        }
        // Stepping is a running substate: the backend's own `*running`
        // confirmation must not demote an in-flight step.
        if current == RunState::Stepping && next == RunState::Running {
            return;
        }
        trace!(context = %ctx, from = %current, to = %next, "run-state transition");
        *entry = next;
    }
}
