//! The hierarchical context model
//!
//! A [`Context`] is an immutable identifier for a debug-model entity:
//! session → command control → container (process) → thread → frame, with
//! breakpoints and watchpoints hanging off the session. Equality and hashing
//! are structural over the full parent chain: two contexts denote the same
//! entity iff their entire ancestry matches.
//!
//! Contexts are interned: [`ContextInterner::intern`] returns a canonical
//! handle, so equal chains share one allocation and comparisons hit the
//! `Arc::ptr_eq` fast path. Correctness never depends on interning — a
//! context built twice without the interner still compares equal.
//!
//! Contexts are never mutated. An entity change is a new interned value
//! (sharing the unchanged chain prefix) plus an event. A retired context
//! (its entity exited) stays valid as a historical reference in old events
//! but must not be used for new commands; retirement is tracked by the
//! run-control layer, not here.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};

/// Identifies one debug session; contexts from different sessions never
/// compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub u32);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Kind of entity a context identifies, with its identity payload
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ContextKind {
    Session,
    CommandControl,
    /// A process / thread group, e.g. MI group id `"i1"`
    Container { group_id: String },
    Thread { id: u32 },
    Frame { level: u32 },
    Breakpoint { number: u32 },
    Watchpoint { number: u32 },
}

impl ContextKind {
    pub fn tag(&self) -> ContextKindTag {
        match self {
            Self::Session => ContextKindTag::Session,
            Self::CommandControl => ContextKindTag::CommandControl,
            Self::Container { .. } => ContextKindTag::Container,
            Self::Thread { .. } => ContextKindTag::Thread,
            Self::Frame { .. } => ContextKindTag::Frame,
            Self::Breakpoint { .. } => ContextKindTag::Breakpoint,
            Self::Watchpoint { .. } => ContextKindTag::Watchpoint,
        }
    }
}

/// Payload-free kind discriminant, for ancestry queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextKindTag {
    Session,
    CommandControl,
    Container,
    Thread,
    Frame,
    Breakpoint,
    Watchpoint,
}

#[derive(Debug)]
struct ContextData {
    session_id: SessionId,
    kind: ContextKind,
    parent: Option<Context>,
}

/// Canonical, cheaply clonable handle to one context chain
#[derive(Debug, Clone)]
pub struct Context(Arc<ContextData>);

impl Context {
    /// Build a root session context. Use the interner for everything below
    /// the root so equal chains share storage.
    pub fn session(session_id: SessionId) -> Self {
        Self(Arc::new(ContextData {
            session_id,
            kind: ContextKind::Session,
            parent: None,
        }))
    }

    fn child(parent: &Context, kind: ContextKind) -> Self {
        Self(Arc::new(ContextData {
            session_id: parent.session_id(),
            kind,
            parent: Some(parent.clone()),
        }))
    }

    pub fn session_id(&self) -> SessionId {
        self.0.session_id
    }

    pub fn kind(&self) -> &ContextKind {
        &self.0.kind
    }

    pub fn parent(&self) -> Option<&Context> {
        self.0.parent.as_ref()
    }

    /// Walk the parent chain (self included) for the nearest context of the
    /// requested kind.
    pub fn ancestor_of_kind(&self, tag: ContextKindTag) -> Option<Context> {
        let mut current = Some(self);
        while let Some(ctx) = current {
            if ctx.kind().tag() == tag {
                return Some(ctx.clone());
            }
            current = ctx.parent();
        }
        None
    }

    /// Thread id, when this context or an ancestor is a thread
    pub fn thread_id(&self) -> Option<u32> {
        self.ancestor_of_kind(ContextKindTag::Thread)
            .and_then(|ctx| match ctx.kind() {
                ContextKind::Thread { id } => Some(*id),
                _ => None,
            })
    }

    /// Chain length from the root, used only for diagnostics
    pub fn depth(&self) -> usize {
        let mut depth = 1;
        let mut current = self.parent();
        while let Some(ctx) = current {
            depth += 1;
            current = ctx.parent();
        }
        depth
    }
}

impl PartialEq for Context {
    fn eq(&self, other: &Self) -> bool {
        if Arc::ptr_eq(&self.0, &other.0) {
            return true;
        }
        self.0.session_id == other.0.session_id
            && self.0.kind == other.0.kind
            && self.0.parent == other.0.parent
    }
}

impl Eq for Context {}

impl Hash for Context {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.session_id.hash(state);
        self.0.kind.hash(state);
        self.0.parent.hash(state);
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let ContextKind::Session = self.kind() {
            return write!(f, "{}", self.session_id());
        }
        if let Some(parent) = self.parent() {
            write!(f, "{parent}/")?;
        }
        match self.kind() {
            ContextKind::Session => unreachable!(),
            ContextKind::CommandControl => write!(f, "control"),
            ContextKind::Container { group_id } => write!(f, "proc[{group_id}]"),
            ContextKind::Thread { id } => write!(f, "thread[{id}]"),
            ContextKind::Frame { level } => write!(f, "frame[{level}]"),
            ContextKind::Breakpoint { number } => write!(f, "bkpt[{number}]"),
            ContextKind::Watchpoint { number } => write!(f, "watch[{number}]"),
        }
    }
}

/// Deduplicating store of context chains.
///
/// `intern` is keyed on the structural value, so interning the same
/// `(session, kind, parent chain)` twice hands back the same `Arc`.
#[derive(Debug)]
pub struct ContextInterner {
    session: Context,
    entries: Mutex<HashSet<Context>>,
}

impl ContextInterner {
    pub fn new(session_id: SessionId) -> Self {
        let session = Context::session(session_id);
        let mut entries = HashSet::new();
        entries.insert(session.clone());
        Self {
            session,
            entries: Mutex::new(entries),
        }
    }

    /// The root context for this session
    pub fn session(&self) -> Context {
        self.session.clone()
    }

    /// Return the canonical handle for `kind` under `parent`.
    pub fn intern(&self, parent: &Context, kind: ContextKind) -> Context {
        let candidate = Context::child(parent, kind);
        let mut entries = self.entries.lock().expect("interner poisoned");
        match entries.get(&candidate) {
            Some(existing) => existing.clone(),
            None => {
                entries.insert(candidate.clone());
                candidate
            }
        }
    }

    pub fn command_control(&self) -> Context {
        self.intern(&self.session(), ContextKind::CommandControl)
    }

    pub fn container(&self, group_id: impl Into<String>) -> Context {
        let control = self.command_control();
        self.intern(
            &control,
            ContextKind::Container {
                group_id: group_id.into(),
            },
        )
    }

    pub fn thread(&self, container: &Context, id: u32) -> Context {
        self.intern(container, ContextKind::Thread { id })
    }

    pub fn frame(&self, thread: &Context, level: u32) -> Context {
        self.intern(thread, ContextKind::Frame { level })
    }

    pub fn breakpoint(&self, number: u32) -> Context {
        self.intern(&self.session(), ContextKind::Breakpoint { number })
    }

    pub fn watchpoint(&self, number: u32) -> Context {
        self.intern(&self.session(), ContextKind::Watchpoint { number })
    }
}
