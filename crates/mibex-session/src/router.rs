//! Event router: synchronous fan-out of session events
//!
//! Internal listeners (run control, breakpoint mediation, registries) run
//! synchronously on the session pump, in registration order; they must not
//! block. A listener error is logged and delivery continues — one failing
//! listener never suppresses the rest.
//!
//! Registration and removal are safe from inside a callback: a
//! [`RouterHandle`] queues the change, applied before the next publish, not
//! the current one.
//!
//! External consumers subscribe over bounded mpsc channels. Delivery there
//! is `try_send`: a full subscriber loses the event with a warning rather
//! than stalling the pump, and closed subscribers are pruned.

use mibex_core::{DebugEventKind, SessionEvent};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, warn};

type ListenerFn = Box<dyn FnMut(&SessionEvent) -> mibex_core::Result<()> + Send>;

/// Identifies a registered listener for later removal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Which event kinds a listener wants
#[derive(Clone)]
pub enum KindFilter {
    All,
    Only(Vec<DebugEventKind>),
}

impl KindFilter {
    fn accepts(&self, kind: DebugEventKind) -> bool {
        match self {
            Self::All => true,
            Self::Only(kinds) => kinds.contains(&kind),
        }
    }
}

struct ListenerEntry {
    id: ListenerId,
    filter: KindFilter,
    callback: ListenerFn,
}

enum RouterOp {
    Register(ListenerEntry),
    Remove(ListenerId),
}

/// Queues registration changes; usable from inside a listener callback
#[derive(Clone)]
pub struct RouterHandle {
    ops: Arc<Mutex<Vec<RouterOp>>>,
    next_id: Arc<Mutex<u64>>,
}

impl RouterHandle {
    pub fn register<F>(&self, filter: KindFilter, callback: F) -> ListenerId
    where
        F: FnMut(&SessionEvent) -> mibex_core::Result<()> + Send + 'static,
    {
        let id = {
            let mut next = self.next_id.lock().expect("router id lock");
            let id = ListenerId(*next);
            *next += 1;
            id
        };
        self.ops
            .lock()
            .expect("router ops lock")
            .push(RouterOp::Register(ListenerEntry {
                id,
                filter,
                callback: Box::new(callback),
            }));
        id
    }

    pub fn remove(&self, id: ListenerId) {
        self.ops
            .lock()
            .expect("router ops lock")
            .push(RouterOp::Remove(id));
    }
}

/// The router proper; owned by the session pump
pub struct EventRouter {
    listeners: Vec<ListenerEntry>,
    ops: Arc<Mutex<Vec<RouterOp>>>,
    next_id: Arc<Mutex<u64>>,
    subscribers: Vec<mpsc::Sender<SessionEvent>>,
    channel_capacity: usize,
}

impl EventRouter {
    pub fn new(channel_capacity: usize) -> Self {
        Self {
            listeners: Vec::new(),
            ops: Arc::new(Mutex::new(Vec::new())),
            next_id: Arc::new(Mutex::new(1)),
            subscribers: Vec::new(),
            channel_capacity,
        }
    }

    /// Handle for (re)registration, including from inside callbacks
    pub fn handle(&self) -> RouterHandle {
        RouterHandle {
            ops: self.ops.clone(),
            next_id: self.next_id.clone(),
        }
    }

    /// Direct registration during setup
    pub fn register<F>(&mut self, filter: KindFilter, callback: F) -> ListenerId
    where
        F: FnMut(&SessionEvent) -> mibex_core::Result<()> + Send + 'static,
    {
        let id = self.handle().register(filter, callback);
        self.apply_pending();
        id
    }

    /// New bounded subscriber channel. Closed subscribers from earlier
    /// sessions of the consumer are pruned here rather than accumulating.
    pub fn subscribe(&mut self) -> mpsc::Receiver<SessionEvent> {
        let before = self.subscribers.len();
        self.subscribers.retain(|tx| !tx.is_closed());
        let removed = before - self.subscribers.len();
        if removed > 0 {
            debug!(removed, "pruned stale event subscribers");
        }
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        self.subscribers.push(tx);
        rx
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Deliver to all matching listeners in registration order, then fan
    /// out to subscribers.
    pub fn publish(&mut self, event: &SessionEvent) {
        self.apply_pending();

        for entry in &mut self.listeners {
            if !entry.filter.accepts(event.kind()) {
                continue;
            }
            if let Err(e) = (entry.callback)(event) {
                // Isolated: remaining listeners still get the event
                warn!(
                    listener = entry.id.0,
                    kind = event.kind().as_str(),
                    error = %e,
                    "event listener failed"
                );
            }
        }

        self.subscribers.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(kind = event.kind().as_str(), "subscriber full, event dropped");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    fn apply_pending(&mut self) {
        let ops: Vec<RouterOp> = std::mem::take(&mut *self.ops.lock().expect("router ops lock"));
        for op in ops {
            match op {
                RouterOp::Register(entry) => self.listeners.push(entry),
                RouterOp::Remove(id) => self.listeners.retain(|l| l.id != id),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mibex_core::{Context, DebugEvent, Error, SessionEvent, SessionId};

    fn stream_event() -> SessionEvent {
        SessionEvent::new(
            Context::session(SessionId(1)),
            DebugEvent::Stream {
                channel: mibex_mi::StreamChannel::Console,
                text: "hello\n".into(),
            },
        )
    }

    fn running_event() -> SessionEvent {
        SessionEvent::new(Context::session(SessionId(1)), DebugEvent::Running)
    }

    #[test]
    fn delivers_in_registration_order_with_kind_filter() {
        let mut router = EventRouter::new(8);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let seen_a = seen.clone();
        router.register(KindFilter::All, move |_| {
            seen_a.lock().unwrap().push("a");
            Ok(())
        });
        let seen_b = seen.clone();
        router.register(KindFilter::Only(vec![DebugEventKind::Running]), move |_| {
            seen_b.lock().unwrap().push("b");
            Ok(())
        });

        router.publish(&stream_event());
        router.publish(&running_event());
        assert_eq!(*seen.lock().unwrap(), vec!["a", "a", "b"]);
    }

    #[test]
    fn failing_listener_does_not_suppress_the_rest() {
        let mut router = EventRouter::new(8);
        let seen = Arc::new(Mutex::new(0));

        router.register(KindFilter::All, |_| Err(Error::Backend("boom".into())));
        let seen2 = seen.clone();
        router.register(KindFilter::All, move |_| {
            *seen2.lock().unwrap() += 1;
            Ok(())
        });

        router.publish(&running_event());
        assert_eq!(*seen.lock().unwrap(), 1);
    }

    #[test]
    fn registration_from_inside_a_callback_takes_effect_next_publish() {
        let mut router = EventRouter::new(8);
        let handle = router.handle();
        let late_calls = Arc::new(Mutex::new(0));

        let late_calls_outer = late_calls.clone();
        let registered = Arc::new(Mutex::new(false));
        router.register(KindFilter::All, move |_| {
            let mut done = registered.lock().unwrap();
            if !*done {
                *done = true;
                let late_calls_inner = late_calls_outer.clone();
                handle.register(KindFilter::All, move |_| {
                    *late_calls_inner.lock().unwrap() += 1;
                    Ok(())
                });
            }
            Ok(())
        });

        router.publish(&running_event());
        assert_eq!(*late_calls.lock().unwrap(), 0); // not the current publish
        router.publish(&running_event());
        assert_eq!(*late_calls.lock().unwrap(), 1); // the next one
    }

    #[test]
    fn removal_from_inside_a_callback_is_deferred() {
        let mut router = EventRouter::new(8);
        let handle = router.handle();
        let calls = Arc::new(Mutex::new(0));

        let calls2 = calls.clone();
        let id_slot: Arc<Mutex<Option<ListenerId>>> = Arc::new(Mutex::new(None));
        let id_slot2 = id_slot.clone();
        let id = router.register(KindFilter::All, move |_| {
            *calls2.lock().unwrap() += 1;
            if let Some(id) = *id_slot2.lock().unwrap() {
                handle.remove(id);
            }
            Ok(())
        });
        *id_slot.lock().unwrap() = Some(id);

        router.publish(&running_event());
        router.publish(&running_event());
        router.publish(&running_event());
        // Still delivered on the publish that queued the removal, gone after
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn subscribers_receive_events_and_full_channels_drop() {
        let mut router = EventRouter::new(1);
        let mut rx = router.subscribe();

        router.publish(&running_event());
        router.publish(&stream_event()); // dropped: capacity 1, not drained

        let first = rx.recv().await.unwrap();
        assert_eq!(first.kind(), DebugEventKind::Running);
        assert!(rx.try_recv().is_err());

        drop(rx);
        router.publish(&running_event());
        assert_eq!(router.subscriber_count(), 0);
    }
}
