//! Push-event subscriptions and fan-out.

use std::{
    collections::BTreeMap,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, PoisonError,
    },
};

use shared::{domain::EventKind, protocol::SessionEvent};
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::{debug, warn};

pub type EventCallback = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

/// Opaque handle returned by [`EventHub::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    id: u64,
    kind: EventKind,
}

impl SubscriptionHandle {
    pub fn kind(&self) -> EventKind {
        self.kind
    }
}

struct Subscriber {
    id: u64,
    callback: EventCallback,
}

#[derive(Default)]
pub struct EventHub {
    next_id: AtomicU64,
    subscribers: Mutex<BTreeMap<EventKind, Vec<Subscriber>>>,
    closed: AtomicBool,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, kind: EventKind, callback: F) -> SubscriptionHandle
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if self.is_closed() {
            warn!(
                "events: hub is closed, subscription id={id} kind={} will never fire",
                kind.as_str()
            );
            return SubscriptionHandle { id, kind };
        }
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(kind)
            .or_default()
            .push(Subscriber {
                id,
                callback: Arc::new(callback),
            });
        debug!("events: subscribed id={id} kind={}", kind.as_str());
        SubscriptionHandle { id, kind }
    }

    /// Returns `false` when the handle was already removed.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(list) = subscribers.get_mut(&handle.kind) else {
            return false;
        };
        let Some(position) = list.iter().position(|sub| sub.id == handle.id) else {
            return false;
        };
        list.remove(position);
        if list.is_empty() {
            subscribers.remove(&handle.kind);
        }
        true
    }

    pub fn len(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(Vec::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every subscription and refuses new ones.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Delivers `event` to every subscriber of its kind, in registration
    /// order. Returns how many callbacks completed without panicking.
    ///
    /// No lock is held while callbacks run, so a callback may subscribe,
    /// unsubscribe or dispatch on the same hub. Events from an attached
    /// bridge are delivered one at a time by the single pump task.
    pub fn dispatch(&self, event: &SessionEvent) -> usize {
        let kind = event.kind();
        let snapshot: Vec<(u64, EventCallback)> = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .map(|list| {
                list.iter()
                    .map(|sub| (sub.id, Arc::clone(&sub.callback)))
                    .collect()
            })
            .unwrap_or_default();

        let mut delivered = 0;
        for (id, callback) in snapshot {
            match catch_unwind(AssertUnwindSafe(|| callback(event))) {
                Ok(()) => delivered += 1,
                Err(_) => warn!(
                    "events: subscriber panicked id={id} kind={}; continuing",
                    kind.as_str()
                ),
            }
        }
        delivered
    }

    /// Forwards bridge events into [`EventHub::dispatch`] until the bridge
    /// channel closes.
    pub fn attach(
        self: &Arc<Self>,
        mut events: broadcast::Receiver<SessionEvent>,
    ) -> JoinHandle<()> {
        let hub = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        hub.dispatch(&event);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("events: bridge stream lagged, skipped={skipped}");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("events: bridge stream closed");
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
#[path = "tests/events_tests.rs"]
mod tests;
