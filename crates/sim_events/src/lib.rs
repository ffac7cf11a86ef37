//! Synchronous, in-process event signaling.
//!
//! The [`EventManager`] lets systems and the runner notify each other
//! without direct coupling: a physics system can raise [`Stop`] when the
//! world reaches a terminal condition, and the runner reacts on the same
//! tick. Events are keyed by [`std::any::TypeId`] — they never cross a
//! process boundary, so a runtime type token is the right identity here
//! (component types, which do cross the wire, use a name hash instead).
//!
//! Dispatch is reentrancy-safe: a callback may subscribe or unsubscribe
//! (even itself) during an emit. Dispatch runs over a snapshot of the
//! subscriber list, so additions become visible on the next emit and
//! removals are tombstoned rather than shifted out from under the loop.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::trace;

/// A marker trait for event payloads.
pub trait Event: Any + Send + Sync + 'static {}
impl<T: Any + Send + Sync + 'static> Event for T {}

type BoxedHandler = Box<dyn FnMut(&dyn Any) + Send>;

struct Record {
    id: u64,
    active: AtomicBool,
    handler: Mutex<BoxedHandler>,
}

/// Handle returned by [`EventManager::subscribe`]. Dropping it removes the
/// callback; call [`Subscription::forget`] to keep the callback alive for
/// the manager's lifetime instead.
pub struct Subscription {
    record: Arc<Record>,
    detached: bool,
}

impl Subscription {
    /// Numeric ID, useful for log correlation.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.record.id
    }

    /// Keep the callback registered after this handle is dropped.
    pub fn forget(mut self) {
        self.detached = true;
    }

    /// Remove the callback now.
    pub fn cancel(self) {
        self.record.active.store(false, Ordering::Release);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if !self.detached {
            self.record.active.store(false, Ordering::Release);
        }
    }
}

/// Subscriber registry and synchronous dispatcher.
///
/// All methods take `&self`; the manager is shared between the runner and
/// its systems via `Arc`.
#[derive(Default)]
pub struct EventManager {
    channels: Mutex<HashMap<TypeId, Vec<Arc<Record>>>>,
    next_id: AtomicU64,
}

impl EventManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for events of type `E`.
    ///
    /// The callback becomes visible to emits that start after this call;
    /// an emit already in flight dispatches over its own snapshot.
    pub fn subscribe<E: Event>(
        &self,
        mut callback: impl FnMut(&E) + Send + 'static,
    ) -> Subscription {
        let record = Arc::new(Record {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            active: AtomicBool::new(true),
            handler: Mutex::new(Box::new(move |any: &dyn Any| {
                if let Some(event) = any.downcast_ref::<E>() {
                    callback(event);
                }
            })),
        });
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        let subscribers = channels.entry(TypeId::of::<E>()).or_default();
        subscribers.retain(|r| r.active.load(Ordering::Acquire));
        subscribers.push(Arc::clone(&record));
        Subscription {
            record,
            detached: false,
        }
    }

    /// Dispatch `event` to every active subscriber, in subscription order.
    pub fn emit<E: Event>(&self, event: &E) {
        let snapshot: Vec<Arc<Record>> = {
            let channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
            match channels.get(&TypeId::of::<E>()) {
                Some(subscribers) => subscribers.clone(),
                None => return,
            }
        };
        // The channel lock is released: callbacks are free to subscribe
        // and unsubscribe while we walk the snapshot.
        for record in snapshot {
            if !record.active.load(Ordering::Acquire) {
                continue;
            }
            // A handler that emits its own event type would meet its own
            // lock; skip instead of deadlocking.
            match record.handler.try_lock() {
                Ok(mut handler) => handler(event),
                Err(_) => trace!(id = record.id, "skipping handler busy in nested emit"),
            }
        }
    }

    /// Number of active subscribers for event type `E`.
    #[must_use]
    pub fn subscriber_count<E: Event>(&self) -> usize {
        let channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        channels
            .get(&TypeId::of::<E>())
            .map_or(0, |subscribers| {
                subscribers
                    .iter()
                    .filter(|r| r.active.load(Ordering::Acquire))
                    .count()
            })
    }
}

impl std::fmt::Debug for EventManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventManager").finish_non_exhaustive()
    }
}

// ── Standard events ─────────────────────────────────────────────────────

/// Raised when the paused state of a world changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pause(pub bool);

/// Raised to request that the current run terminates after this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stop;

/// Raised when a system is attached to a running world so observers can
/// react (e.g. broadcast a refreshed scene).
#[derive(Debug, Clone)]
pub struct SystemAttached {
    /// The attached system's name.
    pub name: String,
}

/// World-control carrier mirroring the external control surface: pause,
/// single-step, or both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WorldControl {
    /// Requested paused state, if any.
    pub pause: Option<bool>,
    /// Force exactly one full tick.
    pub step: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_emit_reaches_subscribers_in_order() {
        let events = EventManager::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let l1 = Arc::clone(&log);
        let s1 = events.subscribe::<Pause>(move |p| l1.lock().unwrap().push((1, p.0)));
        let l2 = Arc::clone(&log);
        let s2 = events.subscribe::<Pause>(move |p| l2.lock().unwrap().push((2, p.0)));

        events.emit(&Pause(true));
        assert_eq!(*log.lock().unwrap(), vec![(1, true), (2, true)]);
        drop((s1, s2));
    }

    #[test]
    fn test_drop_unsubscribes() {
        let events = EventManager::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let sub = events.subscribe::<Stop>(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        events.emit(&Stop);
        drop(sub);
        events.emit(&Stop);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(events.subscriber_count::<Stop>(), 0);
    }

    #[test]
    fn test_forget_keeps_subscription_alive() {
        let events = EventManager::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        events
            .subscribe::<Stop>(move |_| {
                h.fetch_add(1, Ordering::SeqCst);
            })
            .forget();

        events.emit(&Stop);
        events.emit(&Stop);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_events_are_typed_channels() {
        let events = EventManager::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        events
            .subscribe::<Pause>(move |_| {
                h.fetch_add(1, Ordering::SeqCst);
            })
            .forget();

        events.emit(&Stop);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        events.emit(&Pause(false));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_subscribe_during_dispatch_is_deferred() {
        let events = Arc::new(EventManager::new());
        let hits = Arc::new(AtomicUsize::new(0));

        let mgr = Arc::clone(&events);
        let h = Arc::clone(&hits);
        events
            .subscribe::<Stop>(move |_| {
                let h2 = Arc::clone(&h);
                mgr.subscribe::<Stop>(move |_| {
                    h2.fetch_add(1, Ordering::SeqCst);
                })
                .forget();
            })
            .forget();

        // The first emit adds a subscriber but must not invoke it.
        events.emit(&Stop);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        // The second emit sees it (and adds another).
        events.emit(&Stop);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe_during_dispatch_skips_tombstone() {
        let events = Arc::new(EventManager::new());
        let hits = Arc::new(AtomicUsize::new(0));

        // First subscriber cancels the second before the snapshot walk
        // reaches it.
        let victim_slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&victim_slot);
        events
            .subscribe::<Stop>(move |_| {
                if let Some(victim) = slot.lock().unwrap().take() {
                    victim.cancel();
                }
            })
            .forget();

        let h = Arc::clone(&hits);
        let victim = events.subscribe::<Stop>(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        *victim_slot.lock().unwrap() = Some(victim);

        events.emit(&Stop);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(events.subscriber_count::<Stop>(), 1);
    }

    #[test]
    fn test_nested_emit_of_same_type_does_not_deadlock() {
        let events = Arc::new(EventManager::new());
        let mgr = Arc::clone(&events);
        let depth = Arc::new(AtomicUsize::new(0));
        let d = Arc::clone(&depth);
        events
            .subscribe::<Stop>(move |_| {
                if d.fetch_add(1, Ordering::SeqCst) == 0 {
                    mgr.emit(&Stop);
                }
            })
            .forget();

        events.emit(&Stop);
        // The nested emit skips the busy handler instead of recursing.
        assert_eq!(depth.load(Ordering::SeqCst), 1);
    }
}
