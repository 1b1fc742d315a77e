//! Event fan-out to registered observers.
//!
//! Observers are keyed by [`EventKind`] and run on the router thread in
//! registration order. The registry lock is released before any observer
//! runs, so an observer may register or remove observers itself. A
//! panicking observer is logged and skipped; the router keeps running.
//!
//! Every event is also mirrored to `tracing`, so an application with a
//! subscriber installed sees engine output without registering anything.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, trace, warn};

use tandem_core::{Event, EventKind, SubscriptionId};

type Observer = Arc<dyn Fn(&Event) + Send + Sync>;

/// Registry of event observers.
pub struct EventEmitter {
    next_id: AtomicU64,
    observers: Mutex<HashMap<EventKind, Vec<(SubscriptionId, Observer)>>>,
}

impl EventEmitter {
    /// An emitter with no observers.
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            observers: Mutex::new(HashMap::new()),
        }
    }

    /// Register `observer` for events of `kind`.
    pub fn on<F>(&self, kind: EventKind, observer: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock()
            .entry(kind)
            .or_default()
            .push((id, Arc::new(observer)));
        id
    }

    /// Remove a registration. Returns whether it existed.
    pub fn off(&self, id: SubscriptionId) -> bool {
        let mut observers = self.lock();
        for list in observers.values_mut() {
            if let Some(pos) = list.iter().position(|(sub, _)| *sub == id) {
                list.remove(pos);
                return true;
            }
        }
        false
    }

    /// Observers currently registered for `kind`.
    pub fn observer_count(&self, kind: EventKind) -> usize {
        self.lock().get(&kind).map_or(0, Vec::len)
    }

    /// Deliver `event` to every observer of its kind. Returns how many
    /// observers ran.
    pub(crate) fn emit(&self, event: &Event) -> usize {
        mirror(event);
        let targets: Vec<Observer> = self
            .lock()
            .get(&event.kind())
            .map(|list| list.iter().map(|(_, observer)| Arc::clone(observer)).collect())
            .unwrap_or_default();
        for observer in &targets {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| observer(event))) {
                warn!(
                    kind = %event.kind(),
                    panic = panic_message(payload.as_ref()),
                    "event observer panicked"
                );
            }
        }
        targets.len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<EventKind, Vec<(SubscriptionId, Observer)>>> {
        self.observers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new()
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

fn mirror(event: &Event) {
    match event {
        Event::Log { message } => info!(target: "tandem::engine", "{message}"),
        Event::Error { message } => warn!(target: "tandem::engine", "{message}"),
        Event::Step { timestep } => trace!(timestep, "step"),
        Event::ResizeNeeded { num_atoms } => debug!(num_atoms, "resize needed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter(emitter: &EventEmitter, kind: EventKind) -> (SubscriptionId, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let id = emitter.on(kind, move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        (id, count)
    }

    #[test]
    fn routes_by_kind() {
        let emitter = EventEmitter::new();
        let (_, logs) = counter(&emitter, EventKind::Log);
        let (_, steps) = counter(&emitter, EventKind::Step);

        emitter.emit(&Event::Log {
            message: "hello".into(),
        });
        emitter.emit(&Event::Step { timestep: 1 });
        emitter.emit(&Event::Step { timestep: 2 });

        assert_eq!(logs.load(Ordering::SeqCst), 1);
        assert_eq!(steps.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn runs_in_registration_order() {
        let emitter = EventEmitter::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for n in 0..3 {
            let order = Arc::clone(&order);
            emitter.on(EventKind::Error, move |_| order.lock().unwrap().push(n));
        }
        assert_eq!(
            emitter.emit(&Event::Error {
                message: "boom".into()
            }),
            3
        );
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn off_removes_one_registration() {
        let emitter = EventEmitter::new();
        let (first, first_count) = counter(&emitter, EventKind::Resize);
        let (_, second_count) = counter(&emitter, EventKind::Resize);

        assert!(emitter.off(first));
        assert!(!emitter.off(first));
        emitter.emit(&Event::ResizeNeeded { num_atoms: 10 });

        assert_eq!(first_count.load(Ordering::SeqCst), 0);
        assert_eq!(second_count.load(Ordering::SeqCst), 1);
        assert_eq!(emitter.observer_count(EventKind::Resize), 1);
    }

    #[test]
    fn observer_may_register_observers() {
        let emitter = Arc::new(EventEmitter::new());
        let inner = Arc::clone(&emitter);
        emitter.on(EventKind::Log, move |_| {
            inner.on(EventKind::Log, |_| {});
        });
        emitter.emit(&Event::Log {
            message: "grow".into(),
        });
        assert_eq!(emitter.observer_count(EventKind::Log), 2);
    }

    #[test]
    fn panicking_observer_is_skipped() {
        let emitter = EventEmitter::new();
        emitter.on(EventKind::Step, |_| panic!("observer bug"));
        let (_, after) = counter(&emitter, EventKind::Step);

        assert_eq!(emitter.emit(&Event::Step { timestep: 1 }), 2);
        assert_eq!(emitter.emit(&Event::Step { timestep: 2 }), 2);
        assert_eq!(after.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn panic_payload_text() {
        let payload = panic::catch_unwind(|| panic!("static text")).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "static text");
        let payload = panic::catch_unwind(|| panic!("formatted {}", 7)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "formatted 7");
        let payload = panic::catch_unwind(|| panic::panic_any(7u8)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }

    #[test]
    fn no_observers_is_fine() {
        let emitter = EventEmitter::default();
        assert_eq!(emitter.emit(&Event::Step { timestep: 9 }), 0);
    }
}
