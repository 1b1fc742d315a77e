//! Test utilities and mock engines for Tandem development.
//!
//! Provides a [`StubEngine`] with injectable failures, an [`EventLog`]
//! observer that records events for later assertions, and
//! [`wait_until`] for polling cross-thread conditions in tests.

#![forbid(unsafe_code)]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod fixtures;

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tandem_core::{Event, EventKind};

pub use fixtures::{failing_factory, StubControl, StubEngine, StubOp};

/// Records every event handed to its observer.
///
/// Clone it freely: all clones share one log.
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<Event>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// An observer closure that appends to this log.
    pub fn observer(&self) -> impl Fn(&Event) + Send + Sync + 'static {
        let events = Arc::clone(&self.events);
        move |event| events.lock().unwrap().push(event.clone())
    }

    /// Everything recorded so far.
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    /// How many recorded events are of `kind`.
    pub fn count(&self, kind: EventKind) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.kind() == kind)
            .count()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

/// Poll `condition` every millisecond until it holds or `timeout`
/// passes. Returns whether it held.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_log_records_and_counts() {
        let log = EventLog::new();
        let observer = log.observer();
        observer(&Event::Step { timestep: 1 });
        observer(&Event::Log {
            message: "x".into(),
        });
        observer(&Event::Step { timestep: 2 });
        assert_eq!(log.count(EventKind::Step), 2);
        assert_eq!(log.events().len(), 3);
        log.clear();
        assert!(log.events().is_empty());
    }

    #[test]
    fn wait_until_times_out() {
        assert!(!wait_until(Duration::from_millis(10), || false));
        assert!(wait_until(Duration::from_millis(10), || true));
    }
}
