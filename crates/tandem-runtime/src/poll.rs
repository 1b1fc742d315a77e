//! Bounded polling for the executor's wait loops.
//!
//! The executor never blocks indefinitely on shared state. Each wait is a
//! loop of "check, then nap for at most one interval", optionally bounded
//! by a deadline. Naps use [`std::thread::park_timeout`] so the driver can
//! cut one short with `Thread::unpark`.

use std::thread;
use std::time::{Duration, Instant};

/// How a [`BoundedPoll::wait`] ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollOutcome {
    /// The condition became true.
    Satisfied,
    /// The deadline passed first.
    TimedOut,
}

/// A polling schedule: an interval and an optional deadline.
#[derive(Clone, Copy, Debug)]
pub struct BoundedPoll {
    interval: Duration,
    deadline: Option<Instant>,
}

impl BoundedPoll {
    /// Poll every `interval` with no deadline.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            deadline: None,
        }
    }

    /// Give up `timeout` from now.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
            ..self
        }
    }

    /// Evaluate `done` until it returns `true` or the deadline passes.
    ///
    /// `done` is always evaluated at least once, and once more after the
    /// last nap, so a condition that flips right at the deadline is seen.
    pub fn wait(&self, mut done: impl FnMut() -> bool) -> PollOutcome {
        loop {
            if done() {
                return PollOutcome::Satisfied;
            }
            let nap = match self.deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return PollOutcome::TimedOut;
                    }
                    (deadline - now).min(self.interval)
                }
                None => self.interval,
            };
            thread::park_timeout(nap);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn satisfied_immediately() {
        let poll = BoundedPoll::new(Duration::from_secs(10));
        let start = Instant::now();
        assert_eq!(poll.wait(|| true), PollOutcome::Satisfied);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn times_out_near_deadline() {
        let poll = BoundedPoll::new(Duration::from_millis(5)).with_timeout(Duration::from_millis(50));
        let start = Instant::now();
        assert_eq!(poll.wait(|| false), PollOutcome::TimedOut);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(50));
        assert!(elapsed < Duration::from_secs(2), "took {elapsed:?}");
    }

    #[test]
    fn counts_checks_per_interval() {
        let mut checks = 0;
        let poll = BoundedPoll::new(Duration::from_millis(10)).with_timeout(Duration::from_millis(100));
        poll.wait(|| {
            checks += 1;
            false
        });
        // One check up front, one after every nap; never a busy spin.
        assert!(checks >= 2);
        assert!(checks <= 100, "{checks} checks in 100ms");
    }

    #[test]
    fn sees_flag_set_by_other_thread() {
        let flag = Arc::new(AtomicBool::new(false));
        let setter = {
            let flag = Arc::clone(&flag);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(30));
                flag.store(true, Ordering::SeqCst);
            })
        };
        let poll = BoundedPoll::new(Duration::from_millis(5)).with_timeout(Duration::from_secs(5));
        assert_eq!(
            poll.wait(|| flag.load(Ordering::SeqCst)),
            PollOutcome::Satisfied
        );
        setter.join().unwrap();
    }

    #[test]
    fn unpark_cuts_nap_short() {
        let flag = Arc::new(AtomicBool::new(false));
        let waiter = {
            let flag = Arc::clone(&flag);
            thread::spawn(move || {
                let start = Instant::now();
                BoundedPoll::new(Duration::from_secs(10)).wait(|| flag.load(Ordering::SeqCst));
                start.elapsed()
            })
        };
        thread::sleep(Duration::from_millis(20));
        flag.store(true, Ordering::SeqCst);
        waiter.thread().unpark();
        let elapsed = waiter.join().unwrap();
        assert!(elapsed < Duration::from_secs(5), "took {elapsed:?}");
    }
}
