//! Strongly-typed identifiers for commands and event subscriptions.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifies one command on one message channel.
///
/// Responses carry the identifier of the request they answer. Identifiers
/// are unique per [`CommandIdAllocator`], i.e. per channel instance; two
/// sessions may hand out the same numbers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommandId(pub u64);

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u64> for CommandId {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

/// Monotonic allocator for [`CommandId`]s.
///
/// Starts at 1 so that `CommandId(0)` never appears on the wire.
#[derive(Debug)]
pub struct CommandIdAllocator {
    next: AtomicU64,
}

impl Default for CommandIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandIdAllocator {
    /// Create an allocator whose first identifier is `#1`.
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Allocate a fresh identifier. Thread-safe.
    pub fn next_id(&self) -> CommandId {
        CommandId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

/// Handle returned when an observer is registered, used to remove it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocator_starts_at_one_and_increments() {
        let ids = CommandIdAllocator::new();
        assert_eq!(ids.next_id(), CommandId(1));
        assert_eq!(ids.next_id(), CommandId(2));
        assert_eq!(ids.next_id(), CommandId(3));
    }

    #[test]
    fn allocators_are_independent() {
        let a = CommandIdAllocator::new();
        let b = CommandIdAllocator::new();
        a.next_id();
        a.next_id();
        assert_eq!(b.next_id(), CommandId(1));
    }

    #[test]
    fn concurrent_allocation_is_unique() {
        let ids = std::sync::Arc::new(CommandIdAllocator::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let ids = std::sync::Arc::clone(&ids);
                std::thread::spawn(move || (0..250).map(|_| ids.next_id()).collect::<Vec<_>>())
            })
            .collect();
        let mut all: Vec<CommandId> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 1000);
    }

    #[test]
    fn command_id_display() {
        assert_eq!(CommandId(7).to_string(), "#7");
    }
}
