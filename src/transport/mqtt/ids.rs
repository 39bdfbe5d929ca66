//! Message identifier allocation

use std::sync::atomic::{AtomicU16, Ordering};

/// Shared 16-bit counter for QoS > 0 publishes, subscribes and unsubscribes.
///
/// Wraps from 65535 back to 1; identifier 0 is reserved for QoS 0 and is
/// never handed out.
#[derive(Debug, Default)]
pub struct IdAllocator {
    last: AtomicU16,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    fn starting_after(last: u16) -> Self {
        Self {
            last: AtomicU16::new(last),
        }
    }

    fn successor(id: u16) -> u16 {
        match id.wrapping_add(1) {
            0 => 1,
            next => next,
        }
    }

    pub fn next_id(&self) -> u16 {
        let previous = self
            .last
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |id| {
                Some(Self::successor(id))
            })
            .unwrap_or_else(|id| id);
        Self::successor(previous)
    }

    /// Next identifier for which `in_use` is false.
    ///
    /// Gives up after one full cycle and returns the plain next identifier.
    pub fn next_free(&self, in_use: impl Fn(u16) -> bool) -> u16 {
        let first = self.next_id();
        if !in_use(first) {
            return first;
        }
        for _ in 1..u16::MAX {
            let candidate = self.next_id();
            if !in_use(candidate) {
                return candidate;
            }
        }
        first
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_starts_at_one() {
        let ids = IdAllocator::new();
        assert_eq!(ids.next_id(), 1);
        assert_eq!(ids.next_id(), 2);
    }

    #[test]
    fn test_never_returns_zero_across_wraparound() {
        let ids = IdAllocator::new();
        let mut previous = 0u16;
        for _ in 0..70_000 {
            let id = ids.next_id();
            assert_ne!(id, 0);
            assert_ne!(id, previous);
            previous = id;
        }
    }

    #[test]
    fn test_wraps_to_one() {
        let ids = IdAllocator::starting_after(u16::MAX - 1);
        assert_eq!(ids.next_id(), u16::MAX);
        assert_eq!(ids.next_id(), 1);
    }

    #[test]
    fn test_next_free_skips_ids_in_use() {
        let ids = IdAllocator::new();
        let busy: HashSet<u16> = [1, 2, 3].into_iter().collect();
        assert_eq!(ids.next_free(|id| busy.contains(&id)), 4);
    }

    #[test]
    fn test_concurrent_allocation_is_unique() {
        let ids = Arc::new(IdAllocator::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let ids = ids.clone();
                std::thread::spawn(move || (0..1000).map(|_| ids.next_id()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "duplicate id {id}");
            }
        }
        assert_eq!(seen.len(), 4000);
    }
}
