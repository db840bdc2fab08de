use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use derive_more::Display;
use serde::{Deserialize, Serialize};

/// Identifies one outstanding request within a mount.
#[derive(
    Debug, Display, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[display("{_0}")]
#[serde(transparent)]
pub struct RequestId(pub u32);

/// Identifies one open file within a mount.
#[derive(
    Debug, Display, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[display("{_0}")]
#[serde(transparent)]
pub struct FileHandleId(pub u32);

#[derive(Debug)]
struct AllocatorState {
    next: u32,
    live: HashSet<u32>,
}

/// Hands out ids for requests and file handles of a single mount.
///
/// The counter only moves forward and wraps around at `u32::MAX`. Every id
/// handed out stays reserved until [`IdAllocator::release`] is called, and a
/// wrapped counter skips reserved values, so the cost of one allocation is
/// bounded by the number of ids currently live. Zero is never issued.
///
/// Cloning is cheap and clones share the same counter, which is how the
/// request table and the file handle table of one mount draw from a single
/// id space.
#[derive(Debug, Clone)]
pub struct IdAllocator {
    state: Arc<Mutex<AllocatorState>>,
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub(crate) fn starting_at(next: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(AllocatorState {
                next,
                live: HashSet::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, AllocatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns an id that is not live, and marks it live.
    pub fn next_id(&self) -> u32 {
        let mut state = self.lock();
        loop {
            let candidate = state.next;
            state.next = state.next.wrapping_add(1);
            if candidate == 0 {
                continue;
            }
            if state.live.insert(candidate) {
                return candidate;
            }
        }
    }

    /// Marks an id handed out earlier as live again. Returns false if it is
    /// already live or zero.
    pub fn reserve(&self, id: u32) -> bool {
        id != 0 && self.lock().live.insert(id)
    }

    /// Makes `id` available again. Returns false if it was not live.
    pub fn release(&self, id: u32) -> bool {
        self.lock().live.remove(&id)
    }

    pub fn is_live(&self, id: u32) -> bool {
        self.lock().live.contains(&id)
    }

    pub fn live_count(&self) -> usize {
        self.lock().live.len()
    }

    #[cfg(test)]
    pub(crate) fn rewind(&self, next: u32) {
        self.lock().next = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_increase_monotonically() {
        let ids = IdAllocator::new();
        assert_eq!(ids.next_id(), 1);
        assert_eq!(ids.next_id(), 2);
        assert_eq!(ids.next_id(), 3);
        assert_eq!(ids.live_count(), 3);
    }

    #[test]
    fn released_ids_are_not_handed_out_again_before_wrapping() {
        let ids = IdAllocator::new();
        let first = ids.next_id();
        assert!(ids.release(first));
        assert!(!ids.release(first), "double release is reported");
        assert_ne!(ids.next_id(), first);
    }

    #[test]
    fn wraparound_skips_zero_and_live_ids() {
        let ids = IdAllocator::starting_at(u32::MAX - 1);
        let a = ids.next_id();
        let b = ids.next_id();
        assert_eq!((a, b), (u32::MAX - 1, u32::MAX));

        // Counter is now at 0, which is skipped; 1 and 2 were never issued.
        assert_eq!(ids.next_id(), 1);

        // Reserve 3 out of band, then wrap the counter around onto it.
        let wrapped = IdAllocator::starting_at(3);
        assert_eq!(wrapped.next_id(), 3);
        wrapped.rewind(3);
        assert_eq!(wrapped.next_id(), 4, "live id 3 is skipped");
    }

    #[test]
    fn reserved_ids_are_skipped() {
        let ids = IdAllocator::new();
        assert!(ids.reserve(2));
        assert!(!ids.reserve(2));
        assert!(!ids.reserve(0));
        assert_eq!(ids.next_id(), 1);
        assert_eq!(ids.next_id(), 3);
    }

    #[test]
    fn clones_share_one_id_space() {
        let ids = IdAllocator::new();
        let other = ids.clone();
        let a = ids.next_id();
        let b = other.next_id();
        assert_ne!(a, b);
        assert!(ids.is_live(b));
        assert!(other.is_live(a));
    }
}
