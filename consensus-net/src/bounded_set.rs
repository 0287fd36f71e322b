//! Fixed-capacity deduplication set with FIFO eviction.
//!
//! Every peer keeps one [`BoundedSet`] per message class to remember which
//! fingerprints it already holds. Adversarial peers can feed us unlimited
//! fresh messages, so the set is capped: once full, inserting a new
//! fingerprint forgets the oldest one.

use {
    parking_lot::Mutex,
    std::{
        collections::{HashSet, VecDeque},
        hash::Hash,
    },
};

#[derive(Debug)]
struct Inner<T> {
    /// Insertion order, oldest at the front.
    order: VecDeque<T>,
    members: HashSet<T>,
}

/// A thread-safe set holding at most `capacity` entries.
///
/// Insert-with-eviction is a single critical section, so concurrent
/// callers can never push the set past its capacity.
#[derive(Debug)]
pub struct BoundedSet<T> {
    capacity: usize,
    inner: Mutex<Inner<T>>,
}

impl<T: Eq + Hash + Clone> BoundedSet<T> {
    /// A `capacity` of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            inner: Mutex::new(Inner {
                order: VecDeque::with_capacity(capacity.min(1_024)),
                members: HashSet::with_capacity(capacity.min(1_024)),
            }),
        }
    }

    /// Insert `item`, evicting the oldest entry when full. Re-adding a
    /// present item is a no-op and does not refresh its age.
    ///
    /// Returns whether `item` was newly inserted.
    pub fn add(&self, item: T) -> bool {
        let mut inner = self.inner.lock();
        if inner.members.contains(&item) {
            return false;
        }
        if inner.order.len() >= self.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.members.remove(&oldest);
            }
        }
        inner.members.insert(item.clone());
        inner.order.push_back(item);
        true
    }

    pub fn contains(&self, item: &T) -> bool {
        self.inner.lock().members.contains(item)
    }

    /// Number of entries currently held.
    pub fn len(&self) -> usize {
        self.inner.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
