//! Ordering of waiting threads by effective priority.
//!
//! Every queue of waiting threads in this crate (semaphore waiters, donors of
//! a thread, condition variable waiters) is kept highest priority first.
//! Entries are inserted behind every entry of equal or higher priority, and
//! queues are re-sorted right before a thread is picked, as donation may have
//! changed priorities since insertion.

use alloc::vec::Vec;
use keos::thread::{ParkHandle, ThreadTable, Tid};

/// An entry of a queue that stands for a thread.
pub trait Waiter {
    /// The thread this entry stands for.
    fn waiter(&self) -> Tid;
}

impl Waiter for Tid {
    fn waiter(&self) -> Tid {
        *self
    }
}

impl Waiter for ParkHandle {
    fn waiter(&self) -> Tid {
        self.tid()
    }
}

/// Insert `entry` behind every entry of equal or higher priority.
pub fn insert_ordered<W: Waiter>(threads: &ThreadTable, queue: &mut Vec<W>, entry: W) {
    let priority = threads[entry.waiter()].priority;
    let pos = queue
        .iter()
        .position(|w| threads[w.waiter()].priority < priority)
        .unwrap_or(queue.len());
    queue.insert(pos, entry);
}

/// Sort `queue` by current effective priority, highest first.
///
/// The sort is stable, so entries of equal priority keep their order.
pub fn sort_by_priority<W: Waiter>(threads: &ThreadTable, queue: &mut [W]) {
    queue.sort_by(|a, b| {
        threads[b.waiter()]
            .priority
            .cmp(&threads[a.waiter()].priority)
    });
}

/// Pick the highest-priority entry.
pub fn pop_highest<W: Waiter>(threads: &ThreadTable, queue: &mut Vec<W>) -> Option<W> {
    if queue.is_empty() {
        return None;
    }
    sort_by_priority(threads, queue);
    Some(queue.remove(0))
}
