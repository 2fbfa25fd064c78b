//! # Priority Donation.
//!
//! When a thread blocks on a [`Lock`], it donates its priority to the holder
//! of the lock: the holder runs at the higher of its own priority and the
//! priorities of every thread waiting for a lock it holds. The waiting thread
//! is recorded in the holder's `donations`, and the lock it waits for in its
//! own `wait_on_lock`.
//!
//! A donation must travel along the **wait-for chain**. If H waits for a lock
//! held by M, and M waits for a lock held by L, then L must run at H's
//! priority too, or M (and with it H) never gets the lock it waits for.
//! [`propagate`] walks such a chain iteratively, one holder at a time, so a
//! long chain costs a loop iteration per link instead of a stack frame. The
//! wait-for graph of a deadlock-free kernel is acyclic, so the walk never
//! visits a thread twice; the walk is nevertheless cut after as many steps
//! as there are threads.
//!
//! When the holder releases the lock, it takes back exactly the donations
//! made for that lock ([`revoke`]) and keeps the ones made for other locks it
//! still holds.
//!
//! The engine is bypassed under [`SchedulingMode::Mlfqs`].
//!
//! [`Lock`]: super::Lock
//! [`SchedulingMode::Mlfqs`]: keos::SchedulingMode::Mlfqs

use super::{Lock, priority};
use keos::{
    SchedulingMode,
    thread::{LockId, ThreadTable, Tid, scheduling_mode},
};

/// Returns true if locks donate priority under the current scheduling mode.
pub fn is_enabled() -> bool {
    scheduling_mode() == SchedulingMode::Priority
}

/// Recompute the effective priority of `tid` from its base priority and its
/// donors.
pub fn recompute(threads: &mut ThreadTable, tid: Tid) {
    let donated = threads[tid]
        .donations
        .iter()
        .map(|donor| threads[*donor].priority)
        .max();
    let origin = threads[tid].origin_priority;
    threads[tid].priority = donated.map_or(origin, |p| p.max(origin));
}

/// Recompute the effective priority of `tid`, then of every thread down the
/// wait-for chain starting at `tid`.
pub fn propagate(threads: &mut ThreadTable, tid: Tid) {
    let mut cursor = Some(tid);
    let mut steps = 0;
    while let Some(tid) = cursor {
        if steps == threads.len() {
            keos::warning!("Donation: wait-for chain from thread {tid} does not end; stop propagating.");
            break;
        }
        recompute(threads, tid);
        // SAFETY: `tid` records the lock only while it is blocked inside
        // `Lock::acquire`, which borrows the lock.
        cursor = threads[tid]
            .wait_on_lock
            .and_then(|lock| unsafe { lock.as_ref::<Lock>() }.holder());
        steps += 1;
    }
}

/// Record that `donor` blocks on a lock held by `holder`, and lend its
/// priority down the chain.
pub fn donate(threads: &mut ThreadTable, donor: Tid, holder: Tid) {
    debug_assert!(
        threads.iter().all(|th| !th.donations.contains(&donor)),
        "Thread {donor} is already donating."
    );
    let mut donations = core::mem::take(&mut threads[holder].donations);
    priority::insert_ordered(threads, &mut donations, donor);
    threads[holder].donations = donations;
    propagate(threads, holder);
}

/// Take back from `holder` every donation made to acquire `lock`.
pub fn revoke(threads: &mut ThreadTable, holder: Tid, lock: LockId) {
    let mut donations = core::mem::take(&mut threads[holder].donations);
    donations.retain(|donor| threads[*donor].wait_on_lock != Some(lock));
    priority::sort_by_priority(threads, &mut donations);
    threads[holder].donations = donations;
    propagate(threads, holder);
}
