//! # Condition Variable.
//!
//! A **Condition Variable** allows a thread to efficiently block until a
//! certain condition is met, without consuming CPU cycles. It is always used
//! in conjunction with a [`Lock`] (or a [`Mutex`]) that guards access to
//! shared data. It is generally used when a thread needs to *wait for a
//! specific state* in shared data, and another thread will *notify* it when
//! that state changes.
//!
//! ## Mesa semantics
//!
//! Signaling a condition and waking up from the wait are not one atomic
//! step. The signaled thread has to reacquire the lock first, and by the time
//! it does, another thread may have changed the state again. The waiter must
//! therefore re-check its condition after every wakeup:
//!
//! ```rust
//! let mut guard = lock.acquire();
//! while !ready() {
//!     guard = condvar.wait(guard);
//! }
//! ```
//!
//! [`ConditionVariable::wait_while`] runs this loop for a [`Mutex`]:
//!
//! ```rust
//! let guard = condvar.wait_while(&mutex, |state| state.is_empty());
//! ```
//!
//! ## Wake-up order
//!
//! Each wait gets its own [`Semaphore`] with no permit, queued in the
//! condition variable. [`ConditionVariable::signal`] ups the semaphore of the
//! waiter with the highest effective priority at the time of the signal, and
//! [`ConditionVariable::broadcast`] ups every semaphore, highest first.
//!
//! All operations must be called with the associated lock held. A condition
//! variable is associated with a single lock, while one lock may be shared by
//! any number of condition variables.

use super::{
    Semaphore,
    lock::{Lock, LockGuard},
    mutex::{Mutex, MutexGuard},
    priority::{self, Waiter},
};
use alloc::{sync::Arc, vec::Vec};
use keos::{
    interrupt::in_interrupt_context,
    sync::SpinLock,
    thread::{Current, Tid, with_threads},
};

/// A guard proving that the current thread holds a [`Lock`].
pub trait LockHeld {
    /// The held lock.
    fn held_lock(&self) -> &Lock;
}

impl LockHeld for LockGuard<'_> {
    fn held_lock(&self) -> &Lock {
        self.lock
    }
}

impl<T> LockHeld for MutexGuard<'_, T> {
    fn held_lock(&self) -> &Lock {
        self.guard.lock
    }
}

struct CondvarWaiter {
    tid: Tid,
    sema: Arc<Semaphore>,
}

impl Waiter for CondvarWaiter {
    fn waiter(&self) -> Tid {
        self.tid
    }
}

/// A Condition Variable
///
/// Condition variables represent the ability to block a thread such that it
/// consumes no CPU time while waiting for an event to occur. Condition
/// variables are typically associated with a boolean predicate (a condition)
/// and a lock. The predicate is always verified inside of the lock before
/// determining that a thread must block.
#[derive(Default)]
pub struct ConditionVariable {
    waiters: SpinLock<Vec<CondvarWaiter>>,
}

impl ConditionVariable {
    /// Creates a new condition variable which is ready to be waited on and
    /// signaled.
    pub const fn new() -> Self {
        Self {
            waiters: SpinLock::new(Vec::new()),
        }
    }

    /// Atomically releases the lock of `guard` and waits until this condition
    /// variable is signaled, then reacquires the lock.
    ///
    /// The condition the caller waits for may no longer hold on return.
    ///
    /// # Panics
    /// Panics if called from the interrupt context, or if the current thread
    /// does not hold the lock.
    pub fn wait<'a>(&self, guard: LockGuard<'a>) -> LockGuard<'a> {
        assert!(
            !in_interrupt_context(),
            "ConditionVariable::wait: cannot sleep in the interrupt context."
        );
        let lock = guard.lock();
        assert!(
            lock.held_by_current_thread(),
            "ConditionVariable::wait: lock is not held by the current thread."
        );

        let sema = Arc::new(Semaphore::new(0));
        let waiter = CondvarWaiter {
            tid: Current::get_tid(),
            sema: sema.clone(),
        };
        let mut waiters = self.waiters.lock();
        with_threads(|tt| priority::insert_ordered(tt, &mut *waiters, waiter));
        waiters.unlock();

        guard.unlock();
        sema.down();
        lock.acquire()
    }

    /// Blocks the current thread while `predicate` returns `true`.
    ///
    /// This function locks `mutex` and checks the predicate. If it returns
    /// `true`, the thread is blocked and the mutex is temporarily released.
    /// When the thread is signaled and wakes up, it reacquires the mutex and
    /// re-evaluates the predicate. This loop continues until the predicate
    /// returns `false`, and the mutex is returned locked.
    pub fn wait_while<'a, T>(
        &self,
        mutex: &'a Mutex<T>,
        mut predicate: impl FnMut(&mut T) -> bool,
    ) -> MutexGuard<'a, T> {
        let mut guard = mutex.lock();
        while predicate(&mut *guard) {
            let MutexGuard { guard: held, mutex } = guard;
            guard = MutexGuard {
                guard: self.wait(held),
                mutex,
            };
        }
        guard
    }

    /// Wakes up the highest-priority thread waiting on this condition
    /// variable, if any.
    ///
    /// Calls to `signal` are not buffered in any way.
    ///
    /// # Panics
    /// Panics if the current thread does not hold the lock of `guard`.
    pub fn signal(&self, guard: &impl LockHeld) {
        assert!(
            guard.held_lock().held_by_current_thread(),
            "ConditionVariable::signal: lock is not held by the current thread."
        );
        self.wake_one();
    }

    /// Wakes up all threads waiting on this condition variable, highest
    /// priority first.
    ///
    /// # Panics
    /// Panics if the current thread does not hold the lock of `guard`.
    pub fn broadcast(&self, guard: &impl LockHeld) {
        assert!(
            guard.held_lock().held_by_current_thread(),
            "ConditionVariable::broadcast: lock is not held by the current thread."
        );
        while self.wake_one() {}
    }

    fn wake_one(&self) -> bool {
        let mut waiters = self.waiters.lock();
        let next = with_threads(|tt| priority::pop_highest(tt, &mut *waiters));
        waiters.unlock();
        match next {
            Some(waiter) => {
                waiter.sema.up();
                true
            }
            None => false,
        }
    }
}
