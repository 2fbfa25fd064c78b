//! # Semaphore.
//!
//! A **semaphore** is a fundamental synchronization primitive used to regulate
//! concurrent access to a finite set of resources. It maintains an internal
//! count representing the number of available "permits." Each permit grants a
//! thread the right to access a shared resource.
//!
//! - [`Semaphore::down`]: Decrements the permit count if a permit is
//!   available. If no permits remain, the calling thread sleeps until one
//!   becomes available.
//! - [`Semaphore::up`]: Increments the permit count and wakes one sleeping
//!   thread, if any.
//! - [`Semaphore::try_down`]: Takes a permit only if one is available right
//!   now.
//!
//! A semaphore initialized with zero permits serves as an event signal: one
//! thread downs it to wait for the event, another ups it to announce it.
//!
//! ## Wake-up order
//!
//! Sleeping threads are kept in priority order, and [`Semaphore::up`] always
//! wakes the thread with the highest *current* effective priority. Priorities
//! can change while a thread sleeps (a sleeping thread may receive a
//! donation), so the queue is re-sorted on every `up` rather than trusted
//! from insertion time. If the woken thread has a higher priority than the
//! caller, the caller yields to it immediately.
//!
//! #### Usage Example
//!
//! ```rust
//! let sema = Semaphore::new(3); // Allows up to 3 concurrent threads.
//!
//! // Acquire a permit (sleeps if unavailable)
//! let permit = sema.wait();
//!
//! // Critical section (up to 3 threads can enter concurrently)
//!
//! // Permit is automatically released when `permit` goes out of scope.
//! drop(permit);
//! ```

use alloc::vec::Vec;
use keos::{
    interrupt::{InterruptGuard, in_interrupt_context},
    sync::{SpinLock, WouldBlock},
    thread::{Current, ParkHandle, scheduler, with_threads},
};

use super::priority;

struct SemaphoreInner {
    value: usize,
    waiters: Vec<ParkHandle>,
}

/// Counting semaphore.
///
/// A semaphore maintains a set of permits. Permits are used to synchronize
/// access to a shared resource. A semaphore differs from a lock in that it
/// can allow more than one concurrent caller to access the shared resource at
/// a time.
pub struct Semaphore {
    inner: SpinLock<SemaphoreInner>,
}

impl Semaphore {
    /// Creates a new semaphore initialized with `permits` permits.
    pub const fn new(permits: usize) -> Self {
        Self {
            inner: SpinLock::new(SemaphoreInner {
                value: permits,
                waiters: Vec::new(),
            }),
        }
    }

    /// Waits until a permit becomes available and then takes it.
    ///
    /// May be called with interrupts already masked.
    ///
    /// # Panics
    /// Panics if called from the interrupt context.
    pub fn down(&self) {
        assert!(
            !in_interrupt_context(),
            "Semaphore::down: cannot sleep in the interrupt context."
        );

        let _guard = InterruptGuard::new();
        loop {
            let mut inner = self.inner.lock();
            if inner.value > 0 {
                inner.value -= 1;
                inner.unlock();
                return;
            }
            Current::park_with(move |handle| {
                with_threads(|tt| priority::insert_ordered(tt, &mut inner.waiters, handle));
                inner.unlock();
            });
        }
    }

    /// Takes a permit if one is available, without sleeping.
    ///
    /// Safe to call from the interrupt context.
    ///
    /// # Errors
    /// Returns [`WouldBlock`] if no permit is available.
    pub fn try_down(&self) -> Result<(), WouldBlock> {
        let mut inner = self.inner.lock();
        let result = if inner.value > 0 {
            inner.value -= 1;
            Ok(())
        } else {
            Err(WouldBlock)
        };
        inner.unlock();
        result
    }

    /// Releases a permit back to the semaphore.
    ///
    /// Wakes the highest-priority sleeping thread, if any, and yields to it if
    /// it outranks the caller. In the interrupt context the yield happens when
    /// the handler returns.
    pub fn up(&self) {
        let _guard = InterruptGuard::new();
        let mut inner = self.inner.lock();
        let woken = with_threads(|tt| priority::pop_highest(tt, &mut inner.waiters));
        inner.value += 1;
        inner.unlock();

        if let Some(handle) = woken {
            handle.unpark();
        }
        scheduler::preempt();
    }

    /// Waits for a permit, and returns a guard that releases it on drop.
    pub fn wait(&self) -> SemaphorePermits<'_> {
        self.down();
        SemaphorePermits { sema: self }
    }

    /// The number of available permits.
    pub fn value(&self) -> usize {
        let inner = self.inner.lock();
        let value = inner.value;
        inner.unlock();
        value
    }
}

/// An RAII implementation of a "scoped semaphore". When this structure
/// is dropped (falls out of scope), the permit is released with
/// [`Semaphore::up`].
///
/// This structure is created by the [`wait`] method on [`Semaphore`].
///
/// [`wait`]: Semaphore::wait
pub struct SemaphorePermits<'a> {
    sema: &'a Semaphore,
}

impl Drop for SemaphorePermits<'_> {
    fn drop(&mut self) {
        self.sema.up()
    }
}
