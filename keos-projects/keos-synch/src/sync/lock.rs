//! # Lock.
//!
//! A lock is a [`Semaphore`] with one permit and an owner. Only the thread
//! that acquired the lock (its **holder**) may release it, and the holder may
//! not acquire it again.
//!
//! Knowing the holder lets the lock fight **priority inversion**. Without it,
//! a high-priority thread waiting for a lock held by a low-priority thread
//! could wait forever while medium-priority threads keep the holder off the
//! CPU. So a thread that blocks on a held lock donates its priority to the
//! holder, and the holder gives it back on release. See
//! [`donation`](super::donation) for the details.
//!
//! [`Lock::acquire`] returns a [`LockGuard`], which releases the lock when it
//! goes out of scope, including while the thread unwinds on
//! [`Current::exit`]. To release the lock earlier, call
//! [`LockGuard::unlock`].
//!
//! ```rust
//! let lock = Lock::new();
//!
//! let guard = lock.acquire();
//! // Only the current thread runs here.
//! guard.unlock();
//! ```
//!
//! [`Current::exit`]: keos::thread::Current::exit

use super::{Semaphore, donation};
use core::marker::PhantomData;
use keos::{
    interrupt::{InterruptGuard, in_interrupt_context},
    sync::{SpinLock, WouldBlock},
    thread::{Current, LockId, Tid, with_threads},
};

/// A sleeping mutual exclusion lock with priority donation.
pub struct Lock {
    holder: SpinLock<Option<Tid>>,
    sema: Semaphore,
}

impl Default for Lock {
    fn default() -> Self {
        Self::new()
    }
}

impl Lock {
    /// Creates a new lock, which is not held by anyone.
    pub const fn new() -> Self {
        Self {
            holder: SpinLock::new(None),
            sema: Semaphore::new(1),
        }
    }

    /// The thread that holds the lock, if any.
    pub fn holder(&self) -> Option<Tid> {
        let guard = self.holder.lock();
        let holder = *guard;
        guard.unlock();
        holder
    }

    fn set_holder(&self, holder: Option<Tid>) {
        let mut guard = self.holder.lock();
        *guard = holder;
        guard.unlock();
    }

    /// Acquires the lock, sleeping until it becomes available.
    ///
    /// While the current thread sleeps, it donates its priority to the holder
    /// of the lock, and transitively to whatever the holder waits for.
    ///
    /// # Panics
    /// Panics if called from the interrupt context, or if the current thread
    /// already holds the lock.
    #[track_caller]
    pub fn acquire(&self) -> LockGuard<'_> {
        assert!(
            !in_interrupt_context(),
            "Lock::acquire: cannot sleep in the interrupt context."
        );
        assert!(
            !self.held_by_current_thread(),
            "Lock::acquire: lock is already held by the current thread at {}.",
            core::panic::Location::caller()
        );

        let _guard = InterruptGuard::new();
        let me = Current::get_tid();
        if self.sema.try_down().is_err() {
            let id = LockId::of(self);
            let donate_to = self.holder().filter(|_| donation::is_enabled());
            with_threads(|tt| {
                tt[me].wait_on_lock = Some(id);
                if let Some(holder) = donate_to {
                    donation::donate(tt, me, holder);
                }
            });
            self.sema.down();
            with_threads(|tt| tt[me].wait_on_lock = None);
        }
        self.set_holder(Some(me));
        LockGuard::new(self)
    }

    /// Acquires the lock only if it is free right now.
    ///
    /// Never sleeps and never donates, so it may be called from the interrupt
    /// context.
    ///
    /// # Errors
    /// Returns [`WouldBlock`] if another thread holds the lock.
    ///
    /// # Panics
    /// Panics if the current thread already holds the lock.
    pub fn try_acquire(&self) -> Result<LockGuard<'_>, WouldBlock> {
        assert!(
            !self.held_by_current_thread(),
            "Lock::try_acquire: lock is already held by the current thread."
        );
        let _guard = InterruptGuard::new();
        self.sema.try_down()?;
        self.set_holder(Some(Current::get_tid()));
        Ok(LockGuard::new(self))
    }

    /// Returns true if the current thread holds the lock.
    pub fn held_by_current_thread(&self) -> bool {
        self.holder() == Some(Current::get_tid())
    }

    fn release(&self) {
        assert!(
            self.held_by_current_thread(),
            "Lock::release: lock is not held by the current thread."
        );

        let _guard = InterruptGuard::new();
        if donation::is_enabled() {
            let me = Current::get_tid();
            let id = LockId::of(self);
            with_threads(|tt| donation::revoke(tt, me, id));
        }
        self.set_holder(None);
        self.sema.up();
    }
}

/// An RAII implementation of a "scoped lock" of a [`Lock`]. When this
/// structure is dropped (falls out of scope), the lock is released.
///
/// This structure is created by the [`acquire`] and [`try_acquire`] methods
/// on [`Lock`].
///
/// [`acquire`]: Lock::acquire
/// [`try_acquire`]: Lock::try_acquire
pub struct LockGuard<'a> {
    pub(crate) lock: &'a Lock,
    // The lock belongs to the thread that acquired it.
    _not_send: PhantomData<*const ()>,
}

unsafe impl Sync for LockGuard<'_> {}

impl<'a> LockGuard<'a> {
    fn new(lock: &'a Lock) -> Self {
        Self {
            lock,
            _not_send: PhantomData,
        }
    }

    /// The lock this guard holds.
    pub fn lock(&self) -> &'a Lock {
        self.lock
    }

    /// Releases the lock.
    pub fn unlock(self) {
        drop(self)
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.lock.release()
    }
}
