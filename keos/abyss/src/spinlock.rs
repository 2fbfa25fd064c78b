//! Uniprocessor spinlock.
//!
//! On a single processor, holding a lock only requires that the holder is not
//! preempted. Locking therefore masks interrupts for as long as the guard
//! lives. The `locked` flag never spins: finding it set means the same thread
//! tried to take the lock twice, which is reported as a bug.
//!
//! ```
//! let counter = SpinLock::new(0);
//!
//! let mut guard = counter.lock();
//! *guard += 1;
//! // Interrupts stay masked until here.
//! guard.unlock();
//! ```

use crate::interrupt::InterruptGuard;
use core::{
    cell::UnsafeCell,
    ops::{Deref, DerefMut},
    panic::Location,
    sync::atomic::{AtomicBool, Ordering},
};

/// The lock could not be acquired at this time because the operation would
/// otherwise block.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct WouldBlock;

/// A lock protecting `T` by masking interrupts.
///
/// The data is only reachable through the [`SpinLockGuard`] returned by
/// [`lock`] and [`try_lock`]. A holder must not sleep: a parked thread keeps
/// interrupts masked on behalf of nobody.
///
/// [`lock`]: Self::lock
/// [`try_lock`]: Self::try_lock
pub struct SpinLock<T: ?Sized> {
    locked: AtomicBool,
    data: UnsafeCell<T>,
}

unsafe impl<T: ?Sized + Send> Send for SpinLock<T> {}
unsafe impl<T: ?Sized + Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    /// Creates a new, unlocked spinlock.
    #[inline]
    pub const fn new(t: T) -> SpinLock<T> {
        SpinLock {
            locked: AtomicBool::new(false),
            data: UnsafeCell::new(t),
        }
    }

    /// Consumes this spinlock, returning the underlying data.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> SpinLock<T> {
    fn guard(
        &self,
        interrupt: InterruptGuard,
        caller: &'static Location<'static>,
    ) -> SpinLockGuard<'_, T> {
        SpinLockGuard {
            caller,
            lock: self,
            interrupt: Some(interrupt),
        }
    }

    /// Acquires the spinlock, masking interrupts until it is released.
    ///
    /// # Panics
    /// Panics if the lock is already held. With interrupts masked, the only
    /// thread that could hold it is the caller itself.
    #[track_caller]
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        let interrupt = InterruptGuard::new();
        if self.locked.swap(true, Ordering::SeqCst) {
            panic!(
                "SpinLock is already held while locking at {}.",
                Location::caller()
            );
        }
        self.guard(interrupt, Location::caller())
    }

    /// Acquires the spinlock if it is free.
    ///
    /// # Errors
    /// Returns [`WouldBlock`] if the lock is held.
    #[track_caller]
    pub fn try_lock(&self) -> Result<SpinLockGuard<'_, T>, WouldBlock> {
        let interrupt = InterruptGuard::new();
        if self.locked.swap(true, Ordering::SeqCst) {
            Err(WouldBlock)
        } else {
            Ok(self.guard(interrupt, Location::caller()))
        }
    }
}

impl<T: Default> Default for SpinLock<T> {
    fn default() -> SpinLock<T> {
        SpinLock::new(Default::default())
    }
}

/// Access to the data of a locked [`SpinLock`].
///
/// The guard must be released with [`unlock`]; dropping it is a bug and
/// panics, except while the thread is already unwinding, where the lock is
/// released silently.
///
/// [`unlock`]: Self::unlock
pub struct SpinLockGuard<'a, T: ?Sized + 'a> {
    caller: &'static Location<'static>,
    lock: &'a SpinLock<T>,
    interrupt: Option<InterruptGuard>,
}

unsafe impl<T: ?Sized + Sync> Sync for SpinLockGuard<'_, T> {}

impl<T: ?Sized> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized> SpinLockGuard<'_, T> {
    /// Releases the lock and restores the interrupt state saved by
    /// [`SpinLock::lock`].
    pub fn unlock(mut self) {
        self.lock.locked.store(false, Ordering::SeqCst);
        self.interrupt.take();
        core::mem::forget(self);
    }
}

impl<T: ?Sized> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.lock.locked.store(false, Ordering::SeqCst);
            return;
        }
        panic!(
            "SpinLockGuard dropped without `.unlock()`. The lock was taken at {}.",
            self.caller
        );
    }
}
