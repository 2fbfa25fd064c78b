//! Low-level synchronization.
//!
//! The uniprocessor spinlock is simple; it just requires preventing thread
//! preemption while holding a lock. By masking interrupts for as long as the
//! lock is held, no other thread can be scheduled and no interrupt handler
//! can run, so no one else can access the shared resource.
//!
//! A [`SpinLock`] never sleeps, so it must only protect short critical
//! sections that do not park. Sleeping primitives (semaphores, locks and
//! condition variables) are built on top of it in the `keos-synch` crate.
//!
//! The guard of a [`SpinLock`] must be released explicitly with
//! [`SpinLockGuard::unlock`]; dropping it without unlocking is a bug and
//! panics.

pub use abyss::spinlock::{SpinLock, SpinLockGuard, WouldBlock};
