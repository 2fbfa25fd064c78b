//! # Synchronization Primitives.
//!
//! An operating system kernel must coordinate access to shared resources among
//! multiple threads of execution. This coordination is vital to ensure data
//! consistency and prevent race conditions.
//!
//! The kernel itself only offers the [`SpinLock`], which masks interrupts
//! while held. That is enough for a few instructions of bookkeeping, but a
//! thread that must wait for another thread needs to **sleep**, leaving the
//! CPU to others until it is woken up. This module provides the sleeping
//! primitives:
//!
//! - [`Semaphore`]: A counting synchronization primitive that controls access
//!   to a shared resource by maintaining a counter.
//! - [`Lock`]: A mutual exclusion primitive with an owner. Threads waiting for
//!   it donate their priority to the owner.
//! - [`Mutex`]: A [`Lock`] bundled with the data it protects.
//! - [`ConditionVariable`]: A coordination mechanism that allows threads to
//!   sleep until a particular condition becomes true.
//!
//! | Primitive             | Blocks Thread? | Owner? | Typical Use Case                             |
//! |-----------------------|----------------|--------|----------------------------------------------|
//! | [`SpinLock`]          | No             | No     | Short critical sections inside the kernel    |
//! | [`Semaphore`]         | Yes            | No     | Limiting access to a bounded resource, events |
//! | [`Lock`] / [`Mutex`]  | Yes            | Yes    | Exclusive access to shared data              |
//! | [`ConditionVariable`] | Yes            | No     | Waiting for a condition to become true       |
//!
//! Every sleeping primitive wakes its waiters in order of their effective
//! priority, decided at wake-up time (see [`priority`]).
//!
//! [`SpinLock`]: keos::sync::SpinLock

pub mod condition_variable;
pub mod donation;
pub mod lock;
pub mod mutex;
pub mod priority;
pub mod semaphore;

pub use condition_variable::{ConditionVariable, LockHeld};
pub use lock::{Lock, LockGuard};
pub use mutex::{Mutex, MutexGuard};
pub use semaphore::{Semaphore, SemaphorePermits};
