//! # Synchronization Primitives with Priority Donation
//!
//! This crate implements the sleeping synchronization primitives of KeOS on
//! top of the single-CPU, priority-scheduled kernel in [`keos`]:
//!
//! - [`Semaphore`]: a counting semaphore whose waiters are woken in priority
//!   order.
//! - [`Lock`]: a mutual exclusion lock that lends the priority of its waiters
//!   to its holder, and [`Mutex`], a lock bundled with the data it protects.
//! - [`ConditionVariable`]: a Mesa-style condition variable.
//!
//! ## Priority inversion
//!
//! With a strict priority scheduler, a high-priority thread that waits for a
//! lock held by a low-priority thread can be delayed indefinitely by any
//! medium-priority thread, because the holder never gets the CPU to release
//! the lock. The [`Lock`] prevents this with **priority donation**: a thread
//! blocked on a lock donates its priority to the holder, and the donation
//! follows the chain when the holder itself waits for another lock. See
//! [`donation`] for the details.
//!
//! Donation is disabled when the machine runs the multilevel feedback queue
//! scheduler ([`SchedulingMode::Mlfqs`]), whose priorities belong to the
//! scheduler alone.
//!
//! ## Atomicity
//!
//! The primitives are implemented entirely with interrupt masking: every
//! update of their internal state happens with interrupts masked, so on the
//! single CPU nothing can interleave with it. The only places where a thread
//! can sleep are [`Semaphore::down`] and everything built on it.
//!
//! [`Semaphore`]: sync::Semaphore
//! [`Lock`]: sync::Lock
//! [`Mutex`]: sync::Mutex
//! [`ConditionVariable`]: sync::ConditionVariable
//! [`donation`]: sync::donation
//! [`SchedulingMode::Mlfqs`]: keos::SchedulingMode::Mlfqs

#![no_std]
#![deny(rustdoc::broken_intra_doc_links)]

extern crate alloc;

pub mod sync;
