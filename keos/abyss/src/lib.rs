//! The abyss of kernel that operates hardwares.
//!
//! This crate contains the machine that KeOS runs on. Instead of real x86_64
//! hardware, the machine is a simulated uniprocessor hosted by the operating
//! system that runs the kernel: each kernel thread is carried by a host
//! thread, and exactly one of them owns the [`Cpu`] at a time.
//!
//! The machine provides what the kernel needs from the hardware:
//!
//! - [`cpu`]: the processor and its `RFLAGS` register.
//! - [`interrupt`]: masking and unmasking interrupts, and the interrupt
//!   context in which handlers run.
//! - [`spinlock`]: the lowest-level mutual exclusion primitive.
//! - [`kprint`]: kernel log macros.
//!
//! **YOU ARE *NOT* SUPPOSED TO DIRECTLY USE THE MODULES OF THIS CRATE TO
//! IMPLEMENT SYNCHRONIZATION PRIMITIVES.**
//! Instead, you are supposed to see [`keos`] crate to see which modules (or
//! functions) are available.
//!
//! [`Cpu`]: cpu::Cpu
//! [`keos`]: ../keos/index.html
#![no_std]
#![allow(clippy::missing_safety_doc)]

use core::sync::atomic::AtomicBool;

extern crate alloc;
extern crate std;

#[doc(hidden)]
#[macro_use]
pub mod kprint;
pub mod cpu;
pub mod interrupt;
pub mod spinlock;

/// Maximum number of CPU the kernel can support.
pub const MAX_CPU: usize = 1;

#[doc(hidden)]
pub static QUITE: AtomicBool = AtomicBool::new(false);
