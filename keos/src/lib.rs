//! # KeOS: KAIST Educational Operating System
//!
//! This is the kernel framework on which the KeOS synchronization primitives
//! are built. It provides the parts of an operating system kernel that the
//! primitives consume, but do not implement themselves:
//!
//! - [`thread`]: kernel threads, the thread table, and the priority
//!   scheduler that decides which thread owns the CPU.
//! - [`interrupt`]: interrupt masking, the interrupt context, and interrupt
//!   handlers.
//! - [`sync`]: the [`SpinLock`], the only primitive that does not sleep.
//!
//! ## The machine
//!
//! KeOS runs on a single CPU. Mutual exclusion inside the kernel is achieved
//! by masking interrupts: while interrupts are masked, the running thread
//! cannot be preempted and no interrupt handler can run.
//!
//! The machine is simulated on the host. Each kernel thread is carried by a
//! host thread, and the CPU is handed from one host thread to another on
//! every context switch, so exactly one kernel thread executes at any time.
//! This makes the kernel deterministic: a given program always produces the
//! same interleaving.
//!
//! ## Booting
//!
//! [`start`] boots a fresh machine, runs `main` as the first kernel thread at
//! [`PRI_DEFAULT`], and powers the machine off when `main` returns:
//!
//! ```rust
//! use keos::{SystemConfiguration, thread::ThreadBuilder};
//!
//! keos::start(SystemConfiguration::default(), || {
//!     let child = ThreadBuilder::new("child").priority(40).spawn(|| {
//!         keos::info!("Hello from a high priority thread.");
//!     });
//!     assert_eq!(child.join(), 0);
//! });
//! ```
//!
//! A panic in any kernel thread stops the machine, and [`start`] panics with
//! the message on the host. So does a deadlock, where every thread is parked
//! before `main` returns.
//!
//! [`SpinLock`]: sync::SpinLock
//! [`PRI_DEFAULT`]: thread::PRI_DEFAULT
#![no_std]
#![deny(missing_docs, rustdoc::broken_intra_doc_links)]

#[macro_use]
extern crate abyss;
extern crate alloc;
extern crate std;

pub mod interrupt;
pub mod sync;
pub mod thread;

pub use abyss::{MAX_CPU, debug, info, warning};
use abyss::{QUITE, cpu::Cpu};
use alloc::{boxed::Box, sync::Arc};
use core::sync::atomic::Ordering;
use crossbeam_utils::sync::Parker;
use thread::{Context, PRI_DEFAULT, scheduler::Kernel};

/// Enum representing errors that can occur during a kernel operation.
///
/// Misuse of a kernel API by kernel code is a bug and panics; this enum is
/// reserved for failures that the caller is expected to handle.
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub enum KernelError {
    /// Invalid arguement. (EINVAL)
    InvalidArgument,
}

/// The scheduling policy of the machine.
#[derive(Debug, Eq, PartialEq, Clone, Copy, Default)]
pub enum SchedulingMode {
    /// Strict priority scheduling with priority donation.
    #[default]
    Priority,
    /// Multilevel feedback queue scheduling. Priorities belong to the
    /// scheduler: locks do not donate, and threads cannot set their own
    /// priority.
    Mlfqs,
}

/// System-wide settings, fixed at boot.
#[derive(Debug, Eq, PartialEq, Clone, Copy, Default)]
pub struct SystemConfiguration {
    /// The scheduling policy.
    pub scheduling_mode: SchedulingMode,
    /// Silence kernel messages.
    pub quiet: bool,
}

impl SystemConfiguration {
    /// Start building a configuration from the defaults.
    pub fn builder() -> SystemConfigurationBuilder {
        SystemConfigurationBuilder {
            conf: Self::default(),
        }
    }

    /// Parse a kernel command line.
    ///
    /// Recognized options are `-mlfqs` (use [`SchedulingMode::Mlfqs`]) and `-q`
    /// (quiet). Any other option is rejected with
    /// [`KernelError::InvalidArgument`].
    pub fn from_cmdline(cmdline: &str) -> Result<Self, KernelError> {
        let mut builder = Self::builder();
        for option in cmdline.split_whitespace() {
            builder = match option {
                "-mlfqs" => builder.scheduling_mode(SchedulingMode::Mlfqs),
                "-q" => builder.quiet(true),
                _ => {
                    warning!("Command line: unknown option `{option}`.");
                    return Err(KernelError::InvalidArgument);
                }
            };
        }
        Ok(builder.build())
    }
}

/// A builder for system configuration settings.
///
/// The [`SystemConfigurationBuilder`] struct provides an interface for
/// configuring various system-wide settings before initialization.
pub struct SystemConfigurationBuilder {
    conf: SystemConfiguration,
}

impl SystemConfigurationBuilder {
    /// Sets the system-wide scheduling policy.
    pub fn scheduling_mode(mut self, mode: SchedulingMode) -> Self {
        self.conf.scheduling_mode = mode;
        self
    }

    /// Silence kernel messages.
    pub fn quiet(mut self, quiet: bool) -> Self {
        self.conf.quiet = quiet;
        self
    }

    /// Finish building.
    pub fn build(self) -> SystemConfiguration {
        self.conf
    }
}

/// Boot a machine and run `main` as its first thread.
///
/// Returns when `main` returns or exits. Threads still alive at that point
/// are unwound one by one, releasing what they hold, and their host threads
/// are joined before this returns.
///
/// # Panics
/// Panics if any thread of the machine panics, or if every thread is parked
/// before `main` returns.
pub fn start<F: FnOnce() + Send + 'static>(config: SystemConfiguration, main: F) {
    QUITE.store(config.quiet, Ordering::SeqCst);
    info!(
        "KeOS: booting with {:?} scheduling.",
        config.scheduling_mode
    );

    let cpu = Cpu::new();
    cpu.bind();
    let parker = Parker::new();
    let kernel = Arc::new(Kernel::new(
        cpu,
        config.scheduling_mode,
        parker.unparker().clone(),
    ));
    thread::install(Context {
        kernel: kernel.clone(),
        tid: None,
        parker,
    });

    let tid = kernel.spawn("main".into(), PRI_DEFAULT, Box::new(main));
    kernel.set_main(tid);
    let result = kernel.idle_loop();

    thread::uninstall();
    Cpu::unbind();
    match result {
        Ok(()) => info!("KeOS: power off."),
        Err(msg) => panic!("{msg}"),
    }
}
