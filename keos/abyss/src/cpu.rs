//! The simulated processor.
//!
//! KeOS runs on a single logical CPU. Every kernel thread is backed by a host
//! thread, but only the host thread that currently owns the CPU executes
//! kernel code. The processor state that the kernel cares about (the
//! interrupt flag in `RFLAGS` and whether an interrupt handler is running) is
//! kept in [`Cpu`], and each host thread binds itself to the machine's
//! [`Cpu`] before touching any kernel state.
//!
//! A host thread that is not bound to any [`Cpu`] is treated as plain host
//! context: reading [`Rflags`] yields an empty set and writes are dropped.
use alloc::sync::Arc;
use core::{
    cell::RefCell,
    sync::atomic::{AtomicU64, AtomicUsize, Ordering},
};

bitflags::bitflags! {
    /// The subset of the `RFLAGS` register modelled by the machine.
    pub struct Rflags: u64 {
        /// Interrupt enable flag.
        const IF = 1 << 9;
    }
}

impl Rflags {
    /// Read the `RFLAGS` of the processor bound to the current host thread.
    pub fn read() -> Self {
        Cpu::with_current(|cpu| Rflags::from_bits_truncate(cpu.rflags.load(Ordering::SeqCst)))
            .unwrap_or_else(Rflags::empty)
    }

    /// Write the `RFLAGS` of the processor bound to the current host thread.
    pub fn write(self) {
        Cpu::with_current(|cpu| cpu.rflags.store(self.bits(), Ordering::SeqCst));
    }
}

/// A single logical processor.
pub struct Cpu {
    rflags: AtomicU64,
    interrupt_depth: AtomicUsize,
}

std::thread_local! {
    static CURRENT: RefCell<Option<Arc<Cpu>>> = const { RefCell::new(None) };
}

impl Cpu {
    /// Power on a new processor with interrupts disabled.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            rflags: AtomicU64::new(0),
            interrupt_depth: AtomicUsize::new(0),
        })
    }

    /// Bind this processor to the calling host thread.
    pub fn bind(self: &Arc<Self>) {
        CURRENT.with(|c| *c.borrow_mut() = Some(self.clone()));
    }

    /// Detach the calling host thread from its processor.
    pub fn unbind() {
        CURRENT.with(|c| c.borrow_mut().take());
    }

    /// Run `f` with the processor bound to the calling host thread.
    ///
    /// Returns `None` when the host thread is not bound to any processor.
    pub fn with_current<R>(f: impl FnOnce(&Cpu) -> R) -> Option<R> {
        CURRENT.with(|c| c.borrow().as_deref().map(f))
    }

    pub(crate) fn enter_interrupt(&self) {
        self.interrupt_depth.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn leave_interrupt(&self) {
        let prev = self.interrupt_depth.fetch_sub(1, Ordering::SeqCst);
        assert!(prev > 0, "Mismatched interrupt context exit: {prev}");
    }

    pub(crate) fn interrupt_depth(&self) -> usize {
        self.interrupt_depth.load(Ordering::SeqCst)
    }
}
