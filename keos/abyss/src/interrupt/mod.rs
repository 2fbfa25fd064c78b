//! Interrupt
//!
//! The machine has a single interrupt flag ([`Rflags::IF`]) per processor.
//! Kernel code masks interrupts with an [`InterruptGuard`], which is the only
//! way the kernel achieves mutual exclusion on the uniprocessor: while the
//! flag is clear, neither an interrupt handler nor another thread can run.
use crate::cpu::{Cpu, Rflags};
use core::{marker::PhantomData, sync::atomic::Ordering};

/// Enumeration representing the interrupt state.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum InterruptState {
    /// Interrupts are enabled.
    On,
    /// Interrupts are disabled.
    Off,
}

impl InterruptState {
    /// Reads the current interrupt state.
    ///
    /// # Returns
    /// - [`InterruptState::On`] if interrupts are enabled.
    /// - [`InterruptState::Off`] if interrupts are disabled.
    pub fn current() -> Self {
        if Rflags::read().contains(Rflags::IF) {
            Self::On
        } else {
            Self::Off
        }
    }

    /// Set the interrupt flag.
    ///
    /// # Safety
    /// Enabling interrupts inside a critical section breaks the mutual
    /// exclusion that the section relies on.
    pub unsafe fn enable() {
        (Rflags::read() | Rflags::IF).write();
        core::sync::atomic::fence(Ordering::SeqCst);
    }

    /// Clear the interrupt flag.
    ///
    /// # Safety
    /// The caller is responsible for restoring the previous state.
    pub unsafe fn disable() {
        (Rflags::read() - Rflags::IF).write();
        core::sync::atomic::fence(Ordering::SeqCst);
    }
}

/// An RAII-based guard for managing interrupt disabling.
///
/// When an `InterruptGuard` is created, interrupts are disabled. When it is
/// dropped, the interrupt state is restored to what it was before the guard was
/// created.
///
/// **Important:**
/// - [`InterruptGuard`] instances **must be dropped in reverse order of their
///   creation** to prevent unintended interrupt state changes.
/// - Due to Rust's ownership and scoping rules, this invariant is naturally
///   upheld unless `drop()` is explicitly called prematurely or an
///   [`InterruptGuard`] is stored in a struct field.
///
/// A thread may be switched out while holding guards. The thread that runs
/// next always resumes with interrupts disabled, and its own guards restore
/// its own saved states, so the saved state travels with the thread.
///
/// This structure is created using [`InterruptGuard::new`].
pub struct InterruptGuard {
    prev: InterruptState,
    _not_send: PhantomData<*const ()>,
}

impl InterruptGuard {
    /// Creates a new `InterruptGuard`, disabling interrupts.
    ///
    /// # Example
    /// ```rust
    /// let _guard = InterruptGuard::new(); // Disables interrupts
    /// // Critical section...
    /// // Interrupts are restored when `_guard` goes out of scope.
    /// ```
    pub fn new() -> Self {
        let prev = InterruptState::current();
        unsafe { InterruptState::disable() };
        Self {
            prev,
            _not_send: PhantomData,
        }
    }
}

impl Default for InterruptGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        if self.prev == InterruptState::On {
            unsafe { InterruptState::enable() };
        }
    }
}

/// Returns true if the processor is running an interrupt handler.
pub fn in_interrupt_context() -> bool {
    Cpu::with_current(|cpu| cpu.interrupt_depth() > 0).unwrap_or(false)
}

/// The processor state while an interrupt handler runs.
///
/// Entering masks interrupts, as the hardware does on interrupt delivery.
/// Dropping the context returns to the interrupted code and restores its
/// interrupt state.
pub struct InterruptContext {
    _guard: InterruptGuard,
}

impl InterruptContext {
    /// Deliver an interrupt on the current processor.
    pub fn enter() -> Self {
        let _guard = InterruptGuard::new();
        Cpu::with_current(Cpu::enter_interrupt);
        Self { _guard }
    }
}

impl Drop for InterruptContext {
    fn drop(&mut self) {
        Cpu::with_current(Cpu::leave_interrupt);
    }
}
