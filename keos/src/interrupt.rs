//! Interrupt management.
//!
//! Devices are not modelled; an interrupt is delivered by [`raise`], which
//! runs the registered handler in the interrupt context on the current CPU,
//! exactly where the running thread was interrupted. A handler must not
//! block. If a handler makes a higher-priority thread ready, the interrupted
//! thread yields when the handler returns.
use crate::thread::kernel;
pub use abyss::interrupt::{InterruptGuard, InterruptState, in_interrupt_context};
use abyss::interrupt::InterruptContext;
use std::sync::Arc;

/// Register the interrupt handler for vector `vec` (32..256).
pub fn register(vec: usize, handler: impl Fn() + Send + Sync + 'static) {
    kernel().register(vec, Arc::new(handler));
}

/// Deliver interrupt `vec` to the current CPU.
///
/// Interrupts must be enabled; a masked interrupt would never be delivered.
/// The handler runs with interrupts masked.
pub fn raise(vec: usize) {
    assert_eq!(
        InterruptState::current(),
        InterruptState::On,
        "Interrupt #{vec} raised while interrupts are disabled."
    );
    let kernel = kernel();
    let handler = kernel.handler(vec);
    {
        let _context = InterruptContext::enter();
        match &handler {
            Some(handler) => handler(),
            _ => {
                panic!("Unknown interrupt #{}", vec);
            }
        }
    }
    if kernel.take_yield_on_return() {
        kernel.yield_now();
    }
}
