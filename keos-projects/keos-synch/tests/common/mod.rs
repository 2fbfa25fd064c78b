#![allow(dead_code)]

use keos::{SchedulingMode, SystemConfiguration, sync::SpinLock};
use std::sync::Arc;

/// Boot a quiet machine with the priority scheduler and run `main` on it.
pub fn boot(main: impl FnOnce() + Send + 'static) {
    keos::start(SystemConfiguration::builder().quiet(true).build(), main)
}

/// Boot a quiet machine in MLFQS mode.
pub fn boot_mlfqs(main: impl FnOnce() + Send + 'static) {
    keos::start(
        SystemConfiguration::builder()
            .scheduling_mode(SchedulingMode::Mlfqs)
            .quiet(true)
            .build(),
        main,
    )
}

/// Ordered log of events, shared between the threads of a test.
#[derive(Clone, Default)]
pub struct Trace(Arc<SpinLock<Vec<String>>>);

impl Trace {
    pub fn push(&self, event: impl Into<String>) {
        let mut guard = self.0.lock();
        guard.push(event.into());
        guard.unlock();
    }

    pub fn take(&self) -> Vec<String> {
        let mut guard = self.0.lock();
        let events = core::mem::take(&mut *guard);
        guard.unlock();
        events
    }
}
