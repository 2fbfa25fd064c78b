//! Thread abstration, an abstraction of a cpu core.
//!
//! ## The threading model
//!
//! An executing kernel consists of a collection of threads, each with their
//! own stack and local state. Threads are scheduled on a single processor by
//! priority: the CPU always runs the highest-priority ready thread, and a
//! thread keeps the CPU until it parks, yields, exits, or a higher-priority
//! thread becomes ready.
//!
//! Every thread owns a record in the [`ThreadTable`], an arena indexed by
//! [`Tid`]. Other kernel subsystems refer to threads only by [`Tid`], so a
//! thread's membership in a wait queue or a donation list is a plain handle,
//! never a link embedded in the thread itself.
//!
//! Each thread carries two priorities:
//! - `origin_priority`: the base priority given at spawn time or by
//!   [`Current::set_priority`].
//! - `priority`: the effective priority, which may be raised above the base
//!   by threads donating to it.
//!
//! The scheduler only ever looks at the effective priority.
pub mod scheduler;

use crate::{KernelError, SchedulingMode};
use abyss::interrupt::InterruptGuard;
use crossbeam_utils::sync::{Parker, Unparker};
use scheduler::Kernel;
use std::{
    boxed::Box,
    cell::RefCell,
    ops::{Index, IndexMut},
    ptr::NonNull,
    string::String,
    sync::Arc,
    vec::Vec,
};

/// The lowest priority.
pub const PRI_MIN: u8 = 0;
/// The priority of a thread spawned without an explicit priority.
pub const PRI_DEFAULT: u8 = 31;
/// The highest priority.
pub const PRI_MAX: u8 = 63;

/// Thread identifier, an index into the [`ThreadTable`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Tid(usize);

impl Tid {
    /// The index of this thread in the [`ThreadTable`].
    pub fn index(self) -> usize {
        self.0
    }
}

impl core::fmt::Display for Tid {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A possible state of the thread.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum ThreadState {
    /// Thread is runnable.
    Runnable,
    /// Thread is running.
    Running,
    /// Thread is exited with exitcode.
    Exited(i32),
    /// Thread is parked.
    Parked,
}

/// Identity of a lock that a thread is waiting on.
///
/// The kernel does not know the lock type; it only records the address so
/// that the lock implementation can find its way back from a waiting thread
/// to the lock.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct LockId(NonNull<()>);

// A LockId is only dereferenced by the lock implementation while the lock is
// borrowed by a waiting thread.
unsafe impl Send for LockId {}
unsafe impl Sync for LockId {}

impl LockId {
    /// Identity of `lock`.
    pub fn of<T>(lock: &T) -> Self {
        Self(NonNull::from(lock).cast())
    }

    /// Recover the lock.
    ///
    /// # Safety
    /// `T` must be the type this id was made from, and the lock must still be
    /// alive. This holds while some thread records this id in its
    /// `wait_on_lock`, as that thread is blocked inside a method borrowing
    /// the lock.
    pub unsafe fn as_ref<'a, T>(self) -> &'a T {
        unsafe { self.0.cast::<T>().as_ref() }
    }
}

/// An thread abstraction.
pub struct Thread {
    /// Thread id
    pub tid: Tid,
    /// Thread name
    pub name: String,
    /// State of the thread.
    pub state: ThreadState,
    /// Effective priority.
    pub priority: u8,
    /// Base priority, unaffected by donation.
    pub origin_priority: u8,
    /// The lock this thread is blocked acquiring, if any.
    pub wait_on_lock: Option<LockId>,
    /// Threads donating their priority to this thread, highest first.
    pub donations: Vec<Tid>,
    pub(crate) joiners: Vec<ParkHandle>,
    pub(crate) unparker: Unparker,
}

/// Arena of every thread the kernel has spawned.
///
/// Records are never removed, so a [`Tid`] stays valid after its thread
/// exits.
#[derive(Default)]
pub struct ThreadTable {
    threads: Vec<Thread>,
}

impl ThreadTable {
    pub(crate) fn insert(&mut self, name: String, priority: u8, unparker: Unparker) -> Tid {
        let tid = Tid(self.threads.len());
        self.threads.push(Thread {
            tid,
            name,
            state: ThreadState::Runnable,
            priority,
            origin_priority: priority,
            wait_on_lock: None,
            donations: Vec::new(),
            joiners: Vec::new(),
            unparker,
        });
        tid
    }

    /// Get the thread `tid`, if it exists.
    pub fn get(&self, tid: Tid) -> Option<&Thread> {
        self.threads.get(tid.0)
    }

    /// Number of threads ever spawned.
    pub fn len(&self) -> usize {
        self.threads.len()
    }

    /// Returns true if no thread has been spawned.
    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    /// Iterate over every thread record.
    pub fn iter(&self) -> impl Iterator<Item = &Thread> {
        self.threads.iter()
    }
}

impl Index<Tid> for ThreadTable {
    type Output = Thread;

    fn index(&self, tid: Tid) -> &Thread {
        &self.threads[tid.0]
    }
}

impl IndexMut<Tid> for ThreadTable {
    fn index_mut(&mut self, tid: Tid) -> &mut Thread {
        &mut self.threads[tid.0]
    }
}

/// Per host thread binding to the machine.
pub(crate) struct Context {
    pub(crate) kernel: Arc<Kernel>,
    /// `None` for the idle context.
    pub(crate) tid: Option<Tid>,
    pub(crate) parker: Parker,
}

std::thread_local! {
    static CONTEXT: RefCell<Option<Context>> = const { RefCell::new(None) };
}

pub(crate) fn install(context: Context) {
    CONTEXT.with(|c| *c.borrow_mut() = Some(context));
}

pub(crate) fn uninstall() {
    CONTEXT.with(|c| c.borrow_mut().take());
}

pub(crate) fn try_with_context<R>(f: impl FnOnce(&Context) -> R) -> Option<R> {
    CONTEXT.with(|c| c.borrow().as_ref().map(f))
}

pub(crate) fn with_context<R>(f: impl FnOnce(&Context) -> R) -> R {
    try_with_context(f).unwrap_or_else(|| panic!("Not running on a KeOS machine."))
}

pub(crate) fn kernel() -> Arc<Kernel> {
    with_context(|c| c.kernel.clone())
}

/// Run a function `f` with the thread table.
///
/// Interrupts are masked while `f` runs. `f` must not park, and must not call
/// back into functions that access the thread table.
pub fn with_threads<R>(f: impl FnOnce(&mut ThreadTable) -> R) -> R {
    kernel().with_threads(f)
}

/// Run a function `f` with current thread as an argument.
pub fn with_current<R>(f: impl FnOnce(&mut Thread) -> R) -> R {
    let tid = Current::get_tid();
    with_threads(|tt| f(&mut tt[tid]))
}

/// The scheduling mode the machine was booted with.
pub fn scheduling_mode() -> SchedulingMode {
    with_context(|c| c.kernel.mode)
}

/// Get specified thread's [`ThreadState`] by TID (Thread ID).
pub fn get_state_by_tid(tid: Tid) -> Result<ThreadState, KernelError> {
    with_threads(|tt| tt.get(tid).map(|th| th.state))
        .ok_or(KernelError::InvalidArgument)
}

/// Get specified thread's effective priority by TID (Thread ID).
pub fn get_priority_by_tid(tid: Tid) -> Result<u8, KernelError> {
    with_threads(|tt| tt.get(tid).map(|th| th.priority))
        .ok_or(KernelError::InvalidArgument)
}

/// A handle to join thread.
pub struct JoinHandle {
    /// Thread id of this handle.
    pub tid: Tid,
}

impl JoinHandle {
    /// Join this handle and returns exit code.
    ///
    /// Parks the current thread until the thread exits.
    pub fn join(self) -> i32 {
        let _guard = InterruptGuard::new();
        loop {
            if let Ok(ThreadState::Exited(code)) = get_state_by_tid(self.tid) {
                return code;
            }
            Current::park_with(|handle| with_threads(|tt| tt[self.tid].joiners.push(handle)));
        }
    }
}

/// A handle that represent the parked thread.
pub struct ParkHandle {
    tid: Tid,
}

impl ParkHandle {
    /// The parked thread.
    pub fn tid(&self) -> Tid {
        self.tid
    }

    /// Consume the handle and unpark the underlying thread.
    ///
    /// The thread becomes ready; it does not preempt the caller.
    pub fn unpark(self) {
        kernel().unblock(self.tid);
    }
}

impl core::fmt::Debug for ParkHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ParkHandle").field("tid", &self.tid).finish()
    }
}

/// Unwinding payload of [`Current::exit`].
pub(crate) struct ExitRequest(pub(crate) i32);

/// The opaque structure indicating the running thread on the current cpu.
pub struct Current {
    _p: (),
}

impl Current {
    /// Run a function `f` with [`ParkHandle`] for current thread, and then park
    /// the current thread.
    ///
    /// `f` runs with interrupts masked after the thread is marked as parked,
    /// so no one can unpark the thread before it actually leaves the CPU.
    pub fn park_with(f: impl FnOnce(ParkHandle)) {
        let _guard = InterruptGuard::new();
        let tid = Current::get_tid();
        let kernel = kernel();
        kernel.with_threads(|tt| tt[tid].state = ThreadState::Parked);
        f(ParkHandle { tid });
        kernel.schedule();
    }

    /// Exit the current thread with `exit_code`.
    ///
    /// The stack of the thread is unwound, so pending guards are released.
    pub fn exit(exit_code: i32) -> ! {
        std::panic::resume_unwind(Box::new(ExitRequest(exit_code)))
    }

    /// Get the current thread's id.
    pub fn get_tid() -> Tid {
        with_context(|c| c.tid).unwrap_or_else(|| panic!("The idle context has no thread id."))
    }

    /// Get the current thread's effective priority.
    pub fn get_priority() -> u8 {
        with_current(|th| th.priority)
    }

    /// Set the current thread's base priority.
    ///
    /// Donations the thread receives stay in force. If a ready thread now has
    /// a higher priority than the current thread, the current thread yields.
    /// Ignored in [`SchedulingMode::Mlfqs`].
    pub fn set_priority(priority: u8) {
        assert!(priority <= PRI_MAX, "Priority {priority} is out of range.");
        if scheduling_mode() == SchedulingMode::Mlfqs {
            return;
        }
        let tid = Current::get_tid();
        with_threads(|tt| {
            let donated = tt[tid].donations.iter().map(|d| tt[*d].priority).max();
            let th = &mut tt[tid];
            th.origin_priority = priority;
            th.priority = donated.map_or(priority, |d| d.max(priority));
        });
        scheduler::preempt();
    }

    /// Give up the CPU to another ready thread of the same or higher priority.
    pub fn yield_now() {
        kernel().yield_now();
    }
}

/// A struct to build a new thread.
pub struct ThreadBuilder {
    name: String,
    priority: u8,
}

impl ThreadBuilder {
    /// Create a new thread builder for thread `name`.
    pub fn new<I>(name: I) -> Self
    where
        String: From<I>,
    {
        Self {
            name: String::from(name),
            priority: PRI_DEFAULT,
        }
    }

    /// Set the priority of the thread.
    pub fn priority(mut self, priority: u8) -> Self {
        assert!(priority <= PRI_MAX, "Priority {priority} is out of range.");
        self.priority = priority;
        self
    }

    /// Spawn the thread.
    ///
    /// If the new thread has a higher priority than the caller, the caller
    /// is preempted immediately.
    pub fn spawn<F: FnOnce() + Send + 'static>(self, thread_fn: F) -> JoinHandle {
        let tid = kernel().spawn(self.name, self.priority, Box::new(thread_fn));
        scheduler::preempt();
        JoinHandle { tid }
    }
}
