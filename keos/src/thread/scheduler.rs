//! Thread scheduler
//!
//! The machine has one CPU, which is handed between the host threads that
//! carry kernel threads. The thread that owns the CPU is recorded in
//! [`Kernel`]; every other host thread sleeps until the CPU is handed to it.
//! A context switch is therefore: pick the next thread, publish it as the
//! owner, wake its host thread, and sleep until the CPU comes back.
//!
//! Every switch happens with interrupts masked, and the switched-in thread
//! resumes with interrupts masked. Each thread then restores its own saved
//! interrupt state when its [`InterruptGuard`]s drop.
//!
//! When the machine powers off, the idle context hands the CPU once more to
//! every thread that has not exited. Such a thread unwinds its stack instead
//! of resuming, so the guards it holds are released, and exits. The host
//! threads are joined afterwards.

use super::{
    Context, ExitRequest, ThreadState, ThreadTable, Tid, install, try_with_context, uninstall,
    with_context,
};
use crate::SchedulingMode;
use abyss::{
    cpu::Cpu,
    interrupt::{InterruptGuard, InterruptState, in_interrupt_context},
    spinlock::SpinLock,
};
use crossbeam_utils::sync::{Parker, Unparker};
use std::{
    boxed::Box,
    collections::VecDeque,
    format,
    string::{String, ToString},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    vec::Vec,
};

/// A trait for a thread scheduler.
///
/// The [`Scheduler`] trait defines the common functionality expected from a
/// thread scheduler. It owns the queue of ready threads and decides which one
/// runs next. Threads are referred to by [`Tid`]; their priorities live in the
/// [`ThreadTable`], which the kernel passes in on every decision so that the
/// decision is made with up-to-date priorities.
pub trait Scheduler {
    /// Pop a next thread to run.
    ///
    /// This method checks the queue and returns the next thread to run. If no
    /// threads are available, it returns `None`.
    fn next_to_run(&self, threads: &ThreadTable) -> Option<Tid>;

    /// Push a thread `tid` into scheduling queue.
    fn push_to_queue(&self, tid: Tid);

    /// The highest effective priority among the ready threads.
    fn peek_priority(&self, threads: &ThreadTable) -> Option<u8>;
}

/// A strict priority scheduler.
///
/// Runs the highest-priority ready thread, first-in-first-out among threads
/// of equal priority. Priorities are read when a thread is picked, not when
/// it is queued.
#[derive(Default)]
pub struct PriorityScheduler {
    run_queue: SpinLock<VecDeque<Tid>>,
}

impl Scheduler for PriorityScheduler {
    fn next_to_run(&self, threads: &ThreadTable) -> Option<Tid> {
        let mut guard = self.run_queue.lock();
        let top = guard.iter().map(|tid| threads[*tid].priority).max();
        let next = top
            .and_then(|p| guard.iter().position(|tid| threads[*tid].priority == p))
            .and_then(|idx| guard.remove(idx));
        guard.unlock();
        next
    }

    fn push_to_queue(&self, tid: Tid) {
        let mut guard = self.run_queue.lock();
        guard.push_back(tid);
        guard.unlock();
    }

    fn peek_priority(&self, threads: &ThreadTable) -> Option<u8> {
        let guard = self.run_queue.lock();
        let top = guard.iter().map(|tid| threads[*tid].priority).max();
        guard.unlock();
        top
    }
}

/// Slot value of [`Kernel::running`] while the idle context owns the CPU.
const IDLE: usize = usize::MAX;

fn slot(tid: Option<Tid>) -> usize {
    tid.map_or(IDLE, Tid::index)
}

type Handler = Arc<dyn Fn() + Send + Sync>;

/// Unwinding payload of a thread torn down at power off.
struct PowerOff;

/// Exit code of a thread torn down at power off.
const POWER_OFF_EXIT_CODE: i32 = -1;

/// Number of external interrupt vectors (32..256).
const NUM_VECTORS: usize = 224;

/// The state of one machine.
pub struct Kernel {
    cpu: Arc<Cpu>,
    pub(crate) mode: SchedulingMode,
    threads: SpinLock<ThreadTable>,
    scheduler: Box<dyn Scheduler + Send + Sync>,
    /// Slot of the context that owns the CPU.
    running: AtomicUsize,
    main: AtomicUsize,
    idle: Unparker,
    yield_on_return: AtomicBool,
    powering_off: AtomicBool,
    poison: SpinLock<Option<String>>,
    handlers: SpinLock<Vec<Option<Handler>>>,
    hosts: SpinLock<Vec<std::thread::JoinHandle<()>>>,
}

impl Kernel {
    pub(crate) fn new(cpu: Arc<Cpu>, mode: SchedulingMode, idle: Unparker) -> Self {
        Self {
            cpu,
            mode,
            threads: SpinLock::new(ThreadTable::default()),
            scheduler: Box::new(PriorityScheduler::default()),
            running: AtomicUsize::new(IDLE),
            main: AtomicUsize::new(IDLE),
            idle,
            yield_on_return: AtomicBool::new(false),
            powering_off: AtomicBool::new(false),
            poison: SpinLock::new(None),
            handlers: SpinLock::new((0..NUM_VECTORS).map(|_| None).collect()),
            hosts: SpinLock::new(Vec::new()),
        }
    }

    pub(crate) fn with_threads<R>(&self, f: impl FnOnce(&mut ThreadTable) -> R) -> R {
        let mut guard = self.threads.lock();
        let result = f(&mut *guard);
        guard.unlock();
        result
    }

    /// Create a thread and put it on the run queue.
    pub(crate) fn spawn(
        self: &Arc<Self>,
        name: String,
        priority: u8,
        thread_fn: Box<dyn FnOnce() + Send>,
    ) -> Tid {
        let parker = Parker::new();
        let unparker = parker.unparker().clone();
        let _guard = InterruptGuard::new();
        let tid = self.with_threads(|tt| tt.insert(name.clone(), priority, unparker));

        let kernel = self.clone();
        let host = match std::thread::Builder::new()
            .name(format!("keos:{name}"))
            .spawn(move || kernel.thread_entry(tid, parker, thread_fn))
        {
            Ok(host) => host,
            Err(e) => panic!("Failed to create a host thread for {name}: {e}"),
        };
        let mut hosts = self.hosts.lock();
        hosts.push(host);
        hosts.unlock();
        debug!("Thread: spawn {name} (tid {tid}, priority {priority}).");
        self.scheduler.push_to_queue(tid);
        tid
    }

    fn thread_entry(
        self: Arc<Self>,
        tid: Tid,
        parker: Parker,
        thread_fn: Box<dyn FnOnce() + Send>,
    ) {
        self.cpu.bind();
        install(Context {
            kernel: self.clone(),
            tid: Some(tid),
            parker,
        });
        if !self.wait_for_cpu(tid.index()) {
            drop(thread_fn);
            self.exit_current(tid, POWER_OFF_EXIT_CODE);
            uninstall();
            Cpu::unbind();
            return;
        }
        unsafe { InterruptState::enable() };

        let exit_code = match std::panic::catch_unwind(std::panic::AssertUnwindSafe(thread_fn)) {
            Ok(()) => 0,
            Err(payload) => match payload.downcast::<ExitRequest>() {
                Ok(request) => request.0,
                Err(payload) if payload.is::<PowerOff>() => POWER_OFF_EXIT_CODE,
                Err(payload) => {
                    let msg = payload
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| payload.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "Box<dyn Any>".to_string());
                    self.poison_with(tid, msg);
                    -1
                }
            },
        };
        self.exit_current(tid, exit_code);
        uninstall();
        Cpu::unbind();
    }

    /// Sleep until the CPU is handed to `me`.
    ///
    /// Returns false if a thread got the CPU only to be torn down.
    fn wait_for_cpu(&self, me: usize) -> bool {
        with_context(|c| {
            while self.running.load(Ordering::SeqCst) != me {
                c.parker.park();
            }
        });
        me == IDLE || !self.powering_off.load(Ordering::SeqCst)
    }

    /// Publish `next` as the owner of the CPU and wake its host thread.
    ///
    /// The caller must not touch the machine after this returns unless it
    /// got the CPU back.
    fn hand_off(&self, next: Option<Tid>) {
        let unparker = match next {
            Some(tid) => self.with_threads(|tt| {
                tt[tid].state = ThreadState::Running;
                tt[tid].unparker.clone()
            }),
            None => self.idle.clone(),
        };
        self.running.store(slot(next), Ordering::SeqCst);
        unparker.unpark();
    }

    fn switch_to(&self, next: Option<Tid>) {
        assert_eq!(InterruptState::current(), InterruptState::Off);
        let me = with_context(|c| c.tid);
        self.hand_off(next);
        if !self.wait_for_cpu(slot(me)) {
            std::panic::resume_unwind(Box::new(PowerOff));
        }
    }

    /// Give the CPU to the next thread to run.
    ///
    /// The caller has already recorded the current thread as parked, or as
    /// runnable and queued. Returns when the current thread runs again.
    pub(crate) fn schedule(&self) {
        let _guard = InterruptGuard::new();
        let me = with_context(|c| c.tid);
        let next = self.with_threads(|tt| self.scheduler.next_to_run(tt));
        match (me, next) {
            (Some(me), Some(next)) if me == next => {
                self.with_threads(|tt| tt[me].state = ThreadState::Running);
            }
            (None, None) => (),
            _ => self.switch_to(next),
        }
    }

    /// Mark the parked thread `tid` ready to run.
    ///
    /// Does nothing once the machine powers off.
    pub(crate) fn unblock(&self, tid: Tid) {
        if self.powering_off.load(Ordering::SeqCst) {
            return;
        }
        let _guard = InterruptGuard::new();
        self.with_threads(|tt| {
            assert_eq!(
                tt[tid].state,
                ThreadState::Parked,
                "Unparking thread {} which is not parked.",
                tt[tid].name
            );
            tt[tid].state = ThreadState::Runnable;
        });
        self.scheduler.push_to_queue(tid);
    }

    pub(crate) fn yield_now(&self) {
        assert!(
            !in_interrupt_context(),
            "Try to yield a thread in the interrupt context."
        );
        let _guard = InterruptGuard::new();
        let Some(me) = with_context(|c| c.tid) else {
            return;
        };
        self.with_threads(|tt| tt[me].state = ThreadState::Runnable);
        self.scheduler.push_to_queue(me);
        self.schedule();
    }

    fn exit_current(&self, tid: Tid, exit_code: i32) {
        unsafe { InterruptState::disable() };
        let (name, joiners) = self.with_threads(|tt| {
            tt[tid].state = ThreadState::Exited(exit_code);
            (tt[tid].name.clone(), core::mem::take(&mut tt[tid].joiners))
        });
        debug!("Thread: {name} (tid {tid}) exits with {exit_code}.");
        for joiner in joiners {
            self.unblock(joiner.tid());
        }

        let poisoned = {
            let guard = self.poison.lock();
            let poisoned = guard.is_some();
            guard.unlock();
            poisoned
        };
        let next = if poisoned
            || self.powering_off.load(Ordering::SeqCst)
            || self.main.load(Ordering::SeqCst) == tid.index()
        {
            None
        } else {
            self.with_threads(|tt| self.scheduler.next_to_run(tt))
        };
        self.hand_off(next);
    }

    fn poison_with(&self, tid: Tid, msg: String) {
        let name = self.with_threads(|tt| tt[tid].name.clone());
        warning!("Thread: {name} (tid {tid}) panicked: {msg}");
        let mut guard = self.poison.lock();
        if guard.is_none() {
            *guard = Some(format!("thread '{name}' panicked: {msg}"));
        }
        guard.unlock();
    }

    pub(crate) fn set_main(&self, tid: Tid) {
        self.main.store(tid.index(), Ordering::SeqCst);
    }

    /// Run the idle context until the main thread exits, then power off.
    ///
    /// Returns the reason of the failure if a thread panicked, or if every
    /// thread is parked before the main thread exits.
    pub(crate) fn idle_loop(&self) -> Result<(), String> {
        let _guard = InterruptGuard::new();
        let result = self.run();
        self.power_off();
        result
    }

    fn run(&self) -> Result<(), String> {
        loop {
            let poison = {
                let mut guard = self.poison.lock();
                let poison = guard.take();
                guard.unlock();
                poison
            };
            if let Some(msg) = poison {
                return Err(msg);
            }
            let main = Tid(self.main.load(Ordering::SeqCst));
            let main_exited = self.with_threads(|tt| {
                tt.get(main)
                    .is_some_and(|th| matches!(th.state, ThreadState::Exited(_)))
            });
            if main_exited {
                return Ok(());
            }
            match self.with_threads(|tt| self.scheduler.next_to_run(tt)) {
                Some(tid) => self.switch_to(Some(tid)),
                None => return Err(self.deadlock_report()),
            }
        }
    }

    /// Tear down every thread that has not exited, one at a time, and join
    /// the host threads.
    fn power_off(&self) {
        self.powering_off.store(true, Ordering::SeqCst);
        // Nobody waits for a lock any more, and the locks may be freed while
        // their waiters unwind.
        self.with_threads(|tt| {
            for th in tt.threads.iter_mut() {
                th.wait_on_lock = None;
                th.donations.clear();
            }
        });
        while let Some(tid) = self.with_threads(|tt| {
            tt.iter()
                .find(|th| !matches!(th.state, ThreadState::Exited(_)))
                .map(|th| th.tid)
        }) {
            debug!("Power off: tearing down thread {tid}.");
            self.switch_to(Some(tid));
        }

        let hosts = {
            let mut guard = self.hosts.lock();
            let hosts = core::mem::take(&mut *guard);
            guard.unlock();
            hosts
        };
        for host in hosts {
            if host.join().is_err() {
                warning!("Power off: a host thread did not exit cleanly.");
            }
        }
    }

    fn deadlock_report(&self) -> String {
        let parked = self.with_threads(|tt| {
            tt.iter()
                .filter(|th| th.state == ThreadState::Parked)
                .map(|th| format!("{} (tid {})", th.name, th.tid))
                .collect::<Vec<_>>()
        });
        let report = format!("Deadlock: every thread is parked: {}", parked.join(", "));
        warning!("{report}");
        report
    }

    pub(crate) fn register(&self, vec: usize, handler: Handler) {
        let mut guard = self.handlers.lock();
        let installed = match vec.checked_sub(32).and_then(|idx| guard.get_mut(idx)) {
            Some(slot) => {
                *slot = Some(handler);
                true
            }
            None => false,
        };
        guard.unlock();
        assert!(installed, "Invalid interrupt vector #{vec}.");
    }

    pub(crate) fn handler(&self, vec: usize) -> Option<Handler> {
        let guard = self.handlers.lock();
        let handler = vec
            .checked_sub(32)
            .and_then(|idx| guard.get(idx))
            .and_then(|h| h.clone());
        guard.unlock();
        handler
    }

    pub(crate) fn take_yield_on_return(&self) -> bool {
        self.yield_on_return.swap(false, Ordering::SeqCst)
    }
}

/// Yield the CPU if a ready thread has a higher priority than the current
/// thread.
///
/// In the interrupt context, the yield is deferred until the handler returns.
pub fn preempt() {
    if std::thread::panicking() {
        return;
    }
    let Some((kernel, Some(me))) = try_with_context(|c| (c.kernel.clone(), c.tid)) else {
        return;
    };
    let _guard = InterruptGuard::new();
    let (current, ready) =
        kernel.with_threads(|tt| (tt[me].priority, kernel.scheduler.peek_priority(tt)));
    if ready.is_some_and(|p| p > current) {
        if in_interrupt_context() {
            kernel.yield_on_return.store(true, Ordering::SeqCst);
        } else {
            kernel.yield_now();
        }
    }
}
