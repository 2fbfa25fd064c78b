use keos::{
    KernelError, SchedulingMode, SystemConfiguration,
    interrupt::{self, InterruptState},
    sync::SpinLock,
    thread::{
        Current, PRI_DEFAULT, ThreadBuilder, ThreadState, get_state_by_tid, scheduling_mode,
    },
};
use std::sync::Arc;

fn boot(main: impl FnOnce() + Send + 'static) {
    keos::start(SystemConfiguration::builder().quiet(true).build(), main)
}

#[derive(Clone, Default)]
struct Trace(Arc<SpinLock<Vec<&'static str>>>);

impl Trace {
    fn push(&self, event: &'static str) {
        let mut guard = self.0.lock();
        guard.push(event);
        guard.unlock();
    }

    fn take(&self) -> Vec<&'static str> {
        let mut guard = self.0.lock();
        let events = core::mem::take(&mut *guard);
        guard.unlock();
        events
    }
}

#[test]
fn main_returns() {
    let trace = Trace::default();
    let t = trace.clone();
    boot(move || {
        assert_eq!(Current::get_priority(), PRI_DEFAULT);
        assert_eq!(InterruptState::current(), InterruptState::On);
        t.push("main");
    });
    assert_eq!(trace.take(), ["main"]);
}

#[test]
fn spawn_higher_preempts() {
    let trace = Trace::default();
    let t = trace.clone();
    boot(move || {
        let child = {
            let t = t.clone();
            ThreadBuilder::new("child")
                .priority(PRI_DEFAULT + 1)
                .spawn(move || t.push("child"))
        };
        t.push("main");
        assert_eq!(get_state_by_tid(child.tid), Ok(ThreadState::Exited(0)));
    });
    assert_eq!(trace.take(), ["child", "main"]);
}

#[test]
fn spawn_lower_waits() {
    let trace = Trace::default();
    let t = trace.clone();
    boot(move || {
        let child = {
            let t = t.clone();
            ThreadBuilder::new("child")
                .priority(PRI_DEFAULT - 1)
                .spawn(move || t.push("child"))
        };
        // A lower priority thread never runs while main is ready.
        Current::yield_now();
        t.push("main");
        assert_eq!(get_state_by_tid(child.tid), Ok(ThreadState::Runnable));
        child.join();
    });
    assert_eq!(trace.take(), ["main", "child"]);
}

#[test]
fn fifo_among_equals() {
    let trace = Trace::default();
    let t = trace.clone();
    boot(move || {
        let handles: Vec<_> = [("a", ["a1", "a2"]), ("b", ["b1", "b2"])]
            .into_iter()
            .map(|(name, events)| {
                let t = t.clone();
                ThreadBuilder::new(name).spawn(move || {
                    t.push(events[0]);
                    Current::yield_now();
                    t.push(events[1]);
                })
            })
            .collect();
        for handle in handles {
            handle.join();
        }
    });
    assert_eq!(trace.take(), ["a1", "b1", "a2", "b2"]);
}

#[test]
fn join_exit_code() {
    boot(|| {
        let normal = ThreadBuilder::new("normal").spawn(|| ());
        let exits = ThreadBuilder::new("exits").spawn(|| {
            Current::exit(7);
        });
        assert_eq!(normal.join(), 0);
        assert_eq!(exits.join(), 7);
    });
}

#[test]
fn main_exit() {
    let trace = Trace::default();
    let t = trace.clone();
    boot(move || {
        t.push("before");
        Current::exit(1);
    });
    assert_eq!(trace.take(), ["before"]);
}

#[test]
fn set_priority_yields() {
    let trace = Trace::default();
    let t = trace.clone();
    boot(move || {
        {
            let t = t.clone();
            ThreadBuilder::new("child")
                .priority(PRI_DEFAULT - 1)
                .spawn(move || t.push("child"));
        }
        t.push("main high");
        Current::set_priority(PRI_DEFAULT - 2);
        t.push("main low");
        assert_eq!(Current::get_priority(), PRI_DEFAULT - 2);
    });
    assert_eq!(trace.take(), ["main high", "child", "main low"]);
}

#[test]
fn set_priority_ignored_in_mlfqs() {
    let config = SystemConfiguration::builder()
        .scheduling_mode(SchedulingMode::Mlfqs)
        .quiet(true)
        .build();
    keos::start(config, || {
        assert_eq!(scheduling_mode(), SchedulingMode::Mlfqs);
        Current::set_priority(0);
        assert_eq!(Current::get_priority(), PRI_DEFAULT);
    });
}

#[test]
fn power_off_tears_down_leftover_threads() {
    let witness = Arc::new(());
    let w = witness.clone();
    boot(move || {
        let sleeper = {
            let w = w.clone();
            ThreadBuilder::new("sleeper")
                .priority(PRI_DEFAULT + 1)
                .spawn(move || {
                    let _w = w;
                    Current::park_with(|_| ());
                })
        };
        let never_run = ThreadBuilder::new("never run")
            .priority(PRI_DEFAULT - 1)
            .spawn(move || {
                let _w = w;
                unreachable!("a lower priority thread never runs before main exits");
            });
        assert_eq!(get_state_by_tid(sleeper.tid), Ok(ThreadState::Parked));
        assert_eq!(get_state_by_tid(never_run.tid), Ok(ThreadState::Runnable));
    });
    assert_eq!(Arc::strong_count(&witness), 1);
}

#[test]
fn interrupt_handler() {
    let trace = Trace::default();
    let t = trace.clone();
    boot(move || {
        {
            let t = t.clone();
            interrupt::register(0x40, move || {
                assert!(interrupt::in_interrupt_context());
                assert_eq!(InterruptState::current(), InterruptState::Off);
                t.push("handler");
            });
        }
        assert!(!interrupt::in_interrupt_context());
        interrupt::raise(0x40);
        assert_eq!(InterruptState::current(), InterruptState::On);
        t.push("main");
    });
    assert_eq!(trace.take(), ["handler", "main"]);
}

#[test]
#[should_panic(expected = "Unknown interrupt #65")]
fn unknown_interrupt() {
    boot(|| interrupt::raise(65));
}

#[test]
#[should_panic(expected = "Deadlock: every thread is parked: main")]
fn deadlock() {
    boot(|| Current::park_with(|_| ()));
}

#[test]
#[should_panic(expected = "thread 'child' panicked: boom")]
fn panic_poisons_machine() {
    boot(|| {
        ThreadBuilder::new("child")
            .priority(PRI_DEFAULT + 1)
            .spawn(|| panic!("boom"));
        unreachable!("the machine stops before main resumes");
    });
}

#[test]
fn cmdline() {
    assert_eq!(
        SystemConfiguration::from_cmdline(""),
        Ok(SystemConfiguration::default())
    );
    assert_eq!(
        SystemConfiguration::from_cmdline("-q -mlfqs"),
        Ok(SystemConfiguration {
            scheduling_mode: SchedulingMode::Mlfqs,
            quiet: true,
        })
    );
    assert_eq!(
        SystemConfiguration::from_cmdline("-q -o mlfqs"),
        Err(KernelError::InvalidArgument)
    );
}
