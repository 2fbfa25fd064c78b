mod common;

use common::{Trace, boot};
use keos::{
    interrupt::{self, in_interrupt_context},
    sync::WouldBlock,
    thread::{Current, PRI_DEFAULT, PRI_MIN, ThreadBuilder, ThreadState, get_state_by_tid},
};
use keos_synch::sync::Semaphore;
use proptest::prelude::*;
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

#[test]
fn ping_pong() {
    let trace = Trace::default();
    let t = trace.clone();
    boot(move || {
        let sema = Arc::new([Semaphore::new(0), Semaphore::new(0)]);
        let helper = {
            let (sema, t) = (sema.clone(), t.clone());
            ThreadBuilder::new("sema-test").spawn(move || {
                for _ in 0..10 {
                    sema[0].down();
                    t.push("pong");
                    sema[1].up();
                }
            })
        };
        for _ in 0..10 {
            t.push("ping");
            sema[0].up();
            sema[1].down();
        }
        assert_eq!(helper.join(), 0);
    });
    assert_eq!(trace.take(), ["ping", "pong"].repeat(10));
}

#[test]
fn sema_0() {
    boot(|| {
        let sema = Arc::new(Semaphore::new(0));
        let waiter = {
            let sema = sema.clone();
            ThreadBuilder::new("waiter")
                .priority(PRI_DEFAULT + 1)
                .spawn(move || sema.down())
        };
        assert_eq!(get_state_by_tid(waiter.tid), Ok(ThreadState::Parked));
        sema.up();
        assert_eq!(get_state_by_tid(waiter.tid), Ok(ThreadState::Exited(0)));
        assert_eq!(sema.value(), 0);
    });
}

#[test]
fn sema_1() {
    boot(|| {
        let sema = Arc::new(Semaphore::new(0));
        let done = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let (sema, done) = (sema.clone(), done.clone());
                ThreadBuilder::new("waiter").spawn(move || {
                    sema.down();
                    done.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();
        // Let every waiter run into the semaphore.
        Current::yield_now();
        assert_eq!(done.load(Ordering::SeqCst), 0);
        for _ in 0..8 {
            sema.up();
        }
        for handle in handles {
            handle.join();
        }
        assert_eq!(done.load(Ordering::SeqCst), 8);
        assert_eq!(sema.value(), 0);
    });
}

#[test]
fn wake_in_priority_order() {
    let trace = Trace::default();
    let t = trace.clone();
    boot(move || {
        let sema = Arc::new(Semaphore::new(0));
        Current::set_priority(PRI_MIN);
        for i in 0..10u8 {
            let priority = PRI_DEFAULT - (i + 3) % 10 - 1;
            let (sema, t) = (sema.clone(), t.clone());
            ThreadBuilder::new(format!("priority {priority}"))
                .priority(priority)
                .spawn(move || {
                    sema.down();
                    t.push(format!("{priority} woke up"));
                });
        }
        // Every waiter outranks the main thread, so it is already asleep.
        for _ in 0..10 {
            sema.up();
        }
    });
    let expected: Vec<_> = (21..=30).rev().map(|p| format!("{p} woke up")).collect();
    assert_eq!(trace.take(), expected);
}

#[test]
fn try_down() {
    boot(|| {
        let sema = Semaphore::new(2);
        assert_eq!(sema.try_down(), Ok(()));
        assert_eq!(sema.try_down(), Ok(()));
        assert_eq!(sema.try_down(), Err(WouldBlock));
        assert_eq!(sema.value(), 0);
        sema.up();
        assert_eq!(sema.value(), 1);
    });
}

#[test]
fn n_permits() {
    boot(|| {
        let sema = Arc::new(Semaphore::new(2));
        let inside = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..6)
            .map(|_| {
                let (sema, inside, peak) = (sema.clone(), inside.clone(), peak.clone());
                ThreadBuilder::new("worker").spawn(move || {
                    let permit = sema.wait();
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    Current::yield_now();
                    inside.fetch_sub(1, Ordering::SeqCst);
                    drop(permit);
                })
            })
            .collect();
        for handle in handles {
            handle.join();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert_eq!(sema.value(), 2);
    });
}

#[test]
fn up_from_interrupt_yields_on_return() {
    let trace = Trace::default();
    let t = trace.clone();
    boot(move || {
        let sema = Arc::new(Semaphore::new(0));
        {
            let (sema, t) = (sema.clone(), t.clone());
            interrupt::register(0x30, move || {
                assert!(in_interrupt_context());
                t.push("handler");
                sema.up();
                t.push("handler returns");
            });
        }
        let high = {
            let (sema, t) = (sema.clone(), t.clone());
            ThreadBuilder::new("high")
                .priority(PRI_DEFAULT + 10)
                .spawn(move || {
                    sema.down();
                    t.push("high");
                })
        };
        interrupt::raise(0x30);
        t.push("main");
        high.join();
    });
    assert_eq!(trace.take(), ["handler", "handler returns", "high", "main"]);
}

#[test]
fn try_down_from_interrupt() {
    boot(|| {
        let sema = Arc::new(Semaphore::new(1));
        let taken = Arc::new(AtomicUsize::new(0));
        {
            let (sema, taken) = (sema.clone(), taken.clone());
            interrupt::register(0x31, move || {
                if sema.try_down().is_ok() {
                    taken.fetch_add(1, Ordering::SeqCst);
                }
            });
        }
        interrupt::raise(0x31);
        interrupt::raise(0x31);
        assert_eq!(taken.load(Ordering::SeqCst), 1);
    });
}

#[test]
#[should_panic(expected = "cannot sleep in the interrupt context")]
fn down_from_interrupt() {
    boot(|| {
        let sema = Arc::new(Semaphore::new(0));
        interrupt::register(0x32, move || sema.down());
        interrupt::raise(0x32);
    });
}

#[derive(Debug, Clone, Copy)]
enum Op {
    Up,
    Down,
    TryDown,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![Just(Op::Up), Just(Op::Down), Just(Op::TryDown)]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    // Every `Down` is issued by a fresh thread above the main thread's
    // priority, so it either passes at once or sleeps until a later `Up`.
    #[test]
    fn value_tracks_model(ops in prop::collection::vec(op(), 1..48)) {
        boot(move || {
            let sema = Arc::new(Semaphore::new(0));
            let passed = Arc::new(AtomicUsize::new(0));
            let (mut value, mut blocked, mut expected_passed) = (0usize, 0usize, 0usize);
            for op in ops {
                match op {
                    Op::Up => {
                        sema.up();
                        if blocked > 0 {
                            blocked -= 1;
                            expected_passed += 1;
                        } else {
                            value += 1;
                        }
                    }
                    Op::Down => {
                        let (sema, passed) = (sema.clone(), passed.clone());
                        ThreadBuilder::new("down")
                            .priority(PRI_DEFAULT + 1)
                            .spawn(move || {
                                sema.down();
                                passed.fetch_add(1, Ordering::SeqCst);
                            });
                        if value > 0 {
                            value -= 1;
                            expected_passed += 1;
                        } else {
                            blocked += 1;
                        }
                    }
                    Op::TryDown => {
                        let result = sema.try_down();
                        if value > 0 {
                            assert_eq!(result, Ok(()));
                            value -= 1;
                        } else {
                            assert_eq!(result, Err(WouldBlock));
                        }
                    }
                }
                assert_eq!(sema.value(), value);
                assert_eq!(passed.load(Ordering::SeqCst), expected_passed);
            }
            for _ in 0..blocked {
                sema.up();
            }
            assert_eq!(passed.load(Ordering::SeqCst), expected_passed + blocked);
            assert_eq!(sema.value(), value);
        });
    }
}
