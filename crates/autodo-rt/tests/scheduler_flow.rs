// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! End-to-end scheduling scenarios.

mod common;

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use autodo_rt::{
    CoroutineHandle, CoroutineId, Resume, RuntimeConfig, RuntimeError, ScheduleState,
    Scheduler, Semaphore, Status,
};

use common::{init_test_logging, run_to_completion, run_until};

#[test]
fn double_register_is_rejected_and_find_is_stable() {
    init_test_logging();
    let mut sched = Scheduler::default();
    let handle = CoroutineHandle(7);
    let id = sched
        .register(handle, |_: &mut Scheduler, _: CoroutineId| Resume::Yield)
        .unwrap();
    let err = sched
        .register(handle, |_: &mut Scheduler, _: CoroutineId| Resume::Yield)
        .unwrap_err();
    assert!(matches!(err, RuntimeError::AlreadyRegistered(h) if h == handle));
    assert_eq!(sched.find(handle), Some(id));
    assert_eq!(sched.find(handle), Some(id));
    assert_eq!(sched.find(CoroutineHandle(8)), None);
    assert_eq!(sched.status(id).unwrap(), Status::Busy);
    sched.abort(id, 1).unwrap();
}

#[test]
fn waiting_coroutine_is_skipped_until_woken_from_another_thread() {
    init_test_logging();
    let mut sched = Scheduler::default();
    let resumes = Rc::new(Cell::new(0u32));

    let counter = resumes.clone();
    let id = sched
        .register(CoroutineHandle(1), move |sched: &mut Scheduler, id: CoroutineId| {
            counter.set(counter.get() + 1);
            if counter.get() == 1 {
                sched.set_schedule_state(id, ScheduleState::Waiting).unwrap();
                Resume::Yield
            } else {
                Resume::Return(0)
            }
        })
        .unwrap();

    assert_eq!(sched.tick(), 1);
    assert_eq!(sched.status(id).unwrap(), Status::Waiting);
    for _ in 0..3 {
        assert_eq!(sched.tick(), 0);
    }
    assert_eq!(resumes.get(), 1);

    let notify = sched.create_notify(move |sched| {
        sched.set_schedule_state(id, ScheduleState::Busy).unwrap();
    });
    let sender = notify.clone();
    let thread = sched
        .spawn_thread("waker", move || sender.send())
        .unwrap();

    run_to_completion(&mut sched, id);
    assert_eq!(resumes.get(), 2);
    sched.reap(thread);
    sched.destroy_notify(notify.id()).unwrap();
}

#[test]
fn five_sends_collapse_into_one_callback() {
    init_test_logging();
    let mut sched = Scheduler::default();
    let calls = Rc::new(Cell::new(0u32));
    let counter = calls.clone();
    let notify = sched.create_notify(move |_| counter.set(counter.get() + 1));

    // All sends land before the scheduler looks at the hub.
    let gate = Semaphore::new(0);
    let (sender, done) = (notify.clone(), gate.clone());
    let thread = sched
        .spawn_thread("sender", move || {
            for _ in 0..5 {
                sender.send();
            }
            done.post();
        })
        .unwrap();
    gate.wait();

    sched.tick();
    assert_eq!(calls.get(), 1);
    sched.tick();
    assert_eq!(calls.get(), 1);

    notify.send();
    sched.tick();
    assert_eq!(calls.get(), 2);

    sched.reap(thread);
    sched.destroy_notify(notify.id()).unwrap();
    notify.send();
    sched.tick();
    assert_eq!(calls.get(), 2);
}

#[test]
fn hooks_run_in_order_after_each_resume() {
    init_test_logging();
    let mut sched = Scheduler::default();
    let log = Rc::new(RefCell::new(Vec::new()));
    let steps = Rc::new(Cell::new(0u32));

    let counter = steps.clone();
    let id = sched
        .register(CoroutineHandle(3), move |_: &mut Scheduler, _: CoroutineId| {
            counter.set(counter.get() + 1);
            if counter.get() < 3 {
                Resume::Yield
            } else {
                Resume::Return(2)
            }
        })
        .unwrap();

    let first_log = log.clone();
    let first = sched
        .hook(id, move |sched: &mut Scheduler, id: CoroutineId| {
            first_log
                .borrow_mut()
                .push(("first", sched.status(id).unwrap()));
        })
        .unwrap();
    let second_log = log.clone();
    let second = sched
        .hook(id, move |sched: &mut Scheduler, id: CoroutineId| {
            second_log
                .borrow_mut()
                .push(("second", sched.status(id).unwrap()));
        })
        .unwrap();

    sched.tick();
    sched.unhook(id, first).unwrap();
    sched.tick();
    sched.tick();
    assert_eq!(
        *log.borrow(),
        [
            ("first", Status::Busy),
            ("second", Status::Busy),
            ("second", Status::Busy),
            ("second", Status::Finished),
        ]
    );
    assert_eq!(sched.nresults(id).unwrap(), 2);

    // The wrapper lives until its last hook is gone.
    assert!(matches!(sched.unhook(id, first), Err(RuntimeError::UnknownHook(_))));
    sched.unhook(id, second).unwrap();
    assert!(sched.find(CoroutineHandle(3)).is_none());
}

#[test]
fn panicking_coroutine_fails_with_panic_code() {
    init_test_logging();
    let mut sched = Scheduler::default();
    let seen = Rc::new(Cell::new(None));
    let probe = seen.clone();
    let id = sched
        .register(CoroutineHandle(4), |_: &mut Scheduler, _: CoroutineId| -> Resume {
            panic!("script error")
        })
        .unwrap();
    sched
        .hook(id, move |sched: &mut Scheduler, id: CoroutineId| {
            probe.set(sched.status(id).ok());
        })
        .unwrap();
    sched.tick();
    assert_eq!(seen.get(), Some(Status::Failed(autodo_rt::PANIC_CODE)));
}

#[test]
fn repeating_timer_fires_until_stopped() {
    init_test_logging();
    let mut sched = Scheduler::default();
    let fired = Rc::new(RefCell::new(Vec::new()));
    let start = Instant::now();

    let timer = sched.create_timer();
    let log = fired.clone();
    sched
        .timers_mut()
        .start(
            timer,
            Duration::from_millis(100),
            Duration::from_millis(50),
            move |sched: &mut Scheduler, id| {
                log.borrow_mut().push(start.elapsed());
                if log.borrow().len() == 3 {
                    sched.timers_mut().stop(id).unwrap();
                }
            },
        )
        .unwrap();

    sched.run();
    let fired = fired.borrow();
    assert_eq!(fired.len(), 3);
    assert!(fired[0] >= Duration::from_millis(100));
    assert!(fired[1] >= Duration::from_millis(150));
    assert!(fired[2] >= Duration::from_millis(200));
    assert!(!sched.timers().is_active(timer).unwrap());

    // `again` restarts from the stored repeat.
    sched.timers_mut().again(timer).unwrap();
    assert!(sched.timers().is_active(timer).unwrap());
    sched.destroy_timer(timer).unwrap();
    assert!(!sched.is_alive());
}

#[test]
fn many_coroutines_hand_off_through_one_worker() {
    init_test_logging();
    let mut sched = Scheduler::new(RuntimeConfig::default().with_max_tick_batch(2));
    let jobs: Arc<Mutex<Vec<CoroutineId>>> = Arc::default();
    let finished = Rc::new(Cell::new(0u32));

    // Each coroutine queues itself for the worker and waits.
    let worker_jobs = jobs.clone();
    for h in 0..6 {
        let jobs = jobs.clone();
        let finished = finished.clone();
        let mut queued = false;
        sched
            .register(CoroutineHandle(100 + h), move |sched: &mut Scheduler, id: CoroutineId| {
                if queued {
                    finished.set(finished.get() + 1);
                    return Resume::Return(0);
                }
                queued = true;
                jobs.lock().unwrap().push(id);
                sched.set_schedule_state(id, ScheduleState::Waiting).unwrap();
                Resume::Yield
            })
            .unwrap();
    }

    let done: Arc<Mutex<Vec<CoroutineId>>> = Arc::default();
    let done_in = done.clone();
    let notify = sched.create_notify(move |sched| {
        for id in done_in.lock().unwrap().drain(..) {
            sched.set_schedule_state(id, ScheduleState::Busy).unwrap();
        }
    });

    let worker_notify = notify.clone();
    let worker_done = done.clone();
    let worker = sched
        .spawn_thread("worker", move || {
            let mut served = 0;
            while served < 6 {
                let batch: Vec<_> = worker_jobs.lock().unwrap().drain(..).collect();
                if batch.is_empty() {
                    std::thread::sleep(Duration::from_millis(1));
                    continue;
                }
                served += batch.len();
                worker_done.lock().unwrap().extend(batch);
                worker_notify.send();
            }
        })
        .unwrap();

    run_until(&mut sched, Duration::from_secs(10), |_| finished.get() == 6);
    assert_eq!(sched.stats().live_coroutines, 0);
    sched.reap(worker);
    sched.destroy_notify(notify.id()).unwrap();
}
