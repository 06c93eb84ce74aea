//! Timer fairness: several periodic timers on one loop each fire about
//! duration/period times, with bounded drift.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use carbon::prelude::*;

#[test]
fn periodic_timers_share_the_loop_fairly() {
    carbon::dev_tracing::init_tracing();

    let mut lt: EventLoopThread<VepEvent> =
        EventLoopThread::spawn("timer-fairness", |mut lp| lp.run()).unwrap();

    const TIMERS: usize = 4;
    const PERIOD: Duration = Duration::from_millis(40);
    const RUN: Duration = Duration::from_millis(400);

    let mut counters = Vec::new();
    let mut timers = Vec::new();
    for index in 0..TIMERS {
        let count = Arc::new(AtomicUsize::new(0));
        let fired = Arc::clone(&count);
        let timer = Timer::new(PERIOD, TimerMode::Periodic, &format!("tick-{index}"), move || {
            fired.fetch_add(1, Ordering::SeqCst);
        });
        lt.handle().insert_timer(&timer);
        counters.push(count);
        timers.push(timer);
    }

    thread::sleep(RUN);
    for timer in &timers {
        lt.handle().cancel_timer(timer);
    }
    let counts: Vec<usize> = counters.iter().map(|c| c.load(Ordering::SeqCst)).collect();
    lt.stop();

    // floor(400/40) = 10 firings each, +-1 for scheduling noise.
    for (index, &count) in counts.iter().enumerate() {
        assert!((9..=11).contains(&count), "timer {index} fired {count} times");
    }
}

#[test]
fn paused_timer_stops_until_restart() {
    carbon::dev_tracing::init_tracing();

    let mut lt: EventLoopThread<VepEvent> =
        EventLoopThread::spawn("timer-pause", |mut lp| lp.run()).unwrap();

    let count = Arc::new(AtomicUsize::new(0));
    let fired = Arc::clone(&count);
    let timer = Timer::new(Duration::from_millis(30), TimerMode::Periodic, "pausable", move || {
        fired.fetch_add(1, Ordering::SeqCst);
    });

    lt.handle().insert_timer(&timer);
    thread::sleep(Duration::from_millis(100));
    lt.handle().pause_timer(&timer);
    let at_pause = count.load(Ordering::SeqCst);
    assert!(at_pause >= 2);

    thread::sleep(Duration::from_millis(100));
    assert_eq!(count.load(Ordering::SeqCst), at_pause, "paused timer fired");

    lt.handle().restart_timer(&timer);
    thread::sleep(Duration::from_millis(100));
    assert!(count.load(Ordering::SeqCst) > at_pause, "restarted timer never fired");

    lt.stop();
}
