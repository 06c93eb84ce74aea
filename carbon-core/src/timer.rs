//! Timers for the event loop.
//!
//! A [`Timer`] is a cheap cloneable handle; the owning loop keeps armed
//! deadlines in a binary heap. Pause, restart and cancel never walk the
//! heap: each re-arm bumps the handle's epoch and stale heap entries are
//! discarded lazily when they surface. A periodic timer is re-armed at
//! `now + period` after its callback returns, so a long stall produces one
//! late firing rather than a burst.

use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

static NEXT_TIMER_ID: AtomicU64 = AtomicU64::new(1);

/// One-shot timers fire once and disarm; periodic timers re-arm themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerMode {
    OneShot,
    Periodic,
}

pub(crate) struct TimerInner {
    id: u64,
    name: String,
    mode: TimerMode,
    period: Mutex<Duration>,
    callback: Mutex<Box<dyn FnMut() + Send>>,
    /// Bumped on every arm/pause/restart/cancel; heap entries carry the
    /// epoch they were armed under.
    epoch: AtomicU64,
    active: AtomicBool,
}

impl std::fmt::Debug for TimerInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Timer")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

/// Handle to a timer owned by an event loop.
#[derive(Debug, Clone)]
pub struct Timer {
    inner: Arc<TimerInner>,
}

impl Timer {
    /// Create a detached timer; arm it with
    /// [`LoopHandle::insert_timer`](crate::event_loop::LoopHandle::insert_timer).
    pub fn new(
        period: Duration,
        mode: TimerMode,
        name: &str,
        callback: impl FnMut() + Send + 'static,
    ) -> Self {
        Self {
            inner: Arc::new(TimerInner {
                id: NEXT_TIMER_ID.fetch_add(1, Ordering::Relaxed),
                name: name.to_string(),
                mode,
                period: Mutex::new(period),
                callback: Mutex::new(Box::new(callback)),
                epoch: AtomicU64::new(0),
                active: AtomicBool::new(false),
            }),
        }
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    #[must_use]
    pub fn mode(&self) -> TimerMode {
        self.inner.mode
    }

    #[must_use]
    pub fn period(&self) -> Duration {
        *self.inner.period.lock()
    }

    pub fn set_period(&self, period: Duration) {
        *self.inner.period.lock() = period;
    }

    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.inner.active.load(Ordering::Acquire)
    }

    pub(crate) fn inner(&self) -> &Arc<TimerInner> {
        &self.inner
    }
}

impl TimerInner {
    pub(crate) fn disarm(&self) -> u64 {
        self.active.store(false, Ordering::Release);
        self.epoch.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn arm(&self) -> u64 {
        self.active.store(true, Ordering::Release);
        self.epoch.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn mode(&self) -> TimerMode {
        self.mode
    }

    pub(crate) fn is_current(&self, epoch: u64) -> bool {
        self.active.load(Ordering::Acquire) && self.epoch.load(Ordering::Acquire) == epoch
    }

    pub(crate) fn fire(&self) {
        (self.callback.lock())();
    }
}

struct Entry {
    deadline: Instant,
    seq: u64,
    epoch: u64,
    timer: Arc<TimerInner>,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}
impl Eq for Entry {}
impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Equal deadlines fire in insertion order via seq.
        self.deadline.cmp(&other.deadline).then(self.seq.cmp(&other.seq))
    }
}

/// Due timer popped from the queue, fired by the loop outside its lock.
pub(crate) struct DueTimer {
    pub(crate) timer: Arc<TimerInner>,
    pub(crate) epoch: u64,
}

/// Min-heap of armed timer deadlines, owned by one event loop.
#[derive(Default)]
pub(crate) struct TimerQueue {
    heap: BinaryHeap<Reverse<Entry>>,
    seq: u64,
}

impl TimerQueue {
    pub(crate) fn new() -> Self {
        Self { heap: BinaryHeap::new(), seq: 0 }
    }

    /// Arm `timer` at `now + period`, invalidating earlier arms.
    pub(crate) fn arm(&mut self, timer: &Timer, now: Instant) {
        let epoch = timer.inner().arm();
        self.push(timer.inner().clone(), epoch, now + timer.period());
    }

    /// Re-arm a periodic timer after a firing, keeping its epoch.
    pub(crate) fn rearm(&mut self, timer: Arc<TimerInner>, epoch: u64, now: Instant) {
        let deadline = now + *timer.period.lock();
        self.push(timer, epoch, deadline);
    }

    fn push(&mut self, timer: Arc<TimerInner>, epoch: u64, deadline: Instant) {
        self.seq += 1;
        self.heap.push(Reverse(Entry { deadline, seq: self.seq, epoch, timer }));
    }

    /// Earliest valid deadline, discarding stale entries on the way.
    pub(crate) fn next_deadline(&mut self) -> Option<Instant> {
        while let Some(Reverse(top)) = self.heap.peek() {
            if top.timer.is_current(top.epoch) {
                return Some(top.deadline);
            }
            self.heap.pop();
        }
        None
    }

    /// Pop every timer due at `now`, in (deadline, insertion) order.
    pub(crate) fn pop_due(&mut self, now: Instant) -> Vec<DueTimer> {
        let mut due = Vec::new();
        while let Some(Reverse(top)) = self.heap.peek() {
            if !top.timer.is_current(top.epoch) {
                self.heap.pop();
                continue;
            }
            if top.deadline > now {
                break;
            }
            let Reverse(entry) = self.heap.pop().expect("peeked entry");
            if entry.timer.mode == TimerMode::OneShot {
                entry.timer.disarm();
            }
            due.push(DueTimer { timer: entry.timer, epoch: entry.epoch });
        }
        due
    }

    pub(crate) fn clear(&mut self) {
        for Reverse(entry) in self.heap.drain() {
            entry.timer.disarm();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter_timer(period: Duration, mode: TimerMode) -> (Timer, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let fired = Arc::clone(&count);
        let timer = Timer::new(period, mode, "test", move || {
            fired.fetch_add(1, Ordering::SeqCst);
        });
        (timer, count)
    }

    #[test]
    fn test_due_timers_fire_in_deadline_order() {
        let mut queue = TimerQueue::new();
        let now = Instant::now();

        let (late, _) = counter_timer(Duration::from_millis(20), TimerMode::OneShot);
        let (early, _) = counter_timer(Duration::from_millis(5), TimerMode::OneShot);
        queue.arm(&late, now);
        queue.arm(&early, now);

        let due = queue.pop_due(now + Duration::from_millis(50));
        assert_eq!(due.len(), 2);
        assert_eq!(due[0].timer.id, early.id());
        assert_eq!(due[1].timer.id, late.id());
    }

    #[test]
    fn test_equal_deadlines_fire_in_insertion_order() {
        let mut queue = TimerQueue::new();
        let now = Instant::now();

        let (first, _) = counter_timer(Duration::from_millis(10), TimerMode::OneShot);
        let (second, _) = counter_timer(Duration::from_millis(10), TimerMode::OneShot);
        queue.arm(&first, now);
        queue.arm(&second, now);

        let due = queue.pop_due(now + Duration::from_millis(10));
        assert_eq!(due[0].timer.id, first.id());
        assert_eq!(due[1].timer.id, second.id());
    }

    #[test]
    fn test_cancel_invalidates_pending_entry() {
        let mut queue = TimerQueue::new();
        let now = Instant::now();

        let (timer, _) = counter_timer(Duration::from_millis(5), TimerMode::OneShot);
        queue.arm(&timer, now);
        timer.inner().disarm();

        assert!(queue.pop_due(now + Duration::from_millis(50)).is_empty());
        assert_eq!(queue.next_deadline(), None);
    }

    #[test]
    fn test_rearm_uses_now_not_original_deadline() {
        let mut queue = TimerQueue::new();
        let now = Instant::now();

        let (timer, _) = counter_timer(Duration::from_millis(10), TimerMode::Periodic);
        queue.arm(&timer, now);

        // Simulate a long stall: the firing happens 100ms late, the next
        // deadline is measured from the late "now".
        let late_now = now + Duration::from_millis(110);
        let due = queue.pop_due(late_now);
        assert_eq!(due.len(), 1);
        queue.rearm(due[0].timer.clone(), due[0].epoch, late_now);

        let next = queue.next_deadline().unwrap();
        assert_eq!(next, late_now + Duration::from_millis(10));
    }

    #[test]
    fn test_one_shot_disarms_after_pop() {
        let mut queue = TimerQueue::new();
        let now = Instant::now();

        let (timer, _) = counter_timer(Duration::from_millis(1), TimerMode::OneShot);
        queue.arm(&timer, now);
        assert!(timer.is_armed());

        let due = queue.pop_due(now + Duration::from_millis(5));
        assert_eq!(due.len(), 1);
        assert!(!timer.is_armed());
    }
}
