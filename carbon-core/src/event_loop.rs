//! Cooperative event loop: one owner thread, a FIFO of addressed events and
//! a heap of timers.
//!
//! External producers append through a [`LoopHandle`]; every append signals
//! the loop's condition variable and invokes its wake hook, which a socket
//! actor points at its breaker so a blocked `select` wakes too. While a
//! loop is running, only its owner thread touches the receiver registry and
//! fires timers; producers only ever enqueue under the state mutex.
//!
//! The main step drains pending events in arrival order, fires due timers
//! in (deadline, insertion) order, then parks until the next timer deadline
//! or an external wake.

use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use crate::event::{Address, Envelope, EventReceiver, ReceiverId};
use crate::sync::Barrier;
use crate::timer::{Timer, TimerMode, TimerQueue};

type WakeHook = Arc<dyn Fn() + Send + Sync>;

struct State<E> {
    queue: VecDeque<(Address, E)>,
    timers: TimerQueue,
    wake_hook: Option<WakeHook>,
    done: bool,
}

struct Shared<E> {
    name: String,
    state: Mutex<State<E>>,
    cond: Condvar,
}

impl<E> Shared<E> {
    /// Wake the owner thread: condvar for a parked loop, hook for a loop
    /// blocked in socket `select`.
    fn wake(&self, hook: Option<WakeHook>) {
        self.cond.notify_all();
        if let Some(hook) = hook {
            hook();
        }
    }
}

/// Producer-side handle to an event loop. Cheap to clone; usable from any
/// thread.
pub struct LoopHandle<E: Envelope> {
    shared: Arc<Shared<E>>,
}

impl<E: Envelope> Clone for LoopHandle<E> {
    fn clone(&self) -> Self {
        Self { shared: Arc::clone(&self.shared) }
    }
}

impl<E: Envelope> LoopHandle<E> {
    /// Append an event for `to`. Events from one producer arrive in post
    /// order; events posted after shutdown are dropped.
    pub fn post(&self, to: Address, event: E) {
        let mut state = self.shared.state.lock();
        if state.done {
            tracing::trace!(target: "carbon::loop", name = %self.shared.name,
                "event posted after shutdown, dropped");
            return;
        }
        state.queue.push_back((to, event));
        let hook = state.wake_hook.clone();
        drop(state);
        self.shared.wake(hook);
    }

    pub fn post_to(&self, receiver: ReceiverId, event: E) {
        self.post(Address::To(receiver), event);
    }

    pub fn post_broadcast(&self, event: E) {
        self.post(Address::Broadcast, event);
    }

    /// Arm `timer` at `now + period` on this loop.
    pub fn insert_timer(&self, timer: &Timer) {
        let mut state = self.shared.state.lock();
        if state.done {
            return;
        }
        state.timers.arm(timer, Instant::now());
        let hook = state.wake_hook.clone();
        drop(state);
        // The new deadline may be closer than the one the loop parked on.
        self.shared.wake(hook);
    }

    /// Re-arm a timer at `now + period`, dropping any pending deadline.
    pub fn restart_timer(&self, timer: &Timer) {
        self.insert_timer(timer);
    }

    /// Keep the timer but drop its pending deadline. A callback already
    /// running completes.
    pub fn pause_timer(&self, timer: &Timer) {
        timer.inner().disarm();
    }

    /// Remove the timer. A callback already running completes.
    pub fn cancel_timer(&self, timer: &Timer) {
        timer.inner().disarm();
    }

    /// Ask the loop to stop after its current iteration.
    pub fn shutdown(&self) {
        let mut state = self.shared.state.lock();
        state.done = true;
        let hook = state.wake_hook.clone();
        drop(state);
        self.shared.wake(hook);
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        self.shared.state.lock().done
    }

    #[must_use]
    pub fn has_pending_events(&self) -> bool {
        !self.shared.state.lock().queue.is_empty()
    }

    /// Install the hook invoked on every wake, or clear it with `None`.
    pub fn set_wake_hook(&self, hook: Option<WakeHook>) {
        self.shared.state.lock().wake_hook = hook;
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }
}

/// An event target: the loop to post to and the address on it. This is the
/// "actor ref" the network services send completion events to.
pub struct EventTarget<E: Envelope> {
    handle: LoopHandle<E>,
    address: Address,
}

impl<E: Envelope> Clone for EventTarget<E> {
    fn clone(&self) -> Self {
        Self { handle: self.handle.clone(), address: self.address }
    }
}

impl<E: Envelope> EventTarget<E> {
    #[must_use]
    pub fn new(handle: LoopHandle<E>, receiver: ReceiverId) -> Self {
        Self { handle, address: Address::To(receiver) }
    }

    /// Target every receiver on the loop.
    #[must_use]
    pub fn broadcast(handle: LoopHandle<E>) -> Self {
        Self { handle, address: Address::Broadcast }
    }

    pub fn post(&self, event: E) {
        self.handle.post(self.address, event);
    }

    #[must_use]
    pub fn handle(&self) -> &LoopHandle<E> {
        &self.handle
    }

    #[must_use]
    pub fn address(&self) -> Address {
        self.address
    }
}

/// Cooperative single-threaded event loop. One loop, one owner thread.
pub struct EventLoop<E: Envelope> {
    shared: Arc<Shared<E>>,
    receivers: Vec<(ReceiverId, Box<dyn EventReceiver<E>>)>,
    pub(crate) barrier: Option<Barrier<E>>,
}

impl<E: Envelope> EventLoop<E> {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            shared: Arc::new(Shared {
                name: name.to_string(),
                state: Mutex::new(State {
                    queue: VecDeque::new(),
                    timers: TimerQueue::new(),
                    wake_hook: None,
                    done: false,
                }),
                cond: Condvar::new(),
            }),
            receivers: Vec::new(),
            barrier: None,
        }
    }

    #[must_use]
    pub fn handle(&self) -> LoopHandle<E> {
        LoopHandle { shared: Arc::clone(&self.shared) }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Bind a receiver to this loop. Only the owner thread registers, and
    /// only while it is not inside `dispatch_pending`.
    pub fn add_receiver(&mut self, receiver: Box<dyn EventReceiver<E>>) -> ReceiverId {
        let id = ReceiverId::alloc();
        self.receivers.push((id, receiver));
        id
    }

    pub fn remove_receiver(&mut self, id: ReceiverId) {
        self.receivers.retain(|(rid, _)| *rid != id);
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        self.shared.state.lock().done
    }

    /// Drain the event FIFO in arrival order, then fire due timers.
    /// Returns the number of events plus timers handled.
    pub fn dispatch_pending(&mut self) -> usize {
        let mut handled = 0;
        loop {
            let next = self.shared.state.lock().queue.pop_front();
            let Some((addr, event)) = next else { break };

            if let Some(barrier) = self.barrier.as_mut() {
                barrier.offer(&event);
            }
            self.deliver(addr, &event);
            handled += 1;
        }
        handled + self.fire_due_timers()
    }

    fn deliver(&mut self, addr: Address, event: &E) {
        match addr {
            Address::To(rid) => {
                let receiver = self.receivers.iter_mut().find(|(id, _)| *id == rid);
                let consumed = match receiver {
                    Some((_, r)) => r.process_event(event),
                    None => false,
                };
                if !consumed {
                    tracing::trace!(target: "carbon::loop", name = %self.shared.name,
                        receiver = %rid, "unconsumed event discarded");
                }
            }
            Address::Broadcast => {
                let mut consumed = false;
                for (_, receiver) in &mut self.receivers {
                    consumed |= receiver.process_event(event);
                }
                if !consumed {
                    tracing::trace!(target: "carbon::loop", name = %self.shared.name,
                        "broadcast event consumed by no receiver");
                }
            }
        }
    }

    /// Fire every timer due now. Periodic timers are re-armed at
    /// `now + period` after their callback returns.
    pub fn fire_due_timers(&mut self) -> usize {
        let due = self.shared.state.lock().timers.pop_due(Instant::now());
        let fired = due.len();
        for entry in due {
            entry.timer.fire();
            if entry.timer.mode() == TimerMode::Periodic && entry.timer.is_current(entry.epoch) {
                self.shared.state.lock().timers.rearm(entry.timer, entry.epoch, Instant::now());
            }
        }
        fired
    }

    /// Earliest armed timer deadline.
    #[must_use]
    pub fn next_timer_deadline(&self) -> Option<Instant> {
        self.shared.state.lock().timers.next_deadline()
    }

    /// Sleep until `deadline` (forever when `None`), a new event, or
    /// shutdown. Returns immediately when work is already pending.
    pub fn park_until(&self, deadline: Option<Instant>) {
        let mut state = self.shared.state.lock();
        if !state.queue.is_empty() || state.done {
            return;
        }
        match deadline {
            Some(deadline) => {
                let _ = self.shared.cond.wait_until(&mut state, deadline);
            }
            None => self.shared.cond.wait(&mut state),
        }
    }

    /// Run until shutdown. Events and timers left at shutdown are
    /// discarded.
    pub fn run(&mut self) {
        tracing::debug!(target: "carbon::loop", name = %self.shared.name, "event loop running");
        while !self.is_done() {
            self.dispatch_pending();
            let deadline = self.next_timer_deadline();
            self.park_until(deadline);
        }

        let mut state = self.shared.state.lock();
        let dropped = state.queue.len();
        state.queue.clear();
        state.timers.clear();
        drop(state);
        if dropped > 0 {
            tracing::trace!(target: "carbon::loop", name = %self.shared.name, dropped,
                "events dropped at shutdown");
        }
        tracing::debug!(target: "carbon::loop", name = %self.shared.name, "event loop stopped");
    }
}

/// An event loop running on its own named thread.
pub struct EventLoopThread<E: Envelope> {
    handle: LoopHandle<E>,
    join: Option<thread::JoinHandle<()>>,
}

impl<E: Envelope> EventLoopThread<E> {
    /// Spawn a thread owning a fresh loop. `body` receives the loop and is
    /// responsible for driving it (plain [`EventLoop::run`] or a custom
    /// iteration such as a connection actor's).
    pub fn spawn<F>(name: &str, body: F) -> io::Result<Self>
    where
        F: FnOnce(EventLoop<E>) + Send + 'static,
    {
        let lp = EventLoop::new(name);
        let handle = lp.handle();
        let join = thread::Builder::new().name(name.to_string()).spawn(move || body(lp))?;
        Ok(Self { handle, join: Some(join) })
    }

    /// Spawn a loop thread that registers `receiver` and runs to shutdown.
    pub fn spawn_with_receiver<R>(name: &str, receiver: R) -> io::Result<(Self, ReceiverId)>
    where
        R: EventReceiver<E> + 'static,
    {
        let mut lp = EventLoop::new(name);
        let id = lp.add_receiver(Box::new(receiver));
        let handle = lp.handle();
        let join = thread::Builder::new().name(name.to_string()).spawn(move || lp.run())?;
        Ok((Self { handle, join: Some(join) }, id))
    }

    #[must_use]
    pub fn handle(&self) -> LoopHandle<E> {
        self.handle.clone()
    }

    /// Shut the loop down and join the thread.
    pub fn stop(&mut self) {
        self.handle.shutdown();
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl<E: Envelope> Drop for EventLoopThread<E> {
    fn drop(&mut self) {
        self.stop();
    }
}
