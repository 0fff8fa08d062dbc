// Copyright 2018 Parity Technologies (UK) Ltd.
//
// Permission is hereby granted, free of charge, to any person obtaining a
// copy of this software and associated documentation files (the "Software"),
// to deal in the Software without restriction, including without limitation
// the rights to use, copy, modify, merge, publish, distribute, sublicense,
// and/or sell copies of the Software, and to permit persons to whom the
// Software is furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS
// OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
// FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
// DEALINGS IN THE SOFTWARE.

//! Cooperative timer and defer service.
//!
//! The [`Scheduler`] provides two facilities to the rest of the stack:
//!
//! - [`Scheduler::defer`] runs a callback on the next turn, strictly FIFO
//!   within a turn.
//! - [`Scheduler::schedule`] (and [`Scheduler::schedule_with_handle`]) runs a
//!   callback once after a delay. The returned [`Handle`] can cancel the
//!   callback or reschedule it, including from inside the callback itself,
//!   which re-arms the same callback for another round.
//!
//! A single [`Scheduler::pulse`] fires all due timers in non-decreasing time
//! order (ties broken by insertion order) and then drains the deferred
//! callbacks that were enqueued before the turn started. Time comes from a
//! [`Clock`]; production code uses the monotonic clock while tests drive a
//! [`ManualClock`] by hand for full determinism.

use futures::task::{Context, Poll, Waker};
use futures_timer::Delay;
use parking_lot::Mutex;
use std::{
    cmp::Reverse,
    collections::{BinaryHeap, HashMap, VecDeque},
    future::Future,
    pin::Pin,
    sync::atomic::{AtomicU64, Ordering},
    sync::{Arc, Weak},
    time::{Duration, Instant},
};

/// Source of the scheduler's notion of time, as an offset from an arbitrary
/// epoch fixed at clock creation.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Duration;
}

/// The default clock, backed by [`std::time::Instant`].
pub struct MonotonicClock(Instant);

impl MonotonicClock {
    pub fn new() -> Self {
        MonotonicClock(Instant::now())
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        MonotonicClock::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Duration {
        self.0.elapsed()
    }
}

/// A clock that only moves when told to. For tests.
pub struct ManualClock(AtomicU64);

impl ManualClock {
    pub fn new() -> Arc<Self> {
        Arc::new(ManualClock(AtomicU64::new(0)))
    }

    /// Moves the clock forward by `step`.
    pub fn advance(&self, step: Duration) {
        self.0.fetch_add(step.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_millis(self.0.load(Ordering::SeqCst))
    }
}

/// Error returned by [`Handle::reschedule`].
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// The scheduler itself no longer exists.
    #[error("the scheduler has been dropped")]
    Gone,
    /// The callback already fired or was cancelled.
    #[error("the scheduled callback is no longer active")]
    Expired,
}

type DeferCallback = Box<dyn FnOnce() + Send>;
type TimerCallback = Box<dyn FnMut() + Send>;

/// Heap key ordering timers by (deadline, insertion sequence).
#[derive(PartialEq, Eq, PartialOrd, Ord)]
struct TimerKey {
    at: Duration,
    seq: u64,
    id: u64,
    generation: u64,
}

struct Slot {
    callback: Option<TimerCallback>,
    generation: u64,
    firing: bool,
    rearm_at: Option<Duration>,
    dead: bool,
}

struct Inner {
    clock: Arc<dyn Clock>,
    timers: BinaryHeap<Reverse<TimerKey>>,
    slots: HashMap<u64, Slot>,
    deferred: VecDeque<DeferCallback>,
    next_id: u64,
    next_seq: u64,
    dirty: bool,
    waker: Option<Waker>,
}

impl Inner {
    fn notify(&mut self) {
        self.dirty = true;
        if let Some(waker) = self.waker.take() {
            waker.wake();
        }
    }
}

/// The timer and defer service. Cloning yields another handle to the same
/// scheduler.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Mutex<Inner>>,
}

impl Scheduler {
    /// Creates a scheduler running on the monotonic clock.
    pub fn new() -> Self {
        Scheduler::with_clock(Arc::new(MonotonicClock::new()))
    }

    /// Creates a scheduler on an explicit clock, e.g. a [`ManualClock`].
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Scheduler {
            inner: Arc::new(Mutex::new(Inner {
                clock,
                timers: BinaryHeap::new(),
                slots: HashMap::new(),
                deferred: VecDeque::new(),
                next_id: 0,
                next_seq: 0,
                dirty: false,
                waker: None,
            })),
        }
    }

    /// The current reading of the scheduler's clock.
    pub fn now(&self) -> Duration {
        self.inner.lock().clock.now()
    }

    /// Enqueues `callback` to run on the next turn, after all due timers.
    pub fn defer(&self, callback: impl FnOnce() + Send + 'static) {
        let mut inner = self.inner.lock();
        inner.deferred.push_back(Box::new(callback));
        inner.notify();
    }

    /// Schedules `callback` to run once after `delay`, detached from any
    /// handle: it cannot be cancelled.
    pub fn schedule(&self, delay: Duration, callback: impl FnMut() + Send + 'static) {
        self.insert(delay, Box::new(callback));
    }

    /// Like [`Scheduler::schedule`], but returns a [`Handle`] for
    /// cancellation and rescheduling. Dropping the handle cancels the
    /// callback.
    pub fn schedule_with_handle(
        &self,
        delay: Duration,
        callback: impl FnMut() + Send + 'static,
    ) -> Handle {
        let id = self.insert(delay, Box::new(callback));
        Handle {
            id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    fn insert(&self, delay: Duration, callback: TimerCallback) -> u64 {
        let mut inner = self.inner.lock();
        let at = inner.clock.now() + delay;
        let id = inner.next_id;
        inner.next_id += 1;
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.slots.insert(
            id,
            Slot {
                callback: Some(callback),
                generation: 0,
                firing: false,
                rearm_at: None,
                dead: false,
            },
        );
        inner.timers.push(Reverse(TimerKey {
            at,
            seq,
            id,
            generation: 0,
        }));
        inner.notify();
        id
    }

    /// Fires every timer whose deadline has passed, in deadline order, then
    /// drains the deferred callbacks enqueued before this turn.
    ///
    /// Callbacks run without the scheduler lock held, so they are free to
    /// schedule, defer, cancel and reschedule.
    pub fn pulse(&self) {
        loop {
            let key = {
                let mut inner = self.inner.lock();
                let now = inner.clock.now();
                let due = match inner.timers.peek() {
                    Some(Reverse(key)) => key.at <= now,
                    None => false,
                };
                if !due {
                    break;
                }
                inner.timers.pop().expect("peeked").0
            };

            let callback = {
                let mut inner = self.inner.lock();
                let (taken, purge) = match inner.slots.get_mut(&key.id) {
                    Some(slot) if slot.generation == key.generation && !slot.dead => {
                        slot.firing = true;
                        (slot.callback.take(), false)
                    }
                    Some(slot) if slot.generation == key.generation => (None, true),
                    // A rescheduled timer left this key behind; skip it.
                    _ => (None, false),
                };
                if purge {
                    inner.slots.remove(&key.id);
                }
                taken
            };

            let mut callback = match callback {
                Some(cb) => cb,
                None => continue,
            };
            callback();

            let mut inner = self.inner.lock();
            let rearm = match inner.slots.get_mut(&key.id) {
                Some(slot) => {
                    slot.firing = false;
                    if slot.dead {
                        None
                    } else {
                        slot.rearm_at.take().map(|at| {
                            slot.callback = Some(callback);
                            slot.generation += 1;
                            (at, slot.generation)
                        })
                    }
                }
                None => None,
            };
            match rearm {
                Some((at, generation)) => {
                    let seq = inner.next_seq;
                    inner.next_seq += 1;
                    inner.timers.push(Reverse(TimerKey {
                        at,
                        seq,
                        id: key.id,
                        generation,
                    }));
                }
                None => {
                    inner.slots.remove(&key.id);
                }
            }
        }

        let batch = std::mem::take(&mut self.inner.lock().deferred);
        for callback in batch {
            callback();
        }
    }

    /// Drives the scheduler forever: sleeps until the next deadline or until
    /// new work arrives, then pulses. Meant to be raced against the owner's
    /// main loop.
    pub async fn run(self) {
        loop {
            self.pulse();
            let wait = {
                let inner = self.inner.lock();
                if !inner.deferred.is_empty() {
                    Some(Duration::from_millis(0))
                } else {
                    let now = inner.clock.now();
                    inner
                        .timers
                        .peek()
                        .map(|Reverse(key)| key.at.checked_sub(now).unwrap_or_default())
                }
            };
            match wait {
                Some(delay) if delay == Duration::from_millis(0) => continue,
                Some(delay) => {
                    futures::future::select(Delay::new(delay), Notified(&self.inner)).await;
                }
                None => Notified(&self.inner).await,
            }
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Scheduler::new()
    }
}

/// Resolves once new work has been submitted to the scheduler.
struct Notified<'a>(&'a Arc<Mutex<Inner>>);

impl Future for Notified<'_> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let mut inner = self.0.lock();
        if inner.dirty {
            inner.dirty = false;
            Poll::Ready(())
        } else {
            inner.waker = Some(cx.waker().clone());
            Poll::Pending
        }
    }
}

/// Scoped control over one scheduled callback.
///
/// Dropping the handle cancels the callback, mirroring the scoped-lifetime
/// contract of the detachable timers this service replaces. Cancellation is
/// idempotent and cheap: the slot is marked dead and skipped at fire time.
pub struct Handle {
    id: u64,
    inner: Weak<Mutex<Inner>>,
}

impl Handle {
    /// Cancels the callback. Safe to call more than once, and from inside
    /// the callback itself.
    pub fn cancel(&self) {
        if let Some(inner) = self.inner.upgrade() {
            let mut inner = inner.lock();
            let remove = match inner.slots.get_mut(&self.id) {
                Some(slot) if slot.firing => {
                    slot.dead = true;
                    slot.rearm_at = None;
                    false
                }
                Some(_) => true,
                None => false,
            };
            if remove {
                inner.slots.remove(&self.id);
            }
        }
    }

    /// Moves the callback's deadline to `delay` from now.
    ///
    /// May be invoked from within the firing callback, in which case the
    /// same callback is re-armed once the current dispatch finishes.
    pub fn reschedule(&self, delay: Duration) -> Result<(), SchedulerError> {
        let inner = self.inner.upgrade().ok_or(SchedulerError::Gone)?;
        let mut inner = inner.lock();
        let at = inner.clock.now() + delay;
        let (push, generation) = {
            let slot = inner.slots.get_mut(&self.id).ok_or(SchedulerError::Expired)?;
            if slot.dead {
                return Err(SchedulerError::Expired);
            }
            if slot.firing {
                slot.rearm_at = Some(at);
                (false, 0)
            } else {
                slot.generation += 1;
                (true, slot.generation)
            }
        };
        if push {
            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.timers.push(Reverse(TimerKey {
                at,
                seq,
                id: self.id,
                generation,
            }));
        }
        inner.notify();
        Ok(())
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        self.cancel();
    }
}
