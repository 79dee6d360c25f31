//! Per-item delay stage.

use crate::error::{FlowError, Result};
use crate::flux::Flux;
use crate::protocol::{Emitter, Publisher, Subscriber, Subscription, Upstream};
use crate::scheduler::{CancelHandle, Scheduler};
use crate::types::Signal;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// Delivers each item `delay` after it was received. Since every item waits
/// the same amount, a timer firing always releases the oldest pending item
/// and arrival order is kept. Completion waits for pending items; an error
/// is delivered at once and discards them.
pub struct DelayPublisher<T> {
    source: Flux<T>,
    delay: Duration,
    scheduler: Arc<dyn Scheduler>,
}

impl<T: Send + 'static> DelayPublisher<T> {
    pub fn new(source: Flux<T>, delay: Duration, scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            source,
            delay,
            scheduler,
        }
    }
}

impl<T: Send + 'static> Publisher<T> for DelayPublisher<T> {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
        let core = Arc::new(DelayCore {
            emitter: Emitter::new(subscriber),
            upstream: Arc::new(Upstream::new()),
            scheduler: Arc::clone(&self.scheduler),
            delay: self.delay,
            state: Mutex::new(DelayState {
                pending: VecDeque::new(),
                timers: VecDeque::new(),
                upstream_done: false,
                stopped: false,
            }),
        });
        self.source.subscribe(Arc::new(DelaySubscriber { core }));
    }
}

struct DelayState<T> {
    /// Received items not yet released, oldest first.
    pending: VecDeque<T>,
    /// Timers for pending items.
    timers: VecDeque<CancelHandle>,
    upstream_done: bool,
    /// Cancelled or failed; nothing more is released.
    stopped: bool,
}

struct DelayCore<T> {
    emitter: Emitter<T>,
    upstream: Arc<Upstream>,
    scheduler: Arc<dyn Scheduler>,
    delay: Duration,
    state: Mutex<DelayState<T>>,
}

impl<T: Send + 'static> DelayCore<T> {
    fn release_one(&self) {
        {
            let mut st = self.state.lock();
            if st.stopped {
                return;
            }
            st.timers.pop_front();
            if let Some(item) = st.pending.pop_front() {
                self.emitter.push(Signal::Item(item));
            }
            if st.upstream_done && st.pending.is_empty() {
                self.emitter.push(Signal::Complete);
            }
        }
        self.emitter.drain();
    }

    /// Stop releasing and cancel every pending timer.
    fn stop(&self) {
        let timers = {
            let mut st = self.state.lock();
            st.stopped = true;
            st.pending.clear();
            std::mem::take(&mut st.timers)
        };
        for timer in timers {
            timer.cancel();
        }
    }
}

impl<T: Send + 'static> Subscription for DelayCore<T> {
    fn request(&self, n: u64) -> Result<()> {
        self.upstream.request(n)
    }

    fn cancel(&self) {
        self.upstream.cancel();
        self.stop();
    }
}

struct DelaySubscriber<T> {
    core: Arc<DelayCore<T>>,
}

impl<T: Send + 'static> Subscriber<T> for DelaySubscriber<T> {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        if self.core.upstream.set(subscription).is_err() {
            return;
        }
        self.core.emitter.downstream().on_subscribe(self.core.clone());
    }

    fn on_next(&self, item: T) {
        {
            let mut st = self.core.state.lock();
            if st.stopped || st.upstream_done {
                return;
            }
            st.pending.push_back(item);
        }
        let core = Arc::clone(&self.core);
        let timer = self
            .core
            .scheduler
            .schedule_after(self.core.delay, Box::new(move || core.release_one()));
        if timer.is_cancelled() {
            self.core.upstream.cancel();
            self.core.stop();
            self.core.emitter.emit(Signal::Error(FlowError::SchedulerShutdown));
            return;
        }
        self.core.state.lock().timers.push_back(timer);
    }

    fn on_error(&self, error: FlowError) {
        self.core.stop();
        self.core.emitter.emit(Signal::Error(error));
    }

    fn on_complete(&self) {
        {
            let mut st = self.core.state.lock();
            if st.stopped || st.upstream_done {
                return;
            }
            st.upstream_done = true;
            if st.pending.is_empty() {
                self.core.emitter.push(Signal::Complete);
            }
        }
        self.core.emitter.drain();
    }
}
