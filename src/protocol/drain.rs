//! Serialized signal delivery.
//!
//! `DrainGate` is a work-in-progress counter: whichever thread enters first
//! becomes the drainer and keeps running the work until no other thread
//! asked for a drain in the meantime. Re-entrant calls (a subscriber calling
//! `request` from inside `on_next`) just bump the counter, so delivery never
//! recurses.

use super::{Subscriber, Subscription};
use crate::types::Signal;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
pub(crate) struct DrainGate {
    wip: AtomicUsize,
}

impl DrainGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// A gate that starts out taken. Drains requested meanwhile are only
    /// counted until the owner calls `resume`.
    pub fn held() -> Self {
        Self {
            wip: AtomicUsize::new(1),
        }
    }

    /// Run `work` until no drain request is missed. Returns immediately if
    /// another caller is already draining.
    pub fn drain(&self, work: impl FnMut()) {
        if self.wip.fetch_add(1, Ordering::AcqRel) != 0 {
            return;
        }
        self.run(work);
    }

    /// Release a `held` gate, running the drains it postponed.
    pub fn resume(&self, work: impl FnMut()) {
        self.run(work);
    }

    fn run(&self, mut work: impl FnMut()) {
        let mut missed = 1;
        loop {
            work();
            let prev = self.wip.fetch_sub(missed, Ordering::AcqRel);
            missed = prev - missed;
            if missed == 0 {
                break;
            }
        }
    }
}

/// Queue in front of one subscriber. Any thread may push; delivery happens
/// on one thread at a time, in push order, and stops after the first
/// terminal signal.
pub(crate) struct Emitter<T> {
    downstream: Arc<dyn Subscriber<T>>,
    queue: Mutex<VecDeque<Signal<T>>>,
    gate: DrainGate,
    terminated: AtomicBool,
}

impl<T: Send + 'static> Emitter<T> {
    pub fn new(downstream: Arc<dyn Subscriber<T>>) -> Self {
        Self {
            downstream,
            queue: Mutex::new(VecDeque::new()),
            gate: DrainGate::new(),
            terminated: AtomicBool::new(false),
        }
    }

    /// An emitter that queues everything until `start` has handed the
    /// subscriber its subscription.
    pub fn held(downstream: Arc<dyn Subscriber<T>>) -> Self {
        Self {
            gate: DrainGate::held(),
            ..Self::new(downstream)
        }
    }

    /// Deliver `on_subscribe` to a `held` emitter, then whatever was queued
    /// while it ran.
    pub fn start(&self, subscription: Arc<dyn Subscription>) {
        self.downstream.on_subscribe(subscription);
        self.gate.resume(|| self.deliver_queued());
    }

    pub fn downstream(&self) -> &Arc<dyn Subscriber<T>> {
        &self.downstream
    }

    /// Enqueue without delivering. Callers holding their own lock push
    /// under it to fix the order, then call `drain` after releasing it.
    pub fn push(&self, signal: Signal<T>) {
        if self.terminated.load(Ordering::Acquire) {
            return;
        }
        self.queue.lock().push_back(signal);
    }

    pub fn drain(&self) {
        self.gate.drain(|| self.deliver_queued());
    }

    pub fn emit(&self, signal: Signal<T>) {
        self.push(signal);
        self.drain();
    }

    #[cfg(test)]
    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    fn deliver_queued(&self) {
        loop {
            let next = self.queue.lock().pop_front();
            let Some(signal) = next else { break };

            if self.terminated.load(Ordering::Acquire) {
                self.queue.lock().clear();
                break;
            }

            match signal {
                Signal::Item(item) => self.downstream.on_next(item),
                Signal::Complete => {
                    self.terminated.store(true, Ordering::Release);
                    self.queue.lock().clear();
                    self.downstream.on_complete();
                }
                Signal::Error(e) => {
                    self.terminated.store(true, Ordering::Release);
                    self.queue.lock().clear();
                    self.downstream.on_error(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FlowError;
    use crate::protocol::Subscription;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    impl Subscriber<u32> for Recorder {
        fn on_subscribe(&self, _subscription: Arc<dyn Subscription>) {
            self.seen.lock().push("subscribed".to_string());
        }

        fn on_next(&self, item: u32) {
            self.seen.lock().push(item.to_string());
        }

        fn on_error(&self, error: FlowError) {
            self.seen.lock().push(format!("error: {}", error));
        }

        fn on_complete(&self) {
            self.seen.lock().push("complete".to_string());
        }
    }

    #[test]
    fn test_drain_reentrant_runs_again() {
        let gate = DrainGate::new();
        let runs = AtomicUsize::new(0);

        gate.drain(|| {
            let n = runs.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                // Nested drain while the outer one is running.
                gate.drain(|| panic!("nested drain must not run inline"));
            }
        });

        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_emitter_stops_after_terminal() {
        let recorder = Arc::new(Recorder::default());
        let emitter = Emitter::new(recorder.clone() as Arc<dyn Subscriber<u32>>);

        emitter.emit(Signal::Item(1));
        emitter.push(Signal::Complete);
        emitter.push(Signal::Item(2));
        emitter.drain();
        emitter.emit(Signal::Error(FlowError::message("late")));

        assert!(emitter.is_terminated());
        assert_eq!(*recorder.seen.lock(), vec!["1", "complete"]);
    }

    #[test]
    fn test_held_emitter_waits_for_start() {
        let recorder = Arc::new(Recorder::default());
        let emitter = Emitter::held(recorder.clone() as Arc<dyn Subscriber<u32>>);

        emitter.emit(Signal::Item(7));
        emitter.emit(Signal::Complete);
        assert!(recorder.seen.lock().is_empty());

        emitter.start(Arc::new(crate::protocol::NoopSubscription));
        assert_eq!(*recorder.seen.lock(), vec!["subscribed", "7", "complete"]);
    }
}
