//! Cold, demand-driven sources built from iterators.

use crate::error::{FlowError, Result};
use crate::protocol::{
    validate_demand, DemandCounter, DrainGate, Publisher, Subscriber, Subscription,
};
use parking_lot::Mutex;
use std::iter::Peekable;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Iterator of items or source failures.
pub type SourceIter<T> = Box<dyn Iterator<Item = Result<T>> + Send + 'static>;

type Factory<T> = Box<dyn Fn() -> SourceIter<T> + Send + Sync + 'static>;

/// Publisher that builds a fresh iterator per subscriber and pulls from it
/// only as fast as demand allows. An `Err` element ends the sequence with
/// that error; an exhausted iterator completes it.
pub struct IterPublisher<T> {
    factory: Factory<T>,
}

impl<T: Send + 'static> IterPublisher<T> {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> SourceIter<T> + Send + Sync + 'static,
    {
        Self {
            factory: Box::new(factory),
        }
    }
}

impl<T: Send + 'static> Publisher<T> for IterPublisher<T> {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
        let subscription = Arc::new(IterSubscription {
            downstream: Arc::clone(&subscriber),
            iter: Mutex::new((self.factory)().peekable()),
            demand: DemandCounter::new(),
            gate: DrainGate::new(),
            cancelled: AtomicBool::new(false),
            done: AtomicBool::new(false),
        });
        subscriber.on_subscribe(subscription.clone());
        // Empty and failing sources terminate without waiting for demand.
        subscription.drain();
    }
}

struct IterSubscription<T> {
    downstream: Arc<dyn Subscriber<T>>,
    iter: Mutex<Peekable<SourceIter<T>>>,
    demand: DemandCounter,
    gate: DrainGate,
    cancelled: AtomicBool,
    done: AtomicBool,
}

enum Step<T> {
    Emit(T),
    Fail(FlowError),
    Finish,
    Wait,
}

impl<T: Send + 'static> IterSubscription<T> {
    fn drain(&self) {
        self.gate.drain(|| self.emit_available());
    }

    fn emit_available(&self) {
        loop {
            if self.cancelled.load(Ordering::Acquire) || self.done.load(Ordering::Acquire) {
                return;
            }

            let step = {
                let mut iter = self.iter.lock();
                match iter.peek() {
                    None => Step::Finish,
                    Some(Err(_)) => match iter.next() {
                        Some(Err(e)) => Step::Fail(e),
                        _ => Step::Finish,
                    },
                    Some(Ok(_)) => {
                        if self.demand.try_consume() {
                            match iter.next() {
                                Some(Ok(item)) => Step::Emit(item),
                                Some(Err(e)) => Step::Fail(e),
                                None => Step::Finish,
                            }
                        } else {
                            Step::Wait
                        }
                    }
                }
            };

            match step {
                Step::Emit(item) => self.downstream.on_next(item),
                Step::Fail(error) => {
                    if !self.done.swap(true, Ordering::AcqRel) {
                        self.downstream.on_error(error);
                    }
                    return;
                }
                Step::Finish => {
                    if !self.done.swap(true, Ordering::AcqRel) {
                        self.downstream.on_complete();
                    }
                    return;
                }
                Step::Wait => return,
            }
        }
    }
}

impl<T: Send + 'static> Subscription for IterSubscription<T> {
    fn request(&self, n: u64) -> Result<()> {
        validate_demand(n)?;
        if self.cancelled.load(Ordering::Acquire) || self.done.load(Ordering::Acquire) {
            return Ok(());
        }
        self.demand.add(n);
        self.drain();
        Ok(())
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }
}
