//! 1:1 transformation stage.

use crate::error::{BoxError, FlowError};
use crate::flux::Flux;
use crate::policy::{Decision, ErrorPolicy};
use crate::protocol::{Publisher, Subscriber, Subscription, Upstream};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Applies a fallible function to every item. Demand passes through
/// unchanged; failures go through the stage's error policy.
pub struct MapPublisher<T, U, F> {
    source: Flux<T>,
    mapper: Arc<F>,
    policy: ErrorPolicy,
    _marker: PhantomData<fn(T) -> U>,
}

impl<T, U, F> MapPublisher<T, U, F>
where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(T) -> Result<U, BoxError> + Send + Sync + 'static,
{
    pub fn new(source: Flux<T>, mapper: F, policy: ErrorPolicy) -> Self {
        Self {
            source,
            mapper: Arc::new(mapper),
            policy,
            _marker: PhantomData,
        }
    }
}

impl<T, U, F> Publisher<U> for MapPublisher<T, U, F>
where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(T) -> Result<U, BoxError> + Send + Sync + 'static,
{
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<U>>) {
        self.source.subscribe(Arc::new(MapSubscriber {
            downstream: subscriber,
            mapper: Arc::clone(&self.mapper),
            policy: self.policy.clone(),
            upstream: Arc::new(Upstream::new()),
            done: AtomicBool::new(false),
            _marker: PhantomData,
        }));
    }
}

struct MapSubscriber<T, U, F> {
    downstream: Arc<dyn Subscriber<U>>,
    mapper: Arc<F>,
    policy: ErrorPolicy,
    upstream: Arc<Upstream>,
    done: AtomicBool,
    _marker: PhantomData<fn(T)>,
}

impl<T, U, F> MapSubscriber<T, U, F> {
    fn terminate(&self, signal: impl FnOnce(&dyn Subscriber<U>)) {
        if !self.done.swap(true, Ordering::AcqRel) {
            signal(self.downstream.as_ref());
        }
    }
}

impl<T, U, F> Subscriber<T> for MapSubscriber<T, U, F>
where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(T) -> Result<U, BoxError> + Send + Sync + 'static,
{
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        if self.upstream.set(subscription).is_err() {
            return;
        }
        self.downstream.on_subscribe(self.upstream.clone());
    }

    fn on_next(&self, item: T) {
        if self.done.load(Ordering::Acquire) {
            warn!(stage = "map", "on_next after terminal signal, item dropped");
            return;
        }
        match (self.mapper)(item) {
            Ok(mapped) => self.downstream.on_next(mapped),
            Err(e) => {
                let error = FlowError::from_boxed(e);
                match self.policy.decide("map", &error) {
                    Decision::Skip => {
                        // The skipped element used one unit of downstream
                        // demand; ask upstream for a replacement.
                        if let Err(e) = self.upstream.request(1) {
                            debug!(error = %e, "map: replacement request failed");
                        }
                    }
                    Decision::Propagate => {
                        self.upstream.cancel();
                        self.terminate(|d| d.on_error(error));
                    }
                }
            }
        }
    }

    fn on_error(&self, error: FlowError) {
        self.terminate(|d| d.on_error(error));
    }

    fn on_complete(&self) {
        self.terminate(|d| d.on_complete());
    }
}
