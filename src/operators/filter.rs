//! Predicate filter stage.

use crate::error::FlowError;
use crate::flux::Flux;
use crate::protocol::{Publisher, Subscriber, Subscription, Upstream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Forwards items matching the predicate. Each dropped item is replaced by
/// requesting one more from upstream, so a selective predicate never stalls
/// a subscriber that asked for fewer items than it will eventually get.
pub struct FilterPublisher<T, P> {
    source: Flux<T>,
    predicate: Arc<P>,
}

impl<T, P> FilterPublisher<T, P>
where
    T: Send + 'static,
    P: Fn(&T) -> bool + Send + Sync + 'static,
{
    pub fn new(source: Flux<T>, predicate: P) -> Self {
        Self {
            source,
            predicate: Arc::new(predicate),
        }
    }
}

impl<T, P> Publisher<T> for FilterPublisher<T, P>
where
    T: Send + 'static,
    P: Fn(&T) -> bool + Send + Sync + 'static,
{
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
        self.source.subscribe(Arc::new(FilterSubscriber {
            downstream: subscriber,
            predicate: Arc::clone(&self.predicate),
            upstream: Arc::new(Upstream::new()),
            dropped: AtomicU64::new(0),
            done: AtomicBool::new(false),
        }));
    }
}

struct FilterSubscriber<T, P> {
    downstream: Arc<dyn Subscriber<T>>,
    predicate: Arc<P>,
    upstream: Arc<Upstream>,
    /// Items rejected by the predicate so far.
    dropped: AtomicU64,
    done: AtomicBool,
}

impl<T, P> Subscriber<T> for FilterSubscriber<T, P>
where
    T: Send + 'static,
    P: Fn(&T) -> bool + Send + Sync + 'static,
{
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        if self.upstream.set(subscription).is_err() {
            return;
        }
        self.downstream.on_subscribe(self.upstream.clone());
    }

    fn on_next(&self, item: T) {
        if self.done.load(Ordering::Acquire) {
            warn!(stage = "filter", "on_next after terminal signal, item dropped");
            return;
        }
        if (self.predicate)(&item) {
            self.downstream.on_next(item);
            return;
        }
        let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        trace!(dropped, "filter dropped item, requesting replacement");
        if let Err(e) = self.upstream.request(1) {
            debug!(error = %e, "filter: replacement request failed");
        }
    }

    fn on_error(&self, error: FlowError) {
        if !self.done.swap(true, Ordering::AcqRel) {
            self.downstream.on_error(error);
        }
    }

    fn on_complete(&self) {
        if !self.done.swap(true, Ordering::AcqRel) {
            debug!(dropped = self.dropped.load(Ordering::Relaxed), "filter completed");
            self.downstream.on_complete();
        }
    }
}
