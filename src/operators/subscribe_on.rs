//! Moves subscription and demand onto a scheduler.

use crate::error::{FlowError, Result};
use crate::flux::Flux;
use crate::protocol::{
    validate_demand, NoopSubscription, Publisher, Subscriber, Subscription,
};
use crate::scheduler::Scheduler;
use std::sync::Arc;
use tracing::debug;

/// Subscribes to the source from a scheduler task, and runs every `request`
/// there too, so a synchronous source produces on the scheduler's threads
/// instead of the caller's. `cancel` is forwarded directly.
pub struct SubscribeOnPublisher<T> {
    source: Flux<T>,
    scheduler: Arc<dyn Scheduler>,
}

impl<T: Send + 'static> SubscribeOnPublisher<T> {
    pub fn new(source: Flux<T>, scheduler: Arc<dyn Scheduler>) -> Self {
        Self { source, scheduler }
    }
}

impl<T: Send + 'static> Publisher<T> for SubscribeOnPublisher<T> {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
        let source = self.source.clone();
        let relay = Arc::new(SubscribeOnSubscriber {
            downstream: Arc::clone(&subscriber),
            scheduler: Arc::clone(&self.scheduler),
        });
        let handle = self
            .scheduler
            .schedule(Box::new(move || source.subscribe(relay)));
        if handle.is_cancelled() {
            subscriber.on_subscribe(Arc::new(NoopSubscription));
            subscriber.on_error(FlowError::SchedulerShutdown);
        }
    }
}

struct SubscribeOnSubscriber<T> {
    downstream: Arc<dyn Subscriber<T>>,
    scheduler: Arc<dyn Scheduler>,
}

impl<T: Send + 'static> Subscriber<T> for SubscribeOnSubscriber<T> {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        self.downstream.on_subscribe(Arc::new(ScheduledSubscription {
            inner: subscription,
            scheduler: Arc::clone(&self.scheduler),
        }));
    }

    fn on_next(&self, item: T) {
        self.downstream.on_next(item);
    }

    fn on_error(&self, error: FlowError) {
        self.downstream.on_error(error);
    }

    fn on_complete(&self) {
        self.downstream.on_complete();
    }
}

struct ScheduledSubscription {
    inner: Arc<dyn Subscription>,
    scheduler: Arc<dyn Scheduler>,
}

impl Subscription for ScheduledSubscription {
    fn request(&self, n: u64) -> Result<()> {
        validate_demand(n)?;
        let inner = Arc::clone(&self.inner);
        let handle = self.scheduler.schedule(Box::new(move || {
            if let Err(e) = inner.request(n) {
                debug!(error = %e, "subscribe_on: scheduled request failed");
            }
        }));
        if handle.is_cancelled() {
            return Err(FlowError::SchedulerShutdown);
        }
        Ok(())
    }

    fn cancel(&self) {
        self.inner.cancel();
    }
}
