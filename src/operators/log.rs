//! Signal tracing stage.

use crate::error::{FlowError, Result};
use crate::flux::Flux;
use crate::protocol::{Publisher, Subscriber, Subscription};
use std::fmt::Debug;
use std::sync::Arc;
use tracing::debug;

/// Passes every signal through unchanged, recording it at debug level under
/// the given category. Requests and cancellation from downstream are
/// recorded too.
pub struct LogPublisher<T> {
    source: Flux<T>,
    category: Arc<str>,
}

impl<T: Debug + Send + 'static> LogPublisher<T> {
    pub fn new(source: Flux<T>, category: impl Into<Arc<str>>) -> Self {
        Self {
            source,
            category: category.into(),
        }
    }
}

impl<T: Debug + Send + 'static> Publisher<T> for LogPublisher<T> {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
        self.source.subscribe(Arc::new(LogSubscriber {
            downstream: subscriber,
            category: Arc::clone(&self.category),
        }));
    }
}

struct LogSubscriber<T> {
    downstream: Arc<dyn Subscriber<T>>,
    category: Arc<str>,
}

impl<T: Debug + Send + 'static> Subscriber<T> for LogSubscriber<T> {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        debug!(category = %self.category, "onSubscribe");
        self.downstream.on_subscribe(Arc::new(LoggedSubscription {
            inner: subscription,
            category: Arc::clone(&self.category),
        }));
    }

    fn on_next(&self, item: T) {
        debug!(category = %self.category, item = ?item, "onNext");
        self.downstream.on_next(item);
    }

    fn on_error(&self, error: FlowError) {
        debug!(category = %self.category, error = %error, "onError");
        self.downstream.on_error(error);
    }

    fn on_complete(&self) {
        debug!(category = %self.category, "onComplete");
        self.downstream.on_complete();
    }
}

struct LoggedSubscription {
    inner: Arc<dyn Subscription>,
    category: Arc<str>,
}

impl Subscription for LoggedSubscription {
    fn request(&self, n: u64) -> Result<()> {
        debug!(category = %self.category, n, "request");
        self.inner.request(n)
    }

    fn cancel(&self) {
        debug!(category = %self.category, "cancel");
        self.inner.cancel();
    }
}
