//! Closure-based subscriber.

use crate::error::FlowError;
use crate::protocol::{Subscriber, Subscription};
use crate::types::UNBOUNDED;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

type NextFn<T> = Box<dyn Fn(T) + Send + Sync + 'static>;
type ErrorFn = Box<dyn Fn(FlowError) + Send + Sync + 'static>;
type CompleteFn = Box<dyn Fn() + Send + Sync + 'static>;

/// Subscriber built from closures. Requests everything on subscribe.
/// Without an error handler, a terminal error is logged.
///
/// # Example
///
/// ```ignore
/// let subscriber = LambdaSubscriber::new(|n: u64| println!("{}", n))
///     .on_error(|e| eprintln!("failed: {}", e))
///     .on_complete(|| println!("done"));
/// let handle = flux.subscribe_with(subscriber);
/// // later
/// handle.dispose();
/// ```
pub struct LambdaSubscriber<T> {
    next: NextFn<T>,
    error: Option<ErrorFn>,
    complete: Option<CompleteFn>,
    subscription: Mutex<Option<Arc<dyn Subscription>>>,
    done: AtomicBool,
}

impl<T: Send + 'static> LambdaSubscriber<T> {
    pub fn new(on_next: impl Fn(T) + Send + Sync + 'static) -> Self {
        Self {
            next: Box::new(on_next),
            error: None,
            complete: None,
            subscription: Mutex::new(None),
            done: AtomicBool::new(false),
        }
    }

    pub fn on_error(mut self, on_error: impl Fn(FlowError) + Send + Sync + 'static) -> Self {
        self.error = Some(Box::new(on_error));
        self
    }

    pub fn on_complete(mut self, on_complete: impl Fn() + Send + Sync + 'static) -> Self {
        self.complete = Some(Box::new(on_complete));
        self
    }

    /// Cancel the subscription. No further callbacks run.
    pub fn dispose(&self) {
        self.done.store(true, Ordering::Release);
        let subscription = self.subscription.lock().take();
        if let Some(subscription) = subscription {
            subscription.cancel();
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }
}

impl<T: Send + 'static> Subscriber<T> for LambdaSubscriber<T> {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        {
            let mut slot = self.subscription.lock();
            if slot.is_some() || self.is_disposed() {
                drop(slot);
                subscription.cancel();
                return;
            }
            *slot = Some(Arc::clone(&subscription));
        }
        if let Err(e) = subscription.request(UNBOUNDED) {
            debug!(error = %e, "lambda subscriber: request failed");
        }
    }

    fn on_next(&self, item: T) {
        if !self.is_disposed() {
            (self.next)(item);
        }
    }

    fn on_error(&self, error: FlowError) {
        if self.done.swap(true, Ordering::AcqRel) {
            return;
        }
        self.subscription.lock().take();
        match &self.error {
            Some(handler) => handler(error),
            None => warn!(error = %error, "unhandled stream error"),
        }
    }

    fn on_complete(&self) {
        if self.done.swap(true, Ordering::AcqRel) {
            return;
        }
        self.subscription.lock().take();
        if let Some(handler) = &self.complete {
            handler();
        }
    }
}
