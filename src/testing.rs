//! Recording subscriber for tests.
//!
//! `TestSubscriber` keeps every signal it receives together with the demand
//! it granted, and flags protocol breaches (items beyond demand, signals
//! after a terminal, a second `on_subscribe`) instead of panicking, so a
//! test can assert on them afterwards.
//!
//! # Example
//!
//! ```ignore
//! let subscriber = TestSubscriber::<u64>::new(2);
//! Flux::range(0, 10).subscribe(subscriber.clone());
//! assert_eq!(subscriber.items(), vec![0, 1]);
//!
//! subscriber.request(8)?;
//! assert!(subscriber.await_terminal(Duration::from_secs(1)));
//! assert!(subscriber.violations().is_empty());
//! ```

use crate::error::{FlowError, Result};
use crate::protocol::{add_demand, Subscriber, Subscription};
use crate::types::UNBOUNDED;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct Recorded<T> {
    subscription: Option<Arc<dyn Subscription>>,
    items: Vec<T>,
    errors: Vec<FlowError>,
    completed: bool,
    terminals: usize,
    /// Total demand granted so far.
    granted: u64,
    violations: Vec<String>,
}

/// Subscriber that records signals and protocol breaches.
pub struct TestSubscriber<T> {
    initial: u64,
    state: Mutex<Recorded<T>>,
    changed: Condvar,
}

impl<T: Clone + Send + 'static> TestSubscriber<T> {
    /// Subscriber that requests `initial` items on subscribe (nothing when
    /// `initial` is 0).
    pub fn new(initial: u64) -> Arc<Self> {
        Arc::new(Self {
            initial,
            state: Mutex::new(Recorded {
                subscription: None,
                items: Vec::new(),
                errors: Vec::new(),
                completed: false,
                terminals: 0,
                granted: 0,
                violations: Vec::new(),
            }),
            changed: Condvar::new(),
        })
    }

    pub fn unbounded() -> Arc<Self> {
        Self::new(UNBOUNDED)
    }

    /// Request `n` more items. The grant is recorded before it is forwarded,
    /// so items delivered synchronously from inside the call count against
    /// it.
    pub fn request(&self, n: u64) -> Result<()> {
        let subscription = {
            let mut st = self.state.lock();
            let Some(subscription) = st.subscription.clone() else {
                return Err(FlowError::ProtocolViolation(
                    "request before on_subscribe".to_string(),
                ));
            };
            if n > 0 {
                st.granted = add_demand(st.granted, n);
            }
            subscription
        };
        subscription.request(n)
    }

    pub fn cancel(&self) {
        let subscription = self.state.lock().subscription.clone();
        if let Some(subscription) = subscription {
            subscription.cancel();
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.state.lock().subscription.is_some()
    }

    pub fn items(&self) -> Vec<T> {
        self.state.lock().items.clone()
    }

    pub fn item_count(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_completed(&self) -> bool {
        self.state.lock().completed
    }

    pub fn errors(&self) -> Vec<FlowError> {
        self.state.lock().errors.clone()
    }

    /// Number of terminal signals received. Anything above 1 is also listed
    /// in `violations`.
    pub fn terminal_count(&self) -> usize {
        self.state.lock().terminals
    }

    pub fn granted(&self) -> u64 {
        self.state.lock().granted
    }

    pub fn violations(&self) -> Vec<String> {
        self.state.lock().violations.clone()
    }

    /// Block until at least `count` items arrived or a terminal signal was
    /// received. Returns whether `count` was reached.
    pub fn await_items(&self, count: usize, timeout: Duration) -> bool {
        self.await_until(timeout, |st| st.items.len() >= count || st.terminals > 0);
        self.item_count() >= count
    }

    /// Block until a terminal signal arrives. Returns false on timeout.
    pub fn await_terminal(&self, timeout: Duration) -> bool {
        self.await_until(timeout, |st| st.terminals > 0)
    }

    fn await_until(&self, timeout: Duration, done: impl Fn(&Recorded<T>) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        let mut st = self.state.lock();
        while !done(&*st) {
            if self.changed.wait_until(&mut st, deadline).timed_out() {
                return done(&*st);
            }
        }
        true
    }
}

impl<T: Clone + Send + 'static> Subscriber<T> for TestSubscriber<T> {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        {
            let mut st = self.state.lock();
            if st.subscription.is_some() {
                st.violations.push("on_subscribe called twice".to_string());
                drop(st);
                subscription.cancel();
                return;
            }
            st.subscription = Some(subscription);
        }
        self.changed.notify_all();
        if self.initial > 0 {
            // Cannot fail: the subscription was just stored and n > 0.
            let _ = self.request(self.initial);
        }
    }

    fn on_next(&self, item: T) {
        let mut st = self.state.lock();
        if st.terminals > 0 {
            st.violations.push("on_next after terminal signal".to_string());
        }
        if st.granted != UNBOUNDED && st.items.len() as u64 >= st.granted {
            let message = format!(
                "item {} delivered beyond granted demand {}",
                st.items.len() + 1,
                st.granted
            );
            st.violations.push(message);
        }
        st.items.push(item);
        drop(st);
        self.changed.notify_all();
    }

    fn on_error(&self, error: FlowError) {
        let mut st = self.state.lock();
        if st.terminals > 0 {
            st.violations.push(format!("on_error after terminal signal: {}", error));
        }
        st.terminals += 1;
        st.errors.push(error);
        drop(st);
        self.changed.notify_all();
    }

    fn on_complete(&self) {
        let mut st = self.state.lock();
        if st.terminals > 0 {
            st.violations.push("on_complete after terminal signal".to_string());
        }
        st.terminals += 1;
        st.completed = true;
        drop(st);
        self.changed.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::NoopSubscription;

    #[test]
    fn test_flags_item_beyond_demand() {
        let subscriber = TestSubscriber::<u8>::new(1);
        subscriber.on_subscribe(Arc::new(NoopSubscription));
        subscriber.on_next(1);
        subscriber.on_next(2);

        assert_eq!(subscriber.items(), vec![1, 2]);
        assert_eq!(subscriber.violations().len(), 1);
    }

    #[test]
    fn test_flags_second_terminal() {
        let subscriber = TestSubscriber::<u8>::unbounded();
        subscriber.on_subscribe(Arc::new(NoopSubscription));
        subscriber.on_complete();
        subscriber.on_error(FlowError::message("late"));

        assert_eq!(subscriber.terminal_count(), 2);
        assert_eq!(subscriber.violations().len(), 1);
    }

    #[test]
    fn test_request_before_subscribe_fails() {
        let subscriber = TestSubscriber::<u8>::new(0);
        assert!(matches!(
            subscriber.request(1),
            Err(FlowError::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_await_terminal_times_out() {
        let subscriber = TestSubscriber::<u8>::new(0);
        assert!(!subscriber.await_terminal(Duration::from_millis(20)));
    }
}
