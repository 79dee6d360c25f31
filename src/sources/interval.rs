//! Scheduler-driven tick source.

use crate::error::{FlowError, Result};
use crate::protocol::{validate_demand, DemandCounter, Publisher, Subscriber, Subscription};
use crate::scheduler::{CancelHandle, Scheduler};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// Emits 0, 1, 2, ... once per period. A tick that finds no outstanding
/// demand is dropped; the counter still advances. Never completes.
pub struct IntervalPublisher {
    period: Duration,
    scheduler: Arc<dyn Scheduler>,
}

impl IntervalPublisher {
    pub fn new(period: Duration, scheduler: Arc<dyn Scheduler>) -> Self {
        Self { period, scheduler }
    }
}

impl Publisher<u64> for IntervalPublisher {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<u64>>) {
        let subscription = Arc::new(IntervalSubscription {
            demand: DemandCounter::new(),
            ticker: Mutex::new(None),
            cancelled: AtomicBool::new(false),
        });
        subscriber.on_subscribe(subscription.clone());

        let tick = AtomicU64::new(0);
        let state = Arc::clone(&subscription);
        let downstream = Arc::clone(&subscriber);
        let handle = self.scheduler.schedule_at_fixed_rate(
            self.period,
            Box::new(move || {
                let n = tick.fetch_add(1, Ordering::Relaxed);
                if state.cancelled.load(Ordering::Acquire) {
                    return;
                }
                if state.demand.try_consume() {
                    subscriber.on_next(n);
                } else {
                    trace!(tick = n, "interval tick dropped, no demand");
                }
            }),
        );
        if handle.is_cancelled() && !subscription.cancelled.swap(true, Ordering::AcqRel) {
            downstream.on_error(FlowError::SchedulerShutdown);
            return;
        }
        subscription.set_ticker(handle);
    }
}

struct IntervalSubscription {
    demand: DemandCounter,
    ticker: Mutex<Option<CancelHandle>>,
    cancelled: AtomicBool,
}

impl IntervalSubscription {
    fn set_ticker(&self, handle: CancelHandle) {
        let mut ticker = self.ticker.lock();
        if self.cancelled.load(Ordering::Acquire) {
            handle.cancel();
            return;
        }
        *ticker = Some(handle);
    }
}

impl Subscription for IntervalSubscription {
    fn request(&self, n: u64) -> Result<()> {
        validate_demand(n)?;
        self.demand.add(n);
        Ok(())
    }

    fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(handle) = self.ticker.lock().take() {
            handle.cancel();
        }
    }
}
