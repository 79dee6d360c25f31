//! Periodic sampling stage.

use crate::error::{FlowError, Result};
use crate::flux::Flux;
use crate::protocol::{
    validate_demand, DemandCounter, Emitter, Publisher, Subscriber, Subscription, Upstream,
};
use crate::scheduler::{CancelHandle, Scheduler};
use crate::types::Signal;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Upstream items requested per batch. Each tick asks for as many as
/// arrived since the previous one.
pub const UPSTREAM_BATCH: u64 = 256;

/// Forwards, once per period, the most recent item seen since the previous
/// tick. A period with no new item emits nothing. On completion the last
/// unsent item is flushed first.
///
/// Upstream is pulled in batches of [`UPSTREAM_BATCH`], topped up by the
/// ticker, so a synchronous infinite source cannot hold the subscribing
/// thread.
pub struct SamplePublisher<T> {
    source: Flux<T>,
    period: Duration,
    scheduler: Arc<dyn Scheduler>,
}

impl<T: Send + 'static> SamplePublisher<T> {
    pub fn new(source: Flux<T>, period: Duration, scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            source,
            period,
            scheduler,
        }
    }
}

impl<T: Send + 'static> Publisher<T> for SamplePublisher<T> {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
        let core = Arc::new(SampleCore {
            emitter: Emitter::new(subscriber),
            upstream: Arc::new(Upstream::new()),
            requested: DemandCounter::new(),
            state: Mutex::new(SampleState {
                latest: None,
                done: false,
                ticker: None,
                dropped: 0,
                received: 0,
            }),
        });
        self.source.subscribe(Arc::new(SampleSubscriber {
            core,
            period: self.period,
            scheduler: Arc::clone(&self.scheduler),
        }));
    }
}

struct SampleState<T> {
    /// Newest item of the current window.
    latest: Option<T>,
    done: bool,
    ticker: Option<CancelHandle>,
    /// Samples discarded for lack of downstream demand.
    dropped: u64,
    /// Items taken from upstream since the last top-up.
    received: u64,
}

struct SampleCore<T> {
    emitter: Emitter<T>,
    upstream: Arc<Upstream>,
    requested: DemandCounter,
    state: Mutex<SampleState<T>>,
}

impl<T: Send + 'static> SampleCore<T> {
    fn tick(&self) {
        let refill = {
            let mut st = self.state.lock();
            if st.done {
                return;
            }
            let refill = std::mem::take(&mut st.received);
            if let Some(item) = st.latest.take() {
                if self.requested.try_consume() {
                    self.emitter.push(Signal::Item(item));
                } else {
                    st.dropped += 1;
                    trace!(dropped = st.dropped, "sample dropped, no demand");
                }
            }
            refill
        };
        self.emitter.drain();

        // Outside the lock: a synchronous source answers from inside request.
        if refill > 0 {
            if let Err(e) = self.upstream.request(refill) {
                debug!(error = %e, "sample: upstream request failed");
            }
        }
    }

    /// Mark done and stop the ticker. Returns the unsent item, or None if
    /// already done.
    fn finish(&self) -> Option<Option<T>> {
        let (latest, ticker) = {
            let mut st = self.state.lock();
            if st.done {
                return None;
            }
            st.done = true;
            (st.latest.take(), st.ticker.take())
        };
        if let Some(ticker) = ticker {
            ticker.cancel();
        }
        Some(latest)
    }
}

impl<T: Send + 'static> Subscription for SampleCore<T> {
    fn request(&self, n: u64) -> Result<()> {
        validate_demand(n)?;
        self.requested.add(n);
        Ok(())
    }

    fn cancel(&self) {
        self.upstream.cancel();
        self.finish();
    }
}

struct SampleSubscriber<T> {
    core: Arc<SampleCore<T>>,
    period: Duration,
    scheduler: Arc<dyn Scheduler>,
}

impl<T: Send + 'static> Subscriber<T> for SampleSubscriber<T> {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        if self.core.upstream.set(subscription).is_err() {
            return;
        }
        self.core.emitter.downstream().on_subscribe(self.core.clone());

        let core = Arc::clone(&self.core);
        let ticker = self
            .scheduler
            .schedule_at_fixed_rate(self.period, Box::new(move || core.tick()));
        if ticker.is_cancelled() {
            // Rejected by the scheduler
            self.core.upstream.cancel();
            if self.core.finish().is_some() {
                self.core.emitter.emit(Signal::Error(FlowError::SchedulerShutdown));
            }
            return;
        }
        {
            let mut st = self.core.state.lock();
            if st.done {
                ticker.cancel();
            } else {
                st.ticker = Some(ticker);
            }
        }

        if let Err(e) = self.core.upstream.request(UPSTREAM_BATCH) {
            debug!(error = %e, "sample: upstream request failed");
        }
    }

    fn on_next(&self, item: T) {
        let mut st = self.core.state.lock();
        if !st.done {
            st.latest = Some(item);
            st.received += 1;
        }
    }

    fn on_error(&self, error: FlowError) {
        if self.core.finish().is_some() {
            self.core.emitter.emit(Signal::Error(error));
        }
    }

    fn on_complete(&self) {
        let Some(latest) = self.core.finish() else {
            return;
        };
        if let Some(item) = latest {
            if self.core.requested.try_consume() {
                self.core.emitter.push(Signal::Item(item));
            }
        }
        self.core.emitter.emit(Signal::Complete);
    }
}
