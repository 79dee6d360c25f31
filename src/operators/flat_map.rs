//! Merge of inner publishers.
//!
//! Each upstream item is mapped to an inner publisher; the items of all live
//! inners are merged into one downstream sequence. All downstream signals are
//! sent from a single drain loop, so inners completing on different threads
//! never deliver concurrently.

use crate::config::FlatMapConfig;
use crate::error::{BoxError, FlowError, Result};
use crate::flux::Flux;
use crate::policy::{Decision, ErrorPolicy};
use crate::protocol::{
    validate_demand, DemandCounter, DrainGate, Publisher, Subscriber, Subscription, Upstream,
};
use crate::types::UNBOUNDED;
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// Maps items to inner publishers and merges their output.
pub struct FlatMapPublisher<T, U, F> {
    source: Flux<T>,
    mapper: Arc<F>,
    config: FlatMapConfig,
    policy: ErrorPolicy,
    _marker: PhantomData<fn(T) -> U>,
}

impl<T, U, F> FlatMapPublisher<T, U, F>
where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(T) -> std::result::Result<Flux<U>, BoxError> + Send + Sync + 'static,
{
    pub fn new(source: Flux<T>, mapper: F, config: FlatMapConfig, policy: ErrorPolicy) -> Self {
        Self {
            source,
            mapper: Arc::new(mapper),
            config,
            policy,
            _marker: PhantomData,
        }
    }
}

impl<T, U, F> Publisher<U> for FlatMapPublisher<T, U, F>
where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(T) -> std::result::Result<Flux<U>, BoxError> + Send + Sync + 'static,
{
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<U>>) {
        let core = Arc::new(MergeCore {
            downstream: subscriber,
            upstream: Arc::new(Upstream::new()),
            requested: DemandCounter::new(),
            state: Mutex::new(MergeState {
                inners: BTreeMap::new(),
                next_inner: 0,
                cursor: 0,
                upstream_done: false,
                error: None,
                terminated: false,
            }),
            gate: DrainGate::new(),
            cancelled: AtomicBool::new(false),
            max_concurrency: self.config.max_concurrency.map(|n| n.max(1)),
            inner_prefetch: self.config.inner_prefetch.max(1),
            policy: self.policy.clone(),
        });
        self.source.subscribe(Arc::new(OuterSubscriber {
            core,
            mapper: Arc::clone(&self.mapper),
            _marker: PhantomData,
        }));
    }
}

/// One inner publisher's buffered output.
struct InnerSlot<U> {
    subscription: Option<Arc<dyn Subscription>>,
    queue: VecDeque<U>,
    done: bool,
}

struct MergeState<U> {
    /// Live inners keyed by spawn order.
    inners: BTreeMap<u64, InnerSlot<U>>,
    next_inner: u64,
    /// Inner to try first on the next emission (round-robin).
    cursor: u64,
    upstream_done: bool,
    /// Failure waiting to be delivered by the drain loop.
    error: Option<FlowError>,
    terminated: bool,
}

/// Shared state of one flat_map subscription; also the subscription handed
/// downstream.
struct MergeCore<U> {
    downstream: Arc<dyn Subscriber<U>>,
    upstream: Arc<Upstream>,
    requested: DemandCounter,
    state: Mutex<MergeState<U>>,
    gate: DrainGate,
    cancelled: AtomicBool,
    max_concurrency: Option<usize>,
    inner_prefetch: u64,
    policy: ErrorPolicy,
}

/// What one pass of the drain loop decided to do.
enum Action<U> {
    Emit(U, Option<Arc<dyn Subscription>>),
    Fail(FlowError, Vec<Arc<dyn Subscription>>),
    Complete,
    Idle,
}

impl<U: Send + 'static> MergeCore<U> {
    fn drain(&self) {
        self.gate.drain(|| self.drain_once());
    }

    fn drain_once(&self) {
        loop {
            if self.cancelled.load(Ordering::Acquire) {
                return;
            }

            let (action, finished) = self.next_action();

            if finished > 0 && self.max_concurrency.is_some() {
                // Freed concurrency slots can take new upstream items.
                if let Err(e) = self.upstream.request(finished as u64) {
                    debug!(error = %e, "flat_map: upstream replenish failed");
                }
            }

            match action {
                Action::Emit(item, inner) => {
                    self.downstream.on_next(item);
                    if let Some(inner) = inner {
                        if let Err(e) = inner.request(1) {
                            debug!(error = %e, "flat_map: inner replenish failed");
                        }
                    }
                }
                Action::Fail(error, inners) => {
                    self.upstream.cancel();
                    for inner in inners {
                        inner.cancel();
                    }
                    self.downstream.on_error(error);
                    return;
                }
                Action::Complete => {
                    self.downstream.on_complete();
                    return;
                }
                Action::Idle => {
                    if finished == 0 {
                        return;
                    }
                }
            }
        }
    }

    /// Pick the next step under the state lock. Also drops inners that are
    /// finished and drained, returning how many were dropped.
    fn next_action(&self) -> (Action<U>, usize) {
        let mut st = self.state.lock();
        if st.terminated {
            return (Action::Idle, 0);
        }

        if let Some(error) = st.error.take() {
            st.terminated = true;
            let inners = std::mem::take(&mut st.inners)
                .into_values()
                .filter_map(|slot| slot.subscription)
                .collect();
            return (Action::Fail(error, inners), 0);
        }

        let mut action = Action::Idle;
        if self.requested.get() > 0 {
            let cursor = st.cursor;
            let ready = st
                .inners
                .range(cursor..)
                .chain(st.inners.range(..cursor))
                .find(|(_, slot)| !slot.queue.is_empty())
                .map(|(id, _)| *id);

            if let Some(id) = ready {
                if let Some(slot) = st.inners.get_mut(&id) {
                    if let Some(item) = slot.queue.pop_front() {
                        let replenish = if slot.done {
                            None
                        } else {
                            slot.subscription.clone()
                        };
                        self.requested.try_consume();
                        action = Action::Emit(item, replenish);
                    }
                }
                st.cursor = id + 1;
            }
        }

        let before = st.inners.len();
        st.inners.retain(|_, slot| !(slot.done && slot.queue.is_empty()));
        let finished = before - st.inners.len();

        if matches!(action, Action::Idle) && st.upstream_done && st.inners.is_empty() {
            st.terminated = true;
            action = Action::Complete;
        }

        (action, finished)
    }

    fn fail(&self, error: FlowError) {
        {
            let mut st = self.state.lock();
            if st.terminated || st.error.is_some() {
                return;
            }
            st.error = Some(error);
        }
        self.drain();
    }

    /// Register a new inner and return its id, or None once terminated.
    fn open_inner(&self) -> Option<u64> {
        let mut st = self.state.lock();
        if st.terminated || st.error.is_some() || self.cancelled.load(Ordering::Acquire) {
            return None;
        }
        let id = st.next_inner;
        st.next_inner += 1;
        st.inners.insert(
            id,
            InnerSlot {
                subscription: None,
                queue: VecDeque::new(),
                done: false,
            },
        );
        Some(id)
    }
}

impl<U: Send + 'static> Subscription for MergeCore<U> {
    fn request(&self, n: u64) -> Result<()> {
        validate_demand(n)?;
        self.requested.add(n);
        self.drain();
        Ok(())
    }

    fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        self.upstream.cancel();
        let inners: Vec<_> = {
            let mut st = self.state.lock();
            st.terminated = true;
            std::mem::take(&mut st.inners)
                .into_values()
                .filter_map(|slot| slot.subscription)
                .collect()
        };
        for inner in inners {
            inner.cancel();
        }
    }
}

struct OuterSubscriber<T, U, F> {
    core: Arc<MergeCore<U>>,
    mapper: Arc<F>,
    _marker: PhantomData<fn(T)>,
}

impl<T, U, F> Subscriber<T> for OuterSubscriber<T, U, F>
where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(T) -> std::result::Result<Flux<U>, BoxError> + Send + Sync + 'static,
{
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        if self.core.upstream.set(subscription).is_err() {
            return;
        }
        self.core.downstream.on_subscribe(self.core.clone());
        let initial = match self.core.max_concurrency {
            Some(n) => n as u64,
            None => UNBOUNDED,
        };
        if let Err(e) = self.core.upstream.request(initial) {
            debug!(error = %e, "flat_map: initial upstream request failed");
        }
    }

    fn on_next(&self, item: T) {
        if self.core.cancelled.load(Ordering::Acquire) {
            return;
        }
        match (self.mapper)(item) {
            Ok(inner) => {
                let Some(id) = self.core.open_inner() else {
                    return;
                };
                trace!(inner = id, "flat_map subscribing inner");
                inner.subscribe(Arc::new(InnerSubscriber {
                    core: Arc::clone(&self.core),
                    id,
                }));
            }
            Err(e) => {
                let error = FlowError::from_boxed(e);
                match self.core.policy.decide("flat_map", &error) {
                    Decision::Skip => {
                        if self.core.max_concurrency.is_some() {
                            if let Err(e) = self.core.upstream.request(1) {
                                debug!(error = %e, "flat_map: replacement request failed");
                            }
                        }
                    }
                    Decision::Propagate => self.core.fail(error),
                }
            }
        }
    }

    fn on_error(&self, error: FlowError) {
        self.core.fail(error);
    }

    fn on_complete(&self) {
        self.core.state.lock().upstream_done = true;
        self.core.drain();
    }
}

struct InnerSubscriber<U> {
    core: Arc<MergeCore<U>>,
    id: u64,
}

impl<U: Send + 'static> InnerSubscriber<U> {
    fn mark_done(&self) {
        if let Some(slot) = self.core.state.lock().inners.get_mut(&self.id) {
            slot.done = true;
        }
        self.core.drain();
    }
}

impl<U: Send + 'static> Subscriber<U> for InnerSubscriber<U> {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        let accepted = {
            let mut st = self.core.state.lock();
            match st.inners.get_mut(&self.id) {
                Some(slot) if slot.subscription.is_none() => {
                    slot.subscription = Some(Arc::clone(&subscription));
                    true
                }
                _ => false,
            }
        };
        if !accepted {
            subscription.cancel();
            return;
        }
        if let Err(e) = subscription.request(self.core.inner_prefetch) {
            debug!(error = %e, "flat_map: inner prefetch failed");
        }
    }

    fn on_next(&self, item: U) {
        {
            let mut st = self.core.state.lock();
            match st.inners.get_mut(&self.id) {
                Some(slot) if !slot.done => slot.queue.push_back(item),
                _ => return,
            }
        }
        self.core.drain();
    }

    fn on_error(&self, error: FlowError) {
        match self.core.policy.decide("flat_map inner", &error) {
            // A skipped inner counts as completed; what it already emitted
            // is still delivered.
            Decision::Skip => self.mark_done(),
            Decision::Propagate => self.core.fail(error),
        }
    }

    fn on_complete(&self) {
        self.mark_done();
    }
}
