//! Hub core: branch registry, demand aggregation and broadcasting.

use crate::config::HubConfig;
use crate::error::FlowError;
use crate::flux::Flux;
use crate::protocol::{
    add_demand, Emitter, NoopSubscription, Publisher, Subscriber, Subscription, Upstream,
};
use crate::types::{HubPhase, Signal, SubscriberId, Terminal, UNBOUNDED};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, trace, warn};

use super::types::{Branch, BranchSubscription, Connection, HubControl};

struct HubState<T> {
    phase: HubPhase,
    /// Attached subscribers by id.
    branches: BTreeMap<SubscriberId, Branch<T>>,
    /// Signal replayed to subscribers arriving after termination.
    terminal: Option<Terminal>,
    /// Requested from upstream and not yet received.
    upstream_outstanding: u64,
}

pub(crate) struct HubCore<T> {
    source: Flux<T>,
    config: HubConfig,
    upstream: Arc<Upstream>,
    state: Mutex<HubState<T>>,
    /// Counter for generating subscriber ids.
    next_id: AtomicU64,
}

impl<T: Clone + Send + 'static> HubCore<T> {
    fn new(source: Flux<T>, config: HubConfig) -> Self {
        Self {
            source,
            config,
            upstream: Arc::new(Upstream::new()),
            state: Mutex::new(HubState {
                phase: HubPhase::Unconnected,
                branches: BTreeMap::new(),
                terminal: None,
                upstream_outstanding: 0,
            }),
            next_id: AtomicU64::new(1),
        }
    }

    fn attach(self: &Arc<Self>, subscriber: Arc<dyn Subscriber<T>>) {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::SeqCst));
        // Held until `on_subscribe` returns, so nothing overtakes it.
        let emitter = Arc::new(Emitter::held(subscriber));

        let terminal = {
            let mut st = self.state.lock();
            match st.terminal.clone() {
                Some(terminal) => Some(terminal),
                None => {
                    st.branches.insert(id, Branch::new(Arc::clone(&emitter)));
                    None
                }
            }
        };

        if let Some(terminal) = terminal {
            trace!(subscriber = %id, "hub terminated, replaying terminal signal");
            emitter.push(terminal.into_signal());
            emitter.start(Arc::new(NoopSubscription));
            return;
        }

        debug!(subscriber = %id, "hub subscriber attached");
        let hub: Weak<dyn HubControl> = Arc::downgrade(self) as Weak<dyn HubControl>;
        emitter.start(Arc::new(BranchSubscription {
            hub,
            id,
            cancelled: AtomicBool::new(false),
        }));
        if let Some(branch) = self.state.lock().branches.get_mut(&id) {
            branch.ready = true;
        }
    }

    /// Subscribe to the source. Called once, by the first `connect`.
    fn start(self: &Arc<Self>) {
        {
            let mut st = self.state.lock();
            if st.phase != HubPhase::Unconnected {
                return;
            }
            st.phase = HubPhase::Connected;
        }
        debug!("hub connecting upstream");
        self.source.subscribe(Arc::new(HubSubscriber {
            core: Arc::clone(self),
        }));
        self.rebalance();
    }

    /// Top upstream demand up to the largest outstanding branch demand.
    fn rebalance(&self) {
        let delta = {
            let mut st = self.state.lock();
            if st.phase != HubPhase::Connected {
                return;
            }
            let target = st
                .branches
                .values()
                .map(|b| b.outstanding)
                .max()
                .unwrap_or(0);
            if target <= st.upstream_outstanding {
                return;
            }
            let delta = if target == UNBOUNDED {
                UNBOUNDED
            } else {
                target - st.upstream_outstanding
            };
            st.upstream_outstanding = add_demand(st.upstream_outstanding, delta);
            delta
        };
        trace!(delta, "hub requesting upstream");
        if let Err(e) = self.upstream.request(delta) {
            debug!(error = %e, "hub: upstream request failed");
        }
    }

    fn broadcast(&self, item: T) {
        let mut targets = Vec::new();
        {
            let mut st = self.state.lock();
            if st.phase != HubPhase::Connected {
                return;
            }
            if st.upstream_outstanding != UNBOUNDED {
                st.upstream_outstanding = st.upstream_outstanding.saturating_sub(1);
            }

            let mut overrun = Vec::new();
            for (id, branch) in st.branches.iter_mut() {
                if !branch.ready && branch.outstanding == 0 {
                    // Still subscribing: the item predates this subscriber.
                    continue;
                }
                match branch.outstanding {
                    0 => overrun.push(*id),
                    UNBOUNDED => branch.emitter.push(Signal::Item(item.clone())),
                    _ => {
                        branch.outstanding -= 1;
                        branch.emitter.push(Signal::Item(item.clone()));
                    }
                }
                targets.push(Arc::clone(&branch.emitter));
            }

            // Drop overrunning branches
            for id in overrun {
                if let Some(branch) = st.branches.remove(&id) {
                    warn!(subscriber = %id, "hub subscriber overrun, detaching");
                    branch
                        .emitter
                        .push(Signal::Error(FlowError::SubscriberOverrun(id)));
                }
            }
        }

        for emitter in targets {
            emitter.drain();
        }
    }

    /// Move to `Terminated`, cache the signal and deliver it to every
    /// attached subscriber.
    fn terminate(&self, terminal: Terminal) {
        let branches = {
            let mut st = self.state.lock();
            if st.phase == HubPhase::Terminated {
                return;
            }
            st.phase = HubPhase::Terminated;
            st.terminal = Some(terminal.clone());
            let branches = std::mem::take(&mut st.branches);
            for branch in branches.values() {
                branch.emitter.push(terminal.clone().into_signal());
            }
            branches
        };
        debug!(subscribers = branches.len(), "hub terminated");
        self.upstream.release();
        for branch in branches.into_values() {
            branch.emitter.drain();
        }
    }

    fn phase(&self) -> HubPhase {
        self.state.lock().phase
    }

    fn subscriber_count(&self) -> usize {
        self.state.lock().branches.len()
    }
}

impl<T: Clone + Send + 'static> HubControl for HubCore<T> {
    fn request(&self, id: SubscriberId, n: u64) {
        {
            let mut st = self.state.lock();
            let Some(branch) = st.branches.get_mut(&id) else {
                return;
            };
            branch.outstanding = add_demand(branch.outstanding, n);
        }
        self.rebalance();
    }

    fn detach(&self, id: SubscriberId) {
        let release = {
            let mut st = self.state.lock();
            if st.branches.remove(&id).is_none() {
                return;
            }
            debug!(subscriber = %id, remaining = st.branches.len(), "hub subscriber cancelled");
            st.branches.is_empty()
                && st.phase == HubPhase::Connected
                && self.config.release_upstream_on_last_cancel
        };
        if release {
            debug!("last hub subscriber gone, releasing upstream");
            self.upstream.cancel();
            self.terminate(Terminal::Complete);
        }
    }

    fn disconnect(&self) {
        if self.phase() != HubPhase::Connected {
            return;
        }
        self.upstream.cancel();
        self.terminate(Terminal::Complete);
    }
}

/// The hub's single subscriber on its source.
struct HubSubscriber<T> {
    core: Arc<HubCore<T>>,
}

impl<T: Clone + Send + 'static> Subscriber<T> for HubSubscriber<T> {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        if self.core.upstream.set(subscription).is_err() {
            return;
        }
        trace!("hub upstream subscribed");
    }

    fn on_next(&self, item: T) {
        self.core.broadcast(item);
    }

    fn on_error(&self, error: FlowError) {
        self.core.terminate(Terminal::Error(error));
    }

    fn on_complete(&self) {
        self.core.terminate(Terminal::Complete);
    }
}

/// A multicast stage over one upstream subscription.
///
/// Subscribers attach at any time but nothing is pulled from the source
/// until `connect()`. Upstream is asked for the largest demand any attached
/// subscriber has outstanding, and every item goes to every attached
/// subscriber. A subscriber that receives an item it did not ask for gets
/// `SubscriberOverrun` and is detached; the others continue. Subscribers
/// attaching later only see later items, and once the source terminates the
/// terminal signal is replayed to anyone who subscribes afterwards.
///
/// Clones share the same hub.
pub struct ConnectableHub<T> {
    core: Arc<HubCore<T>>,
    connection: Arc<Mutex<Option<Arc<Connection>>>>,
}

impl<T> Clone for ConnectableHub<T> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
            connection: Arc::clone(&self.connection),
        }
    }
}

impl<T: Clone + Send + 'static> ConnectableHub<T> {
    pub fn new(source: Flux<T>) -> Self {
        Self::with_config(source, HubConfig::default())
    }

    pub fn with_config(source: Flux<T>, config: HubConfig) -> Self {
        Self {
            core: Arc::new(HubCore::new(source, config)),
            connection: Arc::new(Mutex::new(None)),
        }
    }

    /// Start pulling from the source. Only the first call connects; later
    /// calls return the same `Connection`.
    pub fn connect(&self) -> Arc<Connection> {
        let (connection, fresh) = {
            let mut slot = self.connection.lock();
            match slot.as_ref() {
                Some(existing) => (Arc::clone(existing), false),
                None => {
                    let control: Arc<dyn HubControl> = self.core.clone();
                    let created = Arc::new(Connection::new(control));
                    *slot = Some(Arc::clone(&created));
                    (created, true)
                }
            }
        };
        if fresh {
            self.core.start();
        }
        connection
    }

    pub fn phase(&self) -> HubPhase {
        self.core.phase()
    }

    /// Number of currently attached subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.core.subscriber_count()
    }

    /// View the hub as a `Flux` to chain operators after it.
    pub fn flux(&self) -> Flux<T> {
        Flux::from_publisher(self.clone())
    }
}

impl<T: Clone + Send + 'static> Publisher<T> for ConnectableHub<T> {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
        self.core.attach(subscriber);
    }
}
