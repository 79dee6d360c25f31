//! Branch and connection types for the connectable hub.

use crate::error::Result;
use crate::protocol::{validate_demand, Emitter, Subscription};
use crate::types::SubscriberId;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

/// One attached subscriber's state inside the hub.
pub(crate) struct Branch<T> {
    pub emitter: Arc<Emitter<T>>,
    /// Items this subscriber authorized and has not received yet.
    pub outstanding: u64,
    /// Set once `on_subscribe` returned. Until then an item the branch has
    /// no demand for is not meant for it yet.
    pub ready: bool,
}

impl<T: Send + 'static> Branch<T> {
    pub fn new(emitter: Arc<Emitter<T>>) -> Self {
        Self {
            emitter,
            outstanding: 0,
            ready: false,
        }
    }
}

/// Operations a branch or connection needs from its hub, independent of the
/// item type.
pub(crate) trait HubControl: Send + Sync {
    fn request(&self, id: SubscriberId, n: u64);

    fn detach(&self, id: SubscriberId);

    fn disconnect(&self);
}

/// The subscription handed to each hub subscriber. Holds the hub weakly so a
/// subscriber keeping its subscription does not keep the hub alive.
pub(crate) struct BranchSubscription {
    pub hub: Weak<dyn HubControl>,
    pub id: SubscriberId,
    pub cancelled: AtomicBool,
}

impl Subscription for BranchSubscription {
    fn request(&self, n: u64) -> Result<()> {
        validate_demand(n)?;
        if self.cancelled.load(Ordering::Acquire) {
            return Ok(());
        }
        if let Some(hub) = self.hub.upgrade() {
            hub.request(self.id, n);
        }
        Ok(())
    }

    fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(hub) = self.hub.upgrade() {
            hub.detach(self.id);
        }
    }
}

/// Handle returned by `ConnectableHub::connect`. Every `connect` call on the
/// same hub returns the same handle.
pub struct Connection {
    hub: Arc<dyn HubControl>,
    cancelled: AtomicBool,
}

impl Connection {
    pub(crate) fn new(hub: Arc<dyn HubControl>) -> Self {
        Self {
            hub,
            cancelled: AtomicBool::new(false),
        }
    }

    /// Disconnect the hub: cancel the shared upstream subscription and
    /// complete every attached subscriber. Idempotent.
    pub fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("hub connection cancelled");
        self.hub.disconnect();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
