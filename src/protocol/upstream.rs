//! A stage's handle on its upstream subscription.

use super::{add_demand, validate_demand, Subscription};
use crate::error::{FlowError, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;

struct Slot {
    subscription: Option<Arc<dyn Subscription>>,
    /// Demand requested before the subscription arrived.
    pending: u64,
}

/// Holds the upstream subscription once it arrives. Demand requested earlier
/// is parked and forwarded on arrival; cancellation is forwarded exactly
/// once.
pub(crate) struct Upstream {
    slot: Mutex<Slot>,
    cancelled: AtomicBool,
}

impl Upstream {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                subscription: None,
                pending: 0,
            }),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Install the upstream subscription. A second subscription is a
    /// protocol violation: it is cancelled and reported.
    pub fn set(&self, subscription: Arc<dyn Subscription>) -> Result<()> {
        let pending = {
            let mut slot = self.slot.lock();
            if slot.subscription.is_some() {
                drop(slot);
                subscription.cancel();
                warn!("on_subscribe called twice, cancelling the second subscription");
                return Err(FlowError::ProtocolViolation(
                    "upstream subscription already set".to_string(),
                ));
            }
            if self.cancelled.load(Ordering::Acquire) {
                drop(slot);
                subscription.cancel();
                return Ok(());
            }
            slot.subscription = Some(Arc::clone(&subscription));
            std::mem::take(&mut slot.pending)
        };

        if pending > 0 {
            subscription.request(pending)?;
        }
        Ok(())
    }

    /// Drop the subscription without cancelling it (the upstream already
    /// terminated).
    pub fn release(&self) {
        self.slot.lock().subscription = None;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Subscription for Upstream {
    fn request(&self, n: u64) -> Result<()> {
        validate_demand(n)?;
        if self.is_cancelled() {
            return Ok(());
        }
        let subscription = {
            let mut slot = self.slot.lock();
            let current = slot.subscription.clone();
            if current.is_none() {
                slot.pending = add_demand(slot.pending, n);
            }
            current
        };
        match subscription {
            Some(subscription) => subscription.request(n),
            None => Ok(()),
        }
    }

    fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        let subscription = self.slot.lock().subscription.take();
        if let Some(subscription) = subscription {
            subscription.cancel();
        }
    }
}
