//! Publisher / Subscriber / Subscription protocol.
//!
//! The contract every stage in the runtime follows:
//! - `subscribe` hands the subscriber a fresh `Subscription` through
//!   `on_subscribe` before any item is sent
//! - items are only sent against demand granted through `request`
//! - at most one terminal signal (`on_complete` / `on_error`) per subscription
//! - signals to one subscriber never overlap, even when producers live on
//!   different threads
//! - `cancel` is idempotent and never fails
//!
//! # Example
//!
//! ```ignore
//! struct Printer;
//!
//! impl Subscriber<u64> for Printer {
//!     fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
//!         subscription.request(UNBOUNDED).ok();
//!     }
//!     fn on_next(&self, item: u64) { println!("{item}"); }
//!     fn on_error(&self, error: FlowError) { eprintln!("{error}"); }
//!     fn on_complete(&self) {}
//! }
//!
//! Flux::range(0, 10).subscribe(Arc::new(Printer));
//! ```

mod demand;
mod drain;
mod upstream;

use crate::error::{FlowError, Result};
use std::sync::Arc;

pub use demand::{add_demand, validate_demand, DemandCounter};
pub(crate) use drain::{DrainGate, Emitter};
pub(crate) use upstream::Upstream;

/// A consumer's handle on one producer.
pub trait Subscription: Send + Sync {
    /// Authorize `n` more items. `n == 0` fails with `InvalidDemand`.
    fn request(&self, n: u64) -> Result<()>;

    /// Stop the flow of signals. Idempotent.
    fn cancel(&self);
}

/// A sink for the signals of one subscription.
pub trait Subscriber<T>: Send + Sync {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>);

    fn on_next(&self, item: T);

    fn on_error(&self, error: FlowError);

    fn on_complete(&self);
}

/// A source of an asynchronous sequence.
pub trait Publisher<T>: Send + Sync {
    /// Attach a subscriber. Cold publishers start an independent sequence
    /// per call.
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>);
}

/// Subscription that ignores demand. Handed out when there is nothing to
/// produce, right before a terminal signal.
pub(crate) struct NoopSubscription;

impl Subscription for NoopSubscription {
    fn request(&self, n: u64) -> Result<()> {
        validate_demand(n)
    }

    fn cancel(&self) {}
}
