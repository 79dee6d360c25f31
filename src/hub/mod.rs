//! Connectable multicast hub.
//!
//! A hub shares one upstream subscription between any number of
//! subscribers:
//! - subscribers may attach before or after `connect()`
//! - nothing is pulled from the source until `connect()`
//! - upstream demand is the largest outstanding demand of any subscriber
//! - a subscriber sent more than it asked for is detached with
//!   `SubscriberOverrun`, the rest keep going
//! - the terminal signal is cached and replayed to late subscribers
//!
//! # Example
//!
//! ```ignore
//! let hub = Flux::range(0, 100).publish();
//! hub.subscribe(first);
//! hub.subscribe(second);
//!
//! let connection = hub.connect();
//! // ...
//! connection.cancel();
//! ```

mod manager;
mod types;

pub use manager::ConnectableHub;
pub use types::Connection;
