//! # Rivulet
//!
//! A reactive streams runtime: composable operators over asynchronous
//! sequences with explicit, pull-based demand.
//!
//! ## Core Concepts
//!
//! - **Protocol**: `Publisher` / `Subscriber` / `Subscription`; items flow
//!   only against demand granted with `request(n)`
//! - **Operators**: `map`, `filter`, `flat_map`, `delay_elements`, `sample`,
//!   `subscribe_on`, `log`, chained on a `Flux`
//! - **Error policies**: a failing element either ends the stream or is
//!   skipped and reported
//! - **Schedulers**: a thread pool for real time, a virtual clock for tests
//! - **Hub**: a connectable multicast stage sharing one upstream
//!
//! ## Example
//!
//! ```ignore
//! use rivulet::{ErrorPolicy, Flux, ThreadScheduler};
//!
//! let scheduler = Arc::new(ThreadScheduler::new());
//!
//! let names = Flux::from_pages(repository, 50)
//!     .try_map_with(|person: Person| person.checked_name(), ErrorPolicy::skip())
//!     .delay_elements(Duration::from_millis(50), scheduler)
//!     .collect_list(Duration::from_secs(10))?;
//! ```

pub mod config;
pub mod error;
pub mod flux;
pub mod hub;
pub mod operators;
pub mod policy;
pub mod protocol;
pub mod scheduler;
pub mod sinks;
pub mod sources;
pub mod testing;
pub mod types;

// Re-exports
pub use config::{FlatMapConfig, FrameConfig, HubConfig, SchedulerConfig};
pub use error::{BoxError, FlowError, Result};
pub use flux::Flux;
pub use hub::{ConnectableHub, Connection};
pub use policy::{Decision, ErrorObserver, ErrorPolicy, LogObserver};
pub use protocol::{DemandCounter, Publisher, Subscriber, Subscription};
pub use scheduler::{CancelHandle, Scheduler, ThreadScheduler, VirtualScheduler};
pub use sinks::{FrameStream, LambdaSubscriber};
pub use sources::{PageSource, SourceIter};
pub use testing::TestSubscriber;
pub use types::*;
