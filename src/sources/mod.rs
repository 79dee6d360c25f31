//! Demand-aware sources.
//!
//! Every source here produces only as fast as its subscriber requests:
//! - `IterPublisher` pulls from a fresh iterator per subscriber (`from_iter`,
//!   `range`, `just`, `generate`, `error`)
//! - `Pages` turns a paged bulk fetch into a record iterator (`from_pages`)
//! - `IntervalPublisher` ticks on a scheduler (`interval`)
//!
//! The `Flux` constructors are the usual entry points.

mod interval;
mod iter;
mod paged;

pub use interval::IntervalPublisher;
pub use iter::{IterPublisher, SourceIter};
pub use paged::PageSource;
pub(crate) use paged::Pages;
