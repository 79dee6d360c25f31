//! Intermediate stages. Each one is a `Publisher` wrapping an upstream
//! `Flux`; subscribing to it subscribes a per-subscription stage subscriber
//! to the upstream.

mod delay;
mod filter;
mod flat_map;
mod log;
mod map;
mod sample;
mod subscribe_on;

pub use delay::DelayPublisher;
pub use filter::FilterPublisher;
pub use flat_map::FlatMapPublisher;
pub use log::LogPublisher;
pub use map::MapPublisher;
pub use sample::{SamplePublisher, UPSTREAM_BATCH};
pub use subscribe_on::SubscribeOnPublisher;
