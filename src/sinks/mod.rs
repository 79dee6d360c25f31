//! Terminal subscribers.
//!
//! - `FrameStream` hands a sequence to a consumer thread one frame per
//!   signal, with demand replenished as frames are read
//! - `LambdaSubscriber` runs closures for each signal

mod frames;
mod lambda;

pub use frames::FrameStream;
pub use lambda::LambdaSubscriber;
