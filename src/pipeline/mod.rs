//! Relay pipeline.
//!
//! Every sweep flows through:
//! 1. `RateGovernor::select_channels()`: cap the channels visited
//! 2. `ChannelFetcher::fetch()`: recent messages, newest first
//! 3. `Policy::matches()`: keyword / stop-word decision, oldest first
//! 4. `Forwarder::forward()`: copy to the target, then mark processed
//!
//! `Driver` repeats sweeps on an interval until stopped.

pub mod driver;
pub mod fetcher;
pub mod forwarder;
pub mod governor;
pub mod policy;
pub mod processor;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

pub use driver::{Driver, DriverState};
pub use processor::SweepProcessor;
pub use types::SweepReport;
