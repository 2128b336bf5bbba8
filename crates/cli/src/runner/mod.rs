//! Feed runner module.

mod driver;
mod stats;

pub use driver::{Runner, RunnerConfig};
pub use stats::{ChannelReport, FeedReport, RunStats};
