//! Channels, exclusive checkout, and per-attempt dispatch.

mod channel;
mod dispatcher;
mod registry;

pub use channel::Channel;
pub use dispatcher::{dispatch, Reply};
pub use registry::{ChannelLease, ChannelRegistry};
