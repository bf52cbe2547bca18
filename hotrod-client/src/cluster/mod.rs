//! Cluster view tracking and operation routing.

mod router;
mod topology;

pub use router::ChannelRouter;
pub use topology::{murmur_hash3_x86_32, ClientTopology, TopologyState};
