//! Target selection for outgoing operations.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use hotrod_core::{HotRodError, Result};
use tracing::trace;

use super::topology::TopologyState;

/// Picks the server an operation attempt should go to.
///
/// Owner-first when the operation has a routing key and the current view
/// carries ownership data; otherwise any member not on the exclusion list,
/// chosen by a rotating index so load spreads across the cluster.
#[derive(Debug)]
pub struct ChannelRouter {
    topology: Arc<TopologyState>,
    next: AtomicUsize,
}

impl ChannelRouter {
    /// Creates a router over the shared topology state.
    pub fn new(topology: Arc<TopologyState>) -> Self {
        Self {
            topology,
            next: AtomicUsize::new(0),
        }
    }

    /// Selects a target for one attempt.
    ///
    /// `excluded` holds servers that already failed this logical call; the
    /// primary owner is preferred only when it is not excluded.
    pub fn route(
        &self,
        routing_key: Option<&[u8]>,
        excluded: &HashSet<SocketAddr>,
    ) -> Result<SocketAddr> {
        let topology = self.topology.snapshot();
        if let Some(key) = routing_key {
            if let Some(owner) = topology.primary_owner(key) {
                if !excluded.contains(&owner) {
                    trace!(address = %owner, "routing to primary owner");
                    return Ok(owner);
                }
            }
        }
        let candidates: Vec<SocketAddr> = topology
            .members
            .iter()
            .filter(|addr| !excluded.contains(addr))
            .copied()
            .collect();
        if candidates.is_empty() {
            return Err(HotRodError::NoServersAvailable(format!(
                "all {} known servers excluded",
                topology.members.len()
            )));
        }
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % candidates.len();
        let addr = candidates[idx];
        trace!(address = %addr, "routing to cluster member");
        Ok(addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hotrod_core::protocol::TopologyUpdate;

    fn router_with_members(n: usize) -> (ChannelRouter, Vec<SocketAddr>) {
        let members: Vec<SocketAddr> = (0..n)
            .map(|i| format!("127.0.0.{}:11222", i + 1).parse().unwrap())
            .collect();
        let topology = Arc::new(TopologyState::new(members.clone()));
        (ChannelRouter::new(topology), members)
    }

    #[test]
    fn test_round_robin_over_members() {
        let (router, members) = router_with_members(3);
        let mut seen = HashSet::new();
        for _ in 0..3 {
            seen.insert(router.route(None, &HashSet::new()).unwrap());
        }
        assert_eq!(seen.len(), 3);
        assert!(seen.iter().all(|addr| members.contains(addr)));
    }

    #[test]
    fn test_excluded_members_are_skipped() {
        let (router, members) = router_with_members(3);
        let excluded: HashSet<SocketAddr> = members[..2].iter().copied().collect();
        for _ in 0..5 {
            assert_eq!(router.route(None, &excluded).unwrap(), members[2]);
        }
    }

    #[test]
    fn test_all_excluded_is_an_error() {
        let (router, members) = router_with_members(2);
        let excluded: HashSet<SocketAddr> = members.iter().copied().collect();
        assert!(matches!(
            router.route(None, &excluded),
            Err(HotRodError::NoServersAvailable(_))
        ));
    }

    #[test]
    fn test_owner_preferred_unless_excluded() {
        let members = vec![
            ("127.0.0.1".to_string(), 11222u16),
            ("127.0.0.2".to_string(), 11222),
        ];
        let topology = Arc::new(TopologyState::new(Vec::new()));
        topology.try_install(&TopologyUpdate {
            topology_id: 1,
            members,
            hash_version: 3,
            // One segment owned by member 0: every key routes there.
            segment_owners: vec![vec![0, 1]],
        });
        let owner: SocketAddr = "127.0.0.1:11222".parse().unwrap();
        let other: SocketAddr = "127.0.0.2:11222".parse().unwrap();
        let router = ChannelRouter::new(topology);

        assert_eq!(router.route(Some(b"k"), &HashSet::new()).unwrap(), owner);
        let excluded: HashSet<SocketAddr> = [owner].into_iter().collect();
        assert_eq!(router.route(Some(b"k"), &excluded).unwrap(), other);
    }
}
