//! Cluster view tracking and key-to-owner mapping.

use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, RwLock};

use hotrod_core::protocol::TopologyUpdate;
use tracing::{debug, warn};

/// An immutable cluster view.
///
/// Snapshots are shared behind an `Arc` and replaced wholesale when a newer
/// view arrives; in-flight operations keep routing against the view they
/// started with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientTopology {
    /// Server-assigned view id; grows monotonically.
    pub topology_id: i32,
    /// Known cluster members.
    pub members: Vec<SocketAddr>,
    /// Primary-first owner addresses per segment; empty when the cluster
    /// sent no segment table.
    pub segment_owners: Vec<Vec<SocketAddr>>,
}

impl ClientTopology {
    /// The view used before any server has sent one: just the configured
    /// bootstrap addresses, id -1, no ownership data.
    pub fn bootstrap(members: Vec<SocketAddr>) -> Self {
        Self {
            topology_id: hotrod_core::protocol::INITIAL_TOPOLOGY_ID,
            members,
            segment_owners: Vec::new(),
        }
    }

    /// Builds a view from a decoded wire update.
    ///
    /// Hosts that do not parse as IP literals are skipped with a warning;
    /// segment owner indexes out of range are skipped likewise.
    pub fn from_update(update: &TopologyUpdate) -> Self {
        let mut members = Vec::with_capacity(update.members.len());
        let mut index_map = vec![None; update.members.len()];
        for (i, (host, port)) in update.members.iter().enumerate() {
            match host.parse::<IpAddr>() {
                Ok(ip) => {
                    index_map[i] = Some(members.len());
                    members.push(SocketAddr::new(ip, *port));
                }
                Err(_) => {
                    warn!(host = %host, "ignoring unparseable topology member");
                }
            }
        }
        let segment_owners = update
            .segment_owners
            .iter()
            .map(|owners| {
                owners
                    .iter()
                    .filter_map(|&idx| {
                        index_map
                            .get(idx as usize)
                            .copied()
                            .flatten()
                            .map(|i| members[i])
                    })
                    .collect()
            })
            .collect();
        Self {
            topology_id: update.topology_id,
            members,
            segment_owners,
        }
    }

    /// Maps a key to its segment, or `None` without a segment table.
    pub fn segment_for_key(&self, key: &[u8]) -> Option<usize> {
        let num_segments = self.segment_owners.len();
        if num_segments == 0 {
            return None;
        }
        // Infinispan's segment mapping: clear the sign bit, then divide the
        // positive hash space into equal-width segments.
        let hash = murmur_hash3_x86_32(key, 9001) as u32 & 0x7FFF_FFFF;
        let segment_size = 0x7FFF_FFFFu32 / num_segments as u32 + 1;
        Some((hash / segment_size) as usize)
    }

    /// Returns the primary owner of `key`, when ownership is known.
    pub fn primary_owner(&self, key: &[u8]) -> Option<SocketAddr> {
        let segment = self.segment_for_key(key)?;
        self.segment_owners
            .get(segment)
            .and_then(|owners| owners.first())
            .copied()
    }
}

/// Shared, swappable topology snapshot.
///
/// Readers take a cheap `Arc` clone; installs replace the pointer and only
/// succeed for strictly newer view ids, so replies arriving out of order
/// can never roll the view back.
#[derive(Debug)]
pub struct TopologyState {
    current: RwLock<Arc<ClientTopology>>,
}

impl TopologyState {
    /// Creates state holding the bootstrap view over the configured servers.
    pub fn new(initial_servers: Vec<SocketAddr>) -> Self {
        Self {
            current: RwLock::new(Arc::new(ClientTopology::bootstrap(initial_servers))),
        }
    }

    /// Returns the current view.
    pub fn snapshot(&self) -> Arc<ClientTopology> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Current view id.
    pub fn topology_id(&self) -> i32 {
        self.snapshot().topology_id
    }

    /// Installs `update` if its id is strictly newer than the current view.
    ///
    /// Returns `true` when the view changed.
    pub fn try_install(&self, update: &TopologyUpdate) -> bool {
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if update.topology_id <= guard.topology_id {
            debug!(
                incoming = update.topology_id,
                current = guard.topology_id,
                "discarding stale topology"
            );
            return false;
        }
        let topology = ClientTopology::from_update(update);
        debug!(
            topology_id = topology.topology_id,
            members = topology.members.len(),
            segments = topology.segment_owners.len(),
            "installed topology"
        );
        *guard = Arc::new(topology);
        true
    }
}

/// MurmurHash3 x86 32-bit, the hash version servers announce for their
/// segment tables.
pub fn murmur_hash3_x86_32(data: &[u8], seed: u32) -> i32 {
    const C1: u32 = 0xcc9e2d51;
    const C2: u32 = 0x1b873593;

    let len = data.len();
    let mut h1 = seed;
    let nblocks = len / 4;

    for i in 0..nblocks {
        let offset = i * 4;
        let k1 = u32::from_le_bytes([
            data[offset],
            data[offset + 1],
            data[offset + 2],
            data[offset + 3],
        ]);

        let k1 = k1.wrapping_mul(C1);
        let k1 = k1.rotate_left(15);
        let k1 = k1.wrapping_mul(C2);

        h1 ^= k1;
        h1 = h1.rotate_left(13);
        h1 = h1.wrapping_mul(5).wrapping_add(0xe6546b64);
    }

    let tail = &data[nblocks * 4..];
    let mut k1: u32 = 0;

    match tail.len() {
        3 => {
            k1 ^= (tail[2] as u32) << 16;
            k1 ^= (tail[1] as u32) << 8;
            k1 ^= tail[0] as u32;
            k1 = k1.wrapping_mul(C1);
            k1 = k1.rotate_left(15);
            k1 = k1.wrapping_mul(C2);
            h1 ^= k1;
        }
        2 => {
            k1 ^= (tail[1] as u32) << 8;
            k1 ^= tail[0] as u32;
            k1 = k1.wrapping_mul(C1);
            k1 = k1.rotate_left(15);
            k1 = k1.wrapping_mul(C2);
            h1 ^= k1;
        }
        1 => {
            k1 ^= tail[0] as u32;
            k1 = k1.wrapping_mul(C1);
            k1 = k1.rotate_left(15);
            k1 = k1.wrapping_mul(C2);
            h1 ^= k1;
        }
        _ => {}
    }

    h1 ^= len as u32;
    h1 ^= h1 >> 16;
    h1 = h1.wrapping_mul(0x85ebca6b);
    h1 ^= h1 >> 13;
    h1 = h1.wrapping_mul(0xc2b2ae35);
    h1 ^= h1 >> 16;

    h1 as i32
}
