//! Topology block decoding.
//!
//! A response whose header sets the topology-changed marker carries a full
//! cluster view before the operation payload. The block can arrive split
//! across reads, so decoding keeps an explicit accumulator and commits the
//! source buffer one field at a time.

use bytes::BytesMut;

use super::buf::{take_string, take_u16, take_u8, take_vint};
use super::constants::INTELLIGENCE_HASH_DISTRIBUTION_AWARE;

/// A decoded cluster view, forwarded to the client's topology state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyUpdate {
    /// Server-assigned view id.
    pub topology_id: i32,
    /// Cluster members as host/port pairs.
    pub members: Vec<(String, u16)>,
    /// Consistent-hash function version; 0 when the server sent no
    /// segment table.
    pub hash_version: u8,
    /// Per-segment owner lists as indexes into `members`, primary first.
    pub segment_owners: Vec<Vec<u32>>,
}

/// Partial progress through a topology block.
///
/// Fields fill in wire order; already-parsed members and segments are never
/// re-read when more bytes arrive.
#[derive(Debug, Default)]
pub struct TopologyDecode {
    topology_id: Option<i32>,
    member_count: Option<u32>,
    members: Vec<(String, u16)>,
    pending_host: Option<String>,
    hash_version: Option<u8>,
    segment_count: Option<u32>,
    segment_owners: Vec<Vec<u32>>,
    current_owners: Vec<u32>,
    current_owner_count: Option<u8>,
}

impl TopologyDecode {
    /// Starts a fresh topology block decode.
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumes as much of the block as `buf` holds.
    ///
    /// Returns the finished update, or `None` when more bytes are needed;
    /// in the latter case all complete fields have been consumed from `buf`
    /// and recorded here. The segment table is only present when the client
    /// announced `intelligence` of hash-distribution-aware.
    pub fn advance(&mut self, buf: &mut BytesMut, intelligence: u8) -> Option<TopologyUpdate> {
        let topology_id = match self.topology_id {
            Some(id) => id,
            None => {
                let id = take_vint(buf)? as i32;
                self.topology_id = Some(id);
                id
            }
        };
        let member_count = match self.member_count {
            Some(n) => n,
            None => {
                let n = take_vint(buf)?;
                self.member_count = Some(n);
                n
            }
        };
        while (self.members.len() as u32) < member_count {
            let host = match self.pending_host.take() {
                Some(host) => host,
                None => take_string(buf)?,
            };
            match take_u16(buf) {
                Some(port) => self.members.push((host, port)),
                None => {
                    self.pending_host = Some(host);
                    return None;
                }
            }
        }

        if intelligence == INTELLIGENCE_HASH_DISTRIBUTION_AWARE {
            let hash_version = match self.hash_version {
                Some(v) => v,
                None => {
                    let v = take_u8(buf)?;
                    self.hash_version = Some(v);
                    v
                }
            };
            if hash_version != 0 {
                let segment_count = match self.segment_count {
                    Some(n) => n,
                    None => {
                        let n = take_vint(buf)?;
                        self.segment_count = Some(n);
                        n
                    }
                };
                while (self.segment_owners.len() as u32) < segment_count {
                    let owner_count = match self.current_owner_count {
                        Some(n) => n,
                        None => {
                            let n = take_u8(buf)?;
                            self.current_owner_count = Some(n);
                            n
                        }
                    };
                    while (self.current_owners.len() as u8) < owner_count {
                        self.current_owners.push(take_vint(buf)?);
                    }
                    self.segment_owners.push(std::mem::take(&mut self.current_owners));
                    self.current_owner_count = None;
                }
            }
        }

        Some(TopologyUpdate {
            topology_id,
            members: std::mem::take(&mut self.members),
            hash_version: self.hash_version.unwrap_or(0),
            segment_owners: std::mem::take(&mut self.segment_owners),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::buf::{write_string, write_vint};
    use crate::protocol::constants::INTELLIGENCE_TOPOLOGY_AWARE;
    use bytes::BufMut;

    fn encode_block(update: &TopologyUpdate, with_segments: bool) -> BytesMut {
        let mut buf = BytesMut::new();
        write_vint(&mut buf, update.topology_id as u32);
        write_vint(&mut buf, update.members.len() as u32);
        for (host, port) in &update.members {
            write_string(&mut buf, host);
            buf.put_u16(*port);
        }
        if with_segments {
            buf.put_u8(update.hash_version);
            if update.hash_version != 0 {
                write_vint(&mut buf, update.segment_owners.len() as u32);
                for owners in &update.segment_owners {
                    buf.put_u8(owners.len() as u8);
                    for owner in owners {
                        write_vint(&mut buf, *owner);
                    }
                }
            }
        }
        buf
    }

    fn sample() -> TopologyUpdate {
        TopologyUpdate {
            topology_id: 42,
            members: vec![
                ("127.0.0.1".to_string(), 11222),
                ("127.0.0.2".to_string(), 11222),
            ],
            hash_version: 3,
            segment_owners: vec![vec![0, 1], vec![1, 0], vec![0]],
        }
    }

    #[test]
    fn test_decode_full_block() {
        let update = sample();
        let mut buf = encode_block(&update, true);
        let mut decode = TopologyDecode::new();
        let result = decode.advance(&mut buf, INTELLIGENCE_HASH_DISTRIBUTION_AWARE);
        assert_eq!(result, Some(update));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_without_segment_table() {
        let mut update = sample();
        update.hash_version = 0;
        update.segment_owners = Vec::new();
        let mut buf = encode_block(&update, false);
        let mut decode = TopologyDecode::new();
        let result = decode.advance(&mut buf, INTELLIGENCE_TOPOLOGY_AWARE);
        assert_eq!(result, Some(update));
    }

    #[test]
    fn test_decode_one_byte_at_a_time() {
        let update = sample();
        let encoded = encode_block(&update, true);
        let mut decode = TopologyDecode::new();
        let mut buf = BytesMut::new();
        let mut result = None;
        for (i, byte) in encoded.iter().enumerate() {
            buf.put_u8(*byte);
            result = decode.advance(&mut buf, INTELLIGENCE_HASH_DISTRIBUTION_AWARE);
            if i + 1 < encoded.len() {
                assert!(result.is_none());
            }
        }
        assert_eq!(result, Some(update));
    }

    #[test]
    fn test_negative_topology_id() {
        let mut update = sample();
        update.topology_id = -1;
        let mut buf = encode_block(&update, true);
        let mut decode = TopologyDecode::new();
        let result = decode.advance(&mut buf, INTELLIGENCE_HASH_DISTRIBUTION_AWARE);
        assert_eq!(result.map(|u| u.topology_id), Some(-1));
    }
}
