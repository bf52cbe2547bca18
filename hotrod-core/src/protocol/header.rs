//! Request header encoding and message-id generation.

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::{BufMut, BytesMut};

use super::buf::{write_array, write_vint, write_vlong};
use super::constants::{MEDIA_TYPE_NONE, PROTOCOL_VERSION, REQUEST_MAGIC};

static MESSAGE_ID: AtomicU64 = AtomicU64::new(1);

/// Returns a process-wide unique message id.
///
/// Ids correlate requests with responses on a multiplexed channel, so two
/// in-flight requests must never share one regardless of which cache or
/// connection issued them.
pub fn next_message_id() -> u64 {
    MESSAGE_ID.fetch_add(1, Ordering::Relaxed)
}

/// The fixed preamble every request carries.
///
/// A fresh header is built per attempt: retries get a new message id and a
/// re-read topology id so the server sees the client's current view.
#[derive(Debug, Clone)]
pub struct RequestHeader {
    /// Correlation id echoed back in the response.
    pub message_id: u64,
    /// Request opcode.
    pub opcode: u8,
    /// Target cache name; empty selects the server's default cache.
    pub cache_name: Vec<u8>,
    /// Per-operation flag bits.
    pub flags: u32,
    /// Client intelligence level advertised to the server.
    pub intelligence: u8,
    /// Last topology id this client installed, `-1` before the first one.
    pub topology_id: i32,
}

impl RequestHeader {
    /// Builds a header for `opcode` with a freshly allocated message id.
    pub fn new(opcode: u8, cache_name: &[u8], flags: u32, intelligence: u8, topology_id: i32) -> Self {
        Self {
            message_id: next_message_id(),
            opcode,
            cache_name: cache_name.to_vec(),
            flags,
            intelligence,
            topology_id,
        }
    }

    /// Serializes the header onto `buf`.
    pub fn encode_to(&self, buf: &mut BytesMut) {
        buf.put_u8(REQUEST_MAGIC);
        write_vlong(buf, self.message_id);
        buf.put_u8(PROTOCOL_VERSION);
        buf.put_u8(self.opcode);
        write_array(buf, &self.cache_name);
        write_vint(buf, self.flags);
        buf.put_u8(self.intelligence);
        write_vint(buf, self.topology_id as u32);
        // Key and value media types: opaque byte payloads on both sides.
        buf.put_u8(MEDIA_TYPE_NONE);
        buf.put_u8(MEDIA_TYPE_NONE);
    }
}
