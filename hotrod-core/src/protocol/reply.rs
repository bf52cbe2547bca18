//! Server-frame encoding.
//!
//! The client never sends these, but in-process mock servers in tests and
//! benches need to speak the server side of the wire, and keeping the
//! encoding next to the decoder keeps the two in step.

use bytes::{BufMut, BytesMut};

use super::buf::{write_array, write_string, write_vint, write_vlong};
use super::constants::{
    CACHE_ENTRY_CREATED_EVENT, CACHE_ENTRY_MODIFIED_EVENT, ERROR_RESPONSE, NO_ERROR,
    RESPONSE_MAGIC,
};
use super::response::{EntryMetadata, PingResult};
use super::topology::TopologyUpdate;

/// Builds one response frame.
#[derive(Debug)]
pub struct ReplyBuilder {
    buf: BytesMut,
}

impl ReplyBuilder {
    /// Starts a reply header: magic, message id, opcode, status, and the
    /// topology marker (`1` + block when `topology` is given).
    pub fn new(message_id: u64, opcode: u8, status: u8, topology: Option<&TopologyUpdate>) -> Self {
        let mut buf = BytesMut::new();
        buf.put_u8(RESPONSE_MAGIC);
        write_vlong(&mut buf, message_id);
        buf.put_u8(opcode);
        buf.put_u8(status);
        match topology {
            Some(update) => {
                buf.put_u8(1);
                encode_topology(&mut buf, update);
            }
            None => buf.put_u8(0),
        }
        Self { buf }
    }

    /// Starts an error reply carrying a server message.
    pub fn error(message_id: u64, status: u8, message: &str) -> Self {
        let mut reply = Self::new(message_id, ERROR_RESPONSE, status, None);
        write_string(&mut reply.buf, message);
        reply
    }

    /// Appends a length-prefixed value.
    pub fn value(mut self, value: &[u8]) -> Self {
        write_array(&mut self.buf, value);
        self
    }

    /// Appends entry metadata in the get-with-metadata layout.
    pub fn metadata(mut self, meta: &EntryMetadata) -> Self {
        encode_metadata(&mut self.buf, meta);
        self
    }

    /// Appends a get-all style entry map.
    pub fn entries(mut self, entries: &[(Vec<u8>, Vec<u8>)]) -> Self {
        write_vint(&mut self.buf, entries.len() as u32);
        for (key, value) in entries {
            write_array(&mut self.buf, key);
            write_array(&mut self.buf, value);
        }
        self
    }

    /// Appends a size-style count.
    pub fn count(mut self, count: u64) -> Self {
        write_vlong(&mut self.buf, count);
        self
    }

    /// Appends a ping negotiation payload.
    pub fn ping(mut self, result: &PingResult) -> Self {
        self.buf.put_u8(result.version);
        self.buf.put_u8(result.key_media_type);
        self.buf.put_u8(result.value_media_type);
        write_vint(&mut self.buf, result.ops.len() as u32);
        for op in &result.ops {
            self.buf.put_u16(*op);
        }
        self
    }

    /// Appends an iteration-start id.
    pub fn iteration_id(mut self, id: &str) -> Self {
        write_string(&mut self.buf, id);
        self
    }

    /// Appends an iteration batch: finished-segment bitmap plus entries,
    /// with optional per-entry metadata.
    pub fn iteration_batch(
        mut self,
        finished_segments: &[u8],
        entries: &[(Option<EntryMetadata>, Vec<u8>, Vec<u8>)],
    ) -> Self {
        write_array(&mut self.buf, finished_segments);
        write_vint(&mut self.buf, entries.len() as u32);
        for (meta, key, value) in entries {
            if let Some(meta) = meta {
                encode_metadata(&mut self.buf, meta);
            }
            write_array(&mut self.buf, key);
            write_array(&mut self.buf, value);
        }
        self
    }

    /// Finishes the frame.
    pub fn build(self) -> BytesMut {
        self.buf
    }
}

/// Encodes an unsolicited cache event frame.
pub fn encode_event(
    opcode: u8,
    listener_id: &[u8],
    retried: bool,
    key: &[u8],
    version: i64,
) -> BytesMut {
    let mut buf = BytesMut::new();
    buf.put_u8(RESPONSE_MAGIC);
    write_vlong(&mut buf, 0);
    buf.put_u8(opcode);
    buf.put_u8(NO_ERROR);
    buf.put_u8(0);
    write_array(&mut buf, listener_id);
    buf.put_u8(0); // custom marker: plain key event
    buf.put_u8(u8::from(retried));
    write_array(&mut buf, key);
    if opcode == CACHE_ENTRY_CREATED_EVENT || opcode == CACHE_ENTRY_MODIFIED_EVENT {
        buf.put_i64(version);
    }
    buf
}

fn encode_topology(buf: &mut BytesMut, update: &TopologyUpdate) {
    write_vint(buf, update.topology_id as u32);
    write_vint(buf, update.members.len() as u32);
    for (host, port) in &update.members {
        write_string(buf, host);
        buf.put_u16(*port);
    }
    buf.put_u8(update.hash_version);
    if update.hash_version != 0 {
        write_vint(buf, update.segment_owners.len() as u32);
        for owners in &update.segment_owners {
            buf.put_u8(owners.len() as u8);
            for owner in owners {
                write_vint(buf, *owner);
            }
        }
    }
}

fn encode_metadata(buf: &mut BytesMut, meta: &EntryMetadata) {
    let mut flags = 0u8;
    if meta.lifespan.is_none() {
        flags |= 0x01;
    }
    if meta.max_idle.is_none() {
        flags |= 0x02;
    }
    buf.put_u8(flags);
    if let Some((created, lifespan)) = meta.lifespan {
        buf.put_i64(created);
        write_vint(buf, lifespan);
    }
    if let Some((last_used, max_idle)) = meta.max_idle {
        buf.put_i64(last_used);
        write_vint(buf, max_idle);
    }
    buf.put_i64(meta.version);
}
