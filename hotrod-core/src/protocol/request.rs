//! Opcode-specific request payload encoding.
//!
//! Payloads are data-only enum variants rather than a type per opcode; the
//! opcode lives in the header, the payload here carries only the fields that
//! follow it on the wire.

use bytes::{BufMut, BytesMut};

use super::buf::{write_array, write_string, write_vint, write_vlong};
use super::constants::{TIME_UNIT_DEFAULT, TIME_UNIT_INFINITE, TIME_UNIT_SECONDS};

/// One expiration dimension (lifespan or max-idle).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Lifetime {
    /// Use the server's configured default.
    #[default]
    Default,
    /// Never expire.
    Infinite,
    /// Expire after the given number of seconds.
    Seconds(u64),
}

impl Lifetime {
    fn unit(self) -> u8 {
        match self {
            Lifetime::Default => TIME_UNIT_DEFAULT,
            Lifetime::Infinite => TIME_UNIT_INFINITE,
            Lifetime::Seconds(_) => TIME_UNIT_SECONDS,
        }
    }
}

/// Entry expiration carried by every write that stores a value.
///
/// Encoded as a single units byte (lifespan nibble high, max-idle nibble
/// low) followed by a varint duration for each dimension that has one; the
/// default and infinite sentinels suppress their duration field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Expiration {
    /// Total time to live.
    pub lifespan: Lifetime,
    /// Maximum idle time between touches.
    pub max_idle: Lifetime,
}

impl Expiration {
    /// Expiration deferring both dimensions to server defaults.
    pub const DEFAULT: Self = Self {
        lifespan: Lifetime::Default,
        max_idle: Lifetime::Default,
    };

    /// Lifespan in seconds, max-idle left at the server default.
    pub fn lifespan_secs(secs: u64) -> Self {
        Self {
            lifespan: Lifetime::Seconds(secs),
            max_idle: Lifetime::Default,
        }
    }

    fn encode_to(&self, buf: &mut BytesMut) {
        buf.put_u8((self.lifespan.unit() << 4) | self.max_idle.unit());
        if let Lifetime::Seconds(secs) = self.lifespan {
            write_vlong(buf, secs);
        }
        if let Lifetime::Seconds(secs) = self.max_idle {
            write_vlong(buf, secs);
        }
    }
}

/// A named server-side factory with opaque parameter blocks, used by
/// listener registration (filter/converter) and iteration (filter).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedFactory {
    /// Factory name as deployed on the server.
    pub name: String,
    /// Marshalled parameters handed to the factory.
    pub params: Vec<Vec<u8>>,
}

/// Writes an optional factory: an empty name means "none" and carries no
/// parameter block.
fn write_factory(buf: &mut BytesMut, factory: Option<&NamedFactory>) {
    match factory {
        Some(f) => {
            write_string(buf, &f.name);
            buf.put_u8(f.params.len() as u8);
            for param in &f.params {
                write_array(buf, param);
            }
        }
        None => write_string(buf, ""),
    }
}

/// The body that follows the request header, per opcode family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestPayload {
    /// No body (clear, size, ping).
    Empty,
    /// A bare key (get, remove, contains-key, get-with-metadata).
    Key {
        /// Entry key.
        key: Vec<u8>,
    },
    /// Key, expiration and value (put, put-if-absent, replace).
    KeyValue {
        /// Entry key.
        key: Vec<u8>,
        /// Entry expiration.
        expiration: Expiration,
        /// Entry value.
        value: Vec<u8>,
    },
    /// Versioned write (replace-if-unmodified).
    KeyValueVersion {
        /// Entry key.
        key: Vec<u8>,
        /// Entry expiration.
        expiration: Expiration,
        /// Version the entry must still carry for the write to apply.
        version: i64,
        /// Replacement value.
        value: Vec<u8>,
    },
    /// Versioned removal (remove-if-unmodified).
    KeyVersion {
        /// Entry key.
        key: Vec<u8>,
        /// Version the entry must still carry for the removal to apply.
        version: i64,
    },
    /// Multi-entry write (put-all); one expiration covers every entry.
    MultiEntry {
        /// Expiration applied to all entries.
        expiration: Expiration,
        /// Key/value pairs to store.
        entries: Vec<(Vec<u8>, Vec<u8>)>,
    },
    /// Multi-key read (get-all).
    KeySet {
        /// Keys to fetch.
        keys: Vec<Vec<u8>>,
    },
    /// Listener registration handshake.
    AddListener {
        /// Client-generated 128-bit listener id.
        listener_id: Vec<u8>,
        /// Whether the server replays current cache state as events.
        include_state: bool,
        /// Server-side event filter factory.
        filter: Option<NamedFactory>,
        /// Server-side event converter factory.
        converter: Option<NamedFactory>,
        /// Events carry raw unconverted data.
        raw_data: bool,
        /// Bitset of event kinds the listener wants.
        interests: u32,
        /// Bloom-filter bits for near-cache style listeners, 0 = none.
        bloom_bits: u32,
    },
    /// Listener removal.
    RemoveListener {
        /// Id the listener was registered under.
        listener_id: Vec<u8>,
    },
    /// Opens a server-side entry iterator.
    IterationStart {
        /// Segment bitmap to iterate; empty = all segments.
        segments: Vec<u8>,
        /// Optional server-side entry filter.
        filter: Option<NamedFactory>,
        /// Entries per batch.
        batch_size: u32,
        /// Whether batches carry per-entry metadata.
        metadata: bool,
    },
    /// Fetches the next batch of an open iterator.
    IterationNext {
        /// Server-assigned iterator id.
        iteration_id: String,
    },
    /// Closes an open iterator.
    IterationEnd {
        /// Server-assigned iterator id.
        iteration_id: String,
    },
}

impl RequestPayload {
    /// Serializes the payload onto `buf`.
    pub fn encode_to(&self, buf: &mut BytesMut) {
        match self {
            RequestPayload::Empty => {}
            RequestPayload::Key { key } => {
                write_array(buf, key);
            }
            RequestPayload::KeyValue {
                key,
                expiration,
                value,
            } => {
                write_array(buf, key);
                expiration.encode_to(buf);
                write_array(buf, value);
            }
            RequestPayload::KeyValueVersion {
                key,
                expiration,
                version,
                value,
            } => {
                write_array(buf, key);
                expiration.encode_to(buf);
                buf.put_i64(*version);
                write_array(buf, value);
            }
            RequestPayload::KeyVersion { key, version } => {
                write_array(buf, key);
                buf.put_i64(*version);
            }
            RequestPayload::MultiEntry {
                expiration,
                entries,
            } => {
                expiration.encode_to(buf);
                write_vint(buf, entries.len() as u32);
                for (key, value) in entries {
                    write_array(buf, key);
                    write_array(buf, value);
                }
            }
            RequestPayload::KeySet { keys } => {
                write_vint(buf, keys.len() as u32);
                for key in keys {
                    write_array(buf, key);
                }
            }
            RequestPayload::AddListener {
                listener_id,
                include_state,
                filter,
                converter,
                raw_data,
                interests,
                bloom_bits,
            } => {
                write_array(buf, listener_id);
                buf.put_u8(u8::from(*include_state));
                write_factory(buf, filter.as_ref());
                write_factory(buf, converter.as_ref());
                buf.put_u8(u8::from(*raw_data));
                write_vint(buf, *interests);
                write_vint(buf, *bloom_bits);
            }
            RequestPayload::RemoveListener { listener_id } => {
                write_array(buf, listener_id);
            }
            RequestPayload::IterationStart {
                segments,
                filter,
                batch_size,
                metadata,
            } => {
                write_array(buf, segments);
                write_factory(buf, filter.as_ref());
                write_vint(buf, *batch_size);
                buf.put_u8(u8::from(*metadata));
            }
            RequestPayload::IterationNext { iteration_id }
            | RequestPayload::IterationEnd { iteration_id } => {
                write_string(buf, iteration_id);
            }
        }
    }
}
