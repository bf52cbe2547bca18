//! Resumable response decoding.
//!
//! A channel feeds raw socket bytes into a [`ResponseDecoder`]; the decoder
//! hands back complete frames and otherwise remembers exactly where it
//! stopped. The state is an explicit enum plus partial-result accumulators,
//! and the source buffer is only advanced when a self-contained sub-field
//! has fully parsed, so a frame split at any byte boundary decodes
//! identically to one delivered whole.
//!
//! The wire gives no self-describing payload length, so the payload layout
//! of a reply is determined by the [`ResponseShape`] the caller registered
//! for its message id before sending the request.

use std::collections::HashMap;

use bytes::BytesMut;
use tokio_util::codec::Decoder;
use tracing::trace;

use super::buf::{take_array, take_i64, take_string, take_u16, take_u8, take_vint, take_vlong};
use super::constants::{
    has_previous, is_event_opcode, opcode_name, CACHE_ENTRY_CREATED_EVENT,
    CACHE_ENTRY_MODIFIED_EVENT, ERROR_RESPONSE, NO_ERROR, RESPONSE_MAGIC,
};
use super::topology::{TopologyDecode, TopologyUpdate};
use crate::error::{HotRodError, Result};

/// Expected payload layout for a pending request, keyed by message id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    /// No body; the status byte is the whole answer.
    Empty,
    /// A value array when the status is a success, nothing otherwise.
    OptionalValue,
    /// A previous-value array only when the status says one is attached.
    PreviousValue,
    /// Metadata block followed by the value, on success.
    ValueWithMetadata,
    /// Entry-count-prefixed key/value pairs.
    EntryMap,
    /// A varlong count.
    Count,
    /// Ping negotiation payload.
    Ping,
    /// An iteration id string.
    IterationStart,
    /// Finished-segment bitmap plus an entry batch.
    IterationBatch {
        /// Whether each entry carries a metadata block.
        metadata: bool,
    },
}

/// Per-entry expiration and version metadata.
///
/// `None` in a dimension means the entry never expires along it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryMetadata {
    /// Creation timestamp (millis) and lifespan (seconds).
    pub lifespan: Option<(i64, u32)>,
    /// Last-used timestamp (millis) and max idle (seconds).
    pub max_idle: Option<(i64, u32)>,
    /// CAS version of the entry.
    pub version: i64,
}

/// Ping negotiation result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingResult {
    /// Protocol version the server settled on.
    pub version: u8,
    /// Server-side key media-type tag.
    pub key_media_type: u8,
    /// Server-side value media-type tag.
    pub value_media_type: u8,
    /// Opcodes the server supports.
    pub ops: Vec<u16>,
}

/// One entry of an iteration batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IterationEntry {
    /// Entry metadata when the iteration requested it.
    pub metadata: Option<EntryMetadata>,
    /// Entry key.
    pub key: Vec<u8>,
    /// Entry value.
    pub value: Vec<u8>,
}

/// Decoded reply body, per [`ResponseShape`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponsePayload {
    /// No body.
    None,
    /// A single value array.
    Value(Vec<u8>),
    /// Value plus its metadata.
    ValueWithMetadata {
        /// The metadata block preceding the value.
        metadata: EntryMetadata,
        /// The entry value.
        value: Vec<u8>,
    },
    /// Key/value pairs of a multi-key read.
    Entries(Vec<(Vec<u8>, Vec<u8>)>),
    /// A cache-wide count.
    Count(u64),
    /// Ping negotiation payload.
    Ping(PingResult),
    /// Iteration id handed out by the server.
    IterationStart(String),
    /// One batch of an open iteration.
    IterationBatch {
        /// Segments fully drained by this batch.
        finished_segments: Vec<u8>,
        /// Entries in the batch; empty signals the iteration is done.
        entries: Vec<IterationEntry>,
    },
}

/// An unsolicited cache event frame from a listener channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEventFrame {
    /// Event opcode (created/modified/removed/expired).
    pub opcode: u8,
    /// Listener the event belongs to.
    pub listener_id: Vec<u8>,
    /// Server marked this delivery as a retransmission.
    pub retried: bool,
    /// Key of the affected entry.
    pub key: Vec<u8>,
    /// New entry version; 0 for removal and expiry events.
    pub version: i64,
}

/// A complete frame off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseFrame {
    /// A reply to a request this client sent.
    Reply {
        /// Correlation id echoed from the request.
        message_id: u64,
        /// Response opcode.
        opcode: u8,
        /// Status byte.
        status: u8,
        /// Topology block, when the header flagged a newer view.
        topology: Option<TopologyUpdate>,
        /// Decoded body.
        payload: ResponsePayload,
    },
    /// An error reply carrying a server message.
    Error {
        /// Correlation id echoed from the request.
        message_id: u64,
        /// Error status byte.
        status: u8,
        /// Server-provided message.
        message: String,
        /// Topology block, when present.
        topology: Option<TopologyUpdate>,
    },
    /// An unsolicited cache event.
    Event(CacheEventFrame),
}

#[derive(Debug, Default)]
struct HeaderDecode {
    magic_seen: bool,
    message_id: Option<u64>,
    opcode: Option<u8>,
    status: Option<u8>,
}

#[derive(Debug, Clone, Copy)]
struct FrameHead {
    message_id: u64,
    opcode: u8,
    status: u8,
}

#[derive(Debug, Default)]
struct MetadataProgress {
    flags: Option<u8>,
    created: Option<i64>,
    lifespan: Option<u32>,
    last_used: Option<i64>,
    max_idle: Option<u32>,
}

impl MetadataProgress {
    fn advance(&mut self, buf: &mut BytesMut) -> Option<EntryMetadata> {
        let flags = match self.flags {
            Some(f) => f,
            None => {
                let f = take_u8(buf)?;
                self.flags = Some(f);
                f
            }
        };
        if flags & 0x01 == 0 {
            if self.created.is_none() {
                self.created = Some(take_i64(buf)?);
            }
            if self.lifespan.is_none() {
                self.lifespan = Some(take_vint(buf)?);
            }
        }
        if flags & 0x02 == 0 {
            if self.last_used.is_none() {
                self.last_used = Some(take_i64(buf)?);
            }
            if self.max_idle.is_none() {
                self.max_idle = Some(take_vint(buf)?);
            }
        }
        let version = take_i64(buf)?;
        Some(EntryMetadata {
            lifespan: self.created.zip(self.lifespan),
            max_idle: self.last_used.zip(self.max_idle),
            version,
        })
    }
}

#[derive(Debug, Default)]
struct EntryProgress {
    metadata: Option<EntryMetadata>,
    meta_progress: MetadataProgress,
    key: Option<Vec<u8>>,
}

#[derive(Debug)]
enum PayloadProgress {
    Empty,
    OptionalValue,
    PreviousValue,
    ValueWithMetadata {
        progress: MetadataProgress,
        metadata: Option<EntryMetadata>,
    },
    EntryMap {
        count: Option<u32>,
        entries: Vec<(Vec<u8>, Vec<u8>)>,
        pending_key: Option<Vec<u8>>,
    },
    Count,
    Ping {
        version: Option<u8>,
        key_media: Option<u8>,
        value_media: Option<u8>,
        op_count: Option<u32>,
        ops: Vec<u16>,
    },
    IterationStart,
    IterationBatch {
        with_metadata: bool,
        finished_segments: Option<Vec<u8>>,
        count: Option<u32>,
        entries: Vec<IterationEntry>,
        current: EntryProgress,
    },
}

impl PayloadProgress {
    fn for_shape(shape: ResponseShape) -> Self {
        match shape {
            ResponseShape::Empty => PayloadProgress::Empty,
            ResponseShape::OptionalValue => PayloadProgress::OptionalValue,
            ResponseShape::PreviousValue => PayloadProgress::PreviousValue,
            ResponseShape::ValueWithMetadata => PayloadProgress::ValueWithMetadata {
                progress: MetadataProgress::default(),
                metadata: None,
            },
            ResponseShape::EntryMap => PayloadProgress::EntryMap {
                count: None,
                entries: Vec::new(),
                pending_key: None,
            },
            ResponseShape::Count => PayloadProgress::Count,
            ResponseShape::Ping => PayloadProgress::Ping {
                version: None,
                key_media: None,
                value_media: None,
                op_count: None,
                ops: Vec::new(),
            },
            ResponseShape::IterationStart => PayloadProgress::IterationStart,
            ResponseShape::IterationBatch { metadata } => PayloadProgress::IterationBatch {
                with_metadata: metadata,
                finished_segments: None,
                count: None,
                entries: Vec::new(),
                current: EntryProgress::default(),
            },
        }
    }

    fn advance(&mut self, buf: &mut BytesMut, status: u8) -> Option<ResponsePayload> {
        match self {
            PayloadProgress::Empty => Some(ResponsePayload::None),
            PayloadProgress::OptionalValue => {
                if status == NO_ERROR {
                    take_array(buf).map(ResponsePayload::Value)
                } else {
                    Some(ResponsePayload::None)
                }
            }
            PayloadProgress::PreviousValue => {
                if has_previous(status) {
                    take_array(buf).map(ResponsePayload::Value)
                } else {
                    Some(ResponsePayload::None)
                }
            }
            PayloadProgress::ValueWithMetadata { progress, metadata } => {
                if status != NO_ERROR {
                    return Some(ResponsePayload::None);
                }
                let meta = match metadata {
                    Some(meta) => *meta,
                    None => {
                        let meta = progress.advance(buf)?;
                        *metadata = Some(meta);
                        meta
                    }
                };
                let value = take_array(buf)?;
                Some(ResponsePayload::ValueWithMetadata {
                    metadata: meta,
                    value,
                })
            }
            PayloadProgress::EntryMap {
                count,
                entries,
                pending_key,
            } => {
                if status != NO_ERROR {
                    return Some(ResponsePayload::None);
                }
                let total = match count {
                    Some(n) => *n,
                    None => {
                        let n = take_vint(buf)?;
                        *count = Some(n);
                        n
                    }
                };
                while (entries.len() as u32) < total {
                    let key = match pending_key.take() {
                        Some(key) => key,
                        None => take_array(buf)?,
                    };
                    match take_array(buf) {
                        Some(value) => entries.push((key, value)),
                        None => {
                            *pending_key = Some(key);
                            return None;
                        }
                    }
                }
                Some(ResponsePayload::Entries(std::mem::take(entries)))
            }
            PayloadProgress::Count => {
                if status != NO_ERROR {
                    return Some(ResponsePayload::None);
                }
                take_vlong(buf).map(ResponsePayload::Count)
            }
            PayloadProgress::Ping {
                version,
                key_media,
                value_media,
                op_count,
                ops,
            } => {
                if status != NO_ERROR {
                    return Some(ResponsePayload::None);
                }
                if version.is_none() {
                    *version = Some(take_u8(buf)?);
                }
                if key_media.is_none() {
                    *key_media = Some(take_u8(buf)?);
                }
                if value_media.is_none() {
                    *value_media = Some(take_u8(buf)?);
                }
                let total = match op_count {
                    Some(n) => *n,
                    None => {
                        let n = take_vint(buf)?;
                        *op_count = Some(n);
                        n
                    }
                };
                while (ops.len() as u32) < total {
                    ops.push(take_u16(buf)?);
                }
                Some(ResponsePayload::Ping(PingResult {
                    version: version.unwrap_or(0),
                    key_media_type: key_media.unwrap_or(0),
                    value_media_type: value_media.unwrap_or(0),
                    ops: std::mem::take(ops),
                }))
            }
            PayloadProgress::IterationStart => {
                if status != NO_ERROR {
                    return Some(ResponsePayload::None);
                }
                take_string(buf).map(ResponsePayload::IterationStart)
            }
            PayloadProgress::IterationBatch {
                with_metadata,
                finished_segments,
                count,
                entries,
                current,
            } => {
                if status != NO_ERROR {
                    return Some(ResponsePayload::None);
                }
                if finished_segments.is_none() {
                    *finished_segments = Some(take_array(buf)?);
                }
                let total = match count {
                    Some(n) => *n,
                    None => {
                        let n = take_vint(buf)?;
                        *count = Some(n);
                        n
                    }
                };
                while (entries.len() as u32) < total {
                    if *with_metadata && current.metadata.is_none() {
                        current.metadata = Some(current.meta_progress.advance(buf)?);
                    }
                    if current.key.is_none() {
                        current.key = Some(take_array(buf)?);
                    }
                    let value = take_array(buf)?;
                    let done = std::mem::take(current);
                    entries.push(IterationEntry {
                        metadata: done.metadata,
                        key: done.key.unwrap_or_default(),
                        value,
                    });
                }
                Some(ResponsePayload::IterationBatch {
                    finished_segments: finished_segments.take().unwrap_or_default(),
                    entries: std::mem::take(entries),
                })
            }
        }
    }
}

#[derive(Debug, Default)]
struct EventProgress {
    listener_id: Option<Vec<u8>>,
    custom: Option<u8>,
    retried: Option<bool>,
    key: Option<Vec<u8>>,
}

#[derive(Debug)]
enum DecodeState {
    Header(HeaderDecode),
    Topology {
        head: FrameHead,
        decode: TopologyDecode,
    },
    ErrorBody {
        head: FrameHead,
        topology: Option<TopologyUpdate>,
    },
    Payload {
        head: FrameHead,
        topology: Option<TopologyUpdate>,
        progress: PayloadProgress,
    },
    Event {
        opcode: u8,
        progress: EventProgress,
    },
}

/// Streaming decoder for one channel.
///
/// Feed bytes with [`decode`](Self::decode) (or through the
/// [`tokio_util::codec::Decoder`] impl); register the payload layout of
/// every request with [`expect`](Self::expect) before its reply can arrive.
#[derive(Debug)]
pub struct ResponseDecoder {
    state: DecodeState,
    expectations: HashMap<u64, ResponseShape>,
    intelligence: u8,
}

impl ResponseDecoder {
    /// Creates a decoder for a channel whose requests announce the given
    /// client intelligence (it determines whether topology blocks carry a
    /// segment table).
    pub fn new(intelligence: u8) -> Self {
        Self {
            state: DecodeState::Header(HeaderDecode::default()),
            expectations: HashMap::new(),
            intelligence,
        }
    }

    /// Registers the payload layout to expect for `message_id`.
    pub fn expect(&mut self, message_id: u64, shape: ResponseShape) {
        self.expectations.insert(message_id, shape);
    }

    /// Drops a registered expectation (the request was abandoned).
    pub fn forget(&mut self, message_id: u64) {
        self.expectations.remove(&message_id);
    }

    /// Consumes as many complete fields as `buf` holds.
    ///
    /// `Ok(None)` means a frame is still in flight and more bytes are
    /// needed; already-consumed fields are remembered, never re-parsed.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<ResponseFrame>> {
        loop {
            match &mut self.state {
                DecodeState::Header(header) => {
                    if !header.magic_seen {
                        let magic = match take_u8(buf) {
                            Some(m) => m,
                            None => return Ok(None),
                        };
                        if magic != RESPONSE_MAGIC {
                            return Err(HotRodError::Protocol(format!(
                                "bad response magic 0x{magic:02X}"
                            )));
                        }
                        header.magic_seen = true;
                    }
                    if header.message_id.is_none() {
                        match take_vlong(buf) {
                            Some(id) => header.message_id = Some(id),
                            None => return Ok(None),
                        }
                    }
                    if header.opcode.is_none() {
                        match take_u8(buf) {
                            Some(op) => header.opcode = Some(op),
                            None => return Ok(None),
                        }
                    }
                    if header.status.is_none() {
                        match take_u8(buf) {
                            Some(status) => header.status = Some(status),
                            None => return Ok(None),
                        }
                    }
                    let marker = match take_u8(buf) {
                        Some(m) => m,
                        None => return Ok(None),
                    };
                    let head = FrameHead {
                        message_id: header.message_id.unwrap_or(0),
                        opcode: header.opcode.unwrap_or(0),
                        status: header.status.unwrap_or(0),
                    };
                    trace!(
                        message_id = head.message_id,
                        opcode = opcode_name(head.opcode),
                        status = head.status,
                        topology_changed = marker != 0,
                        "response header"
                    );
                    if is_event_opcode(head.opcode) {
                        self.state = DecodeState::Event {
                            opcode: head.opcode,
                            progress: EventProgress::default(),
                        };
                    } else if marker != 0 {
                        self.state = DecodeState::Topology {
                            head,
                            decode: TopologyDecode::new(),
                        };
                    } else {
                        self.state = self.body_state(head, None)?;
                    }
                }
                DecodeState::Topology { head, decode } => {
                    match decode.advance(buf, self.intelligence) {
                        Some(update) => {
                            let head = *head;
                            self.state = self.body_state(head, Some(update))?;
                        }
                        None => return Ok(None),
                    }
                }
                DecodeState::ErrorBody { head, topology } => {
                    let message = match take_string(buf) {
                        Some(m) => m,
                        None => return Ok(None),
                    };
                    let frame = ResponseFrame::Error {
                        message_id: head.message_id,
                        status: head.status,
                        message,
                        topology: topology.take(),
                    };
                    self.finish(frame.message_id());
                    return Ok(Some(frame));
                }
                DecodeState::Payload {
                    head,
                    topology,
                    progress,
                } => match progress.advance(buf, head.status) {
                    Some(payload) => {
                        let frame = ResponseFrame::Reply {
                            message_id: head.message_id,
                            opcode: head.opcode,
                            status: head.status,
                            topology: topology.take(),
                            payload,
                        };
                        self.finish(frame.message_id());
                        return Ok(Some(frame));
                    }
                    None => return Ok(None),
                },
                DecodeState::Event { opcode, progress } => {
                    if progress.listener_id.is_none() {
                        match take_array(buf) {
                            Some(id) => progress.listener_id = Some(id),
                            None => return Ok(None),
                        }
                    }
                    if progress.custom.is_none() {
                        match take_u8(buf) {
                            Some(c) => {
                                // Custom/raw events carry a converter-defined
                                // body this decoder has no layout for.
                                if c != 0 {
                                    return Err(HotRodError::Protocol(format!(
                                        "unsupported custom event marker 0x{c:02X}"
                                    )));
                                }
                                progress.custom = Some(c);
                            }
                            None => return Ok(None),
                        }
                    }
                    if progress.retried.is_none() {
                        match take_u8(buf) {
                            Some(r) => progress.retried = Some(r != 0),
                            None => return Ok(None),
                        }
                    }
                    if progress.key.is_none() {
                        match take_array(buf) {
                            Some(key) => progress.key = Some(key),
                            None => return Ok(None),
                        }
                    }
                    let versioned = *opcode == CACHE_ENTRY_CREATED_EVENT
                        || *opcode == CACHE_ENTRY_MODIFIED_EVENT;
                    let version = if versioned {
                        match take_i64(buf) {
                            Some(v) => v,
                            None => return Ok(None),
                        }
                    } else {
                        0
                    };
                    let frame = ResponseFrame::Event(CacheEventFrame {
                        opcode: *opcode,
                        listener_id: progress.listener_id.take().unwrap_or_default(),
                        retried: progress.retried.unwrap_or(false),
                        key: progress.key.take().unwrap_or_default(),
                        version,
                    });
                    self.state = DecodeState::Header(HeaderDecode::default());
                    return Ok(Some(frame));
                }
            }
        }
    }

    /// Picks the body state for a header, via the registered shape.
    fn body_state(
        &mut self,
        head: FrameHead,
        topology: Option<TopologyUpdate>,
    ) -> Result<DecodeState> {
        if head.opcode == ERROR_RESPONSE {
            return Ok(DecodeState::ErrorBody { head, topology });
        }
        let shape = self
            .expectations
            .get(&head.message_id)
            .copied()
            .ok_or_else(|| {
                HotRodError::Protocol(format!(
                    "unsolicited response for message id {}",
                    head.message_id
                ))
            })?;
        Ok(DecodeState::Payload {
            head,
            topology,
            progress: PayloadProgress::for_shape(shape),
        })
    }

    fn finish(&mut self, message_id: u64) {
        self.expectations.remove(&message_id);
        self.state = DecodeState::Header(HeaderDecode::default());
    }
}

impl ResponseFrame {
    /// Correlation id of the frame; 0 for unsolicited events.
    pub fn message_id(&self) -> u64 {
        match self {
            ResponseFrame::Reply { message_id, .. } | ResponseFrame::Error { message_id, .. } => {
                *message_id
            }
            ResponseFrame::Event(_) => 0,
        }
    }

    /// Takes the topology block out of the frame, if one was attached.
    pub fn take_topology(&mut self) -> Option<TopologyUpdate> {
        match self {
            ResponseFrame::Reply { topology, .. } | ResponseFrame::Error { topology, .. } => {
                topology.take()
            }
            ResponseFrame::Event(_) => None,
        }
    }
}

impl Decoder for ResponseDecoder {
    type Item = ResponseFrame;
    type Error = HotRodError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<ResponseFrame>> {
        ResponseDecoder::decode(self, src)
    }
}
