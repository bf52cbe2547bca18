//! Operation descriptors, completion, retry and fan-out.

pub mod bulk;
mod completion;
mod retry;

pub use completion::CompletionSlot;
pub use retry::{RetryDecision, RetryState};

use bytes::BytesMut;
use hotrod_core::protocol::{next_message_id, RequestHeader, RequestPayload, ResponseShape};

/// Everything needed to put one operation on the wire and decode its reply.
///
/// A single data-carrying descriptor per call; opcode-specific behavior
/// lives in the payload enum and the registered response shape rather than
/// in a type hierarchy.
#[derive(Debug, Clone)]
pub struct OperationRequest {
    /// Request opcode.
    pub opcode: u8,
    /// Target cache name bytes.
    pub cache_name: Vec<u8>,
    /// Per-call flag bits.
    pub flags: u32,
    /// Opcode-specific body.
    pub payload: RequestPayload,
    /// Payload layout the reply will carry.
    pub shape: ResponseShape,
    /// Whether a failed attempt may be replayed. Non-idempotent steps
    /// (iteration next/end) clear this.
    pub retriable: bool,
    /// Key used for owner-first routing, when the operation has one.
    pub routing_key: Option<Vec<u8>>,
}

impl OperationRequest {
    /// Creates a retriable, unrouted descriptor.
    pub fn new(opcode: u8, cache_name: Vec<u8>, payload: RequestPayload, shape: ResponseShape) -> Self {
        Self {
            opcode,
            cache_name,
            flags: 0,
            payload,
            shape,
            retriable: true,
            routing_key: None,
        }
    }

    /// Sets the per-call flag bits.
    pub fn with_flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    /// Routes attempts to the key's primary owner first.
    pub fn with_routing_key(mut self, key: Vec<u8>) -> Self {
        self.routing_key = Some(key);
        self
    }

    /// Marks the operation as single-attempt.
    pub fn not_retriable(mut self) -> Self {
        self.retriable = false;
        self
    }

    /// Encodes one attempt: fresh message id, the given topology id.
    ///
    /// Every retry re-encodes so the server always sees a new correlation
    /// id and the client's current view id.
    pub fn encode_attempt(&self, intelligence: u8, topology_id: i32) -> (u64, BytesMut) {
        let header = RequestHeader {
            message_id: next_message_id(),
            opcode: self.opcode,
            cache_name: self.cache_name.clone(),
            flags: self.flags,
            intelligence,
            topology_id,
        };
        let mut buf = BytesMut::new();
        header.encode_to(&mut buf);
        self.payload.encode_to(&mut buf);
        (header.message_id, buf)
    }
}
