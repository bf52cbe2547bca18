//! Hot Rod binary protocol implementation.
//!
//! This module provides request encoding and the resumable response decoder
//! for talking to Hot Rod servers over TCP.

pub mod buf;
pub mod constants;
mod header;
pub mod reply;
mod request;
mod response;
mod topology;

pub use buf::WireCursor;
pub use constants::*;
pub use header::{next_message_id, RequestHeader};
pub use reply::{encode_event, ReplyBuilder};
pub use request::{Expiration, Lifetime, NamedFactory, RequestPayload};
pub use response::{
    CacheEventFrame, EntryMetadata, IterationEntry, PingResult, ResponseDecoder, ResponseFrame,
    ResponsePayload, ResponseShape,
};
pub use topology::{TopologyDecode, TopologyUpdate};
