//! Core wire types for the Hot Rod protocol.

#![warn(missing_docs)]

pub mod error;
pub mod protocol;

pub use error::{HotRodError, Result};
pub use protocol::{
    Expiration, Lifetime, RequestHeader, RequestPayload, ResponseDecoder, ResponseFrame,
    ResponsePayload, ResponseShape, TopologyUpdate,
};
