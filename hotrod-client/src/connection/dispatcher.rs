//! One request/response exchange on a checked-out channel.

use std::sync::Arc;

use hotrod_core::protocol::{opcode_name, ResponseFrame, ResponsePayload, INVALID_ITERATION};
use hotrod_core::{HotRodError, Result};
use tracing::trace;

use crate::cluster::TopologyState;
use crate::ops::OperationRequest;

use super::channel::Channel;

/// The decoded outcome of a successful exchange.
#[derive(Debug)]
pub struct Reply {
    /// Response opcode.
    pub opcode: u8,
    /// Status byte; always a non-error status.
    pub status: u8,
    /// Decoded body.
    pub payload: ResponsePayload,
}

/// Sends one attempt of `op` and reads its reply.
///
/// Encodes a fresh header against the current topology id, registers the
/// expected payload shape, then reads frames until the matching reply
/// arrives. Topology blocks piggybacked on the reply are offered to
/// `topology` regardless of the reply's outcome. An event frame here is a
/// protocol violation: request channels never carry listener traffic.
pub async fn dispatch(
    channel: &mut Channel,
    topology: &Arc<TopologyState>,
    op: &OperationRequest,
    intelligence: u8,
) -> Result<Reply> {
    let (message_id, frame) = op.encode_attempt(intelligence, topology.topology_id());
    trace!(
        message_id,
        opcode = opcode_name(op.opcode),
        address = %channel.addr(),
        "dispatching request"
    );
    channel.expect(message_id, op.shape);
    if let Err(e) = channel.send(&frame).await {
        channel.forget(message_id);
        return Err(e);
    }

    let mut response = channel.receive().await?;
    if let Some(update) = response.take_topology() {
        topology.try_install(&update);
    }
    match response {
        ResponseFrame::Reply {
            message_id: reply_id,
            opcode,
            status,
            payload,
            ..
        } => {
            if reply_id != message_id {
                return Err(HotRodError::Protocol(format!(
                    "reply for message id {reply_id}, expected {message_id}"
                )));
            }
            if status == INVALID_ITERATION {
                return Err(HotRodError::InvalidIteration(format!(
                    "server no longer tracks this iteration (message id {message_id})"
                )));
            }
            Ok(Reply {
                opcode,
                status,
                payload,
            })
        }
        ResponseFrame::Error {
            message_id: reply_id,
            status,
            message,
            ..
        } => {
            // Error frames bypass the expectation table.
            channel.forget(message_id);
            if reply_id != message_id && reply_id != 0 {
                return Err(HotRodError::Protocol(format!(
                    "error reply for message id {reply_id}, expected {message_id}"
                )));
            }
            Err(HotRodError::Remote { status, message })
        }
        ResponseFrame::Event(event) => Err(HotRodError::Protocol(format!(
            "unexpected cache event {} on a request channel",
            opcode_name(event.opcode)
        ))),
    }
}
