//! Error types for Hot Rod client operations.

use std::io;
use thiserror::Error;

use crate::protocol::constants::{ILLEGAL_LIFECYCLE_STATE, NODE_SUSPECTED};

/// The main error type for Hot Rod client operations.
#[derive(Debug, Error)]
pub enum HotRodError {
    /// Network-level failures: connect refused, reset, unexpected close.
    #[error("transport error: {0}")]
    Transport(String),

    /// Malformed frames: bad magic, unknown opcode, undecodable payload.
    ///
    /// Fatal for the connection that produced them; the operation itself may
    /// still be re-routed to a different server.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// An operation attempt did not receive its response in time.
    #[error("timeout: {0}")]
    Timeout(String),

    /// An error response sent by the server, carrying the wire status byte.
    #[error("server error (status {status:#04x}): {message}")]
    Remote {
        /// The status byte from the error response header.
        status: u8,
        /// The diagnostic message read from the response body.
        message: String,
    },

    /// The server rejected an iteration-id it no longer tracks.
    #[error("invalid iteration: {0}")]
    InvalidIteration(String),

    /// Invalid client configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Every known cluster member is excluded or unreachable.
    #[error("no servers available: {0}")]
    NoServersAvailable(String),

    /// The listener's event stream was torn down and could not be restored.
    #[error("listener closed: {0}")]
    ListenerClosed(String),

    /// I/O errors from the standard library.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl HotRodError {
    /// Returns `true` if the failed attempt may safely be replayed on
    /// another (or the same) server.
    ///
    /// Transport faults, timeouts and framing errors are transient from the
    /// operation's point of view. Of the server statuses only node-suspect
    /// and illegal-lifecycle permit a retry; anything else the server said
    /// is a definitive answer.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout(_) | Self::Protocol(_) | Self::Io(_) => true,
            Self::Remote { status, .. } => {
                matches!(*status, NODE_SUSPECTED | ILLEGAL_LIFECYCLE_STATE)
            }
            _ => false,
        }
    }

    /// Returns `true` if the server that produced this failure should be
    /// excluded from the remaining attempts of the same logical call.
    ///
    /// A node-suspect status blames the server; an illegal-lifecycle status
    /// (server shutting down mid-request) does not, since the node may come
    /// back before the next attempt.
    pub fn blacklists_server(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout(_) | Self::Protocol(_) | Self::Io(_) => true,
            Self::Remote { status, .. } => *status == NODE_SUSPECTED,
            _ => false,
        }
    }

    /// Returns `true` if the channel this failure happened on must be
    /// discarded rather than returned for reuse.
    ///
    /// After a timeout or a framing error the stream position is unknown, so
    /// the connection can never be trusted to frame the next response.
    pub fn invalidates_channel(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Timeout(_) | Self::Protocol(_) | Self::Io(_)
        )
    }
}

/// A specialized `Result` type for Hot Rod client operations.
pub type Result<T> = std::result::Result<T, HotRodError>;
