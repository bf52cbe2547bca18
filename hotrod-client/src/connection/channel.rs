//! A single TCP channel to one server.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use hotrod_core::protocol::{ResponseDecoder, ResponseFrame, ResponseShape};
use hotrod_core::{HotRodError, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

const READ_CHUNK: usize = 8 * 1024;

/// One connection, its read buffer, and its frame decoder.
///
/// Decoder state is per-channel: a frame interrupted by a short read stays
/// parked in this channel's decoder and cannot bleed into any other
/// connection.
#[derive(Debug)]
pub struct Channel {
    addr: SocketAddr,
    stream: TcpStream,
    read_buf: BytesMut,
    decoder: ResponseDecoder,
    last_used: Instant,
}

impl Channel {
    /// Opens a connection to `addr`, bounded by `connect_timeout`.
    pub async fn connect(
        addr: SocketAddr,
        connect_timeout: Duration,
        intelligence: u8,
    ) -> Result<Self> {
        let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                HotRodError::Timeout(format!("connecting to {addr} exceeded {connect_timeout:?}"))
            })?
            .map_err(|e| HotRodError::Transport(format!("connect to {addr} failed: {e}")))?;
        stream.set_nodelay(true)?;
        debug!(address = %addr, "channel connected");
        Ok(Self {
            addr,
            stream,
            read_buf: BytesMut::with_capacity(READ_CHUNK),
            decoder: ResponseDecoder::new(intelligence),
            last_used: Instant::now(),
        })
    }

    /// The server this channel talks to.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Time since the channel last sent or received.
    pub fn idle_time(&self) -> Duration {
        self.last_used.elapsed()
    }

    /// Registers the payload layout expected for a pending message id.
    pub fn expect(&mut self, message_id: u64, shape: ResponseShape) {
        self.decoder.expect(message_id, shape);
    }

    /// Drops the expectation for an abandoned request.
    pub fn forget(&mut self, message_id: u64) {
        self.decoder.forget(message_id);
    }

    /// Writes a fully encoded request frame.
    pub async fn send(&mut self, frame: &[u8]) -> Result<()> {
        self.stream
            .write_all(frame)
            .await
            .map_err(|e| HotRodError::Transport(format!("write to {} failed: {e}", self.addr)))?;
        self.last_used = Instant::now();
        Ok(())
    }

    /// Reads until the decoder yields one complete frame.
    pub async fn receive(&mut self) -> Result<ResponseFrame> {
        loop {
            if let Some(frame) = self.decoder.decode(&mut self.read_buf)? {
                self.last_used = Instant::now();
                return Ok(frame);
            }
            let n = self
                .stream
                .read_buf(&mut self.read_buf)
                .await
                .map_err(|e| {
                    HotRodError::Transport(format!("read from {} failed: {e}", self.addr))
                })?;
            if n == 0 {
                return Err(HotRodError::Transport(format!(
                    "{} closed the connection",
                    self.addr
                )));
            }
        }
    }
}
