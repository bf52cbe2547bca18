//! In-process Hot Rod mock server for integration tests.
//!
//! The mock accepts real TCP connections, parses complete request frames
//! with the crate's own wire cursor, and answers with frames scripted by
//! the test through a handler closure. Tests drive the public client API
//! end to end without a running Infinispan server.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use hotrod_client::core::protocol::{
    ReplyBuilder, WireCursor, ADD_CLIENT_LISTENER_REQUEST, CLEAR_REQUEST, CONTAINS_KEY_REQUEST,
    GET_ALL_REQUEST, GET_REQUEST, GET_WITH_METADATA_REQUEST, ITERATION_END_REQUEST,
    ITERATION_NEXT_REQUEST, ITERATION_START_REQUEST, NO_ERROR, PING_REQUEST, PING_RESPONSE,
    PROTOCOL_VERSION, PUT_ALL_REQUEST, PUT_IF_ABSENT_REQUEST, PUT_REQUEST,
    REMOVE_CLIENT_LISTENER_REQUEST, REMOVE_IF_UNMODIFIED_REQUEST, REMOVE_REQUEST,
    REPLACE_IF_UNMODIFIED_REQUEST, REPLACE_REQUEST, REQUEST_MAGIC, SIZE_REQUEST,
    TIME_UNIT_SECONDS,
};
use hotrod_client::core::protocol::PingResult;
use hotrod_client::{ClientConfig, HotRodClient};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// A fully parsed request frame.
#[derive(Debug, Clone)]
pub struct MockRequest {
    pub message_id: u64,
    pub opcode: u8,
    pub cache_name: Vec<u8>,
    pub flags: u32,
    pub intelligence: u8,
    pub topology_id: i32,
    pub body: RequestBody,
}

/// The request body, parsed per opcode family.
#[derive(Debug, Clone)]
pub enum RequestBody {
    Empty,
    Key(Vec<u8>),
    KeyValue {
        key: Vec<u8>,
        value: Vec<u8>,
    },
    KeyValueVersion {
        key: Vec<u8>,
        version: i64,
        value: Vec<u8>,
    },
    KeyVersion {
        key: Vec<u8>,
        version: i64,
    },
    Entries(Vec<(Vec<u8>, Vec<u8>)>),
    Keys(Vec<Vec<u8>>),
    AddListener {
        listener_id: Vec<u8>,
        interests: u32,
    },
    RemoveListener {
        listener_id: Vec<u8>,
    },
    IterationStart {
        batch_size: u32,
        metadata: bool,
    },
    IterationId(String),
}

impl MockRequest {
    /// The request key, if the body carries one.
    pub fn key(&self) -> Option<&[u8]> {
        match &self.body {
            RequestBody::Key(key)
            | RequestBody::KeyValue { key, .. }
            | RequestBody::KeyValueVersion { key, .. }
            | RequestBody::KeyVersion { key, .. } => Some(key),
            _ => None,
        }
    }
}

/// What the mock does with one request.
pub enum MockBehavior {
    /// Write these frames to the connection.
    Frames(Vec<BytesMut>),
    /// Write these frames, then close the connection.
    FramesThenClose(Vec<BytesMut>),
    /// Close the connection without answering.
    Close,
}

impl MockBehavior {
    /// A single reply frame.
    pub fn reply(frame: BytesMut) -> Self {
        Self::Frames(vec![frame])
    }
}

type Handler = Arc<dyn Fn(&MockRequest) -> MockBehavior + Send + Sync>;

/// A scripted Hot Rod server bound to an ephemeral local port.
pub struct MockServer {
    addr: SocketAddr,
    accept_task: JoinHandle<()>,
}

impl MockServer {
    /// Starts a server; `handler` scripts the answer for every request.
    pub async fn start<H>(handler: H) -> Self
    where
        H: Fn(&MockRequest) -> MockBehavior + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock server");
        let addr = listener.local_addr().expect("mock server addr");
        let handler: Handler = Arc::new(handler);
        let accept_task = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let handler = Arc::clone(&handler);
                tokio::spawn(serve_connection(stream, handler));
            }
        });
        Self { addr, accept_task }
    }

    /// The server's bound address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn serve_connection(mut stream: TcpStream, handler: Handler) {
    let mut buf = BytesMut::with_capacity(4096);
    loop {
        let request = loop {
            match parse_request(&buf) {
                Some((request, consumed)) => {
                    let _ = buf.split_to(consumed);
                    break Some(request);
                }
                None => match stream.read_buf(&mut buf).await {
                    Ok(0) | Err(_) => break None,
                    Ok(_) => {}
                },
            }
        };
        let Some(request) = request else {
            return;
        };
        match handler(&request) {
            MockBehavior::Frames(frames) => {
                for frame in frames {
                    if stream.write_all(&frame).await.is_err() {
                        return;
                    }
                }
            }
            MockBehavior::FramesThenClose(frames) => {
                for frame in frames {
                    let _ = stream.write_all(&frame).await;
                }
                return;
            }
            MockBehavior::Close => return,
        }
    }
}

/// Parses one complete request; `None` means more bytes are needed.
fn parse_request(data: &[u8]) -> Option<(MockRequest, usize)> {
    let mut cursor = WireCursor::new(data);
    let magic = cursor.read_u8()?;
    assert_eq!(magic, REQUEST_MAGIC, "mock received a non-request frame");
    let message_id = cursor.read_vlong()?;
    let version = cursor.read_u8()?;
    assert_eq!(version, PROTOCOL_VERSION);
    let opcode = cursor.read_u8()?;
    let cache_name = cursor.read_array()?;
    let flags = cursor.read_vint()?;
    let intelligence = cursor.read_u8()?;
    let topology_id = cursor.read_vint()? as i32;
    cursor.read_u8()?; // key media type
    cursor.read_u8()?; // value media type
    let body = parse_body(&mut cursor, opcode)?;
    let consumed = cursor.consumed();
    Some((
        MockRequest {
            message_id,
            opcode,
            cache_name,
            flags,
            intelligence,
            topology_id,
            body,
        },
        consumed,
    ))
}

fn parse_body(cursor: &mut WireCursor<'_>, opcode: u8) -> Option<RequestBody> {
    let body = match opcode {
        PING_REQUEST | CLEAR_REQUEST | SIZE_REQUEST => RequestBody::Empty,
        GET_REQUEST | REMOVE_REQUEST | CONTAINS_KEY_REQUEST | GET_WITH_METADATA_REQUEST => {
            RequestBody::Key(cursor.read_array()?)
        }
        PUT_REQUEST | PUT_IF_ABSENT_REQUEST | REPLACE_REQUEST => {
            let key = cursor.read_array()?;
            read_expiration(cursor)?;
            let value = cursor.read_array()?;
            RequestBody::KeyValue { key, value }
        }
        REPLACE_IF_UNMODIFIED_REQUEST => {
            let key = cursor.read_array()?;
            read_expiration(cursor)?;
            let version = cursor.read_i64()?;
            let value = cursor.read_array()?;
            RequestBody::KeyValueVersion {
                key,
                version,
                value,
            }
        }
        REMOVE_IF_UNMODIFIED_REQUEST => {
            let key = cursor.read_array()?;
            let version = cursor.read_i64()?;
            RequestBody::KeyVersion { key, version }
        }
        PUT_ALL_REQUEST => {
            read_expiration(cursor)?;
            let count = cursor.read_vint()? as usize;
            let mut entries = Vec::with_capacity(count);
            for _ in 0..count {
                let key = cursor.read_array()?;
                let value = cursor.read_array()?;
                entries.push((key, value));
            }
            RequestBody::Entries(entries)
        }
        GET_ALL_REQUEST => {
            let count = cursor.read_vint()? as usize;
            let mut keys = Vec::with_capacity(count);
            for _ in 0..count {
                keys.push(cursor.read_array()?);
            }
            RequestBody::Keys(keys)
        }
        ADD_CLIENT_LISTENER_REQUEST => {
            let listener_id = cursor.read_array()?;
            cursor.read_u8()?; // include-state
            read_factory(cursor)?;
            read_factory(cursor)?;
            cursor.read_u8()?; // raw data
            let interests = cursor.read_vint()?;
            cursor.read_vint()?; // bloom bits
            RequestBody::AddListener {
                listener_id,
                interests,
            }
        }
        REMOVE_CLIENT_LISTENER_REQUEST => RequestBody::RemoveListener {
            listener_id: cursor.read_array()?,
        },
        ITERATION_START_REQUEST => {
            cursor.read_array()?; // segment bitmap
            read_factory(cursor)?;
            let batch_size = cursor.read_vint()?;
            let metadata = cursor.read_u8()? != 0;
            RequestBody::IterationStart {
                batch_size,
                metadata,
            }
        }
        ITERATION_NEXT_REQUEST | ITERATION_END_REQUEST => {
            RequestBody::IterationId(cursor.read_string()?)
        }
        other => panic!("mock has no parser for opcode {other:#04x}"),
    };
    Some(body)
}

fn read_expiration(cursor: &mut WireCursor<'_>) -> Option<()> {
    let units = cursor.read_u8()?;
    if units >> 4 == TIME_UNIT_SECONDS {
        cursor.read_vlong()?;
    }
    if units & 0x0F == TIME_UNIT_SECONDS {
        cursor.read_vlong()?;
    }
    Some(())
}

fn read_factory(cursor: &mut WireCursor<'_>) -> Option<()> {
    let name = cursor.read_string()?;
    if !name.is_empty() {
        let params = cursor.read_u8()? as usize;
        for _ in 0..params {
            cursor.read_array()?;
        }
    }
    Some(())
}

/// A successful ping negotiation reply.
pub fn ping_reply(message_id: u64) -> BytesMut {
    ReplyBuilder::new(message_id, PING_RESPONSE, NO_ERROR, None)
        .ping(&PingResult {
            version: PROTOCOL_VERSION,
            key_media_type: 0,
            value_media_type: 0,
            ops: vec![
                u16::from(GET_REQUEST),
                u16::from(PUT_REQUEST),
                u16::from(REMOVE_REQUEST),
            ],
        })
        .build()
}

/// An empty success reply for the given request.
pub fn empty_reply(request: &MockRequest) -> BytesMut {
    ReplyBuilder::new(request.message_id, request.opcode + 1, NO_ERROR, None).build()
}

/// A client wired to the given servers with fast timeouts and defaults
/// suitable for tests.
pub async fn connect_client(addrs: &[SocketAddr]) -> HotRodClient {
    let mut builder = ClientConfig::builder();
    for addr in addrs {
        builder = builder.add_server(*addr);
    }
    let config = builder
        .connect_timeout(std::time::Duration::from_secs(2))
        .request_timeout(std::time::Duration::from_secs(2))
        .build()
        .expect("build test config");
    HotRodClient::connect(config).await.expect("connect client")
}
