//! Byte-oriented cache operations.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;

use hotrod_core::protocol::{
    is_success, EntryMetadata, Expiration, IterationEntry, NamedFactory, RequestPayload,
    ResponsePayload, ResponseShape, CLEAR_REQUEST, CONTAINS_KEY_REQUEST,
    FLAG_FORCE_RETURN_VALUE, GET_ALL_REQUEST, GET_REQUEST, GET_WITH_METADATA_REQUEST,
    ITERATION_END_REQUEST, ITERATION_NEXT_REQUEST, ITERATION_START_REQUEST, KEY_DOES_NOT_EXIST,
    PUT_ALL_REQUEST, PUT_IF_ABSENT_REQUEST, PUT_REQUEST, REMOVE_IF_UNMODIFIED_REQUEST,
    REMOVE_REQUEST, REPLACE_IF_UNMODIFIED_REQUEST, REPLACE_REQUEST, SIZE_REQUEST,
};
use hotrod_core::{HotRodError, Result};
use tokio::sync::mpsc;

use crate::client::Engine;
use crate::connection::Reply;
use crate::listener::manager::ListenerManager;
use crate::listener::{CacheEvent, ListenerDescriptor, ListenerRegistration};
use crate::ops::{bulk, OperationRequest};

/// Per-call options: flag bits plus an expiration override.
#[derive(Debug, Clone, Copy, Default)]
pub struct CallOptions {
    /// Flag bits joined into the request header.
    pub flags: u32,
    /// Expiration for this write; `None` uses the client default.
    pub expiration: Option<Expiration>,
}

impl CallOptions {
    /// Options with no flags and the default expiration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Asks the server to return the previous value from writes.
    pub fn return_previous(mut self) -> Self {
        self.flags |= FLAG_FORCE_RETURN_VALUE;
        self
    }

    /// Adds raw flag bits.
    pub fn with_flags(mut self, flags: u32) -> Self {
        self.flags |= flags;
        self
    }

    /// Overrides the expiration for this call.
    pub fn with_expiration(mut self, expiration: Expiration) -> Self {
        self.expiration = Some(expiration);
        self
    }
}

/// A handle to one named cache.
///
/// Keys and values are opaque byte vectors; serialization is the caller's
/// concern. Handles are cheap and share the client's engine.
#[derive(Debug)]
pub struct RemoteCache {
    engine: Arc<Engine>,
    listeners: Arc<ListenerManager>,
    name: String,
    name_bytes: Vec<u8>,
}

impl RemoteCache {
    pub(crate) fn new(
        engine: Arc<Engine>,
        listeners: Arc<ListenerManager>,
        name: String,
    ) -> Self {
        let name_bytes = name.as_bytes().to_vec();
        Self {
            engine,
            listeners,
            name,
            name_bytes,
        }
    }

    /// The cache's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn expiration(&self, options: &CallOptions) -> Expiration {
        options
            .expiration
            .unwrap_or_else(|| self.engine.config().default_expiration())
    }

    fn key_op(
        &self,
        opcode: u8,
        key: Vec<u8>,
        shape: ResponseShape,
        options: CallOptions,
    ) -> OperationRequest {
        OperationRequest::new(
            opcode,
            self.name_bytes.clone(),
            RequestPayload::Key { key: key.clone() },
            shape,
        )
        .with_flags(options.flags)
        .with_routing_key(key)
    }

    /// Reads the value under `key`.
    pub async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let op = self.key_op(
            GET_REQUEST,
            key.to_vec(),
            ResponseShape::OptionalValue,
            CallOptions::new(),
        );
        let reply = self.engine.execute(&op).await?;
        Ok(optional_value(reply))
    }

    /// Reads the value and its metadata (version, expiration timestamps).
    pub async fn get_with_metadata(
        &self,
        key: &[u8],
    ) -> Result<Option<(EntryMetadata, Vec<u8>)>> {
        let op = self.key_op(
            GET_WITH_METADATA_REQUEST,
            key.to_vec(),
            ResponseShape::ValueWithMetadata,
            CallOptions::new(),
        );
        let reply = self.engine.execute(&op).await?;
        match reply.payload {
            ResponsePayload::ValueWithMetadata { metadata, value } => Ok(Some((metadata, value))),
            _ => Ok(None),
        }
    }

    /// Stores `value` under `key`.
    ///
    /// Returns the previous value when the options ask for it.
    pub async fn put(&self, key: &[u8], value: &[u8], options: CallOptions) -> Result<Option<Vec<u8>>> {
        let op = OperationRequest::new(
            PUT_REQUEST,
            self.name_bytes.clone(),
            RequestPayload::KeyValue {
                key: key.to_vec(),
                expiration: self.expiration(&options),
                value: value.to_vec(),
            },
            ResponseShape::PreviousValue,
        )
        .with_flags(options.flags)
        .with_routing_key(key.to_vec());
        let reply = self.engine.execute(&op).await?;
        Ok(optional_value(reply))
    }

    /// Stores `value` only if `key` is absent.
    ///
    /// Returns `true` when the value was stored. With
    /// [`CallOptions::return_previous`] the existing value (if any) comes
    /// back as well.
    pub async fn put_if_absent(
        &self,
        key: &[u8],
        value: &[u8],
        options: CallOptions,
    ) -> Result<(bool, Option<Vec<u8>>)> {
        let op = OperationRequest::new(
            PUT_IF_ABSENT_REQUEST,
            self.name_bytes.clone(),
            RequestPayload::KeyValue {
                key: key.to_vec(),
                expiration: self.expiration(&options),
                value: value.to_vec(),
            },
            ResponseShape::PreviousValue,
        )
        .with_flags(options.flags)
        .with_routing_key(key.to_vec());
        let reply = self.engine.execute(&op).await?;
        let stored = is_success(reply.status);
        Ok((stored, optional_value(reply)))
    }

    /// Replaces the value under `key` only if the key exists.
    ///
    /// Returns `true` when the replace happened.
    pub async fn replace(
        &self,
        key: &[u8],
        value: &[u8],
        options: CallOptions,
    ) -> Result<(bool, Option<Vec<u8>>)> {
        let op = OperationRequest::new(
            REPLACE_REQUEST,
            self.name_bytes.clone(),
            RequestPayload::KeyValue {
                key: key.to_vec(),
                expiration: self.expiration(&options),
                value: value.to_vec(),
            },
            ResponseShape::PreviousValue,
        )
        .with_flags(options.flags)
        .with_routing_key(key.to_vec());
        let reply = self.engine.execute(&op).await?;
        let replaced = is_success(reply.status);
        Ok((replaced, optional_value(reply)))
    }

    /// Replaces the value only while the entry still carries `version`.
    ///
    /// The version comes from [`get_with_metadata`](Self::get_with_metadata).
    /// Returns `true` when the compare-and-swap won.
    pub async fn replace_with_version(
        &self,
        key: &[u8],
        value: &[u8],
        version: i64,
        options: CallOptions,
    ) -> Result<bool> {
        let op = OperationRequest::new(
            REPLACE_IF_UNMODIFIED_REQUEST,
            self.name_bytes.clone(),
            RequestPayload::KeyValueVersion {
                key: key.to_vec(),
                expiration: self.expiration(&options),
                version,
                value: value.to_vec(),
            },
            ResponseShape::PreviousValue,
        )
        .with_flags(options.flags)
        .with_routing_key(key.to_vec());
        let reply = self.engine.execute(&op).await?;
        Ok(is_success(reply.status))
    }

    /// Removes the entry under `key`.
    pub async fn remove(&self, key: &[u8], options: CallOptions) -> Result<Option<Vec<u8>>> {
        let op = self.key_op(
            REMOVE_REQUEST,
            key.to_vec(),
            ResponseShape::PreviousValue,
            options,
        );
        let reply = self.engine.execute(&op).await?;
        Ok(optional_value(reply))
    }

    /// Removes the entry only while it still carries `version`.
    ///
    /// Returns `true` when the compare-and-remove won.
    pub async fn remove_with_version(&self, key: &[u8], version: i64) -> Result<bool> {
        let op = OperationRequest::new(
            REMOVE_IF_UNMODIFIED_REQUEST,
            self.name_bytes.clone(),
            RequestPayload::KeyVersion {
                key: key.to_vec(),
                version,
            },
            ResponseShape::PreviousValue,
        )
        .with_routing_key(key.to_vec());
        let reply = self.engine.execute(&op).await?;
        Ok(is_success(reply.status))
    }

    /// Whether `key` has an entry.
    pub async fn contains_key(&self, key: &[u8]) -> Result<bool> {
        let op = self.key_op(
            CONTAINS_KEY_REQUEST,
            key.to_vec(),
            ResponseShape::Empty,
            CallOptions::new(),
        );
        let reply = self.engine.execute(&op).await?;
        Ok(reply.status != KEY_DOES_NOT_EXIST && is_success(reply.status))
    }

    /// Fetches many keys at once.
    ///
    /// Keys are grouped by primary owner and one get-all goes to each
    /// owner concurrently; the group results merge into one map. Missing
    /// keys are simply absent from the result.
    pub async fn get_all(&self, keys: Vec<Vec<u8>>) -> Result<HashMap<Vec<u8>, Vec<u8>>> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }
        let topology = self.engine.topology().snapshot();
        let groups = bulk::partition_by_owner(keys, |key| topology.primary_owner(key));
        let maps = bulk::execute_grouped(groups, |target, keys| self.get_all_group(target, keys))
            .await?;
        let mut merged = HashMap::new();
        for map in maps {
            merged.extend(map);
        }
        Ok(merged)
    }

    async fn get_all_group(
        &self,
        target: Option<SocketAddr>,
        keys: Vec<Vec<u8>>,
    ) -> Result<HashMap<Vec<u8>, Vec<u8>>> {
        let op = OperationRequest::new(
            GET_ALL_REQUEST,
            self.name_bytes.clone(),
            RequestPayload::KeySet { keys },
            ResponseShape::EntryMap,
        );
        let reply = self.engine.execute_preferring(&op, target).await?;
        match reply.payload {
            ResponsePayload::Entries(entries) => Ok(entries.into_iter().collect()),
            _ => Ok(HashMap::new()),
        }
    }

    /// Stores many entries at once.
    ///
    /// Entries are grouped by primary owner and one put-all goes to each
    /// owner concurrently; every group runs to completion and the first
    /// failure (if any) is returned.
    pub async fn put_all(
        &self,
        entries: Vec<(Vec<u8>, Vec<u8>)>,
        options: CallOptions,
    ) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let topology = self.engine.topology().snapshot();
        let groups = bulk::partition_by_owner(entries, |(key, _)| topology.primary_owner(key));
        let expiration = self.expiration(&options);
        bulk::execute_grouped(groups, |target, entries| {
            self.put_all_group(target, entries, options.flags, expiration)
        })
        .await?;
        Ok(())
    }

    async fn put_all_group(
        &self,
        target: Option<SocketAddr>,
        entries: Vec<(Vec<u8>, Vec<u8>)>,
        flags: u32,
        expiration: Expiration,
    ) -> Result<()> {
        let op = OperationRequest::new(
            PUT_ALL_REQUEST,
            self.name_bytes.clone(),
            RequestPayload::MultiEntry {
                expiration,
                entries,
            },
            ResponseShape::Empty,
        )
        .with_flags(flags);
        self.engine.execute_preferring(&op, target).await?;
        Ok(())
    }

    /// Number of entries in the cache.
    pub async fn size(&self) -> Result<u64> {
        let op = OperationRequest::new(
            SIZE_REQUEST,
            self.name_bytes.clone(),
            RequestPayload::Empty,
            ResponseShape::Count,
        );
        let reply = self.engine.execute(&op).await?;
        match reply.payload {
            ResponsePayload::Count(count) => Ok(count),
            _ => Ok(0),
        }
    }

    /// Removes every entry.
    pub async fn clear(&self) -> Result<()> {
        let op = OperationRequest::new(
            CLEAR_REQUEST,
            self.name_bytes.clone(),
            RequestPayload::Empty,
            ResponseShape::Empty,
        );
        self.engine.execute(&op).await?;
        Ok(())
    }

    /// Opens a server-side entry iterator.
    ///
    /// `segments` limits iteration to a segment bitmap (empty = all);
    /// `batch_size` entries arrive per round trip; `metadata` attaches
    /// per-entry metadata.
    pub async fn entry_iterator(
        &self,
        segments: Vec<u8>,
        filter: Option<NamedFactory>,
        batch_size: u32,
        metadata: bool,
    ) -> Result<EntryIterator> {
        let op = OperationRequest::new(
            ITERATION_START_REQUEST,
            self.name_bytes.clone(),
            RequestPayload::IterationStart {
                segments,
                filter,
                batch_size,
                metadata,
            },
            ResponseShape::IterationStart,
        );
        let mut state = crate::ops::RetryState::new(self.engine.config().max_retries());
        // The start is retriable; everything after it is pinned to the
        // node that owns the iteration state.
        let (addr, iteration_id) = loop {
            state.begin_attempt();
            let target = self
                .engine
                .router()
                .route(None, state.failed_servers())?;
            match self.engine.execute_pinned(&op, target).await {
                Ok(reply) => match reply.payload {
                    ResponsePayload::IterationStart(id) => break (target, id),
                    other => {
                        return Err(HotRodError::Protocol(format!(
                            "iteration start returned unexpected payload {other:?}"
                        )))
                    }
                },
                Err(error) => match state.on_failure(Some(target), error, true) {
                    crate::ops::RetryDecision::Retry => continue,
                    crate::ops::RetryDecision::Fail => return Err(state.into_error()),
                },
            }
        };
        Ok(EntryIterator {
            engine: Arc::clone(&self.engine),
            cache_name: self.name_bytes.clone(),
            addr,
            iteration_id,
            metadata,
            buffer: VecDeque::new(),
            exhausted: false,
        })
    }

    /// Registers a cache listener; events arrive on the returned receiver.
    pub async fn add_listener(
        &self,
        descriptor: ListenerDescriptor,
    ) -> Result<(ListenerRegistration, mpsc::Receiver<CacheEvent>)> {
        self.listeners
            .add_listener(self.name_bytes.clone(), descriptor)
            .await
    }

    /// Removes a listener on the server and stops its event task.
    pub async fn remove_listener(&self, registration: &ListenerRegistration) -> Result<()> {
        self.listeners.remove_listener(registration.id()).await
    }
}

fn optional_value(reply: Reply) -> Option<Vec<u8>> {
    match reply.payload {
        ResponsePayload::Value(value) => Some(value),
        _ => None,
    }
}

/// A server-side entry iteration.
///
/// Batches are fetched lazily; every request after the start is pinned to
/// the node holding the iteration state and never fails over.
#[derive(Debug)]
pub struct EntryIterator {
    engine: Arc<Engine>,
    cache_name: Vec<u8>,
    addr: SocketAddr,
    iteration_id: String,
    metadata: bool,
    buffer: VecDeque<IterationEntry>,
    exhausted: bool,
}

impl EntryIterator {
    /// The server running this iteration.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Returns the next entry, fetching a batch when the buffer is empty.
    ///
    /// `Ok(None)` means the iteration is complete.
    pub async fn next(&mut self) -> Result<Option<IterationEntry>> {
        loop {
            if let Some(entry) = self.buffer.pop_front() {
                return Ok(Some(entry));
            }
            if self.exhausted {
                return Ok(None);
            }
            self.fetch_batch().await?;
        }
    }

    async fn fetch_batch(&mut self) -> Result<()> {
        let op = OperationRequest::new(
            ITERATION_NEXT_REQUEST,
            self.cache_name.clone(),
            RequestPayload::IterationNext {
                iteration_id: self.iteration_id.clone(),
            },
            ResponseShape::IterationBatch {
                metadata: self.metadata,
            },
        )
        .not_retriable();
        let reply = self.engine.execute_pinned(&op, self.addr).await?;
        match reply.payload {
            ResponsePayload::IterationBatch { entries, .. } => {
                // An empty batch is the end-of-iteration signal.
                if entries.is_empty() {
                    self.exhausted = true;
                } else {
                    self.buffer.extend(entries);
                }
                Ok(())
            }
            other => Err(HotRodError::Protocol(format!(
                "iteration batch returned unexpected payload {other:?}"
            ))),
        }
    }

    /// Closes the iteration on the server.
    pub async fn close(mut self) -> Result<()> {
        self.exhausted = true;
        let op = OperationRequest::new(
            ITERATION_END_REQUEST,
            self.cache_name.clone(),
            RequestPayload::IterationEnd {
                iteration_id: self.iteration_id.clone(),
            },
            ResponseShape::Empty,
        )
        .not_retriable();
        self.engine.execute_pinned(&op, self.addr).await?;
        Ok(())
    }
}
