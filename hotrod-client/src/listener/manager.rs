//! Listener channel lifecycle: registration, event pumping, failover.
//!
//! Each listener owns a dedicated channel, pinned to one server and never
//! pooled: the server pushes events down the same connection the listener
//! was registered on. When that channel dies the manager re-registers the
//! listener on another node and marks subsequent deliveries as possibly
//! duplicated, since the new node replays state the client may have seen.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use hotrod_core::protocol::{
    is_success, RequestPayload, ResponseFrame, ResponseShape, ADD_CLIENT_LISTENER_REQUEST,
    NO_ERROR, REMOVE_CLIENT_LISTENER_REQUEST,
};
use hotrod_core::{HotRodError, Result};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::client::Engine;
use crate::connection::{dispatch, Channel};
use crate::ops::OperationRequest;

use super::{CacheEvent, EventKind, ListenerDescriptor, ListenerId, ListenerRegistration};

struct ListenerHandle {
    cache_name: Vec<u8>,
    node: Arc<StdMutex<SocketAddr>>,
    active: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl ListenerHandle {
    /// Stops the event task. Aborting skips the task's own exit path, so
    /// the active flag is cleared here.
    fn stop(self) {
        self.active.store(false, Ordering::Release);
        self.task.abort();
    }
}

/// Tracks every active listener and runs their event tasks.
pub(crate) struct ListenerManager {
    engine: Arc<Engine>,
    active: StdMutex<HashMap<ListenerId, ListenerHandle>>,
}

impl std::fmt::Debug for ListenerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerManager").finish_non_exhaustive()
    }
}

impl ListenerManager {
    pub(crate) fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            active: StdMutex::new(HashMap::new()),
        }
    }

    /// Registers a listener and starts its event task.
    ///
    /// Returns the registration handle and the channel events arrive on.
    pub(crate) async fn add_listener(
        &self,
        cache_name: Vec<u8>,
        descriptor: ListenerDescriptor,
    ) -> Result<(ListenerRegistration, mpsc::Receiver<CacheEvent>)> {
        let id = ListenerId::new();
        let (events_tx, events_rx) =
            mpsc::channel(self.engine.config().event_queue_capacity());

        let addr = self.engine.router().route(None, &HashSet::new())?;
        let channel = establish(&self.engine, &cache_name, &descriptor, id, &events_tx, addr, false)
            .await?;
        info!(listener = %id, address = %addr, "listener registered");

        let (registration, shutdown_rx) = ListenerRegistration::new(id);
        let node = Arc::new(StdMutex::new(addr));
        let task = tokio::spawn(run_listener(
            Arc::clone(&self.engine),
            cache_name.clone(),
            descriptor,
            id,
            events_tx,
            channel,
            Arc::clone(&node),
            registration.active_flag(),
            shutdown_rx,
        ));

        let handle = ListenerHandle {
            cache_name,
            node,
            active: registration.active_flag(),
            task,
        };
        lock(&self.active).insert(id, handle);
        Ok((registration, events_rx))
    }

    /// Removes the listener on the server, then clears local state.
    ///
    /// The removal travels over a short-lived channel to the node the
    /// listener is registered on; local state survives a failed removal so
    /// the caller can retry.
    pub(crate) async fn remove_listener(&self, id: ListenerId) -> Result<()> {
        let (addr, cache_name) = {
            let active = lock(&self.active);
            let handle = active.get(&id).ok_or_else(|| {
                HotRodError::ListenerClosed(format!("{id} is not registered"))
            })?;
            let addr = *lock(&handle.node);
            let cache_name = handle.cache_name.clone();
            (addr, cache_name)
        };

        let op = OperationRequest::new(
            REMOVE_CLIENT_LISTENER_REQUEST,
            cache_name,
            RequestPayload::RemoveListener {
                listener_id: id.as_bytes().to_vec(),
            },
            ResponseShape::Empty,
        )
        .not_retriable();
        let config = self.engine.config();
        let mut channel =
            Channel::connect(addr, config.connect_timeout(), config.intelligence()).await?;
        let reply = tokio::time::timeout(
            config.request_timeout(),
            dispatch(&mut channel, self.engine.topology(), &op, config.intelligence()),
        )
        .await
        .map_err(|_| HotRodError::Timeout(format!("listener removal at {addr} timed out")))??;
        if !is_success(reply.status) {
            return Err(HotRodError::Remote {
                status: reply.status,
                message: format!("listener removal rejected for {id}"),
            });
        }

        if let Some(handle) = lock(&self.active).remove(&id) {
            handle.stop();
        }
        info!(listener = %id, address = %addr, "listener removed");
        Ok(())
    }

    /// Stops every event task. No server-side removals; the servers drop
    /// the registrations when the channels close.
    pub(crate) async fn shutdown(&self) {
        let handles = std::mem::take(&mut *lock(&self.active));
        for (id, handle) in handles {
            debug!(listener = %id, "stopping listener task");
            handle.stop();
        }
    }
}

fn lock<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn add_listener_op(
    cache_name: &[u8],
    descriptor: &ListenerDescriptor,
    id: ListenerId,
) -> OperationRequest {
    OperationRequest::new(
        ADD_CLIENT_LISTENER_REQUEST,
        cache_name.to_vec(),
        RequestPayload::AddListener {
            listener_id: id.as_bytes().to_vec(),
            include_state: descriptor.include_state,
            filter: descriptor.filter.clone(),
            converter: descriptor.converter.clone(),
            raw_data: descriptor.raw_data,
            interests: descriptor
                .interests
                .unwrap_or_else(super::InterestSet::all)
                .bits(),
            bloom_bits: descriptor.bloom_bits,
        },
        ResponseShape::Empty,
    )
    .not_retriable()
}

/// Converts an event frame into a delivery, if it belongs to `id`.
fn to_event(frame: &hotrod_core::protocol::CacheEventFrame, id: ListenerId, force_retried: bool) -> Option<CacheEvent> {
    if ListenerId::from_wire(&frame.listener_id) != Some(id) {
        return None;
    }
    let kind = EventKind::from_opcode(frame.opcode)?;
    Some(CacheEvent {
        kind,
        key: frame.key.clone(),
        version: frame.version,
        retried: frame.retried || force_retried,
    })
}

/// Connects to `addr` and performs the registration handshake there.
///
/// The server may start pushing events (a state replay, or changes racing
/// the registration) before the ack frame arrives; those are forwarded as
/// they come, and the handshake completes on the ack.
async fn establish(
    engine: &Arc<Engine>,
    cache_name: &[u8],
    descriptor: &ListenerDescriptor,
    id: ListenerId,
    events: &mpsc::Sender<CacheEvent>,
    addr: SocketAddr,
    force_retried: bool,
) -> Result<Channel> {
    let config = engine.config();
    let mut channel =
        Channel::connect(addr, config.connect_timeout(), config.intelligence()).await?;

    let op = add_listener_op(cache_name, descriptor, id);
    let (message_id, frame) =
        op.encode_attempt(config.intelligence(), engine.topology().topology_id());
    channel.expect(message_id, op.shape);
    channel.send(&frame).await?;

    let handshake = async {
        loop {
            let mut frame = channel.receive().await?;
            if let Some(update) = frame.take_topology() {
                engine.topology().try_install(&update);
            }
            match frame {
                ResponseFrame::Event(event) => {
                    if let Some(event) = to_event(&event, id, force_retried) {
                        if events.send(event).await.is_err() {
                            return Err(HotRodError::ListenerClosed(format!(
                                "{id} dropped its event receiver"
                            )));
                        }
                    }
                }
                ResponseFrame::Reply {
                    message_id: reply_id,
                    status,
                    ..
                } if reply_id == message_id => {
                    if status == NO_ERROR {
                        return Ok(());
                    }
                    return Err(HotRodError::Remote {
                        status,
                        message: format!("listener registration rejected for {id}"),
                    });
                }
                ResponseFrame::Error {
                    status, message, ..
                } => {
                    return Err(HotRodError::Remote { status, message });
                }
                other => {
                    return Err(HotRodError::Protocol(format!(
                        "unexpected frame during listener handshake: {other:?}"
                    )));
                }
            }
        }
    };
    tokio::time::timeout(config.request_timeout(), handshake)
        .await
        .map_err(|_| {
            HotRodError::Timeout(format!("listener handshake with {addr} timed out"))
        })??;
    Ok(channel)
}

/// The per-listener event task.
///
/// Pumps events until shutdown; on channel loss, re-registers on another
/// node (excluding servers that failed during this recovery) and marks all
/// further deliveries as retried, because the handover may replay changes
/// the receiver already saw.
#[allow(clippy::too_many_arguments)]
async fn run_listener(
    engine: Arc<Engine>,
    cache_name: Vec<u8>,
    descriptor: ListenerDescriptor,
    id: ListenerId,
    events: mpsc::Sender<CacheEvent>,
    mut channel: Channel,
    node: Arc<StdMutex<SocketAddr>>,
    active: Arc<AtomicBool>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut force_retried = false;
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                debug!(listener = %id, "listener task shutting down");
                break;
            }
            frame = channel.receive() => match frame {
                Ok(ResponseFrame::Event(event)) => {
                    if let Some(event) = to_event(&event, id, force_retried) {
                        if events.send(event).await.is_err() {
                            debug!(listener = %id, "event receiver dropped");
                            break;
                        }
                    }
                }
                Ok(other) => {
                    warn!(listener = %id, ?other, "ignoring non-event frame on listener channel");
                }
                Err(error) => {
                    let failed = *lock(&node);
                    warn!(
                        listener = %id,
                        address = %failed,
                        error = %error,
                        "listener channel lost, re-registering"
                    );
                    let mut excluded = HashSet::new();
                    excluded.insert(failed);
                    match reestablish(
                        &engine, &cache_name, &descriptor, id, &events, &mut excluded,
                    )
                    .await
                    {
                        Some((new_channel, addr)) => {
                            channel = new_channel;
                            *lock(&node) = addr;
                            // The replacement node replays state; everything
                            // from here on may duplicate earlier deliveries.
                            force_retried = true;
                            info!(listener = %id, address = %addr, "listener failed over");
                        }
                        None => {
                            warn!(listener = %id, "listener could not be re-registered");
                            break;
                        }
                    }
                }
            }
        }
    }
    active.store(false, Ordering::Release);
}

/// Tries every remaining cluster member once, in router order.
async fn reestablish(
    engine: &Arc<Engine>,
    cache_name: &[u8],
    descriptor: &ListenerDescriptor,
    id: ListenerId,
    events: &mpsc::Sender<CacheEvent>,
    excluded: &mut HashSet<SocketAddr>,
) -> Option<(Channel, SocketAddr)> {
    loop {
        let target = match engine.router().route(None, excluded) {
            Ok(addr) => addr,
            Err(_) => return None,
        };
        match establish(engine, cache_name, descriptor, id, events, target, true).await {
            Ok(channel) => return Some((channel, target)),
            Err(HotRodError::ListenerClosed(_)) => return None,
            Err(error) => {
                debug!(listener = %id, address = %target, error = %error, "re-registration attempt failed");
                excluded.insert(target);
            }
        }
    }
}
