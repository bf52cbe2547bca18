//! The client facade and the retry/failover execution core.

use std::net::SocketAddr;
use std::sync::Arc;

use hotrod_core::protocol::{
    PingResult, RequestPayload, ResponsePayload, ResponseShape, PING_REQUEST,
};
use hotrod_core::{HotRodError, Result};
use tracing::{debug, info};

use crate::cache::RemoteCache;
use crate::cluster::{ChannelRouter, TopologyState};
use crate::config::ClientConfig;
use crate::connection::{dispatch, ChannelRegistry, Reply};
use crate::listener::manager::ListenerManager;
use crate::ops::{CompletionSlot, OperationRequest, RetryDecision, RetryState};

/// Shared execution core: configuration, topology, routing, channels.
///
/// Every operation goes through [`execute`]: route, check out the target's
/// channel, dispatch one attempt under the request timeout, classify any
/// failure and loop until success or the retry budget is spent.
///
/// [`execute`]: Engine::execute
#[derive(Debug)]
pub(crate) struct Engine {
    config: ClientConfig,
    topology: Arc<TopologyState>,
    router: ChannelRouter,
    registry: ChannelRegistry,
}

impl Engine {
    pub(crate) fn new(config: ClientConfig) -> Self {
        let topology = Arc::new(TopologyState::new(config.servers().to_vec()));
        let router = ChannelRouter::new(Arc::clone(&topology));
        let registry = ChannelRegistry::new(config.connect_timeout(), config.intelligence());
        Self {
            config,
            topology,
            router,
            registry,
        }
    }

    pub(crate) fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub(crate) fn topology(&self) -> &Arc<TopologyState> {
        &self.topology
    }

    pub(crate) fn router(&self) -> &ChannelRouter {
        &self.router
    }

    /// Runs `op` to completion with routing, retries and failover.
    pub(crate) async fn execute(&self, op: &OperationRequest) -> Result<Reply> {
        self.execute_preferring(op, None).await
    }

    /// Like [`execute`](Self::execute), but aims the first attempt at
    /// `preferred` (bulk sub-operations pin their owner group's server).
    pub(crate) async fn execute_preferring(
        &self,
        op: &OperationRequest,
        preferred: Option<SocketAddr>,
    ) -> Result<Reply> {
        let mut state = RetryState::new(self.config.max_retries());
        loop {
            let attempt = state.begin_attempt();
            let target = match preferred.filter(|addr| {
                attempt == 1 && !state.failed_servers().contains(addr)
            }) {
                Some(addr) => addr,
                None => self
                    .router
                    .route(op.routing_key.as_deref(), state.failed_servers())?,
            };
            match self.attempt(op, target).await {
                Ok(reply) => return Ok(reply),
                Err(error) => match state.on_failure(Some(target), error, op.retriable) {
                    RetryDecision::Retry => continue,
                    RetryDecision::Fail => return Err(state.into_error()),
                },
            }
        }
    }

    /// Runs `op` once against a fixed server, no re-routing.
    ///
    /// Iteration batches live in server-local state, so their follow-up
    /// requests are pinned and fail rather than fail over.
    pub(crate) async fn execute_pinned(
        &self,
        op: &OperationRequest,
        target: SocketAddr,
    ) -> Result<Reply> {
        self.attempt(op, target).await
    }

    async fn attempt(&self, op: &OperationRequest, target: SocketAddr) -> Result<Reply> {
        let mut lease = self.registry.acquire(target).await?;

        // The response and the timeout race to settle the slot; the slot
        // accepts exactly one outcome, so a timeout firing against a
        // response arriving in the same poll can never complete twice.
        let (slot, settled) = CompletionSlot::new();
        let timeout = tokio::time::sleep(self.config.request_timeout());
        tokio::pin!(timeout);
        tokio::select! {
            outcome = dispatch(
                lease.channel(),
                &self.topology,
                op,
                self.config.intelligence(),
            ) => {
                slot.settle(outcome);
            }
            _ = &mut timeout => {
                slot.settle(Err(HotRodError::Timeout(format!(
                    "request to {target} exceeded {:?}",
                    self.config.request_timeout()
                ))));
            }
        }
        let outcome = settled.await.unwrap_or_else(|_| {
            Err(HotRodError::Transport(format!(
                "attempt against {target} settled no outcome"
            )))
        });
        match outcome {
            Ok(reply) => Ok(reply),
            Err(error) => {
                // A timed-out or mid-frame-failed channel may hold a
                // half-delivered reply; it can never be trusted to frame
                // the next one.
                if error.invalidates_channel() {
                    lease.discard();
                }
                Err(error)
            }
        }
    }
}

/// A Hot Rod client.
///
/// Cheap to clone through [`cache`](Self::cache) handles; owns the channel
/// registry, the topology view, and the listener manager.
#[derive(Debug)]
pub struct HotRodClient {
    engine: Arc<Engine>,
    listeners: Arc<ListenerManager>,
}

impl HotRodClient {
    /// Creates a client and verifies the cluster with an initial ping.
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let client = Self::new(config);
        let ping = client.ping().await?;
        info!(
            negotiated_version = ping.version,
            server_ops = ping.ops.len(),
            "connected to cluster"
        );
        Ok(client)
    }

    /// Creates a client without touching the network.
    pub fn new(config: ClientConfig) -> Self {
        let engine = Arc::new(Engine::new(config));
        let listeners = Arc::new(ListenerManager::new(Arc::clone(&engine)));
        Self { engine, listeners }
    }

    /// Returns a handle to the named cache. An empty name selects the
    /// server's default cache.
    pub fn cache(&self, name: &str) -> RemoteCache {
        RemoteCache::new(
            Arc::clone(&self.engine),
            Arc::clone(&self.listeners),
            name.to_string(),
        )
    }

    /// Pings the cluster (cache-less handshake, routed to any member).
    pub async fn ping(&self) -> Result<PingResult> {
        let op = OperationRequest::new(
            PING_REQUEST,
            Vec::new(),
            RequestPayload::Empty,
            ResponseShape::Ping,
        );
        let reply = self.engine.execute(&op).await?;
        match reply.payload {
            ResponsePayload::Ping(result) => Ok(result),
            other => Err(HotRodError::Protocol(format!(
                "ping reply carried unexpected payload {other:?}"
            ))),
        }
    }

    /// Tears down listeners and closes every channel.
    pub async fn shutdown(&self) {
        debug!("shutting down client");
        self.listeners.shutdown().await;
        self.engine.registry.clear();
    }
}
