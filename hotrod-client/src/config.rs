//! Client configuration and its builder.

use std::net::SocketAddr;
use std::time::Duration;

use hotrod_core::protocol::{
    Expiration, INTELLIGENCE_BASIC, INTELLIGENCE_HASH_DISTRIBUTION_AWARE,
    INTELLIGENCE_TOPOLOGY_AWARE,
};
use hotrod_core::{HotRodError, Result};

/// Default connect timeout.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default per-attempt request timeout.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Default number of retries after the first attempt.
const DEFAULT_MAX_RETRIES: u32 = 3;
/// Default capacity of each listener's event queue.
const DEFAULT_EVENT_QUEUE_CAPACITY: usize = 1024;

/// Validated client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    servers: Vec<SocketAddr>,
    connect_timeout: Duration,
    request_timeout: Duration,
    max_retries: u32,
    intelligence: u8,
    event_queue_capacity: usize,
    default_expiration: Expiration,
}

impl ClientConfig {
    /// Starts a builder.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Bootstrap server addresses.
    pub fn servers(&self) -> &[SocketAddr] {
        &self.servers
    }

    /// Timeout for establishing a TCP connection.
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Timeout for one request attempt, send to reply.
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Retries allowed after the first attempt of a call.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Client intelligence level announced to servers.
    pub fn intelligence(&self) -> u8 {
        self.intelligence
    }

    /// Buffered events per listener before the reader falls behind.
    pub fn event_queue_capacity(&self) -> usize {
        self.event_queue_capacity
    }

    /// Expiration applied to writes that do not specify their own.
    pub fn default_expiration(&self) -> Expiration {
        self.default_expiration
    }
}

/// Builder for [`ClientConfig`].
#[derive(Debug, Clone, Default)]
pub struct ClientConfigBuilder {
    servers: Vec<SocketAddr>,
    connect_timeout: Option<Duration>,
    request_timeout: Option<Duration>,
    max_retries: Option<u32>,
    intelligence: Option<u8>,
    event_queue_capacity: Option<usize>,
    default_expiration: Option<Expiration>,
}

impl ClientConfigBuilder {
    /// Adds a bootstrap server address.
    pub fn add_server(mut self, address: SocketAddr) -> Self {
        self.servers.push(address);
        self
    }

    /// Replaces the bootstrap server list.
    pub fn servers(mut self, servers: impl IntoIterator<Item = SocketAddr>) -> Self {
        self.servers = servers.into_iter().collect();
        self
    }

    /// Sets the TCP connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Sets the per-attempt request timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Sets the number of retries after the first attempt.
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    /// Sets the announced client intelligence level.
    pub fn intelligence(mut self, level: u8) -> Self {
        self.intelligence = Some(level);
        self
    }

    /// Sets the per-listener event queue capacity.
    pub fn event_queue_capacity(mut self, capacity: usize) -> Self {
        self.event_queue_capacity = Some(capacity);
        self
    }

    /// Sets the expiration used by writes that do not carry one.
    pub fn default_expiration(mut self, expiration: Expiration) -> Self {
        self.default_expiration = Some(expiration);
        self
    }

    /// Validates and builds the configuration.
    pub fn build(self) -> Result<ClientConfig> {
        if self.servers.is_empty() {
            return Err(HotRodError::Configuration(
                "at least one server address is required".to_string(),
            ));
        }
        let intelligence = self.intelligence.unwrap_or(INTELLIGENCE_HASH_DISTRIBUTION_AWARE);
        if !matches!(
            intelligence,
            INTELLIGENCE_BASIC | INTELLIGENCE_TOPOLOGY_AWARE | INTELLIGENCE_HASH_DISTRIBUTION_AWARE
        ) {
            return Err(HotRodError::Configuration(format!(
                "unknown client intelligence level {intelligence}"
            )));
        }
        let connect_timeout = self.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT);
        let request_timeout = self.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT);
        if connect_timeout.is_zero() || request_timeout.is_zero() {
            return Err(HotRodError::Configuration(
                "timeouts must be non-zero".to_string(),
            ));
        }
        let event_queue_capacity = self
            .event_queue_capacity
            .unwrap_or(DEFAULT_EVENT_QUEUE_CAPACITY);
        if event_queue_capacity == 0 {
            return Err(HotRodError::Configuration(
                "event queue capacity must be non-zero".to_string(),
            ));
        }
        Ok(ClientConfig {
            servers: self.servers,
            connect_timeout,
            request_timeout,
            max_retries: self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            intelligence,
            event_queue_capacity,
            default_expiration: self.default_expiration.unwrap_or_default(),
        })
    }
}
