//! Async Rust client for the [Infinispan](https://infinispan.org/) Hot Rod
//! remote-cache protocol.
//!
//! This crate provides a topology-aware client that talks to an Infinispan
//! cluster over the Hot Rod binary protocol (version 3.0). It is built on
//! [Tokio](https://tokio.rs/) and exposes every operation as an `async fn`.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use hotrod_client::{CallOptions, ClientConfig, HotRodClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::builder()
//!         .add_server("127.0.0.1:11222".parse()?)
//!         .build()?;
//!     let client = HotRodClient::connect(config).await?;
//!
//!     let cache = client.cache("my-cache");
//!     cache.put(b"key", b"value", CallOptions::new()).await?;
//!     let value = cache.get(b"key").await?;
//!     println!("{:?}", value); // Some([118, 97, 108, 117, 101])
//!
//!     client.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Topology Awareness
//!
//! The client registers as hash-distribution-aware. Every response may carry
//! a cluster topology update; the client installs strictly newer views and
//! routes each keyed operation to the segment's primary owner computed with
//! the same MurmurHash3 variant the servers use. Writes therefore land on
//! the owning node without a server-side hop in the common case.
//!
//! # Failover
//!
//! Operations retry transparently on connection failures and on the
//! retriable server statuses, rotating away from nodes that failed during
//! the call. Cache listeners survive node loss by re-registering on another
//! member; events delivered after such a handover are marked as possibly
//! duplicated.
//!
//! # Keys and Values
//!
//! Keys and values are raw byte slices. The client transmits them with the
//! unspecified media type, so any serialization the application chooses
//! (JSON, protobuf, bincode) passes through untouched.

#![warn(missing_docs)]

pub mod cache;
mod client;
pub mod cluster;
pub mod config;
pub mod connection;
pub mod listener;
pub mod ops;

pub use cache::{CallOptions, EntryIterator, RemoteCache};
pub use client::HotRodClient;
pub use config::{ClientConfig, ClientConfigBuilder};
pub use hotrod_core as core;
pub use hotrod_core::protocol::{EntryMetadata, Expiration, IterationEntry, Lifetime, NamedFactory};
pub use hotrod_core::{HotRodError, Result};
pub use listener::{
    CacheEvent, EventKind, InterestSet, ListenerDescriptor, ListenerId, ListenerRegistration,
};
