//! Exclusive channel checkout per server address.
//!
//! Request/response pairs on a channel are strictly ordered, so a channel
//! serves one operation at a time. The registry keeps at most one live
//! channel per address behind an async mutex; acquiring hands back an
//! owned lease that reconnects lazily, and dropping the lease returns the
//! channel for the next caller.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hotrod_core::Result;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

use super::channel::Channel;

/// Exclusive access to one address's channel for the duration of an
/// operation attempt.
///
/// Dropping the lease releases the channel intact; [`discard`] tears it
/// down instead, forcing the next acquire to reconnect. A lease must be
/// discarded whenever the attempt left the stream position unknown (write
/// or read failed mid-frame, attempt timed out).
///
/// [`discard`]: ChannelLease::discard
pub struct ChannelLease {
    guard: OwnedMutexGuard<Option<Channel>>,
}

impl ChannelLease {
    /// The live channel under the lease.
    pub fn channel(&mut self) -> &mut Channel {
        // The registry only hands out leases after populating the slot.
        match self.guard.as_mut() {
            Some(channel) => channel,
            None => unreachable!("lease issued over an empty channel slot"),
        }
    }

    /// Tears the channel down; the next acquire for this address dials a
    /// fresh connection.
    pub fn discard(mut self) {
        if let Some(channel) = self.guard.take() {
            warn!(address = %channel.addr(), "discarding channel");
        }
    }
}

impl std::fmt::Debug for ChannelLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelLease").finish_non_exhaustive()
    }
}

/// Per-address channel slots.
#[derive(Debug)]
pub struct ChannelRegistry {
    slots: std::sync::Mutex<HashMap<SocketAddr, Arc<Mutex<Option<Channel>>>>>,
    connect_timeout: Duration,
    intelligence: u8,
}

impl ChannelRegistry {
    /// Creates an empty registry.
    pub fn new(connect_timeout: Duration, intelligence: u8) -> Self {
        Self {
            slots: std::sync::Mutex::new(HashMap::new()),
            connect_timeout,
            intelligence,
        }
    }

    /// Checks out the channel for `addr`, connecting if none is live.
    ///
    /// Waits for any in-flight operation on the same address to release it
    /// first; connect failures leave the slot empty.
    pub async fn acquire(&self, addr: SocketAddr) -> Result<ChannelLease> {
        let slot = {
            let mut slots = match self.slots.lock() {
                Ok(slots) => slots,
                Err(poisoned) => poisoned.into_inner(),
            };
            Arc::clone(slots.entry(addr).or_default())
        };
        let mut guard = slot.lock_owned().await;
        if guard.is_none() {
            *guard = Some(Channel::connect(addr, self.connect_timeout, self.intelligence).await?);
        }
        Ok(ChannelLease { guard })
    }

    /// Closes every live channel. Slots blocked on in-flight operations
    /// are skipped; their leases discard on completion of shutdown paths.
    pub fn clear(&self) {
        let slots = {
            let mut slots = match self.slots.lock() {
                Ok(slots) => slots,
                Err(poisoned) => poisoned.into_inner(),
            };
            std::mem::take(&mut *slots)
        };
        for (addr, slot) in slots {
            if let Ok(mut guard) = slot.try_lock() {
                if guard.take().is_some() {
                    debug!(address = %addr, "closed channel");
                }
            }
        }
    }
}
