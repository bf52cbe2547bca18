//! Client listener registrations and cache events.

pub(crate) mod manager;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use hotrod_core::protocol::{
    NamedFactory, CACHE_ENTRY_CREATED_EVENT, CACHE_ENTRY_EXPIRED_EVENT,
    CACHE_ENTRY_MODIFIED_EVENT, CACHE_ENTRY_REMOVED_EVENT,
};
use tokio::sync::watch;
use uuid::Uuid;

/// Unique identifier for a listener registration.
///
/// Client-generated; its 16 bytes travel in the registration frame and tag
/// every event the server pushes back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(Uuid);

impl ListenerId {
    /// Creates a new unique listener id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The id's wire form.
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    /// Reconstructs an id from its wire form.
    pub fn from_wire(bytes: &[u8]) -> Option<Self> {
        Uuid::from_slice(bytes).ok().map(Self)
    }
}

impl Default for ListenerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ListenerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// Which event kinds a listener wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterestSet(u32);

impl InterestSet {
    /// Entry creations.
    pub const CREATED: InterestSet = InterestSet(0x01);
    /// Entry modifications.
    pub const MODIFIED: InterestSet = InterestSet(0x02);
    /// Entry removals.
    pub const REMOVED: InterestSet = InterestSet(0x04);
    /// Entry expirations.
    pub const EXPIRED: InterestSet = InterestSet(0x08);

    /// Every event kind.
    pub fn all() -> Self {
        Self::CREATED | Self::MODIFIED | Self::REMOVED | Self::EXPIRED
    }

    /// The wire bitset.
    pub fn bits(self) -> u32 {
        self.0
    }

    /// Whether `kind` is in the set.
    pub fn contains(self, kind: EventKind) -> bool {
        self.0 & InterestSet::from(kind).0 != 0
    }
}

impl std::ops::BitOr for InterestSet {
    type Output = InterestSet;

    fn bitor(self, rhs: InterestSet) -> InterestSet {
        InterestSet(self.0 | rhs.0)
    }
}

impl From<EventKind> for InterestSet {
    fn from(kind: EventKind) -> Self {
        match kind {
            EventKind::Created => InterestSet::CREATED,
            EventKind::Modified => InterestSet::MODIFIED,
            EventKind::Removed => InterestSet::REMOVED,
            EventKind::Expired => InterestSet::EXPIRED,
        }
    }
}

/// The kind of change a cache event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// An entry was created.
    Created,
    /// An entry was overwritten.
    Modified,
    /// An entry was removed.
    Removed,
    /// An entry expired.
    Expired,
}

impl EventKind {
    /// Maps an event opcode to its kind.
    pub fn from_opcode(opcode: u8) -> Option<Self> {
        match opcode {
            CACHE_ENTRY_CREATED_EVENT => Some(Self::Created),
            CACHE_ENTRY_MODIFIED_EVENT => Some(Self::Modified),
            CACHE_ENTRY_REMOVED_EVENT => Some(Self::Removed),
            CACHE_ENTRY_EXPIRED_EVENT => Some(Self::Expired),
            _ => None,
        }
    }
}

/// A cache change delivered to a listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEvent {
    /// What happened.
    pub kind: EventKind,
    /// Key of the affected entry.
    pub key: Vec<u8>,
    /// New entry version; 0 for removals and expirations.
    pub version: i64,
    /// `true` when this delivery may be a duplicate: either the server
    /// flagged it, or it arrived after a failover re-registration.
    pub retried: bool,
}

/// What to register on the server.
#[derive(Debug, Clone, Default)]
pub struct ListenerDescriptor {
    /// Event kinds to receive; defaults to all.
    pub interests: Option<InterestSet>,
    /// Replay current cache state as created-events on registration.
    pub include_state: bool,
    /// Server-side event filter factory.
    pub filter: Option<NamedFactory>,
    /// Server-side event converter factory.
    pub converter: Option<NamedFactory>,
    /// Deliver raw unconverted data.
    pub raw_data: bool,
    /// Bloom-filter bits for near-cache listeners; 0 disables.
    pub bloom_bits: u32,
}

impl ListenerDescriptor {
    /// A descriptor for all event kinds with no server-side processing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Limits the registration to the given kinds.
    pub fn interests(mut self, interests: InterestSet) -> Self {
        self.interests = Some(interests);
        self
    }

    /// Requests a state replay on registration.
    pub fn include_state(mut self) -> Self {
        self.include_state = true;
        self
    }

    /// Installs a server-side filter factory.
    pub fn filter(mut self, factory: NamedFactory) -> Self {
        self.filter = Some(factory);
        self
    }

    /// Installs a server-side converter factory.
    pub fn converter(mut self, factory: NamedFactory) -> Self {
        self.converter = Some(factory);
        self
    }
}

/// Handle for an active listener.
///
/// Dropping the handle stops the event task and closes the listener's
/// channel; use [`RemoteCache::remove_listener`] first for a clean
/// server-side removal.
///
/// [`RemoteCache::remove_listener`]: crate::cache::RemoteCache::remove_listener
#[derive(Debug)]
pub struct ListenerRegistration {
    id: ListenerId,
    active: Arc<AtomicBool>,
    shutdown_tx: watch::Sender<bool>,
}

impl ListenerRegistration {
    pub(crate) fn new(id: ListenerId) -> (Self, watch::Receiver<bool>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        (
            Self {
                id,
                active: Arc::new(AtomicBool::new(true)),
                shutdown_tx,
            },
            shutdown_rx,
        )
    }

    /// The listener's id.
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Whether the listener's event task is still running.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn active_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.active)
    }

    /// Stops the event task without a server-side removal.
    pub fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
        let _ = self.shutdown_tx.send(true);
    }
}

impl Drop for ListenerRegistration {
    fn drop(&mut self) {
        self.deactivate();
    }
}
