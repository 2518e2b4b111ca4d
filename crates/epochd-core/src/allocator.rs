// ABOUTME: Epoch allocation: strictly increasing per-container logical timestamps.
// ABOUTME: Offers a plain compare-and-swap counter and a hybrid logical clock behind one trait.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::epoch::Epoch;

/// Low bits of a clock epoch reserved for the logical counter.
pub const LOGICAL_BITS: u32 = 18;
const LOGICAL_MASK: u64 = (1 << LOGICAL_BITS) - 1;

/// Counter epochs reserved per durable reservation.
pub const DEFAULT_RESERVATION_BLOCK: u64 = 1024;
/// Clock epochs reserved per durable reservation, roughly one second of wall time.
const CLOCK_RESERVATION_BLOCK: u64 = 1 << 30;

/// Errors that can occur while allocating an epoch.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AllocationError {
    #[error("epoch space exhausted for container {0}")]
    Exhausted(Ulid),

    #[error("wall clock unavailable or before the unix epoch")]
    ClockBeforeEpoch,
}

/// Source of strictly increasing epochs, one sequence per container.
#[async_trait]
pub trait EpochAllocator: Send + Sync {
    /// Return an epoch greater than every epoch previously returned or observed
    /// for `container`. Concurrent callers never receive the same value.
    async fn next_epoch(&self, container: Ulid) -> Result<Epoch, AllocationError>;

    /// Raise the floor for `container` to at least `epoch`. Used for recovered
    /// high-water marks and for epochs advanced by unrelated write activity.
    async fn observe(&self, container: Ulid, epoch: Epoch);

    /// Drop all state kept for `container`.
    async fn forget(&self, container: Ulid);

    /// How far past an issued epoch the registry durably reserves before that
    /// epoch is handed out. After a restart allocation resumes above the
    /// reservation, so an epoch that was issued but never recorded is not reused.
    fn reservation_block(&self) -> u64 {
        DEFAULT_RESERVATION_BLOCK
    }
}

/// Per-container floors, each an atomic holding the last issued or observed epoch.
#[derive(Default)]
struct Floors {
    map: RwLock<HashMap<Ulid, Arc<AtomicU64>>>,
}

impl Floors {
    async fn get(&self, container: Ulid) -> Arc<AtomicU64> {
        if let Some(floor) = self.map.read().await.get(&container) {
            return Arc::clone(floor);
        }
        let mut map = self.map.write().await;
        Arc::clone(
            map.entry(container)
                .or_insert_with(|| Arc::new(AtomicU64::new(0))),
        )
    }

    async fn observe(&self, container: Ulid, epoch: Epoch) {
        self.get(container).await.fetch_max(epoch.0, Ordering::AcqRel);
    }

    async fn forget(&self, container: Ulid) {
        self.map.write().await.remove(&container);
    }
}

/// Allocates `floor + 1` with a compare-and-swap loop.
#[derive(Default)]
pub struct CounterAllocator {
    floors: Floors,
}

impl CounterAllocator {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EpochAllocator for CounterAllocator {
    async fn next_epoch(&self, container: Ulid) -> Result<Epoch, AllocationError> {
        let floor = self.floors.get(container).await;
        let prev = floor
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| cur.checked_add(1))
            .map_err(|_| AllocationError::Exhausted(container))?;
        Ok(Epoch(prev + 1))
    }

    async fn observe(&self, container: Ulid, epoch: Epoch) {
        self.floors.observe(container, epoch).await;
    }

    async fn forget(&self, container: Ulid) {
        self.floors.forget(container).await;
    }
}

/// Reads physical time in nanoseconds since the unix epoch.
pub type ClockSource = Box<dyn Fn() -> Option<u64> + Send + Sync>;

/// Hybrid logical clock: the physical part is wall-clock nanoseconds with the
/// low [`LOGICAL_BITS`] cleared, and the logical part breaks ties. Epochs track
/// real time so they keep increasing across restarts.
pub struct ClockAllocator {
    floors: Floors,
    clock: ClockSource,
}

impl Default for ClockAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockAllocator {
    /// Allocator backed by the system wall clock.
    pub fn new() -> Self {
        Self::with_clock(Box::new(|| {
            Utc::now()
                .timestamp_nanos_opt()
                .and_then(|n| u64::try_from(n).ok())
        }))
    }

    pub fn with_clock(clock: ClockSource) -> Self {
        Self {
            floors: Floors::default(),
            clock,
        }
    }

    fn physical(&self) -> Result<u64, AllocationError> {
        let now = (self.clock)().ok_or(AllocationError::ClockBeforeEpoch)?;
        Ok(now & !LOGICAL_MASK)
    }
}

#[async_trait]
impl EpochAllocator for ClockAllocator {
    async fn next_epoch(&self, container: Ulid) -> Result<Epoch, AllocationError> {
        let physical = self.physical()?;
        let floor = self.floors.get(container).await;
        let prev = floor
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
                cur.checked_add(1).map(|next| next.max(physical))
            })
            .map_err(|_| AllocationError::Exhausted(container))?;
        Ok(Epoch(prev.saturating_add(1).max(physical)))
    }

    async fn observe(&self, container: Ulid, epoch: Epoch) {
        self.floors.observe(container, epoch).await;
    }

    async fn forget(&self, container: Ulid) {
        self.floors.forget(container).await;
    }

    fn reservation_block(&self) -> u64 {
        CLOCK_RESERVATION_BLOCK
    }
}
