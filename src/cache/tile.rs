//! Cached tiles and their handles

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLockReadGuard;
use serde::{Deserialize, Serialize};

use crate::quadtree::TileAddress;
use crate::storage::{SlotBuffer, SlotId, TileStorage};
use crate::task::{Task, TaskState};

/// Identifies a producer among those sharing one cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProducerId(pub u32);

impl fmt::Display for ProducerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Production record of one address within one producer.
///
/// A tile owns exactly one storage slot for as long as it is resident. Its
/// task fills that slot; the tile is usable once the task is done.
pub struct Tile {
    producer: ProducerId,
    address: TileAddress,
    slot: SlotId,
    storage: Arc<TileStorage>,
    task: Arc<Task>,
}

/// Shared handle to a resident tile.
pub type TileHandle = Arc<Tile>;

impl Tile {
    pub(crate) fn new(
        producer: ProducerId,
        address: TileAddress,
        slot: SlotId,
        storage: Arc<TileStorage>,
        task: Arc<Task>,
    ) -> Self {
        Self {
            producer,
            address,
            slot,
            storage,
            task,
        }
    }

    pub fn producer(&self) -> ProducerId {
        self.producer
    }

    pub fn address(&self) -> TileAddress {
        self.address
    }

    pub fn level(&self) -> u8 {
        self.address.level
    }

    pub fn slot(&self) -> SlotId {
        self.slot
    }

    /// Task that populates this tile.
    pub fn task(&self) -> &Arc<Task> {
        &self.task
    }

    pub fn state(&self) -> TaskState {
        self.task.state()
    }

    /// True once the slot holds up-to-date data.
    pub fn is_done(&self) -> bool {
        self.task.is_done()
    }

    /// Stamp of the last successful build of this tile; zero until the first one.
    pub fn version(&self) -> u64 {
        self.storage.read(self.slot).version()
    }

    /// Read access to the tile's payload.
    pub fn read(&self) -> RwLockReadGuard<'_, SlotBuffer> {
        self.storage.read(self.slot)
    }

    /// True if both handles refer to the same production record.
    pub fn same_as(&self, other: &Tile) -> bool {
        std::ptr::eq(self, other)
    }
}

impl fmt::Debug for Tile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tile")
            .field("producer", &self.producer)
            .field("address", &self.address)
            .field("slot", &self.slot)
            .field("state", &self.task.state())
            .finish()
    }
}
