//! Tile Storage - fixed-capacity pool of homogeneous slots
//!
//! - Fixed capacity chosen at construction, never grows
//! - Every slot has the same byte size and channel count
//! - Free slots are handed out from a free list; the owning cache decides
//!   what to evict when the list runs dry

use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::{Deserialize, Serialize};

use super::slot::{SlotBuffer, SlotId};
use crate::core::{Error, Result};

/// Shape of a storage pool.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Number of slots
    pub capacity: usize,
    /// Bytes per channel per slot (multiple of 4)
    pub tile_bytes: usize,
    /// Channels per slot, e.g. color + depth
    #[serde(default = "default_channels")]
    pub channels: usize,
}

fn default_channels() -> usize {
    1
}

impl Default for StorageConfig {
    fn default() -> Self {
        // 256 tiles of 64x64 f32 samples
        Self::new(256, 64 * 64 * 4)
    }
}

impl StorageConfig {
    pub fn new(capacity: usize, tile_bytes: usize) -> Self {
        Self {
            capacity,
            tile_bytes,
            channels: 1,
        }
    }

    pub fn with_channels(mut self, channels: usize) -> Self {
        self.channels = channels;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(Error::config("tile storage needs at least one slot"));
        }
        if self.capacity > u32::MAX as usize {
            return Err(Error::config(format!("tile storage capacity {} too large", self.capacity)));
        }
        if self.tile_bytes == 0 || self.tile_bytes % 4 != 0 {
            return Err(Error::config(format!(
                "tile size {} bytes must be a non-zero multiple of 4",
                self.tile_bytes
            )));
        }
        if self.channels == 0 {
            return Err(Error::config("tile storage needs at least one channel"));
        }
        Ok(())
    }
}

/// Pool of fixed-size tile slots.
pub struct TileStorage {
    config: StorageConfig,
    /// Slot payloads, individually locked so producers can fill slots concurrently
    slots: Vec<RwLock<SlotBuffer>>,
    /// Free slot indices; popped from the back
    free_slots: Mutex<Vec<SlotId>>,
}

impl TileStorage {
    /// Create a pool, allocating every slot up front.
    pub fn new(config: StorageConfig) -> Result<Self> {
        config.validate()?;

        let slots = (0..config.capacity)
            .map(|_| RwLock::new(SlotBuffer::new(config.channels, config.tile_bytes)))
            .collect();
        // Reversed so that slot 0 is handed out first.
        let free_slots = (0..config.capacity as u32).rev().map(SlotId).collect();

        log::debug!(
            "Created tile storage: {} slots x {} channel(s) x {} bytes",
            config.capacity,
            config.channels,
            config.tile_bytes
        );

        Ok(Self {
            config,
            slots,
            free_slots: Mutex::new(free_slots),
        })
    }

    /// Take a free slot, `None` when the pool is full.
    ///
    /// The slot comes back zeroed with its version reset.
    pub fn allocate(&self) -> Option<SlotId> {
        let slot = self.free_slots.lock().pop()?;
        self.slots[slot.index()].write().reset();
        log::trace!("Allocated slot {}", slot.0);
        Some(slot)
    }

    /// Return a slot to the free list.
    pub fn free(&self, slot: SlotId) {
        let mut free = self.free_slots.lock();
        debug_assert!(!free.contains(&slot), "slot {} freed twice", slot.0);
        debug_assert!(slot.index() < self.config.capacity);
        free.push(slot);
        log::trace!("Freed slot {}", slot.0);
    }

    /// Shared access to a slot's payload.
    pub fn read(&self, slot: SlotId) -> RwLockReadGuard<'_, SlotBuffer> {
        self.slots[slot.index()].read()
    }

    /// Exclusive access to a slot's payload.
    pub fn write(&self, slot: SlotId) -> RwLockWriteGuard<'_, SlotBuffer> {
        self.slots[slot.index()].write()
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    pub fn tile_bytes(&self) -> usize {
        self.config.tile_bytes
    }

    pub fn channels(&self) -> usize {
        self.config.channels
    }

    pub fn free_count(&self) -> usize {
        self.free_slots.lock().len()
    }

    pub fn used_count(&self) -> usize {
        self.capacity() - self.free_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_until_full() {
        let storage = TileStorage::new(StorageConfig::new(3, 64)).unwrap();
        assert_eq!(storage.allocate(), Some(SlotId(0)));
        assert_eq!(storage.allocate(), Some(SlotId(1)));
        assert_eq!(storage.allocate(), Some(SlotId(2)));
        assert_eq!(storage.allocate(), None);
        assert_eq!(storage.used_count(), 3);
        assert_eq!(storage.free_count(), 0);
    }

    #[test]
    fn test_used_plus_free_is_capacity() {
        let storage = TileStorage::new(StorageConfig::new(8, 16)).unwrap();
        let mut held = Vec::new();
        for step in 0..20 {
            if step % 3 == 2 {
                if let Some(slot) = held.pop() {
                    storage.free(slot);
                }
            } else if let Some(slot) = storage.allocate() {
                held.push(slot);
            }
            assert_eq!(storage.used_count() + storage.free_count(), storage.capacity());
            assert_eq!(storage.used_count(), held.len());
        }
    }

    #[test]
    fn test_freed_slot_is_reused() {
        let storage = TileStorage::new(StorageConfig::new(2, 4)).unwrap();
        let a = storage.allocate().unwrap();
        let _b = storage.allocate().unwrap();
        storage.free(a);
        assert_eq!(storage.allocate(), Some(a));
    }

    #[test]
    fn test_reallocated_slot_is_reset() {
        let storage = TileStorage::new(StorageConfig::new(1, 16)).unwrap();
        let slot = storage.allocate().unwrap();
        {
            let mut buffer = storage.write(slot);
            buffer.samples_mut(0)[1] = 3.0;
            buffer.bump_version();
        }
        storage.free(slot);

        let again = storage.allocate().unwrap();
        let buffer = storage.read(again);
        assert_eq!(buffer.version(), 0);
        assert!(buffer.samples(0).iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_invalid_configs_rejected() {
        assert!(TileStorage::new(StorageConfig::new(0, 64)).is_err());
        assert!(TileStorage::new(StorageConfig::new(4, 0)).is_err());
        assert!(TileStorage::new(StorageConfig::new(4, 6)).is_err());
        assert!(TileStorage::new(StorageConfig::new(4, 64).with_channels(0)).is_err());
    }

    #[test]
    fn test_multi_channel_slots() {
        let storage = TileStorage::new(StorageConfig::new(1, 32).with_channels(2)).unwrap();
        let slot = storage.allocate().unwrap();
        storage.write(slot).samples_mut(1)[0] = 4.0;
        let buffer = storage.read(slot);
        assert_eq!(buffer.channel_count(), 2);
        assert_eq!(buffer.samples(0)[0], 0.0);
        assert_eq!(buffer.samples(1)[0], 4.0);
    }
}
