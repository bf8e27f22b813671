//! Tile Cache - address to slot mapping with LRU reuse of unused tiles
//!
//! - A tile requested with `get_tile` is pinned until the matching `put_tile`
//! - Unpinned tiles stay resident and are reused on the next request
//! - When the storage pool is full, the least recently released unpinned tile
//!   is evicted and its slot handed to the new tile
//! - When every resident tile is pinned the request is rejected

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::tile::{ProducerId, Tile, TileHandle};
use crate::core::{Error, Result};
use crate::quadtree::TileAddress;
use crate::storage::{SlotId, StorageConfig, TileStorage};
use crate::task::{Deadline, InvalidationReason, Task};

type TileKey = (ProducerId, TileAddress);

/// Receives notice that one of its tiles was evicted.
pub trait EvictionListener: Send + Sync {
    fn on_tile_discarded(&self, address: TileAddress);
}

/// Snapshot of cache counters.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Requests served by a resident tile
    pub hits: u64,
    /// Requests that created a tile
    pub misses: u64,
    /// Tiles evicted to make room
    pub evictions: u64,
    /// Requests rejected because every tile was pinned
    pub capacity_failures: u64,
    /// Resident tiles
    pub resident: usize,
    /// Resident tiles with a non-zero use count
    pub in_use: usize,
    /// Free storage slots
    pub free_slots: usize,
    /// Storage pool capacity
    pub capacity: usize,
}

impl CacheStats {
    /// Fraction of requests served without creating a tile.
    pub fn hit_rate(&self) -> f32 {
        let requests = self.hits + self.misses;
        if requests == 0 {
            1.0
        } else {
            self.hits as f32 / requests as f32
        }
    }
}

/// Use count and LRU stamp of a resident tile.
struct Entry {
    tile: TileHandle,
    users: usize,
    /// Key in `CacheState::unused` while `users == 0`
    lru_stamp: Option<u64>,
}

struct CacheState {
    tiles: HashMap<TileKey, Entry>,
    /// Unused tiles ordered by release time, oldest first
    unused: BTreeMap<u64, TileKey>,
    /// Monotonic release counter
    clock: u64,
    stats: CacheStats,
    next_producer: u32,
}

impl CacheState {
    fn release_stamp(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Oldest unused tile whose task is not being run by some graph.
    fn eviction_candidate(&self) -> Option<(u64, TileKey)> {
        self.unused
            .iter()
            .find(|(_, key)| {
                self.tiles
                    .get(key)
                    .map_or(false, |entry| !entry.tile.task().is_in_flight())
            })
            .map(|(&stamp, &key)| (stamp, key))
    }
}

/// Fixed-capacity cache of tiles for one or more producers.
pub struct TileCache {
    name: String,
    storage: Arc<TileStorage>,
    state: Mutex<CacheState>,
    listeners: Mutex<HashMap<ProducerId, Weak<dyn EvictionListener>>>,
}

impl TileCache {
    /// Create a cache over a new storage pool.
    pub fn new(name: impl Into<String>, config: StorageConfig) -> Result<Arc<Self>> {
        let storage = Arc::new(TileStorage::new(config)?);
        Ok(Self::with_storage(name, storage))
    }

    /// Create a cache over an existing storage pool.
    ///
    /// The cache assumes it is the only user of the pool.
    pub fn with_storage(name: impl Into<String>, storage: Arc<TileStorage>) -> Arc<Self> {
        let name = name.into();
        log::debug!("Created tile cache '{}' with {} slots", name, storage.capacity());
        Arc::new(Self {
            name,
            storage,
            state: Mutex::new(CacheState {
                tiles: HashMap::new(),
                unused: BTreeMap::new(),
                clock: 0,
                stats: CacheStats::default(),
                next_producer: 0,
            }),
            listeners: Mutex::new(HashMap::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn storage(&self) -> &Arc<TileStorage> {
        &self.storage
    }

    pub fn capacity(&self) -> usize {
        self.storage.capacity()
    }

    /// Reserve an id for a producer storing tiles in this cache.
    pub fn register_producer(&self, listener: Option<Weak<dyn EvictionListener>>) -> ProducerId {
        let id = {
            let mut state = self.state.lock();
            let id = ProducerId(state.next_producer);
            state.next_producer += 1;
            id
        };
        if let Some(listener) = listener {
            self.listeners.lock().insert(id, listener);
        }
        id
    }

    /// Pin the tile at `address`, creating it if it is not resident.
    ///
    /// `make_task` is called with the new tile's slot when the tile has to be
    /// created; it must not call back into this cache. A resident tile has its
    /// task's deadline tightened to `deadline`.
    ///
    /// # Errors
    /// `CapacityExhausted` when the pool is full and every resident tile is
    /// pinned or being produced.
    pub fn get_tile<F>(
        &self,
        producer: ProducerId,
        address: TileAddress,
        deadline: Deadline,
        make_task: F,
    ) -> Result<TileHandle>
    where
        F: FnOnce(SlotId) -> Arc<Task>,
    {
        let key = (producer, address);
        let mut evicted = None;

        let tile = {
            let mut state = self.state.lock();
            let state = &mut *state;

            if let Some(entry) = state.tiles.get_mut(&key) {
                entry.users += 1;
                if let Some(stamp) = entry.lru_stamp.take() {
                    state.unused.remove(&stamp);
                }
                entry.tile.task().raise_priority(deadline);
                state.stats.hits += 1;
                return Ok(entry.tile.clone());
            }

            let slot = match self.storage.allocate() {
                Some(slot) => slot,
                None => match state.eviction_candidate() {
                    Some((stamp, victim)) => {
                        state.unused.remove(&stamp);
                        // Candidate came from `unused`, so the entry exists.
                        let entry = state.tiles.remove(&victim).ok_or_else(|| {
                            Error::config(format!("cache '{}' lost track of an unused tile", self.name))
                        })?;
                        state.stats.evictions += 1;
                        log::debug!(
                            "Cache '{}' evicting tile {} of producer {}",
                            self.name,
                            victim.1,
                            victim.0
                        );
                        evicted = Some(victim);
                        self.storage.free(entry.tile.slot());
                        self.storage.allocate().ok_or_else(|| {
                            Error::config(format!("cache '{}' could not reuse an evicted slot", self.name))
                        })?
                    }
                    None => {
                        state.stats.capacity_failures += 1;
                        let pinned = state.tiles.values().filter(|e| e.users > 0).count();
                        log::error!(
                            "Cache '{}' is full: {} of {} tiles pinned, cannot create tile {}",
                            self.name,
                            pinned,
                            self.capacity(),
                            address
                        );
                        return Err(Error::CapacityExhausted {
                            cache: self.name.clone(),
                            capacity: self.capacity(),
                            pinned,
                        });
                    }
                },
            };

            let task = make_task(slot);
            let tile = Arc::new(Tile::new(producer, address, slot, self.storage.clone(), task));
            state.tiles.insert(
                key,
                Entry {
                    tile: tile.clone(),
                    users: 1,
                    lru_stamp: None,
                },
            );
            state.stats.misses += 1;
            log::trace!("Cache '{}' created tile {} in slot {}", self.name, address, slot.0);
            tile
        };

        if let Some((owner, discarded)) = evicted {
            self.notify_discarded(owner, discarded);
        }
        Ok(tile)
    }

    /// Look up a resident tile without pinning it or creating it.
    ///
    /// The handle is only valid while some requester keeps the tile pinned;
    /// an unpinned tile may be evicted and its slot reused at any time.
    pub fn find_tile(&self, producer: ProducerId, address: TileAddress) -> Option<TileHandle> {
        self.state
            .lock()
            .tiles
            .get(&(producer, address))
            .map(|entry| entry.tile.clone())
    }

    /// Release one pin on `tile`. At zero pins the tile becomes evictable but
    /// stays resident.
    pub fn put_tile(&self, tile: &Tile) {
        let key = (tile.producer(), tile.address());
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let stamp = state.release_stamp();

        let Some(entry) = state.tiles.get_mut(&key) else {
            log::warn!("Cache '{}': put_tile for non-resident tile {}", self.name, tile.address());
            return;
        };
        if !entry.tile.same_as(tile) || entry.users == 0 {
            log::warn!("Cache '{}': unbalanced put_tile for tile {}", self.name, tile.address());
            return;
        }

        entry.users -= 1;
        if entry.users == 0 {
            entry.lru_stamp = Some(stamp);
            state.unused.insert(stamp, key);
        }
    }

    /// Invalidate the tiles of `producer` at or below `address`.
    ///
    /// Slots stay allocated; the next request re-runs production in place.
    /// Returns the number of tiles invalidated.
    pub fn invalidate_subtree(
        &self,
        producer: ProducerId,
        address: TileAddress,
        reason: InvalidationReason,
    ) -> usize {
        self.invalidate_where(producer, reason, |a| address.contains(a))
    }

    /// Invalidate every resident tile of `producer`.
    pub fn invalidate_producer(&self, producer: ProducerId, reason: InvalidationReason) -> usize {
        self.invalidate_where(producer, reason, |_| true)
    }

    fn invalidate_where<P>(&self, producer: ProducerId, reason: InvalidationReason, pred: P) -> usize
    where
        P: Fn(&TileAddress) -> bool,
    {
        let state = self.state.lock();
        let mut count = 0;
        for ((owner, address), entry) in &state.tiles {
            if *owner == producer && pred(address) {
                entry.tile.task().invalidate(reason);
                count += 1;
            }
        }
        log::debug!(
            "Cache '{}' invalidated {} tile(s) of producer {} ({:?})",
            self.name,
            count,
            producer,
            reason
        );
        count
    }

    /// Number of pinned tiles of `producer`.
    pub fn tiles_in_use(&self, producer: ProducerId) -> usize {
        self.state
            .lock()
            .tiles
            .iter()
            .filter(|((owner, _), entry)| *owner == producer && entry.users > 0)
            .count()
    }

    /// Run `f` while none of `producer`'s tiles is pinned or being produced.
    ///
    /// Requests to this cache wait until `f` returns. When tiles are busy `f`
    /// is not run and their count is returned instead.
    pub fn with_idle_producer<R>(&self, producer: ProducerId, f: impl FnOnce() -> R) -> std::result::Result<R, usize> {
        let state = self.state.lock();
        let busy = state
            .tiles
            .iter()
            .filter(|((owner, _), entry)| {
                *owner == producer && (entry.users > 0 || entry.tile.task().is_in_flight())
            })
            .count();
        if busy > 0 {
            return Err(busy);
        }
        let result = f();
        drop(state);
        Ok(result)
    }

    /// Current pin count of a resident tile.
    pub fn use_count(&self, producer: ProducerId, address: TileAddress) -> Option<usize> {
        self.state.lock().tiles.get(&(producer, address)).map(|e| e.users)
    }

    /// Addresses of every resident tile of `producer`, sorted.
    pub fn resident_addresses(&self, producer: ProducerId) -> Vec<TileAddress> {
        let state = self.state.lock();
        let mut addresses: Vec<_> = state
            .tiles
            .keys()
            .filter(|(owner, _)| *owner == producer)
            .map(|(_, address)| *address)
            .collect();
        addresses.sort();
        addresses
    }

    /// Unused tiles in eviction order, oldest first.
    pub fn eviction_order(&self) -> Vec<(ProducerId, TileAddress)> {
        self.state.lock().unused.values().copied().collect()
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            resident: state.tiles.len(),
            in_use: state.tiles.values().filter(|e| e.users > 0).count(),
            free_slots: self.storage.free_count(),
            capacity: self.storage.capacity(),
            ..state.stats.clone()
        }
    }

    /// Verify the bookkeeping of the cache, describing the first violation found.
    pub fn check_invariants(&self) -> std::result::Result<(), String> {
        let state = self.state.lock();
        let used = self.storage.used_count();
        let free = self.storage.free_count();

        if used + free != self.storage.capacity() {
            return Err(format!("used {} + free {} != capacity {}", used, free, self.storage.capacity()));
        }
        if used != state.tiles.len() {
            return Err(format!("{} slots used but {} tiles resident", used, state.tiles.len()));
        }

        let mut slots: Vec<SlotId> = state.tiles.values().map(|e| e.tile.slot()).collect();
        slots.sort();
        if slots.windows(2).any(|w| w[0] == w[1]) {
            return Err("two resident tiles share a slot".into());
        }

        for (key, entry) in &state.tiles {
            match entry.lru_stamp {
                Some(stamp) if entry.users > 0 => {
                    return Err(format!("tile {} pinned but listed unused at {}", key.1, stamp));
                }
                Some(stamp) if state.unused.get(&stamp) != Some(key) => {
                    return Err(format!("tile {} has a stale LRU stamp", key.1));
                }
                None if entry.users == 0 => {
                    return Err(format!("tile {} unused but missing from the LRU list", key.1));
                }
                _ => {}
            }
        }
        if state.unused.len() != state.tiles.values().filter(|e| e.users == 0).count() {
            return Err("LRU list length does not match unused tiles".into());
        }
        Ok(())
    }

    fn notify_discarded(&self, producer: ProducerId, address: TileAddress) {
        let listener = self.listeners.lock().get(&producer).and_then(Weak::upgrade);
        if let Some(listener) = listener {
            listener.on_tile_discarded(address);
        }
    }
}

impl std::fmt::Debug for TileCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileCache")
            .field("name", &self.name)
            .field("stats", &self.stats())
            .finish()
    }
}
