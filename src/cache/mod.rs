//! Tile caching
//!
//! A [`TileCache`] binds `(producer, address)` pairs to slots of a
//! fixed-capacity [`TileStorage`](crate::storage::TileStorage), pinning tiles
//! while they are in use and recycling the least recently released ones.

pub mod tile;
pub mod tile_cache;

pub use tile::{ProducerId, Tile, TileHandle};
pub use tile_cache::{CacheStats, EvictionListener, TileCache};
