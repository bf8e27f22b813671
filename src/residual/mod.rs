//! Residual detail sources
//!
//! Residuals are per-tile corrections added on top of procedural elevation.
//! A source that cannot provide a tile (not present, unreadable) only costs
//! detail: producers fall back to the procedural result.

pub mod disk;

use std::collections::HashMap;
use std::io;

use parking_lot::RwLock;

use crate::quadtree::TileAddress;

pub use disk::{decode_residual, encode_residual, residual_path, save_residual, DiskResidualSource};

/// Synchronous read-by-address access to residual tiles.
pub trait ResidualSource: Send + Sync {
    /// Samples for `address`, `Ok(None)` if the source has no such tile.
    fn read_residual(&self, address: TileAddress) -> io::Result<Option<Vec<f32>>>;

    /// Samples per tile, one per pixel including the border.
    fn sample_count(&self) -> usize;
}

/// Residual tiles held in memory.
#[derive(Debug, Default)]
pub struct MemoryResidualSource {
    sample_count: usize,
    tiles: RwLock<HashMap<TileAddress, Vec<f32>>>,
}

impl MemoryResidualSource {
    pub fn new(sample_count: usize) -> Self {
        Self {
            sample_count,
            tiles: RwLock::new(HashMap::new()),
        }
    }

    pub fn insert(&self, address: TileAddress, samples: Vec<f32>) {
        self.tiles.write().insert(address, samples);
    }

    pub fn remove(&self, address: TileAddress) -> Option<Vec<f32>> {
        self.tiles.write().remove(&address)
    }

    pub fn len(&self) -> usize {
        self.tiles.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.read().is_empty()
    }
}

impl ResidualSource for MemoryResidualSource {
    fn read_residual(&self, address: TileAddress) -> io::Result<Option<Vec<f32>>> {
        Ok(self.tiles.read().get(&address).cloned())
    }

    fn sample_count(&self) -> usize {
        self.sample_count
    }
}
