//! Tile producers
//!
//! A producer turns quadtree addresses into tiles. Leaf producers own a slice
//! of a [`TileCache`] and build tiles with a [`TileBuilder`]; composite
//! producers in [`compose`] route requests to other producers. Both satisfy
//! the same [`TileProducer`] contract.

pub mod builder;
pub mod cached;
pub mod compose;
pub mod tile_data;

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};

use crate::cache::{Tile, TileCache, TileHandle};
use crate::core::{Error, Result, Vec3};
use crate::quadtree::{TileAddress, MAX_LEVEL};
use crate::task::{Deadline, RenderContext, Scheduler};

pub use builder::{DependencySet, ParameterWatch, TileBuilder, TileInputs, TileOutput};
pub use cached::CachedProducer;
pub use compose::{DelegatingProducer, LevelStackProducer};
pub use tile_data::TileLayout;

/// Per-frame state handed to [`TileProducer::update`].
#[derive(Clone, Debug, Default)]
pub struct SceneState {
    pub frame: u64,
    pub camera_position: Vec3,
    /// Named tuning parameters, e.g. a density slider
    pub parameters: HashMap<String, f32>,
}

impl SceneState {
    pub fn new(frame: u64) -> Self {
        Self {
            frame,
            ..Self::default()
        }
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: f32) -> Self {
        self.parameters.insert(name.into(), value);
        self
    }

    pub fn set_parameter(&mut self, name: impl Into<String>, value: f32) {
        self.parameters.insert(name.into(), value);
    }

    pub fn parameter(&self, name: &str) -> Option<f32> {
        self.parameters.get(name).copied()
    }
}

/// Static configuration of a cache-backed producer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducerConfig {
    pub name: String,
    /// Logical pixels per tile edge
    pub tile_size: u32,
    /// Extra pixels stored on each side of a tile
    #[serde(default)]
    pub border: u32,
    /// `f32` values per pixel
    #[serde(default = "default_components")]
    pub components: u32,
    #[serde(default)]
    pub min_level: u8,
    #[serde(default = "default_max_level")]
    pub max_level: u8,
    /// Whether a tile reads its parent tile (levels above `min_level` only)
    #[serde(default = "default_needs_parent")]
    pub needs_parent: bool,
}

fn default_components() -> u32 {
    1
}

fn default_max_level() -> u8 {
    MAX_LEVEL
}

fn default_needs_parent() -> bool {
    true
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            name: "producer".into(),
            tile_size: 16,
            border: 0,
            components: 1,
            min_level: 0,
            max_level: MAX_LEVEL,
            needs_parent: true,
        }
    }
}

impl ProducerConfig {
    pub fn new(name: impl Into<String>, tile_size: u32) -> Self {
        Self {
            name: name.into(),
            tile_size,
            ..Self::default()
        }
    }

    pub fn with_border(mut self, border: u32) -> Self {
        self.border = border;
        self
    }

    pub fn with_components(mut self, components: u32) -> Self {
        self.components = components;
        self
    }

    pub fn with_levels(mut self, min_level: u8, max_level: u8) -> Self {
        self.min_level = min_level;
        self.max_level = max_level;
        self
    }

    pub fn with_parent(mut self, needs_parent: bool) -> Self {
        self.needs_parent = needs_parent;
        self
    }

    pub fn layout(&self) -> TileLayout {
        TileLayout::new(self.tile_size, self.border, self.components)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::config("producer name must not be empty"));
        }
        if self.tile_size == 0 || self.components == 0 {
            return Err(Error::config(format!(
                "producer '{}' needs a non-zero tile size and component count",
                self.name
            )));
        }
        if self.min_level > self.max_level || self.max_level > MAX_LEVEL {
            return Err(Error::config(format!(
                "producer '{}' has invalid level range {}..={}",
                self.name, self.min_level, self.max_level
            )));
        }
        Ok(())
    }
}

/// Contract shared by every producer, leaf or composite.
pub trait TileProducer: Send + Sync {
    fn name(&self) -> &str;

    /// Sample layout of this producer's tiles.
    fn layout(&self) -> TileLayout;

    fn tile_size(&self) -> u32 {
        self.layout().tile_size
    }

    /// Border pixels stored around every tile.
    fn border(&self) -> u32 {
        self.layout().border
    }

    /// True if this producer can produce `address`. No side effects.
    fn has_tile(&self, address: TileAddress) -> bool;

    /// Pin the tile at `address`, creating it if needed.
    ///
    /// The tile may not be built yet; run its task (see [`get_ready_tile`])
    /// before reading it. Every successful call needs a matching
    /// [`put_tile`](TileProducer::put_tile).
    fn get_tile(&self, address: TileAddress, deadline: Deadline) -> Result<TileHandle>;

    /// Resident tile at `address`, without pinning or creating it.
    fn find_tile(&self, address: TileAddress) -> Option<TileHandle>;

    /// Release a tile returned by `get_tile`.
    fn put_tile(&self, tile: &Tile);

    /// Mark the tile at `address` and its descendants as changed, together
    /// with the tiles of dependent producers. Returns the number invalidated.
    fn invalidate_tile(&self, address: TileAddress) -> usize;

    /// Mark every tile as changed.
    fn invalidate_tiles(&self) -> usize;

    /// Called once per frame before any tile is requested.
    fn update(&self, scene: &SceneState);

    /// Register a producer that reads this one's tiles.
    fn add_dependent(&self, dependent: Weak<dyn TileProducer>);

    /// Cache holding this producer's own tiles, if it has one.
    fn cache(&self) -> Option<Arc<TileCache>>;

    /// Pinned tiles this producer serves, including tiles it forwards from
    /// wrapped producers.
    fn tiles_in_use(&self) -> usize;
}

/// Pin the tile at `address` and run whatever is needed to build it.
///
/// # Errors
/// Propagates `get_tile` errors; `ProductionFailed` when the tile could not be
/// built this time, in which case nothing stays pinned.
pub fn get_ready_tile(
    producer: &dyn TileProducer,
    address: TileAddress,
    deadline: Deadline,
    scheduler: &Scheduler,
    ctx: &mut RenderContext,
) -> Result<TileHandle> {
    let tile = producer.get_tile(address, deadline)?;
    if !tile.is_done() {
        let report = scheduler.run_tasks(&[tile.task().clone()], ctx);
        log::trace!(
            "Produced {} {}: {} task(s) run, {} failed",
            producer.name(),
            address,
            report.executed,
            report.failed
        );
    }
    if tile.is_done() {
        Ok(tile)
    } else {
        producer.put_tile(&tile);
        Err(Error::ProductionFailed {
            producer: producer.name().to_string(),
            address,
        })
    }
}
