//! Declarative producer graph descriptors

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::layers::{AmplifyParams, ElevationParams, OrthoParams};
use crate::producer::{ProducerConfig, TileLayout};
use crate::quadtree::MAX_LEVEL;

/// One tile cache and its storage pool.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CacheDescriptor {
    pub name: String,
    /// Number of tiles the cache can hold
    pub capacity: usize,
    /// Bytes per slot; defaults to the largest tile of the producers using the cache
    #[serde(default)]
    pub tile_bytes: Option<usize>,
    #[serde(default = "default_channels")]
    pub channels: usize,
}

fn default_channels() -> usize {
    1
}

/// Tile geometry and level range of a cache-backed producer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutDescriptor {
    pub tile_size: u32,
    #[serde(default)]
    pub border: u32,
    #[serde(default)]
    pub min_level: u8,
    #[serde(default = "default_max_level")]
    pub max_level: u8,
}

fn default_max_level() -> u8 {
    MAX_LEVEL
}

impl LayoutDescriptor {
    /// Producer configuration with `components` values per pixel.
    pub fn producer_config(&self, name: &str, components: u32, needs_parent: bool) -> ProducerConfig {
        ProducerConfig::new(name, self.tile_size)
            .with_border(self.border)
            .with_components(components)
            .with_levels(self.min_level, self.max_level)
            .with_parent(needs_parent)
    }
}

/// Residual tiles on disk.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResidualDescriptor {
    pub root: PathBuf,
}

/// What a producer computes and from which other producers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProducerKind {
    Elevation {
        layout: LayoutDescriptor,
        #[serde(default)]
        params: ElevationParams,
        #[serde(default)]
        residuals: Option<ResidualDescriptor>,
    },
    Normal {
        layout: LayoutDescriptor,
        elevation: String,
        world_size: f32,
    },
    Ortho {
        layout: LayoutDescriptor,
        elevation: String,
        normals: String,
        #[serde(default)]
        params: OrthoParams,
    },
    /// Forward to `delegate`, upsample beyond its resolution
    Fallback {
        delegate: String,
        #[serde(default)]
        floor_level: u8,
        max_level: u8,
    },
    /// One amplification producer per level above `min_level`
    LevelStack {
        base: String,
        min_level: u8,
        max_level: u8,
        #[serde(default)]
        params: AmplifyParams,
    },
}

impl ProducerKind {
    /// Names of the producers this one reads from.
    pub fn inputs(&self) -> Vec<&str> {
        match self {
            ProducerKind::Elevation { .. } => Vec::new(),
            ProducerKind::Normal { elevation, .. } => vec![elevation.as_str()],
            ProducerKind::Ortho {
                elevation, normals, ..
            } => vec![elevation.as_str(), normals.as_str()],
            ProducerKind::Fallback { delegate, .. } => vec![delegate.as_str()],
            ProducerKind::LevelStack { base, .. } => vec![base.as_str()],
        }
    }

    /// Own layout for cache-backed kinds; composites inherit their input's.
    pub fn own_layout(&self) -> Option<TileLayout> {
        match self {
            ProducerKind::Elevation { layout, .. } => Some(TileLayout::new(layout.tile_size, layout.border, 2)),
            ProducerKind::Normal { layout, .. } => Some(TileLayout::new(layout.tile_size, layout.border, 3)),
            ProducerKind::Ortho { layout, .. } => Some(TileLayout::new(layout.tile_size, layout.border, 4)),
            ProducerKind::Fallback { .. } | ProducerKind::LevelStack { .. } => None,
        }
    }
}

/// One producer of the graph.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProducerDescriptor {
    pub name: String,
    /// Cache holding this producer's tiles
    pub cache: String,
    #[serde(flatten)]
    pub kind: ProducerKind,
}
