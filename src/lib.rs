//! Terramp - quadtree tile production and caching for LOD terrain
//!
//! Producers build fixed-size tiles of terrain data on demand, one quadtree
//! address at a time. Tiles live in shared caches backed by storage pools and
//! are kept alive by use counts; unused tiles are evicted least recently used
//! first. Production is expressed as tasks arranged in a dependency graph so
//! that a tile is only built after the tiles it reads from.

pub mod core;
pub mod quadtree;
pub mod storage;
pub mod task;
pub mod cache;
pub mod producer;
pub mod layers;
pub mod residual;
pub mod config;
pub mod registry;
pub mod inspect;

pub use cache::{TileCache, TileHandle};
pub use config::TerrainConfig;
pub use core::{Error, Result};
pub use producer::{SceneState, TileProducer};
pub use quadtree::TileAddress;
pub use registry::ProducerRegistry;
