//! Delegation with coarse fallback
//!
//! Requests the delegate can serve are forwarded to it unchanged. Finer
//! requests are served by an upsampling producer that reads the nearest
//! ancestor tile of the delegate.

use std::sync::{Arc, Weak};

use crate::cache::{Tile, TileCache, TileHandle};
use crate::core::{Error, Result};
use crate::layers::UpsampleBuilder;
use crate::producer::{CachedProducer, ProducerConfig, SceneState, TileLayout, TileProducer};
use crate::quadtree::TileAddress;
use crate::task::Deadline;

/// Forwards to a delegate within its resolution, upsamples beyond it.
pub struct DelegatingProducer {
    name: String,
    delegate: Arc<dyn TileProducer>,
    fallback: Arc<CachedProducer<UpsampleBuilder>>,
}

impl DelegatingProducer {
    /// Wrap `delegate`, synthesizing levels up to `max_level` in `cache`.
    ///
    /// `floor_level` bounds the ancestor walk: the delegate must have tiles
    /// at that level.
    ///
    /// # Errors
    /// `Config` if the delegate has no tiles at `floor_level` or the cache
    /// cannot hold the delegate's tiles.
    pub fn new(
        name: impl Into<String>,
        delegate: Arc<dyn TileProducer>,
        cache: Arc<TileCache>,
        floor_level: u8,
        max_level: u8,
    ) -> Result<Arc<Self>> {
        let name = name.into();
        if max_level < floor_level {
            return Err(Error::config(format!(
                "'{}': max level {} below floor level {}",
                name, max_level, floor_level
            )));
        }

        let layout = delegate.layout();
        let config = ProducerConfig::new(format!("{}.fallback", name), layout.tile_size)
            .with_border(layout.border)
            .with_components(layout.components)
            .with_levels(floor_level, max_level)
            .with_parent(false);
        let fallback = CachedProducer::new(config, cache, UpsampleBuilder::new(delegate.clone(), floor_level))?;

        log::debug!(
            "Created delegating producer '{}' over '{}' (floor {}, max {})",
            name,
            delegate.name(),
            floor_level,
            max_level
        );
        Ok(Arc::new(Self {
            name,
            delegate,
            fallback,
        }))
    }

    pub fn delegate(&self) -> &Arc<dyn TileProducer> {
        &self.delegate
    }

    pub fn fallback(&self) -> &Arc<CachedProducer<UpsampleBuilder>> {
        &self.fallback
    }

    /// Producer serving `address`.
    fn route(&self, address: TileAddress) -> &dyn TileProducer {
        if self.delegate.has_tile(address) {
            self.delegate.as_ref()
        } else {
            self.fallback.as_ref()
        }
    }
}

impl TileProducer for DelegatingProducer {
    fn name(&self) -> &str {
        &self.name
    }

    fn layout(&self) -> TileLayout {
        self.delegate.layout()
    }

    fn has_tile(&self, address: TileAddress) -> bool {
        self.delegate.has_tile(address) || self.fallback.has_tile(address)
    }

    fn get_tile(&self, address: TileAddress, deadline: Deadline) -> Result<TileHandle> {
        self.route(address).get_tile(address, deadline)
    }

    fn find_tile(&self, address: TileAddress) -> Option<TileHandle> {
        self.route(address).find_tile(address)
    }

    fn put_tile(&self, tile: &Tile) {
        self.route(tile.address()).put_tile(tile);
    }

    /// Invalidating the delegate reaches the fallback through its dependents.
    fn invalidate_tile(&self, address: TileAddress) -> usize {
        self.delegate.invalidate_tile(address)
    }

    fn invalidate_tiles(&self) -> usize {
        self.delegate.invalidate_tiles()
    }

    /// Updates the fallback only; the delegate is updated by its owner.
    fn update(&self, scene: &SceneState) {
        self.fallback.update(scene);
    }

    fn add_dependent(&self, dependent: Weak<dyn TileProducer>) {
        self.delegate.add_dependent(dependent.clone());
        self.fallback.add_dependent(dependent);
    }

    fn cache(&self) -> Option<Arc<TileCache>> {
        self.fallback.cache()
    }

    fn tiles_in_use(&self) -> usize {
        self.delegate.tiles_in_use() + self.fallback.tiles_in_use()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::{ElevationBuilder, ElevationParams, HEIGHT};
    use crate::producer::get_ready_tile;
    use crate::producer::tile_data::unit_to_local;
    use crate::storage::StorageConfig;
    use crate::task::{RenderContext, Scheduler};

    fn setup() -> (Arc<CachedProducer<ElevationBuilder>>, Arc<DelegatingProducer>) {
        let config = ProducerConfig::new("coarse", 8)
            .with_border(1)
            .with_components(2)
            .with_levels(0, 2);
        let bytes = config.layout().tile_bytes();
        let coarse = CachedProducer::new(
            config,
            TileCache::new("coarse", StorageConfig::new(8, bytes)).unwrap(),
            ElevationBuilder::new(ElevationParams::default()),
        )
        .unwrap();
        let fine_cache = TileCache::new("fine", StorageConfig::new(8, bytes)).unwrap();
        let delegating = DelegatingProducer::new("fine", coarse.clone(), fine_cache, 0, 8).unwrap();
        (coarse, delegating)
    }

    #[test]
    fn test_native_levels_forwarded() {
        let (coarse, delegating) = setup();
        let tile = delegating.get_tile(TileAddress::new(2, 1, 1), Deadline::NONE).unwrap();
        assert!(coarse.find_tile(TileAddress::new(2, 1, 1)).is_some());
        assert_eq!(coarse.tiles_in_use(), 1);
        assert_eq!(delegating.tiles_in_use(), 1);
        delegating.put_tile(&tile);
        assert_eq!(coarse.tiles_in_use(), 0);
        assert_eq!(delegating.tiles_in_use(), 0);
    }

    #[test]
    fn test_finer_levels_upsampled_from_ancestor() {
        let (coarse, delegating) = setup();
        let address = TileAddress::new(5, 9, 30);
        let mut ctx = RenderContext::new();
        let tile = get_ready_tile(delegating.as_ref(), address, Deadline::IMMEDIATE, &Scheduler::new(), &mut ctx)
            .unwrap();
        assert_eq!(delegating.tiles_in_use(), 1);

        let ancestor = address.ancestor(2).unwrap();
        let source = coarse.find_tile(ancestor).unwrap();
        let layout = coarse.layout();
        let p = layout.pixel_unit(address, 3, 4);
        let [u, v] = unit_to_local(ancestor, p);
        let expected = layout.sample_bilinear(source.read().samples(0), u, v, HEIGHT);
        assert!((tile.read().samples(0)[layout.index(3, 4, HEIGHT)] - expected).abs() < 1e-4);

        // The ancestor is released once the fine tile is built
        assert_eq!(coarse.tiles_in_use(), 0);
        delegating.put_tile(&tile);
        assert_eq!(delegating.tiles_in_use(), 0);
    }

    #[test]
    fn test_invalidating_delegate_reaches_fallback() {
        let (coarse, delegating) = setup();
        let address = TileAddress::new(4, 0, 0);
        let tile = get_ready_tile(
            delegating.as_ref(),
            address,
            Deadline::IMMEDIATE,
            &Scheduler::new(),
            &mut RenderContext::new(),
        )
        .unwrap();
        assert!(tile.is_done());

        coarse.invalidate_tile(TileAddress::new(1, 0, 0));
        assert!(!tile.is_done());
        delegating.put_tile(&tile);
    }

    #[test]
    fn test_floor_without_tiles_rejected() {
        let (coarse, _) = setup();
        let bytes = coarse.layout().tile_bytes();
        let cache = TileCache::new("bad", StorageConfig::new(2, bytes)).unwrap();
        // The delegate stops at level 2, so a floor of 3 can never be reached
        let result = DelegatingProducer::new("bad", coarse, cache, 3, 6);
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
