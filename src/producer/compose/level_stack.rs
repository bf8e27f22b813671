//! One producer per quadtree level
//!
//! A base producer serves every level up to `min_level`. Each finer level up
//! to `max_level` gets its own cached producer whose master is the level
//! above, so changing one level only rebuilds that level and the ones below.

use std::sync::{Arc, Weak};

use crate::cache::{Tile, TileCache, TileHandle};
use crate::core::{Error, Result};
use crate::layers::{AmplifyBuilder, AmplifyParams};
use crate::producer::{CachedProducer, ProducerConfig, SceneState, TileLayout, TileProducer};
use crate::quadtree::{TileAddress, MAX_LEVEL};
use crate::task::Deadline;

/// Stack of single-level amplification producers over a base producer.
pub struct LevelStackProducer {
    name: String,
    base: Arc<dyn TileProducer>,
    min_level: u8,
    max_level: u8,
    /// `levels[i]` serves level `min_level + 1 + i`
    levels: Vec<Arc<CachedProducer<AmplifyBuilder>>>,
}

impl LevelStackProducer {
    /// Build the stack, storing every level's tiles in `cache`.
    ///
    /// # Errors
    /// `Config` if the level range is empty or the base has no tiles at
    /// `min_level`.
    pub fn new(
        name: impl Into<String>,
        base: Arc<dyn TileProducer>,
        cache: Arc<TileCache>,
        min_level: u8,
        max_level: u8,
        params: AmplifyParams,
    ) -> Result<Arc<Self>> {
        let name = name.into();
        if min_level >= max_level || max_level > MAX_LEVEL {
            return Err(Error::config(format!(
                "'{}': invalid level range {}..={}",
                name, min_level, max_level
            )));
        }
        if !base.has_tile(TileAddress::new(min_level, 0, 0)) {
            return Err(Error::config(format!(
                "'{}': base '{}' has no tiles at level {}",
                name,
                base.name(),
                min_level
            )));
        }

        let layout = base.layout();
        let mut levels: Vec<Arc<CachedProducer<AmplifyBuilder>>> = Vec::new();
        for level in min_level + 1..=max_level {
            let master: Arc<dyn TileProducer> = match levels.last() {
                Some(previous) => previous.clone(),
                None => base.clone(),
            };
            let config = ProducerConfig::new(format!("{}@{}", name, level), layout.tile_size)
                .with_border(layout.border)
                .with_components(layout.components)
                .with_levels(level, level)
                .with_parent(false);
            let builder = AmplifyBuilder::new(master, params.clone());
            levels.push(CachedProducer::new(config, cache.clone(), builder)?);
        }

        log::debug!(
            "Created level stack '{}' over '{}' with {} level(s)",
            name,
            base.name(),
            levels.len()
        );
        Ok(Arc::new(Self {
            name,
            base,
            min_level,
            max_level,
            levels,
        }))
    }

    pub fn min_level(&self) -> u8 {
        self.min_level
    }

    pub fn max_level(&self) -> u8 {
        self.max_level
    }

    pub fn base(&self) -> &Arc<dyn TileProducer> {
        &self.base
    }

    /// Producer serving exactly `level`, for levels above `min_level`.
    pub fn level_producer(&self, level: u8) -> Option<&Arc<CachedProducer<AmplifyBuilder>>> {
        if level <= self.min_level {
            return None;
        }
        self.levels.get((level - self.min_level - 1) as usize)
    }

    pub fn levels(&self) -> &[Arc<CachedProducer<AmplifyBuilder>>] {
        &self.levels
    }

    /// Invalidate one level and the levels below it, leaving coarser levels intact.
    pub fn invalidate_level(&self, level: u8) -> usize {
        self.level_producer(level).map_or(0, |p| p.invalidate_tiles())
    }

    fn route(&self, level: u8) -> Option<&dyn TileProducer> {
        if level <= self.min_level {
            Some(self.base.as_ref())
        } else {
            self.level_producer(level).map(|p| p.as_ref() as &dyn TileProducer)
        }
    }
}

impl TileProducer for LevelStackProducer {
    fn name(&self) -> &str {
        &self.name
    }

    fn layout(&self) -> TileLayout {
        self.base.layout()
    }

    fn has_tile(&self, address: TileAddress) -> bool {
        self.route(address.level).map_or(false, |p| p.has_tile(address))
    }

    fn get_tile(&self, address: TileAddress, deadline: Deadline) -> Result<TileHandle> {
        match self.route(address.level) {
            Some(producer) => producer.get_tile(address, deadline),
            None => Err(Error::NoSuchTile {
                producer: self.name.clone(),
                address,
            }),
        }
    }

    fn find_tile(&self, address: TileAddress) -> Option<TileHandle> {
        self.route(address.level)?.find_tile(address)
    }

    fn put_tile(&self, tile: &Tile) {
        match self.route(tile.level()) {
            Some(producer) => producer.put_tile(tile),
            None => log::warn!("'{}': put_tile for foreign tile {}", self.name, tile.address()),
        }
    }

    fn invalidate_tile(&self, address: TileAddress) -> usize {
        // Each level invalidates the next one as its dependent.
        match self.route(address.level) {
            Some(producer) => producer.invalidate_tile(address),
            None => 0,
        }
    }

    /// Invalidates every amplified level; the base is left to its owner.
    fn invalidate_tiles(&self) -> usize {
        self.levels.first().map_or(0, |p| p.invalidate_tiles())
    }

    fn update(&self, scene: &SceneState) {
        for level in &self.levels {
            level.update(scene);
        }
    }

    fn add_dependent(&self, dependent: Weak<dyn TileProducer>) {
        self.base.add_dependent(dependent.clone());
        for level in &self.levels {
            level.add_dependent(dependent.clone());
        }
    }

    fn cache(&self) -> Option<Arc<TileCache>> {
        self.levels.first().and_then(|p| p.cache())
    }

    fn tiles_in_use(&self) -> usize {
        self.base.tiles_in_use() + self.levels.iter().map(|p| p.tiles_in_use()).sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::{ElevationBuilder, ElevationParams};
    use crate::producer::get_ready_tile;
    use crate::storage::StorageConfig;
    use crate::task::{RenderContext, Scheduler};

    fn setup() -> (Arc<CachedProducer<ElevationBuilder>>, Arc<LevelStackProducer>) {
        let config = ProducerConfig::new("base", 4)
            .with_components(2)
            .with_levels(0, 2);
        let bytes = config.layout().tile_bytes();
        let base = CachedProducer::new(
            config,
            TileCache::new("base", StorageConfig::new(8, bytes)).unwrap(),
            ElevationBuilder::new(ElevationParams::default()),
        )
        .unwrap();
        let cache = TileCache::new("stack", StorageConfig::new(16, bytes)).unwrap();
        let stack =
            LevelStackProducer::new("stack", base.clone(), cache, 2, 6, AmplifyParams::default()).unwrap();
        (base, stack)
    }

    fn build(stack: &LevelStackProducer, address: TileAddress) -> TileHandle {
        get_ready_tile(stack, address, Deadline::IMMEDIATE, &Scheduler::new(), &mut RenderContext::new()).unwrap()
    }

    #[test]
    fn test_routing_by_level() {
        let (base, stack) = setup();
        assert_eq!(stack.levels().len(), 4);
        assert!(stack.has_tile(TileAddress::new(1, 1, 1)));
        assert!(stack.has_tile(TileAddress::new(6, 63, 0)));
        assert!(!stack.has_tile(TileAddress::new(7, 0, 0)));
        assert!(stack.level_producer(2).is_none());
        assert_eq!(stack.level_producer(4).unwrap().config().min_level, 4);

        let tile = build(&stack, TileAddress::new(1, 0, 1));
        assert_eq!(base.tiles_in_use(), 1);
        assert_eq!(stack.tiles_in_use(), 1);
        stack.put_tile(&tile);
        assert_eq!(base.tiles_in_use(), 0);
    }

    #[test]
    fn test_fine_tile_builds_chain_of_levels() {
        let (base, stack) = setup();
        let address = TileAddress::new(5, 20, 7);
        let tile = build(&stack, address);
        assert!(tile.is_done());
        for level in 3..5 {
            let ancestor = address.ancestor(level).unwrap();
            assert!(stack.level_producer(level).unwrap().find_tile(ancestor).unwrap().is_done());
        }
        assert!(base.find_tile(address.ancestor(2).unwrap()).unwrap().is_done());

        stack.put_tile(&tile);
        assert_eq!(stack.tiles_in_use(), 0);
        assert_eq!(base.tiles_in_use(), 0);
    }

    #[test]
    fn test_invalidate_level_spares_coarser_levels() {
        let (_, stack) = setup();
        let address = TileAddress::new(6, 40, 40);
        let tile = build(&stack, address);
        stack.put_tile(&tile);

        stack.invalidate_level(5);
        let l3 = stack.level_producer(3).unwrap().find_tile(address.ancestor(3).unwrap()).unwrap();
        let l4 = stack.level_producer(4).unwrap().find_tile(address.ancestor(4).unwrap()).unwrap();
        let l5 = stack.level_producer(5).unwrap().find_tile(address.ancestor(5).unwrap()).unwrap();
        let l6 = stack.level_producer(6).unwrap().find_tile(address).unwrap();
        assert!(l3.is_done() && l4.is_done());
        assert!(!l5.is_done() && !l6.is_done());
    }

    #[test]
    fn test_empty_range_rejected() {
        let (base, _) = setup();
        let bytes = base.layout().tile_bytes();
        let cache = TileCache::new("s", StorageConfig::new(2, bytes)).unwrap();
        assert!(LevelStackProducer::new("s", base.clone(), cache.clone(), 3, 3, AmplifyParams::default()).is_err());
        // Base stops at level 2
        assert!(LevelStackProducer::new("s", base, cache, 3, 5, AmplifyParams::default()).is_err());
    }
}
