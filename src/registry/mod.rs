//! Session-owned registry of caches and producers
//!
//! The registry is the single place a session looks producers up by name.
//! It is created by the session and dropped with it; nothing is global.

use std::collections::HashMap;
use std::sync::Arc;

use crate::cache::{CacheStats, TileCache};
use crate::config::{ProducerKind, TerrainConfig};
use crate::core::{Error, Result};
use crate::layers::{ElevationBuilder, NormalBuilder, OrthoBuilder};
use crate::producer::{CachedProducer, DelegatingProducer, LevelStackProducer, SceneState, TileProducer};
use crate::residual::DiskResidualSource;
use crate::storage::StorageConfig;

/// Named caches and producers of one session.
#[derive(Default)]
pub struct ProducerRegistry {
    caches: Vec<Arc<TileCache>>,
    /// Producers in registration order, inputs before readers
    producers: Vec<(String, Arc<dyn TileProducer>)>,
    index: HashMap<String, usize>,
}

impl ProducerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every cache and producer described by `config`.
    ///
    /// # Errors
    /// `Config` for invalid descriptors or wiring, `Io` never: missing
    /// residual directories only cost detail.
    pub fn from_config(config: &TerrainConfig) -> Result<Self> {
        let order = config.build_order()?;
        let layouts = config.layouts()?;
        let mut registry = Self::new();

        for descriptor in &config.caches {
            let tile_bytes = config.cache_tile_bytes(descriptor, &layouts)?;
            let storage = StorageConfig::new(descriptor.capacity, tile_bytes).with_channels(descriptor.channels);
            registry.add_cache(TileCache::new(descriptor.name.clone(), storage)?)?;
        }

        for i in order {
            let descriptor = &config.producers[i];
            let name = descriptor.name.as_str();
            let cache = registry
                .cache(&descriptor.cache)
                .ok_or_else(|| Error::config(format!("unknown cache '{}'", descriptor.cache)))?;

            let producer: Arc<dyn TileProducer> = match &descriptor.kind {
                ProducerKind::Elevation {
                    layout,
                    params,
                    residuals,
                } => {
                    let producer_config = layout.producer_config(name, 2, true);
                    let mut builder = ElevationBuilder::new(params.clone());
                    if let Some(residuals) = residuals {
                        let samples = producer_config.layout().pixel_count();
                        builder = builder.with_residuals(Arc::new(DiskResidualSource::new(&residuals.root, samples)));
                    }
                    CachedProducer::new(producer_config, cache, builder)?
                }
                ProducerKind::Normal {
                    layout,
                    elevation,
                    world_size,
                } => {
                    let builder = NormalBuilder::new(registry.require(elevation)?, *world_size);
                    CachedProducer::new(layout.producer_config(name, 3, false), cache, builder)?
                }
                ProducerKind::Ortho {
                    layout,
                    elevation,
                    normals,
                    params,
                } => {
                    let builder = OrthoBuilder::new(registry.require(elevation)?, registry.require(normals)?, params.clone());
                    CachedProducer::new(layout.producer_config(name, 4, false), cache, builder)?
                }
                ProducerKind::Fallback {
                    delegate,
                    floor_level,
                    max_level,
                } => DelegatingProducer::new(name, registry.require(delegate)?, cache, *floor_level, *max_level)?,
                ProducerKind::LevelStack {
                    base,
                    min_level,
                    max_level,
                    params,
                } => LevelStackProducer::new(name, registry.require(base)?, cache, *min_level, *max_level, params.clone())?,
            };
            registry.add_producer(name, producer)?;
        }

        log::info!(
            "Built terrain: {} cache(s), {} producer(s)",
            registry.caches.len(),
            registry.producers.len()
        );
        Ok(registry)
    }

    /// Register a cache under its own name.
    pub fn add_cache(&mut self, cache: Arc<TileCache>) -> Result<()> {
        if self.cache(cache.name()).is_some() {
            return Err(Error::config(format!("duplicate cache '{}'", cache.name())));
        }
        self.caches.push(cache);
        Ok(())
    }

    pub fn cache(&self, name: &str) -> Option<Arc<TileCache>> {
        self.caches.iter().find(|c| c.name() == name).cloned()
    }

    pub fn caches(&self) -> &[Arc<TileCache>] {
        &self.caches
    }

    /// Register a producer under `name`.
    pub fn add_producer(&mut self, name: impl Into<String>, producer: Arc<dyn TileProducer>) -> Result<()> {
        let name = name.into();
        if self.index.contains_key(&name) {
            return Err(Error::config(format!("duplicate producer '{}'", name)));
        }
        self.index.insert(name.clone(), self.producers.len());
        self.producers.push((name, producer));
        Ok(())
    }

    pub fn producer(&self, name: &str) -> Option<Arc<dyn TileProducer>> {
        self.index.get(name).map(|&i| self.producers[i].1.clone())
    }

    /// Producer `name`, or a config error naming it.
    pub fn require(&self, name: &str) -> Result<Arc<dyn TileProducer>> {
        self.producer(name)
            .ok_or_else(|| Error::config(format!("unknown producer '{}'", name)))
    }

    /// Return the producer registered as `name`, creating it on first use.
    pub fn get_or_insert_with<F>(&mut self, name: &str, create: F) -> Result<Arc<dyn TileProducer>>
    where
        F: FnOnce(&Self) -> Result<Arc<dyn TileProducer>>,
    {
        if let Some(producer) = self.producer(name) {
            return Ok(producer);
        }
        let producer = create(self)?;
        self.add_producer(name, producer.clone())?;
        Ok(producer)
    }

    /// Registered producers with their names, inputs first.
    pub fn producers(&self) -> impl Iterator<Item = (&str, &Arc<dyn TileProducer>)> {
        self.producers.iter().map(|(name, p)| (name.as_str(), p))
    }

    pub fn len(&self) -> usize {
        self.producers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.producers.is_empty()
    }

    /// Run every producer's per-frame update, inputs first.
    pub fn update_all(&self, scene: &SceneState) {
        for (_, producer) in &self.producers {
            producer.update(scene);
        }
    }

    pub fn cache_stats(&self) -> Vec<(String, CacheStats)> {
        self.caches
            .iter()
            .map(|c| (c.name().to_string(), c.stats()))
            .collect()
    }
}
