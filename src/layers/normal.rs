//! Terrain normals derived from elevation tiles

use std::sync::Arc;

use crate::core::{Error, Result, Vec3};
use crate::producer::{DependencySet, TileBuilder, TileInputs, TileLayout, TileOutput, TileProducer};
use crate::quadtree::TileAddress;
use crate::task::RenderContext;

use super::elevation::HEIGHT;

/// Builds unit normals (x, y, z) from the elevation tile at the same address.
pub struct NormalBuilder {
    elevation: Arc<dyn TileProducer>,
    /// Edge length of the whole terrain in height units
    world_size: f32,
}

impl NormalBuilder {
    pub fn new(elevation: Arc<dyn TileProducer>, world_size: f32) -> Self {
        Self { elevation, world_size }
    }

    pub fn elevation(&self) -> &Arc<dyn TileProducer> {
        &self.elevation
    }
}

impl TileBuilder for NormalBuilder {
    fn upstream(&self) -> Vec<Arc<dyn TileProducer>> {
        vec![self.elevation.clone()]
    }

    fn validate(&self, layout: &TileLayout) -> Result<()> {
        if layout.components < 3 {
            return Err(Error::config("normal tiles need 3 components"));
        }
        if self.elevation.border() < layout.border {
            return Err(Error::config(format!(
                "normal border {} exceeds elevation border {} of '{}'",
                layout.border,
                self.elevation.border(),
                self.elevation.name()
            )));
        }
        if self.world_size <= 0.0 {
            return Err(Error::config("world size must be positive"));
        }
        Ok(())
    }

    fn start_create_tile(&self, address: TileAddress, deps: &mut DependencySet) -> Result<()> {
        deps.request(&self.elevation, address);
        Ok(())
    }

    fn do_create_tile(
        &self,
        address: TileAddress,
        inputs: &TileInputs,
        output: &mut TileOutput<'_>,
        ctx: &mut RenderContext,
    ) -> bool {
        let Some(elevation) = inputs.dependency(0) else {
            return false;
        };
        let heights = elevation.read();
        let heights = heights.samples(0);
        let source = self.elevation.layout();
        let layout = *output.layout();

        // Central differences one pixel apart
        let h = 1.0 / layout.tile_size as f64;
        let spacing = (layout.pixel_spacing(address) * self.world_size as f64) as f32;

        let samples = output.samples_mut();
        for j in 0..layout.side() {
            for i in 0..layout.side() {
                let [u, v] = layout.pixel_local(i, j);
                let dx = source.sample_bilinear(heights, u + h, v, HEIGHT)
                    - source.sample_bilinear(heights, u - h, v, HEIGHT);
                let dy = source.sample_bilinear(heights, u, v + h, HEIGHT)
                    - source.sample_bilinear(heights, u, v - h, HEIGHT);
                let n = Vec3::new(-dx / (2.0 * spacing), -dy / (2.0 * spacing), 1.0).normalize();

                samples[layout.index(i, j, 0)] = n.x;
                samples[layout.index(i, j, 1)] = n.y;
                samples[layout.index(i, j, 2)] = n.z;
            }
        }

        ctx.record_draw();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::TileCache;
    use crate::layers::{ElevationBuilder, ElevationParams};
    use crate::producer::{get_ready_tile, CachedProducer, ProducerConfig};
    use crate::storage::StorageConfig;
    use crate::task::{Deadline, Scheduler};

    fn elevation(height_scale: f32) -> Arc<dyn TileProducer> {
        let config = ProducerConfig::new("elevation", 8).with_border(2).with_components(2);
        let cache = TileCache::new("elevation", StorageConfig::new(8, config.layout().tile_bytes())).unwrap();
        let params = ElevationParams {
            height_scale,
            ..ElevationParams::default()
        };
        CachedProducer::new(config, cache, ElevationBuilder::new(params)).unwrap()
    }

    fn normals(elevation: Arc<dyn TileProducer>) -> Result<Arc<CachedProducer<NormalBuilder>>> {
        let config = ProducerConfig::new("normals", 8)
            .with_border(1)
            .with_components(3)
            .with_parent(false);
        let cache = TileCache::new("normals", StorageConfig::new(8, config.layout().tile_bytes()))?;
        CachedProducer::new(config, cache, NormalBuilder::new(elevation, 1000.0))
    }

    #[test]
    fn test_flat_terrain_points_up() {
        let producer = normals(elevation(0.0)).unwrap();
        let tile = get_ready_tile(
            producer.as_ref(),
            TileAddress::new(2, 1, 1),
            Deadline::IMMEDIATE,
            &Scheduler::new(),
            &mut RenderContext::new(),
        )
        .unwrap();

        let data = tile.read();
        let layout = producer.layout();
        for j in 0..layout.side() {
            for i in 0..layout.side() {
                assert_eq!(data.samples(0)[layout.index(i, j, 2)], 1.0);
            }
        }
    }

    #[test]
    fn test_relief_gives_unit_normals() {
        let producer = normals(elevation(500.0)).unwrap();
        let tile = get_ready_tile(
            producer.as_ref(),
            TileAddress::ROOT,
            Deadline::IMMEDIATE,
            &Scheduler::new(),
            &mut RenderContext::new(),
        )
        .unwrap();

        let data = tile.read();
        let layout = producer.layout();
        let mut tilted = 0;
        for k in 0..layout.pixel_count() {
            let n = Vec3::from_slice(&data.samples(0)[k * 3..k * 3 + 3]);
            assert!((n.length() - 1.0).abs() < 1e-4);
            if n.z < 0.9999 {
                tilted += 1;
            }
        }
        assert!(tilted > 0);
    }

    #[test]
    fn test_border_larger_than_elevation_rejected() {
        let elevation = elevation(1.0);
        let config = ProducerConfig::new("normals", 8).with_border(3).with_components(3);
        let cache = TileCache::new("n", StorageConfig::new(2, config.layout().tile_bytes())).unwrap();
        assert!(CachedProducer::new(config, cache, NormalBuilder::new(elevation, 1.0)).is_err());
    }

    #[test]
    fn test_tile_size_mismatch_rejected() {
        let elevation = elevation(1.0);
        let config = ProducerConfig::new("normals", 16).with_components(3);
        let cache = TileCache::new("n", StorageConfig::new(2, config.layout().tile_bytes())).unwrap();
        assert!(matches!(
            CachedProducer::new(config, cache, NormalBuilder::new(elevation, 1.0)),
            Err(Error::Config(_))
        ));
    }
}
