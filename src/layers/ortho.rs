//! Orthophoto color from elevation and slope

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::{Error, Result, Vec4};
use crate::producer::{DependencySet, TileBuilder, TileInputs, TileLayout, TileOutput, TileProducer};
use crate::quadtree::TileAddress;
use crate::task::RenderContext;

use super::elevation::HEIGHT;

/// Color rules for orthophoto tiles
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrthoParams {
    pub water_level: f32,
    pub snow_level: f32,
    /// Height range over which grass/rock fades into snow
    pub snow_blend: f32,
    /// Normals with a z component below this are mostly rock
    pub rock_slope: f32,
    pub water: [f32; 4],
    pub grass: [f32; 4],
    pub rock: [f32; 4],
    pub snow: [f32; 4],
}

impl Default for OrthoParams {
    fn default() -> Self {
        Self {
            water_level: 0.0,
            snow_level: 600.0,
            snow_blend: 100.0,
            rock_slope: 0.8,
            water: [0.10, 0.25, 0.45, 1.0],
            grass: [0.25, 0.45, 0.15, 1.0],
            rock: [0.45, 0.42, 0.38, 1.0],
            snow: [0.95, 0.95, 0.97, 1.0],
        }
    }
}

impl OrthoParams {
    /// Color of a point with the given height and normal z component.
    pub fn color(&self, height: f32, normal_z: f32) -> Vec4 {
        if height < self.water_level {
            return Vec4::from_array(self.water);
        }
        let rockiness = ((self.rock_slope - normal_z) * 10.0 + 0.5).clamp(0.0, 1.0);
        let ground = Vec4::from_array(self.grass).lerp(Vec4::from_array(self.rock), rockiness);

        let snowiness = ((height - self.snow_level) / self.snow_blend.max(f32::EPSILON)).clamp(0.0, 1.0);
        ground.lerp(Vec4::from_array(self.snow), snowiness)
    }
}

/// Builds RGBA tiles from elevation and normal tiles at the same address.
pub struct OrthoBuilder {
    elevation: Arc<dyn TileProducer>,
    normals: Arc<dyn TileProducer>,
    params: OrthoParams,
}

impl OrthoBuilder {
    pub fn new(elevation: Arc<dyn TileProducer>, normals: Arc<dyn TileProducer>, params: OrthoParams) -> Self {
        Self {
            elevation,
            normals,
            params,
        }
    }

    pub fn params(&self) -> &OrthoParams {
        &self.params
    }
}

impl TileBuilder for OrthoBuilder {
    fn upstream(&self) -> Vec<Arc<dyn TileProducer>> {
        vec![self.elevation.clone(), self.normals.clone()]
    }

    fn validate(&self, layout: &TileLayout) -> Result<()> {
        if layout.components < 4 {
            return Err(Error::config("ortho tiles need 4 components"));
        }
        if self.normals.layout().components < 3 {
            return Err(Error::config(format!(
                "'{}' does not produce 3-component normals",
                self.normals.name()
            )));
        }
        Ok(())
    }

    fn start_create_tile(&self, address: TileAddress, deps: &mut DependencySet) -> Result<()> {
        deps.request(&self.elevation, address);
        deps.request(&self.normals, address);
        Ok(())
    }

    fn do_create_tile(
        &self,
        _address: TileAddress,
        inputs: &TileInputs,
        output: &mut TileOutput<'_>,
        ctx: &mut RenderContext,
    ) -> bool {
        let (Some(elevation), Some(normals)) = (inputs.dependency(0), inputs.dependency(1)) else {
            return false;
        };
        let heights = elevation.read();
        let normal_data = normals.read();
        let height_layout = self.elevation.layout();
        let normal_layout = self.normals.layout();
        let layout = *output.layout();

        let samples = output.samples_mut();
        for j in 0..layout.side() {
            for i in 0..layout.side() {
                let [u, v] = layout.pixel_local(i, j);
                let height = height_layout.sample_bilinear(heights.samples(0), u, v, HEIGHT);
                let nz = normal_layout.sample_bilinear(normal_data.samples(0), u, v, 2);
                let color = self.params.color(height, nz);
                for (c, value) in color.to_array().into_iter().enumerate() {
                    samples[layout.index(i, j, c as u32)] = value;
                }
            }
        }

        ctx.record_draw();
        true
    }
}
