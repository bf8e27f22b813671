//! Per-level detail amplification
//!
//! Each level of a [`LevelStackProducer`](crate::producer::LevelStackProducer)
//! upsamples the tile one level up from its master and adds a band of noise
//! whose amplitude decays with depth.

use std::sync::Arc;

use noise::{NoiseFn, Perlin};
use serde::{Deserialize, Serialize};

use crate::core::{Error, Result};
use crate::producer::tile_data::resample_from_ancestor;
use crate::producer::{DependencySet, TileBuilder, TileInputs, TileLayout, TileOutput, TileProducer};
use crate::quadtree::TileAddress;
use crate::task::RenderContext;

/// Parameters of one amplification level
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AmplifyParams {
    pub seed: u32,
    /// Noise frequency at level 0, doubled per level
    pub frequency: f64,
    /// Detail amplitude at level 0
    pub amplitude: f32,
    /// Amplitude factor per level (0.5 typical)
    pub decay: f32,
}

impl Default for AmplifyParams {
    fn default() -> Self {
        Self {
            seed: 7,
            frequency: 4.0,
            amplitude: 100.0,
            decay: 0.5,
        }
    }
}

/// Builds a tile from its master's parent tile plus detail noise on component 0.
pub struct AmplifyBuilder {
    master: Arc<dyn TileProducer>,
    params: AmplifyParams,
    noise: Perlin,
}

impl AmplifyBuilder {
    pub fn new(master: Arc<dyn TileProducer>, params: AmplifyParams) -> Self {
        let noise = Perlin::new(params.seed);
        Self { master, params, noise }
    }

    pub fn params(&self) -> &AmplifyParams {
        &self.params
    }

    /// Detail added at a unit-square position on `level`.
    pub fn detail(&self, p: [f64; 2], level: u8) -> f32 {
        let f = self.params.frequency * (1u64 << level) as f64;
        let amplitude = self.params.amplitude * self.params.decay.powi(level as i32);
        self.noise.get([p[0] * f, p[1] * f]) as f32 * amplitude
    }
}

impl TileBuilder for AmplifyBuilder {
    fn upstream(&self) -> Vec<Arc<dyn TileProducer>> {
        vec![self.master.clone()]
    }

    fn validate(&self, layout: &TileLayout) -> Result<()> {
        if self.master.layout().components < layout.components {
            return Err(Error::config(format!(
                "master '{}' provides {} components, {} needed",
                self.master.name(),
                self.master.layout().components,
                layout.components
            )));
        }
        Ok(())
    }

    fn start_create_tile(&self, address: TileAddress, deps: &mut DependencySet) -> Result<()> {
        let parent = address
            .parent()
            .filter(|p| self.master.has_tile(*p))
            .ok_or_else(|| Error::MissingDependency {
                producer: self.master.name().to_string(),
                address,
            })?;
        deps.request(&self.master, parent);
        Ok(())
    }

    fn do_create_tile(
        &self,
        address: TileAddress,
        inputs: &TileInputs,
        output: &mut TileOutput<'_>,
        ctx: &mut RenderContext,
    ) -> bool {
        let Some(parent) = inputs.dependency(0) else {
            return false;
        };
        let data = parent.read();
        let master_layout = self.master.layout();
        let layout = *output.layout();
        let components: Vec<(u32, u32)> = (0..layout.components).map(|c| (c, c)).collect();

        let samples = output.samples_mut();
        resample_from_ancestor(
            data.samples(0),
            &master_layout,
            parent.address(),
            samples,
            &layout,
            address,
            &components,
        );
        for j in 0..layout.side() {
            for i in 0..layout.side() {
                let p = layout.pixel_unit(address, i, j);
                samples[layout.index(i, j, 0)] += self.detail(p, address.level);
            }
        }

        ctx.record_draw();
        true
    }
}
