//! Procedural elevation tiles
//!
//! Level-0 tiles (or tiles at the producer's minimum level) sample a fractal
//! Brownian motion field directly. Finer tiles upsample their parent and add
//! one band of detail noise, so every level refines the one above it.
//! Optional residual tiles are added on top.

use std::sync::Arc;

use noise::{Fbm, MultiFractal, NoiseFn, Perlin};
use serde::{Deserialize, Serialize};

use crate::core::{Error, Result};
use crate::producer::tile_data::unit_to_local;
use crate::producer::{ParameterWatch, SceneState, TileBuilder, TileInputs, TileLayout, TileOutput};
use crate::quadtree::TileAddress;
use crate::residual::ResidualSource;
use crate::task::RenderContext;

/// Component holding the elevation.
pub const HEIGHT: u32 = 0;
/// Component holding the parent's elevation upsampled to this tile.
pub const COARSE_HEIGHT: u32 = 1;

/// Parameters controlling elevation synthesis
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElevationParams {
    pub seed: u32,
    pub frequency: f64,    // Noise frequency across the whole terrain
    pub height_scale: f32, // Amplitude of the base field
    pub octaves: u32,      // FBM octaves of the base field
    pub persistence: f32,  // Amplitude falloff per level/octave
    pub lacunarity: f32,   // FBM lacunarity (2.0 typical)
    /// Scene parameter scaling all generated relief
    pub roughness_parameter: String,
}

impl Default for ElevationParams {
    fn default() -> Self {
        Self {
            seed: 12345,
            frequency: 4.0,
            height_scale: 1000.0,
            octaves: 6,
            persistence: 0.5,
            lacunarity: 2.0,
            roughness_parameter: "roughness".into(),
        }
    }
}

/// Builds elevation tiles with two components: height and coarse height.
pub struct ElevationBuilder {
    params: ElevationParams,
    base: Fbm<Perlin>,
    detail: Perlin,
    residuals: Option<Arc<dyn ResidualSource>>,
    roughness: ParameterWatch,
}

impl ElevationBuilder {
    pub fn new(params: ElevationParams) -> Self {
        let base = Fbm::<Perlin>::new(params.seed)
            .set_octaves(params.octaves as usize)
            .set_persistence(params.persistence as f64)
            .set_lacunarity(params.lacunarity as f64);
        let detail = Perlin::new(params.seed.wrapping_add(1000));
        let roughness = ParameterWatch::new(params.roughness_parameter.clone());

        Self {
            params,
            base,
            detail,
            residuals: None,
            roughness,
        }
    }

    /// Add residual tiles from `source` to every generated tile.
    pub fn with_residuals(mut self, source: Arc<dyn ResidualSource>) -> Self {
        self.residuals = Some(source);
        self
    }

    pub fn params(&self) -> &ElevationParams {
        &self.params
    }

    /// Height of the base field at a unit-square position.
    pub fn base_height(&self, p: [f64; 2]) -> f32 {
        let f = self.params.frequency;
        self.base.get([p[0] * f, p[1] * f]) as f32 * self.params.height_scale
    }

    /// Detail added when refining a tile at `level` from its parent.
    fn detail_height(&self, p: [f64; 2], level: u8) -> f32 {
        let f = self.params.frequency * (1u64 << level) as f64;
        let amplitude = self.params.height_scale * self.params.persistence.powi(level as i32);
        self.detail.get([p[0] * f, p[1] * f]) as f32 * amplitude
    }

    fn read_residual(&self, address: TileAddress, expected: usize) -> Option<Vec<f32>> {
        let source = self.residuals.as_ref()?;
        match source.read_residual(address) {
            Ok(Some(samples)) if samples.len() == expected => Some(samples),
            Ok(Some(samples)) => {
                log::warn!(
                    "Residual tile {} has {} samples, expected {}; using procedural detail",
                    address,
                    samples.len(),
                    expected
                );
                None
            }
            Ok(None) => None,
            Err(e) => {
                log::warn!("Residual tile {} unavailable, using procedural detail: {}", address, e);
                None
            }
        }
    }
}

impl TileBuilder for ElevationBuilder {
    fn validate(&self, layout: &TileLayout) -> Result<()> {
        if layout.components < 2 {
            return Err(Error::config(format!(
                "elevation tiles need 2 components, layout has {}",
                layout.components
            )));
        }
        if let Some(source) = &self.residuals {
            if source.sample_count() != layout.pixel_count() {
                return Err(Error::config(format!(
                    "residual tiles hold {} samples but elevation tiles have {} pixels",
                    source.sample_count(),
                    layout.pixel_count()
                )));
            }
        }
        Ok(())
    }

    fn do_create_tile(
        &self,
        address: TileAddress,
        inputs: &TileInputs,
        output: &mut TileOutput<'_>,
        ctx: &mut RenderContext,
    ) -> bool {
        let layout = *output.layout();
        let roughness = self.roughness.value().unwrap_or(1.0);
        let residual = self.read_residual(address, layout.pixel_count());
        let parent = inputs.parent().map(|tile| (tile.address(), tile.read()));
        let samples = output.samples_mut();

        let side = layout.side();
        for j in 0..side {
            for i in 0..side {
                let p = layout.pixel_unit(address, i, j);
                let (coarse, height) = match &parent {
                    Some((parent_address, data)) => {
                        let [u, v] = unit_to_local(*parent_address, p);
                        let coarse = layout.sample_bilinear(data.samples(0), u, v, HEIGHT);
                        (coarse, coarse + self.detail_height(p, address.level) * roughness)
                    }
                    None => {
                        let h = self.base_height(p) * roughness;
                        (h, h)
                    }
                };
                let k = (j * side + i) as usize;
                let correction = residual.as_ref().map_or(0.0, |r| r[k]);
                samples[layout.index(i, j, HEIGHT)] = height + correction;
                samples[layout.index(i, j, COARSE_HEIGHT)] = coarse;
            }
        }

        ctx.record_draw();
        true
    }

    fn update(&self, scene: &SceneState) -> bool {
        self.roughness.changed(scene)
    }
}
