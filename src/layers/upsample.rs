//! Coarse-fallback upsampling
//!
//! Synthesizes tiles finer than a source producer's native resolution by
//! bilinearly upsampling the nearest ancestor tile the source does have.

use std::sync::Arc;

use crate::core::{Error, Result};
use crate::producer::tile_data::resample_from_ancestor;
use crate::producer::{DependencySet, TileBuilder, TileInputs, TileLayout, TileOutput, TileProducer};
use crate::quadtree::TileAddress;
use crate::task::RenderContext;

/// Nearest strict ancestor of `address`, at or below `floor_level`'s depth,
/// that `source` can produce.
///
/// The walk visits at most `address.level - floor_level` ancestors.
pub fn nearest_source_ancestor(
    source: &dyn TileProducer,
    address: TileAddress,
    floor_level: u8,
) -> Option<TileAddress> {
    let mut current = address;
    while let Some(parent) = current.parent() {
        if parent.level < floor_level {
            break;
        }
        if source.has_tile(parent) {
            return Some(parent);
        }
        current = parent;
    }
    None
}

/// Builds a tile by upsampling an ancestor tile of `source`.
pub struct UpsampleBuilder {
    source: Arc<dyn TileProducer>,
    floor_level: u8,
}

impl UpsampleBuilder {
    pub fn new(source: Arc<dyn TileProducer>, floor_level: u8) -> Self {
        Self { source, floor_level }
    }

    pub fn source(&self) -> &Arc<dyn TileProducer> {
        &self.source
    }

    pub fn floor_level(&self) -> u8 {
        self.floor_level
    }
}

impl TileBuilder for UpsampleBuilder {
    fn upstream(&self) -> Vec<Arc<dyn TileProducer>> {
        vec![self.source.clone()]
    }

    fn validate(&self, layout: &TileLayout) -> Result<()> {
        let floor = TileAddress::new(self.floor_level, 0, 0);
        if !self.source.has_tile(floor) {
            return Err(Error::config(format!(
                "'{}' has no tiles at floor level {}, ancestor walk would not terminate",
                self.source.name(),
                self.floor_level
            )));
        }
        if self.source.layout().components < layout.components {
            return Err(Error::config(format!(
                "'{}' provides {} components, {} needed",
                self.source.name(),
                self.source.layout().components,
                layout.components
            )));
        }
        Ok(())
    }

    fn start_create_tile(&self, address: TileAddress, deps: &mut DependencySet) -> Result<()> {
        let ancestor = nearest_source_ancestor(self.source.as_ref(), address, self.floor_level)
            .ok_or_else(|| Error::NoSuchTile {
                producer: self.source.name().to_string(),
                address,
            })?;
        deps.request(&self.source, ancestor);
        Ok(())
    }

    fn do_create_tile(
        &self,
        address: TileAddress,
        inputs: &TileInputs,
        output: &mut TileOutput<'_>,
        ctx: &mut RenderContext,
    ) -> bool {
        let Some(ancestor) = inputs.dependency(0) else {
            return false;
        };
        let data = ancestor.read();
        let source_layout = self.source.layout();
        let layout = *output.layout();
        let components: Vec<(u32, u32)> = (0..layout.components).map(|c| (c, c)).collect();

        resample_from_ancestor(
            data.samples(0),
            &source_layout,
            ancestor.address(),
            output.samples_mut(),
            &layout,
            address,
            &components,
        );
        ctx.record_draw();
        true
    }
}
