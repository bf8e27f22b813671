//! Per-producer tile construction hooks
//!
//! A [`TileBuilder`] supplies the parts of tile production that differ between
//! producers. [`CachedProducer`](super::CachedProducer) drives the hooks in
//! order for every tile: `start_create_tile` lists the tiles this one reads,
//! `begin_create_tile` binds the render target, `do_create_tile` writes the
//! samples, `end_create_tile` unbinds, and `stop_create_tile` runs once the
//! inputs have been released.

use std::sync::Arc;

use parking_lot::{Mutex, RwLockWriteGuard};

use super::tile_data::TileLayout;
use super::{SceneState, TileProducer};
use crate::cache::{Tile, TileHandle};
use crate::core::Result;
use crate::quadtree::TileAddress;
use crate::storage::SlotBuffer;
use crate::task::{RenderContext, RenderTarget};

/// Tiles of other producers that one tile needs before it can be built.
#[derive(Default)]
pub struct DependencySet {
    requests: Vec<(Arc<dyn TileProducer>, TileAddress)>,
}

impl DependencySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `producer`'s tile at `address`. Returns its index in
    /// [`TileInputs::dependency`].
    pub fn request(&mut self, producer: &Arc<dyn TileProducer>, address: TileAddress) -> usize {
        self.requests.push((producer.clone(), address));
        self.requests.len() - 1
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub(crate) fn into_requests(self) -> Vec<(Arc<dyn TileProducer>, TileAddress)> {
        self.requests
    }
}

/// Completed input tiles handed to `do_create_tile`.
pub struct TileInputs {
    parent: Option<TileHandle>,
    dependencies: Vec<TileHandle>,
}

impl TileInputs {
    pub(crate) fn new(parent: Option<TileHandle>, dependencies: Vec<TileHandle>) -> Self {
        Self { parent, dependencies }
    }

    /// Parent tile of the same producer, if the producer reads its parent.
    pub fn parent(&self) -> Option<&Tile> {
        self.parent.as_deref()
    }

    /// Dependency by the index returned from [`DependencySet::request`].
    pub fn dependency(&self, index: usize) -> Option<&Tile> {
        self.dependencies.get(index).map(|t| t.as_ref())
    }

    pub fn dependency_count(&self) -> usize {
        self.dependencies.len()
    }
}

/// Write access to the slot of the tile being built.
pub struct TileOutput<'a> {
    buffer: RwLockWriteGuard<'a, SlotBuffer>,
    layout: TileLayout,
}

impl<'a> TileOutput<'a> {
    pub(crate) fn new(buffer: RwLockWriteGuard<'a, SlotBuffer>, layout: TileLayout) -> Self {
        Self { buffer, layout }
    }

    pub fn layout(&self) -> &TileLayout {
        &self.layout
    }

    /// Sample grid of the tile, see [`TileLayout`].
    pub fn samples_mut(&mut self) -> &mut [f32] {
        let count = self.layout.sample_count();
        &mut self.buffer.samples_mut(0)[..count]
    }

    pub(crate) fn commit(mut self) -> u64 {
        self.buffer.bump_version()
    }
}

/// Producer-specific part of tile production.
pub trait TileBuilder: Send + Sync + 'static {
    /// Producers whose tiles this builder reads.
    fn upstream(&self) -> Vec<Arc<dyn TileProducer>> {
        Vec::new()
    }

    /// Check construction parameters against the owning producer's layout.
    fn validate(&self, _layout: &TileLayout) -> Result<()> {
        Ok(())
    }

    /// Request the dependency tiles needed for `address`.
    fn start_create_tile(&self, _address: TileAddress, _deps: &mut DependencySet) -> Result<()> {
        Ok(())
    }

    /// Bind shared state before writing the tile.
    fn begin_create_tile(&self, ctx: &mut RenderContext, target: RenderTarget) {
        ctx.push_target(target);
    }

    /// Write the tile's samples. Returns false if the tile could not be built
    /// this time; the tile is retried on its next request.
    fn do_create_tile(
        &self,
        address: TileAddress,
        inputs: &TileInputs,
        output: &mut TileOutput<'_>,
        ctx: &mut RenderContext,
    ) -> bool;

    /// Undo `begin_create_tile`.
    fn end_create_tile(&self, ctx: &mut RenderContext) {
        ctx.pop_target();
    }

    /// Called after the tile's inputs have been put back.
    fn stop_create_tile(&self, _address: TileAddress) {}

    /// Per-frame hook; return true to invalidate every tile of the producer.
    fn update(&self, _scene: &SceneState) -> bool {
        false
    }
}

/// Remembers the last seen value of a scene parameter.
#[derive(Debug)]
pub struct ParameterWatch {
    name: String,
    last: Mutex<Option<f32>>,
}

impl ParameterWatch {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            last: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Last observed value.
    pub fn value(&self) -> Option<f32> {
        *self.last.lock()
    }

    /// Record the scene's value. True if it differs from the previous frame's;
    /// the first observation never counts as a change.
    pub fn changed(&self, scene: &SceneState) -> bool {
        let current = scene.parameter(&self.name);
        let mut last = self.last.lock();
        let changed = last.is_some() && *last != current;
        *last = current;
        changed
    }
}
