//! Explicit render context threaded through tile construction

use crate::storage::SlotId;

/// Render target bound while one tile is being produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderTarget {
    pub slot: SlotId,
    /// Edge length of the target in samples, border included
    pub size: u32,
}

/// Per-worker rendering state.
///
/// Tile builders push their target in `begin_create_tile` and pop it in
/// `end_create_tile`. Each worker thread owns its own context, so producers
/// running concurrently never share bound state.
#[derive(Debug, Default)]
pub struct RenderContext {
    targets: Vec<RenderTarget>,
    /// Draw/compute passes recorded against any target
    draw_count: u64,
    /// Deepest target nesting seen
    max_depth: usize,
}

impl RenderContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a target on top of the stack.
    pub fn push_target(&mut self, target: RenderTarget) {
        self.targets.push(target);
        self.max_depth = self.max_depth.max(self.targets.len());
    }

    /// Unbind the current target.
    pub fn pop_target(&mut self) -> Option<RenderTarget> {
        self.targets.pop()
    }

    /// Target currently receiving draws.
    pub fn current_target(&self) -> Option<RenderTarget> {
        self.targets.last().copied()
    }

    pub fn depth(&self) -> usize {
        self.targets.len()
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Count one pass into the current target.
    pub fn record_draw(&mut self) {
        self.draw_count += 1;
    }

    pub fn draw_count(&self) -> u64 {
        self.draw_count
    }
}
