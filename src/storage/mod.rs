//! Fixed-capacity tile storage
//!
//! A [`TileStorage`] is a pool of equally sized slots. Each cached tile owns
//! exactly one slot; a slot may carry several channels (for example color and
//! depth) that are allocated and freed together.

pub mod pool;
pub mod slot;

pub use pool::{StorageConfig, TileStorage};
pub use slot::{SlotBuffer, SlotId};
