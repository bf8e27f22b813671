//! Quadtree addressing

pub mod address;

pub use address::{TileAddress, MAX_LEVEL};
