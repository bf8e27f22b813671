//! Core type aliases and re-exports

pub use glam::{UVec2, Vec2, Vec3, Vec4};

/// Result type used throughout terramp
pub type Result<T> = std::result::Result<T, crate::core::error::Error>;
