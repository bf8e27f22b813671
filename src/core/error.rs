//! Error types for the terramp engine

use thiserror::Error;

use crate::quadtree::TileAddress;

/// Main error type for the engine
#[derive(Debug, Error)]
pub enum Error {
    /// Every resident tile is pinned by a requester, nothing can be evicted.
    #[error("Tile cache '{cache}' exhausted: {pinned} of {capacity} slots pinned")]
    CapacityExhausted {
        cache: String,
        capacity: usize,
        pinned: usize,
    },

    #[error("Producer '{producer}' failed to create tile {address}")]
    ProductionFailed {
        producer: String,
        address: TileAddress,
    },

    #[error("Producer '{producer}' is missing dependency tile {address}")]
    MissingDependency {
        producer: String,
        address: TileAddress,
    },

    #[error("Producer '{producer}' has no tile {address}")]
    NoSuchTile {
        producer: String,
        address: TileAddress,
    },

    #[error("Producer '{producer}' is busy: {in_use} tiles pinned or in production")]
    ProducerBusy { producer: String, in_use: usize },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Shorthand for a construction-time wiring error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// True for errors that only affect the current frame and may succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::CapacityExhausted { .. }
                | Error::ProductionFailed { .. }
                | Error::MissingDependency { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let exhausted = Error::CapacityExhausted {
            cache: "terrain".into(),
            capacity: 4,
            pinned: 4,
        };
        assert!(exhausted.is_transient());
        assert!(!Error::config("bad tile size").is_transient());
    }

    #[test]
    fn test_display_includes_address() {
        let err = Error::NoSuchTile {
            producer: "normals".into(),
            address: TileAddress::new(3, 1, 2),
        };
        assert_eq!(err.to_string(), "Producer 'normals' has no tile (3, 1, 2)");
    }
}
