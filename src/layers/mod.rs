//! Concrete tile builders
//!
//! CPU renditions of the consumer layers that plug into the producer
//! contract: elevation, normals and orthophoto color, plus the upsampling and
//! amplification builders used by composite producers.

pub mod amplify;
pub mod elevation;
pub mod normal;
pub mod ortho;
pub mod upsample;

pub use amplify::{AmplifyBuilder, AmplifyParams};
pub use elevation::{ElevationBuilder, ElevationParams, COARSE_HEIGHT, HEIGHT};
pub use normal::NormalBuilder;
pub use ortho::{OrthoBuilder, OrthoParams};
pub use upsample::{nearest_source_ancestor, UpsampleBuilder};
