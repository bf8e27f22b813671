//! Residual tile serialization and disk I/O
//!
//! Files live at `root/{level}/{tx}_{ty}.res` and hold little-endian `f32`
//! samples compressed with LZ4 (size prepended).

use std::io;
use std::path::{Path, PathBuf};

use super::ResidualSource;
use crate::quadtree::TileAddress;

/// Encode samples as compressed residual bytes.
pub fn encode_residual(samples: &[f32]) -> Vec<u8> {
    let mut raw = Vec::with_capacity(samples.len() * 4);
    for s in samples {
        raw.extend_from_slice(&s.to_le_bytes());
    }
    lz4_flex::compress_prepend_size(&raw)
}

/// Decode residual bytes produced by [`encode_residual`].
pub fn decode_residual(data: &[u8]) -> io::Result<Vec<f32>> {
    let raw = lz4_flex::decompress_size_prepended(data).map_err(|e| {
        io::Error::new(io::ErrorKind::InvalidData, format!("LZ4 decompression failed: {}", e))
    })?;
    if raw.len() % 4 != 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("residual payload of {} bytes is not a whole number of samples", raw.len()),
        ));
    }
    Ok(raw
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

/// Path of the residual file for `address`.
pub fn residual_path(root: &Path, address: TileAddress) -> PathBuf {
    root.join(address.level.to_string())
        .join(format!("{}_{}.res", address.tx, address.ty))
}

/// Write a residual tile, creating directories as needed.
pub fn save_residual(root: &Path, address: TileAddress, samples: &[f32]) -> io::Result<()> {
    let path = residual_path(root, address);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, encode_residual(samples))
}

/// Residual tiles read from a directory tree.
#[derive(Clone, Debug)]
pub struct DiskResidualSource {
    root: PathBuf,
    /// Samples every file must contain
    expected_samples: usize,
}

impl DiskResidualSource {
    pub fn new(root: impl Into<PathBuf>, expected_samples: usize) -> Self {
        Self {
            root: root.into(),
            expected_samples,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ResidualSource for DiskResidualSource {
    fn read_residual(&self, address: TileAddress) -> io::Result<Option<Vec<f32>>> {
        let path = residual_path(&self.root, address);
        let data = match std::fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };

        let samples = decode_residual(&data)?;
        if samples.len() != self.expected_samples {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "{} holds {} samples, expected {}",
                    path.display(),
                    samples.len(),
                    self.expected_samples
                ),
            ));
        }
        Ok(Some(samples))
    }

    fn sample_count(&self) -> usize {
        self.expected_samples
    }
}
