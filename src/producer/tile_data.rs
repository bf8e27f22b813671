//! Tile sample layout and resampling helpers
//!
//! Tile payloads are grids of `f32` samples stored in channel 0 of a slot,
//! `components` values per pixel, row-major, with a symmetric border of
//! `border` pixels around the `tile_size x tile_size` logical footprint.
//! Pixel `i` of a row covers `[(i - border) / tile_size, (i - border + 1) / tile_size]`
//! in tile-local coordinates, so border pixels fall just outside `[0, 1]`.

use serde::{Deserialize, Serialize};

use crate::quadtree::TileAddress;

/// Shape of the samples a producer writes per tile.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileLayout {
    /// Logical pixels per tile edge, border excluded
    pub tile_size: u32,
    /// Border pixels on each side
    pub border: u32,
    /// `f32` values per pixel
    pub components: u32,
}

impl TileLayout {
    pub const fn new(tile_size: u32, border: u32, components: u32) -> Self {
        Self {
            tile_size,
            border,
            components,
        }
    }

    /// Pixels per edge, border included.
    pub fn side(&self) -> u32 {
        self.tile_size + 2 * self.border
    }

    pub fn pixel_count(&self) -> usize {
        (self.side() as usize).pow(2)
    }

    pub fn sample_count(&self) -> usize {
        self.pixel_count() * self.components as usize
    }

    /// Bytes one tile occupies in a storage slot channel.
    pub fn tile_bytes(&self) -> usize {
        self.sample_count() * std::mem::size_of::<f32>()
    }

    /// Index of component `c` of pixel `(i, j)`, border included.
    #[inline]
    pub fn index(&self, i: u32, j: u32, c: u32) -> usize {
        ((j * self.side() + i) * self.components + c) as usize
    }

    /// Tile-local coordinates of the centre of pixel `(i, j)`.
    pub fn pixel_local(&self, i: u32, j: u32) -> [f64; 2] {
        let n = self.tile_size as f64;
        let b = self.border as f64;
        [(i as f64 - b + 0.5) / n, (j as f64 - b + 0.5) / n]
    }

    /// Position of the centre of pixel `(i, j)` of `address` in the unit square.
    pub fn pixel_unit(&self, address: TileAddress, i: u32, j: u32) -> [f64; 2] {
        let (origin, size) = address.unit_bounds();
        let [u, v] = self.pixel_local(i, j);
        [origin[0] + u * size, origin[1] + v * size]
    }

    /// Distance between neighbouring pixel centres, in unit-square coordinates.
    pub fn pixel_spacing(&self, address: TileAddress) -> f64 {
        address.unit_bounds().1 / self.tile_size as f64
    }

    /// Bilinearly sample component `c` at tile-local `(u, v)`.
    ///
    /// Coordinates outside the stored area clamp to the outermost pixels.
    pub fn sample_bilinear(&self, data: &[f32], u: f64, v: f64, c: u32) -> f32 {
        let max = (self.side() - 1) as f64;
        let gx = (u * self.tile_size as f64 + self.border as f64 - 0.5).clamp(0.0, max);
        let gy = (v * self.tile_size as f64 + self.border as f64 - 0.5).clamp(0.0, max);

        let x0 = gx.floor() as u32;
        let y0 = gy.floor() as u32;
        let x1 = (x0 + 1).min(self.side() - 1);
        let y1 = (y0 + 1).min(self.side() - 1);
        let fx = (gx - x0 as f64) as f32;
        let fy = (gy - y0 as f64) as f32;

        let s00 = data[self.index(x0, y0, c)];
        let s10 = data[self.index(x1, y0, c)];
        let s01 = data[self.index(x0, y1, c)];
        let s11 = data[self.index(x1, y1, c)];
        let top = s00 + (s10 - s00) * fx;
        let bottom = s01 + (s11 - s01) * fx;
        top + (bottom - top) * fy
    }
}

/// Convert a unit-square position into `address`-local coordinates.
pub fn unit_to_local(address: TileAddress, p: [f64; 2]) -> [f64; 2] {
    let (origin, size) = address.unit_bounds();
    [(p[0] - origin[0]) / size, (p[1] - origin[1]) / size]
}

/// Fill `dst` for `target` by bilinear upsampling of `src`, the samples of its
/// ancestor tile `source`.
///
/// `components` lists `(src_component, dst_component)` pairs to copy; other
/// destination components are left untouched.
pub fn resample_from_ancestor(
    src: &[f32],
    src_layout: &TileLayout,
    source: TileAddress,
    dst: &mut [f32],
    dst_layout: &TileLayout,
    target: TileAddress,
    components: &[(u32, u32)],
) {
    debug_assert!(source.contains(&target));
    let side = dst_layout.side();
    for j in 0..side {
        for i in 0..side {
            let [u, v] = unit_to_local(source, dst_layout.pixel_unit(target, i, j));
            for &(sc, dc) in components {
                dst[dst_layout.index(i, j, dc)] = src_layout.sample_bilinear(src, u, v, sc);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_sizes() {
        let layout = TileLayout::new(8, 2, 3);
        assert_eq!(layout.side(), 12);
        assert_eq!(layout.pixel_count(), 144);
        assert_eq!(layout.tile_bytes(), 144 * 3 * 4);
        assert_eq!(layout.index(1, 1, 2), (12 + 1) * 3 + 2);
    }

    #[test]
    fn test_pixel_positions() {
        let layout = TileLayout::new(4, 1, 1);
        // First interior pixel centre
        assert_eq!(layout.pixel_local(1, 1), [0.125, 0.125]);
        // Border pixel lies outside the tile
        assert!(layout.pixel_local(0, 0)[0] < 0.0);

        let p = layout.pixel_unit(TileAddress::new(1, 1, 0), 1, 1);
        assert_eq!(p, [0.5625, 0.0625]);
        assert_eq!(unit_to_local(TileAddress::new(1, 1, 0), p), [0.125, 0.125]);
    }

    #[test]
    fn test_bilinear_reproduces_linear_ramp() {
        let layout = TileLayout::new(4, 1, 1);
        let data: Vec<f32> = (0..layout.pixel_count())
            .map(|k| (k as u32 % layout.side()) as f32)
            .collect();
        // Pixel centre of column 2
        let [u, v] = layout.pixel_local(2, 2);
        assert!((layout.sample_bilinear(&data, u, v, 0) - 2.0).abs() < 1e-6);
        // Halfway between columns 2 and 3
        let half = 0.5 / layout.tile_size as f64;
        assert!((layout.sample_bilinear(&data, u + half, v, 0) - 2.5).abs() < 1e-6);
        // Clamped far outside
        assert_eq!(layout.sample_bilinear(&data, -4.0, v, 0), 0.0);
    }

    #[test]
    fn test_upsampling_constant_tile() {
        let layout = TileLayout::new(4, 1, 2);
        let src = vec![7.0f32; layout.sample_count()];
        let mut dst = vec![0.0f32; layout.sample_count()];
        resample_from_ancestor(
            &src,
            &layout,
            TileAddress::ROOT,
            &mut dst,
            &layout,
            TileAddress::new(2, 3, 1),
            &[(0, 1)],
        );
        for j in 0..layout.side() {
            for i in 0..layout.side() {
                assert_eq!(dst[layout.index(i, j, 1)], 7.0);
                assert_eq!(dst[layout.index(i, j, 0)], 0.0);
            }
        }
    }
}
