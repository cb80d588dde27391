//! Uniform spatial hash over a bounded integer cell space.
//!
//! The grid is a cube of [`GRID_SIDE`]³ cells centred on a world origin.
//! A cell `(x, y, z)` packs into one scalar with a mixed-radix encoding:
//!
//! ```text
//! hash = x * GRID_SIDE² + y * GRID_SIDE + z
//! ```
//!
//! `GRID_SIDE³` fits in a `u32`, so every addressable cell has a distinct
//! hash. Points outside the grid clamp to the border cells; border cells
//! therefore alias everything beyond them, which only adds broad-phase
//! candidates and never hides an overlap.

use crate::types::Aabb;
use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Cells per grid axis.
pub const GRID_SIDE: u32 = 1625;

pub type CellHash = u32;

/// Pack three cell coordinates into one hash. Each coordinate must be `< GRID_SIDE`.
#[inline]
pub fn join(x: u32, y: u32, z: u32) -> CellHash {
    debug_assert!(x < GRID_SIDE && y < GRID_SIDE && z < GRID_SIDE);
    x * GRID_SIDE * GRID_SIDE + y * GRID_SIDE + z
}

/// Exact inverse of [`join`].
#[inline]
pub fn split(hash: CellHash) -> (u32, u32, u32) {
    let plane = GRID_SIDE * GRID_SIDE;
    let x = hash / plane;
    let y = (hash - x * plane) / GRID_SIDE;
    let z = hash - x * plane - y * GRID_SIDE;
    (x, y, z)
}

/// Visit every cell of the cuboid spanned by two corner hashes, x-major,
/// ascending on every axis, inclusive.
///
/// Axes are re-ordered per component, so passing `(end, start)` visits the
/// same cells as `(start, end)`.
pub fn cubic_sweep<F>(start: CellHash, end: CellHash, mut visit: F)
where
    F: FnMut(CellHash),
{
    let (ax, ay, az) = split(start);
    let (bx, by, bz) = split(end);
    for x in ax.min(bx)..=ax.max(bx) {
        for y in ay.min(by)..=ay.max(by) {
            for z in az.min(bz)..=az.max(bz) {
                visit(join(x, y, z));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Cell ranges
// ---------------------------------------------------------------------------

/// Hashes of a box's min and max corner cells.
#[derive(Debug, Clone, Copy, Default, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct CellRange {
    pub start: CellHash,
    pub end: CellHash,
}

impl CellRange {
    pub fn new(start: CellHash, end: CellHash) -> Self {
        Self { start, end }
    }

    pub fn sweep<F: FnMut(CellHash)>(&self, visit: F) {
        cubic_sweep(self.start, self.end, visit);
    }

    /// Number of cells [`sweep`](Self::sweep) visits.
    pub fn cell_count(&self) -> u64 {
        let (ax, ay, az) = split(self.start);
        let (bx, by, bz) = split(self.end);
        let span = |a: u32, b: u32| u64::from(a.abs_diff(b)) + 1;
        span(ax, bx) * span(ay, by) * span(az, bz)
    }

    pub fn contains(&self, hash: CellHash) -> bool {
        let (ax, ay, az) = split(self.start);
        let (bx, by, bz) = split(self.end);
        let (x, y, z) = split(hash);
        (ax.min(bx)..=ax.max(bx)).contains(&x)
            && (ay.min(by)..=ay.max(by)).contains(&y)
            && (az.min(bz)..=az.max(bz)).contains(&z)
    }
}

// ---------------------------------------------------------------------------
// Grid placement
// ---------------------------------------------------------------------------

/// World placement of the hash grid: its centre and cell edge length.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct HashGrid {
    pub origin: Vec3,
    pub cell_size: f32,
}

impl HashGrid {
    pub fn new(origin: Vec3, cell_size: f32) -> Self {
        Self { origin, cell_size }
    }

    /// Half the world width of the grid along one axis.
    pub fn half_extent(&self) -> f64 {
        f64::from(self.cell_size) * f64::from(GRID_SIDE) / 2.0
    }

    /// World position of the corner of cell `(0, 0, 0)`.
    pub fn grid_min(&self) -> Vec3 {
        self.origin - Vec3::splat(self.half_extent() as f32)
    }

    /// Integer cell coordinates of a world point, clamped into the grid.
    pub fn cell_of(&self, point: Vec3) -> (u32, u32, u32) {
        let half = self.half_extent();
        let cell = f64::from(self.cell_size);
        let axis = |p: f32, o: f32| -> u32 {
            let start = f64::from(o) - half;
            let c = ((f64::from(p) - start) / cell).floor();
            if c.is_nan() {
                return 0;
            }
            c.clamp(0.0, f64::from(GRID_SIDE - 1)) as u32
        };
        (
            axis(point.x, self.origin.x),
            axis(point.y, self.origin.y),
            axis(point.z, self.origin.z),
        )
    }

    pub fn hash_point(&self, point: Vec3) -> CellHash {
        let (x, y, z) = self.cell_of(point);
        join(x, y, z)
    }

    /// Corner-cell range of a box.
    pub fn hash_box(&self, bounds: &Aabb) -> CellRange {
        CellRange::new(self.hash_point(bounds.min), self.hash_point(bounds.max))
    }

    /// World box covered by a single cell.
    pub fn cell_bounds(&self, hash: CellHash) -> Aabb {
        self.range_bounds(&CellRange::new(hash, hash))
    }

    /// World box covered by every cell of a range.
    pub fn range_bounds(&self, range: &CellRange) -> Aabb {
        let base = self.grid_min();
        let (ax, ay, az) = split(range.start);
        let (bx, by, bz) = split(range.end);
        let to_world =
            |x: u32, y: u32, z: u32| base + Vec3::new(x as f32, y as f32, z as f32) * self.cell_size;
        let min = to_world(ax.min(bx), ay.min(by), az.min(bz));
        let max = to_world(ax.max(bx), ay.max(by), az.max(bz)) + Vec3::splat(self.cell_size);
        Aabb::new(min, max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_side_cubed_fits_u32() {
        let cubed = u64::from(GRID_SIDE).pow(3);
        assert!(cubed <= u64::from(u32::MAX) + 1);
        assert_eq!(join(GRID_SIDE - 1, GRID_SIDE - 1, GRID_SIDE - 1) as u64, cubed - 1);
    }

    #[test]
    fn origin_lands_in_centre_cell() {
        let grid = HashGrid::new(Vec3::new(10.0, -4.0, 2.0), 0.5);
        let (x, y, z) = grid.cell_of(grid.origin);
        assert_eq!((x, y, z), (GRID_SIDE / 2, GRID_SIDE / 2, GRID_SIDE / 2));
    }

    #[test]
    fn far_points_clamp_to_border() {
        let grid = HashGrid::new(Vec3::ZERO, 1.0);
        assert_eq!(grid.cell_of(Vec3::splat(-1.0e6)), (0, 0, 0));
        let last = GRID_SIDE - 1;
        assert_eq!(grid.cell_of(Vec3::splat(1.0e6)), (last, last, last));
    }

    #[test]
    fn cell_count_matches_sweep() {
        let range = CellRange::new(join(3, 4, 5), join(5, 4, 8));
        let mut visited = 0u64;
        range.sweep(|_| visited += 1);
        assert_eq!(visited, range.cell_count());
        assert_eq!(visited, 3 * 1 * 4);
    }

    #[test]
    fn range_bounds_cover_source_box() {
        let grid = HashGrid::new(Vec3::ZERO, 2.0);
        let b = Aabb::new(Vec3::new(-3.1, 0.2, 5.0), Vec3::new(1.0, 0.9, 7.5));
        let cover = grid.range_bounds(&grid.hash_box(&b));
        assert!(cover.contains_point(b.min));
        assert!(cover.contains_point(b.max));
    }
}
