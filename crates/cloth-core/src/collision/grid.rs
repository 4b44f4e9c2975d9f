use glam::{Vec3, Vec4};

use super::cone::Cone;
use crate::math::{xyz, Bounds, EPSILON};

/// Cells per axis.
pub const GRID_SIZE: usize = 8;
const MAX_INDEX: i32 = GRID_SIZE as i32 - 1;
const GRID_LENGTH: f32 = GRID_SIZE as f32 - 1e-3;
const GRID_EXPAND: f32 = 1e-4;

/// Sphere and cone bit masks of a shape lookup.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ShapeMask {
    pub spheres: u32,
    pub cones: u32,
}

impl std::ops::BitAndAssign for ShapeMask {
    fn bitand_assign(&mut self, rhs: Self) {
        self.spheres &= rhs.spheres;
        self.cones &= rhs.cones;
    }
}

/// Per-axis broad phase over at most 32 spheres and 32 cones.
///
/// Each axis of the overlap box is split into [`GRID_SIZE`] cells. For
/// every cell the grid keeps the mask of shapes whose extent ends at or
/// after the cell (`first` rows) and starts at or before it (`last` rows).
/// Continuous lookups use both rows of the swept range; after
/// [`ShapeGrid::merge`] the `first` rows hold exact per-cell overlap.
#[derive(Clone, Debug, Default)]
pub struct ShapeGrid {
    pub scale: Vec3,
    pub bias: Vec3,
    sphere_first: [[u32; GRID_SIZE]; 3],
    sphere_last: [[u32; GRID_SIZE]; 3],
    cone_first: [[u32; GRID_SIZE]; 3],
    cone_last: [[u32; GRID_SIZE]; 3],
}

impl ShapeGrid {
    /// Fit the grid to `bounds` and clear all cells.
    ///
    /// Returns false if the box is empty on any axis, in which case no
    /// particle can touch a shape.
    pub fn reset(&mut self, bounds: &Bounds) -> bool {
        let edge = bounds.upper - bounds.lower;
        if edge.cmplt(Vec3::ZERO).any() {
            return false;
        }

        let lower = bounds.lower - bounds.lower.abs() * GRID_EXPAND;
        let upper = bounds.upper + bounds.upper.abs() * GRID_EXPAND;
        let edge = (upper - lower).max(Vec3::splat(EPSILON));

        self.scale = Vec3::splat(GRID_LENGTH) / edge;
        self.bias = -lower * self.scale;

        self.sphere_first = Default::default();
        self.sphere_last = Default::default();
        self.cone_first = Default::default();
        self.cone_last = Default::default();
        true
    }

    /// Mark the cells covered by each sphere; bit `i` is sphere `i`.
    pub fn add_spheres(&mut self, spheres: &[Vec4]) {
        for (i, sphere) in spheres.iter().enumerate() {
            let mask = 1u32 << i;
            let center = xyz(*sphere);
            let radius = Vec3::splat(sphere.w);

            let first = ((center - radius) * self.scale + self.bias).max(Vec3::ZERO);
            let last = ((center + radius) * self.scale + self.bias).min(Vec3::splat(GRID_LENGTH));

            for axis in 0..3 {
                let first = first[axis].floor() as i32;
                let last = last[axis].floor() as i32;
                for j in first.max(0)..=MAX_INDEX {
                    self.sphere_first[axis][j as usize] |= mask;
                }
                for j in 0..=last.min(MAX_INDEX) {
                    self.sphere_last[axis][j as usize] |= mask;
                }
            }
        }
    }

    /// Derive cone cells from the cells of their end spheres.
    pub fn add_cones(&mut self, cones: &[Cone]) {
        for (i, cone) in cones.iter().enumerate() {
            if cone.radius == 0.0 {
                continue;
            }
            let cone_mask = 1u32 << i;
            for axis in 0..3 {
                for cell in 0..GRID_SIZE {
                    if self.sphere_first[axis][cell] & cone.both_mask != 0 {
                        self.cone_first[axis][cell] |= cone_mask;
                    }
                    if self.sphere_last[axis][cell] & cone.both_mask != 0 {
                        self.cone_last[axis][cell] |= cone_mask;
                    }
                }
            }
        }
    }

    /// Combine the `first`/`last` rows into per-cell overlap masks.
    pub fn merge(&mut self) {
        for axis in 0..3 {
            for cell in 0..GRID_SIZE {
                self.sphere_first[axis][cell] &= self.sphere_last[axis][cell];
                self.cone_first[axis][cell] &= self.cone_last[axis][cell];
            }
        }
    }

    /// Shapes that may contain `p`. Only valid after [`ShapeGrid::merge`].
    pub fn lookup(&self, p: Vec3) -> ShapeMask {
        let cell = p * self.scale + self.bias;
        let mut mask = ShapeMask {
            spheres: u32::MAX,
            cones: u32::MAX,
        };
        for axis in 0..3 {
            mask &= Self::gather(&self.sphere_first[axis], &self.cone_first[axis], cell[axis]);
        }
        mask
    }

    /// Shapes that may intersect the path from `prev` to `cur`. Only valid
    /// before [`ShapeGrid::merge`].
    pub fn lookup_swept(&self, prev: Vec3, cur: Vec3) -> ShapeMask {
        let prev = prev * self.scale + self.bias;
        let cur = cur * self.scale + self.bias;

        let max = prev.max(cur).min(Vec3::splat(GRID_LENGTH));
        let min = prev.min(cur).max(Vec3::ZERO);

        let mut mask = ShapeMask {
            spheres: u32::MAX,
            cones: u32::MAX,
        };
        for axis in 0..3 {
            mask &= Self::gather(&self.sphere_first[axis], &self.cone_first[axis], max[axis]);
            mask &= Self::gather(&self.sphere_last[axis], &self.cone_last[axis], min[axis]);
        }
        mask
    }

    #[inline]
    fn gather(spheres: &[u32; GRID_SIZE], cones: &[u32; GRID_SIZE], coord: f32) -> ShapeMask {
        let cell = coord.floor();
        if !(0.0..GRID_SIZE as f32).contains(&cell) {
            return ShapeMask::default();
        }
        let cell = cell as usize;
        ShapeMask {
            spheres: spheres[cell],
            cones: cones[cell],
        }
    }
}
