//! Collision of a cloth's particles with each other.

use glam::Vec4;

use crate::grid::{ParticleGrid, SortedKeys};
use crate::math::{xyz, Bounds, EPSILON};

/// Self-collision settings of one iteration.
#[derive(Clone, Copy, Debug)]
pub struct SelfCollisionParams<'a> {
    /// Minimum separation of two particles.
    pub distance: f32,
    /// Per-iteration stiffness in [0, 1].
    pub stiffness: f32,
    /// Particles taking part; empty means all of them.
    pub indices: &'a [u32],
    /// Rest configuration; pairs closer than `distance` at rest never collide.
    pub rest_positions: &'a [Vec4],
}

impl SelfCollisionParams<'_> {
    pub fn is_enabled(&self) -> bool {
        self.distance.min(self.stiffness) > 0.0
    }
}

fn align2(n: usize) -> usize {
    (n + 1) & !1
}

/// Bytes of temporary storage a self-collision pass over `num_indices`
/// particles needs: keys, 16-bit sorted indices, and the larger of the
/// radix histograms or the sorted keys with a sentinel.
pub fn estimate_temporary_memory(num_indices: usize) -> usize {
    let keys = num_indices * std::mem::size_of::<u32>();
    let indices = align2(num_indices) * std::mem::size_of::<u16>();
    let radix = (num_indices + 1024) * std::mem::size_of::<u16>();
    keys + indices + radix.max(keys + std::mem::size_of::<u32>())
}

/// Push apart particles closer than the collision distance.
///
/// `bounds` must contain the particles approximately; particles outside
/// them fall into the border cells. Returns the number of pairs resolved.
pub fn self_collide(
    particles: &mut [Vec4],
    params: &SelfCollisionParams,
    bounds: &Bounds,
    keys: &mut SortedKeys,
) -> usize {
    if !params.is_enabled() || particles.is_empty() || bounds.is_empty() {
        return 0;
    }

    let grid = ParticleGrid::new(bounds, params.distance);
    let indices = params.indices;
    let index_of = |k: usize| if indices.is_empty() { k } else { indices[k] as usize };
    let count = if indices.is_empty() {
        particles.len()
    } else {
        indices.len()
    };

    keys.sort((0..count).map(|k| grid.key(xyz(particles[index_of(k)]))));

    let sqr_distance = params.distance * params.distance;
    let use_rest = !params.rest_positions.is_empty();
    let mut num_collisions = 0;

    keys.for_each_pair(grid.search_cells(), |a, b| {
        let (i, j) = (index_of(a), index_of(b));
        let (pi, pj) = (particles[i], particles[j]);

        let diff = xyz(pj) - xyz(pi);
        let sqr_length = diff.length_squared();
        // coincident particles have no separating direction
        if sqr_length > sqr_distance || sqr_length <= EPSILON {
            return;
        }

        if use_rest {
            let rest_diff = xyz(params.rest_positions[j]) - xyz(params.rest_positions[i]);
            if rest_diff.length_squared() < sqr_distance {
                return;
            }
        }

        let ratio = params.distance / sqr_length.sqrt();
        let scale = params.stiffness / (EPSILON + pi.w + pj.w);
        let delta = (diff - diff * ratio) * scale;

        particles[i] = (xyz(pi) + delta * pi.w).extend(pi.w);
        particles[j] = (xyz(pj) - delta * pj.w).extend(pj.w);
        num_collisions += 1;
    });

    num_collisions
}
