use bytemuck::{Pod, Zeroable};
use glam::{Vec3, Vec4};

use crate::error::{ClothError, Result};
use crate::scheduler::TripletScheduler;

/// Triplets per conflict-free set.
pub const SET_WIDTH: usize = 4;

/// A collision proxy interpolated from three particles.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct VirtualParticle {
    pub indices: [u32; 3],
    /// Row of the weight table.
    pub weight: u32,
}

impl VirtualParticle {
    pub const fn new(i0: u32, i1: u32, i2: u32, weight: u32) -> Self {
        Self {
            indices: [i0, i1, i2],
            weight,
        }
    }
}

/// Virtual particles of a cloth, scheduled into sets that share no
/// particle.
///
/// Weights are stored as `(w0, w1, w2, 1 / |w|^2)`; the last component
/// distributes a proxy impulse back onto the triangle so the proxy moves
/// by exactly that impulse.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VirtualParticles {
    particles: Vec<VirtualParticle>,
    weights: Vec<Vec4>,
    set_ends: Vec<usize>,
}

impl VirtualParticles {
    pub fn new(particles: &[VirtualParticle], weights: &[Vec3], num_particles: u32) -> Result<Self> {
        for particle in particles {
            if let Some(&index) = particle.indices.iter().find(|&&i| i >= num_particles) {
                return Err(ClothError::IndexOutOfRange { index, num_particles });
            }
            if particle.weight as usize >= weights.len() {
                return Err(ClothError::MismatchedLength {
                    what: "virtual particle weights",
                    expected: particle.weight as usize + 1,
                    actual: weights.len(),
                });
            }
        }

        let triplets: Vec<[u32; 3]> = particles.iter().map(|p| p.indices).collect();
        let schedule = TripletScheduler::new(&triplets, num_particles as usize, SET_WIDTH);

        let weights = weights
            .iter()
            .map(|w| w.extend(1.0 / w.length_squared()))
            .collect();

        Ok(Self {
            particles: schedule.order.iter().map(|&i| particles[i]).collect(),
            weights,
            set_ends: schedule.set_ends,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    pub fn len(&self) -> usize {
        self.particles.len()
    }

    /// All particles in scheduled order.
    pub fn particles(&self) -> &[VirtualParticle] {
        &self.particles
    }

    pub fn weights(&self) -> &[Vec4] {
        &self.weights
    }

    pub fn num_weights(&self) -> usize {
        self.weights.len()
    }

    pub fn num_sets(&self) -> usize {
        self.set_ends.len()
    }

    pub fn set(&self, index: usize) -> &[VirtualParticle] {
        let start = if index == 0 { 0 } else { self.set_ends[index - 1] };
        &self.particles[start..self.set_ends[index]]
    }

    /// Weighted position of `particle` over `positions`.
    #[inline]
    pub fn interpolate(&self, particle: &VirtualParticle, positions: &[Vec4]) -> Vec3 {
        let w = self.weights[particle.weight as usize];
        let [i0, i1, i2] = particle.indices;
        positions[i0 as usize].truncate() * w.x
            + positions[i1 as usize].truncate() * w.y
            + positions[i2 as usize].truncate() * w.z
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn weights_carry_normalization() {
        let vp = VirtualParticles::new(
            &[VirtualParticle::new(0, 1, 2, 0)],
            &[Vec3::new(0.5, 0.5, 0.0)],
            3,
        )
        .unwrap();
        assert_relative_eq!(vp.weights()[0].w, 2.0);
        assert_eq!(vp.num_sets(), 1);
        assert_eq!(vp.set(0).len(), 1);
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        let result = VirtualParticles::new(&[VirtualParticle::new(0, 1, 5, 0)], &[Vec3::ONE], 3);
        assert_eq!(
            result,
            Err(ClothError::IndexOutOfRange {
                index: 5,
                num_particles: 3
            })
        );
    }

    #[test]
    fn missing_weight_is_rejected() {
        let result = VirtualParticles::new(&[VirtualParticle::new(0, 1, 2, 1)], &[Vec3::ONE], 3);
        assert!(matches!(result, Err(ClothError::MismatchedLength { .. })));
    }

    #[test]
    fn interpolate_blends_positions() {
        let vp = VirtualParticles::new(
            &[VirtualParticle::new(0, 1, 2, 0)],
            &[Vec3::new(0.25, 0.25, 0.5)],
            3,
        )
        .unwrap();
        let positions = [Vec4::new(0.0, 0.0, 0.0, 1.0), Vec4::new(4.0, 0.0, 0.0, 1.0), Vec4::new(0.0, 4.0, 0.0, 1.0)];
        let p = vp.interpolate(&vp.particles()[0], &positions);
        assert_eq!(p, Vec3::new(1.0, 2.0, 0.0));
    }
}
