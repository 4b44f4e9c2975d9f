use glam::Vec4;

use super::Interpolated;
use crate::math::{xyz, EPSILON};

/// Motion constraint parameters applied to every sphere.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MotionParams {
    pub scale: f32,
    pub bias: f32,
    /// Per-iteration stiffness in [0, 1].
    pub stiffness: f32,
}

/// Keep each particle inside its motion sphere.
///
/// The sphere radius is `max(0, radius * scale + bias)`. A particle whose
/// radius collapses to zero becomes immovable for the rest of the frame
/// (its inverse mass is zeroed).
pub fn constrain_motion(particles: &mut [Vec4], spheres: &Interpolated<'_, Vec4>, params: &MotionParams) {
    for (i, particle) in particles.iter_mut().enumerate() {
        let sphere = spheres.get(i);
        let delta = xyz(sphere) - xyz(*particle);
        let length_sq = EPSILON + delta.length_squared();
        let radius = (sphere.w * params.scale + params.bias).max(0.0);

        let slack = 1.0 - radius / length_sq.sqrt();
        if slack <= 0.0 {
            continue;
        }
        if radius <= 0.0 {
            particle.w = 0.0;
        }
        *particle += (delta * (slack * params.stiffness)).extend(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::DoubleBuffer;
    use approx::assert_relative_eq;

    const FULL: MotionParams = MotionParams {
        scale: 1.0,
        bias: 0.0,
        stiffness: 1.0,
    };

    #[test]
    fn particle_outside_is_pulled_to_radius() {
        let mut buffer = DoubleBuffer::new();
        buffer.push(&[Vec4::new(0.0, 0.0, 0.0, 1.0)]);
        let mut particles = vec![Vec4::new(3.0, 0.0, 0.0, 1.0)];
        constrain_motion(&mut particles, &Interpolated::new(&buffer, 1.0), &FULL);
        assert_relative_eq!(particles[0].x, 1.0, epsilon = 1e-5);
        assert_eq!(particles[0].w, 1.0);
    }

    #[test]
    fn zero_radius_pins_particle() {
        let mut buffer = DoubleBuffer::new();
        buffer.push(&[Vec4::new(1.0, 2.0, 3.0, 0.0)]);
        let mut particles = vec![Vec4::new(0.0, 0.0, 0.0, 1.0)];
        constrain_motion(&mut particles, &Interpolated::new(&buffer, 1.0), &FULL);
        assert_relative_eq!(particles[0].y, 2.0, epsilon = 1e-5);
        assert_eq!(particles[0].w, 0.0);
    }
}
