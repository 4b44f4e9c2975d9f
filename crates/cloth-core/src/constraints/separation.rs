use glam::Vec4;

use super::Interpolated;
use crate::math::{xyz, EPSILON};

/// Push each particle out of its separation sphere.
pub fn constrain_separation(particles: &mut [Vec4], spheres: &Interpolated<'_, Vec4>) {
    for (i, particle) in particles.iter_mut().enumerate() {
        let sphere = spheres.get(i);
        let delta = xyz(sphere) - xyz(*particle);
        let length_sq = EPSILON + delta.length_squared();

        let slack = 1.0 - sphere.w / length_sq.sqrt();
        if slack < 0.0 {
            *particle += (delta * slack).extend(0.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::DoubleBuffer;
    use approx::assert_relative_eq;

    #[test]
    fn particle_inside_is_pushed_to_surface() {
        let mut buffer = DoubleBuffer::new();
        buffer.push(&[Vec4::new(0.0, 0.0, 0.0, 2.0)]);
        let mut particles = vec![Vec4::new(0.0, 0.5, 0.0, 1.0)];
        constrain_separation(&mut particles, &Interpolated::new(&buffer, 1.0));
        assert_relative_eq!(particles[0].y, 2.0, epsilon = 1e-5);
    }
}
