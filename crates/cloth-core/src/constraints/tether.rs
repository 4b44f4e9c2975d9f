use glam::{Vec3, Vec4};

use crate::fabric::Tether;
use crate::math::{xyz, EPSILON};

/// Pull every particle back towards the anchors whose tether it exceeds.
///
/// Tethers are grouped by particle stride: tether `k * n + i` belongs to
/// particle `i`. Each violated tether contributes its overshoot towards the
/// anchor; the sum is scaled by `n * stiffness / num_tethers`, i.e. the
/// stiffness divided by the number of tethers per particle.
///
/// `scale` multiplies every tether length.
pub fn constrain_tethers(particles: &mut [Vec4], tethers: &[Tether], scale: f32, stiffness: f32) {
    let n = particles.len();
    if stiffness == 0.0 || tethers.is_empty() || n == 0 {
        return;
    }
    debug_assert_eq!(tethers.len() % n, 0);

    let weight = n as f32 * stiffness / tethers.len() as f32;

    for i in 0..n {
        let position = particles[i];
        let p = xyz(position);
        let mut offset = Vec3::ZERO;

        for tether in tethers[i..].iter().step_by(n) {
            let delta = xyz(particles[tether.anchor as usize]) - p;
            let length_sq = EPSILON + delta.length_squared();
            let radius = tether.length * scale;
            let slack = 1.0 - radius / length_sq.sqrt();
            offset += delta * slack.max(0.0);
        }

        particles[i] = position + (offset * weight).extend(0.0);
    }
}
