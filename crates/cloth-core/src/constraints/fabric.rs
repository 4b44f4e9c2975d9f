use glam::{Vec3, Vec4};

use crate::config::PhaseConfig;
use crate::fabric::{Fabric, IndexPair, BATCH_WIDTH};
use crate::math::{decode_coefficient, xyz, EPSILON};

/// Per-iteration parameters of one phase, decoded from its log-space config.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PhaseCoefficients {
    pub stiffness: f32,
    pub multiplier: f32,
    pub compression_limit: f32,
    pub stretch_limit: f32,
}

impl PhaseCoefficients {
    pub fn new(config: &PhaseConfig, stiffness_exponent: f32) -> Self {
        Self {
            stiffness: decode_coefficient(config.stiffness, stiffness_exponent),
            multiplier: decode_coefficient(config.stiffness_multiplier, stiffness_exponent),
            compression_limit: config.compression_limit,
            stretch_limit: config.stretch_limit,
        }
    }

    /// True when the stretch/compression limiting has no effect.
    pub fn is_neutral(&self) -> bool {
        self.multiplier == 0.0 && self.compression_limit == 0.0 && self.stretch_limit == 0.0
    }
}

/// Solve every configured phase of `fabric` in order (Gauss-Seidel).
///
/// `particles` are the current positions with inverse mass in w.
/// `stiffness_exponent` is `stiffness_frequency * iter_dt`.
/// Returns the number of constraints visited, padding included.
pub fn solve_fabric(
    particles: &mut [Vec4],
    fabric: &Fabric,
    configs: &[PhaseConfig],
    stiffness_exponent: f32,
) -> usize {
    let mut total = 0;
    for config in configs {
        let range = fabric.phase_range(config.phase_index as usize);
        total += range.len();
        let coefficients = PhaseCoefficients::new(config, stiffness_exponent);
        let rest_values = &fabric.rest_values()[range.clone()];
        let indices = &fabric.indices()[range];
        if coefficients.is_neutral() {
            solve_set::<false>(particles, rest_values, indices, &coefficients);
        } else {
            solve_set::<true>(particles, rest_values, indices, &coefficients);
        }
    }
    total
}

fn solve_set<const LIMITED: bool>(
    particles: &mut [Vec4],
    rest_values: &[f32],
    indices: &[IndexPair],
    c: &PhaseCoefficients,
) {
    for (rest_batch, index_batch) in rest_values
        .chunks(BATCH_WIDTH)
        .zip(indices.chunks(BATCH_WIDTH))
    {
        for (&rest, pair) in rest_batch.iter().zip(index_batch) {
            // padding and zero-length constraints do nothing
            if rest <= EPSILON {
                continue;
            }
            let i = pair.first as usize;
            let j = pair.second as usize;
            let pi = particles[i];
            let pj = particles[j];

            let h: Vec3 = xyz(pj) - xyz(pi);
            let w_sum = pi.w + pj.w;
            let length_sq = EPSILON + h.length_squared();

            // relative error, positive when stretched
            let mut error = 1.0 - rest / length_sq.sqrt();
            if LIMITED {
                error -= c.multiplier * error.min(c.stretch_limit).max(c.compression_limit);
            }
            let scale = error * c.stiffness / (EPSILON + w_sum);
            let delta = h * scale;

            particles[i] = pi + (delta * pi.w).extend(0.0);
            particles[j] = pj - (delta * pj.w).extend(0.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fabric::{FabricData, FabricId};
    use crate::factory::Platform;
    use approx::assert_relative_eq;

    fn edge(rest: f32) -> Fabric {
        let data = FabricData {
            num_particles: 2,
            phases: vec![0],
            sets: vec![1],
            rest_values: vec![rest],
            indices: vec![0, 1],
            ..Default::default()
        };
        Fabric::new(&data, FabricId(0), Platform::Cpu).unwrap()
    }

    #[test]
    fn neutral_multiplier_detection() {
        let config = PhaseConfig::new(0).transformed();
        let c = PhaseCoefficients::new(&config, 0.1);
        assert!(c.is_neutral());
        assert_eq!(c.stiffness, 1.0);
    }

    #[test]
    fn heavier_particle_moves_less() {
        let fabric = edge(1.0);
        let mut particles = vec![Vec4::new(0.0, 0.0, 0.0, 1.0), Vec4::new(2.0, 0.0, 0.0, 3.0)];
        let configs = [PhaseConfig::new(0).transformed()];
        solve_fabric(&mut particles, &fabric, &configs, 0.1);
        assert_relative_eq!(particles[0].x, 0.25, epsilon = 1e-5);
        assert_relative_eq!(particles[1].x, 1.25, epsilon = 1e-5);
    }

    #[test]
    fn stretch_limit_allows_slack() {
        let fabric = edge(1.0);
        let mut particles = vec![Vec4::new(0.0, 0.0, 0.0, 1.0), Vec4::new(1.2, 0.0, 0.0, 1.0)];
        let mut config = PhaseConfig::new(0);
        config.stiffness_multiplier = 0.0;
        config.stretch_limit = 1.5;
        let configs = [config.transformed()];
        solve_fabric(&mut particles, &fabric, &configs, 0.1);
        // inside the stretch limit the multiplier cancels the whole error
        assert_relative_eq!(particles[1].x - particles[0].x, 1.2, epsilon = 1e-5);
    }
}
