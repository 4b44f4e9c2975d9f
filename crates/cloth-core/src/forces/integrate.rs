use glam::{Vec3, Vec4};

use crate::iteration_state::IterationState;
use crate::math::{with_xyz, xyz};

/// Verlet step of all particles for one iteration.
///
/// The state's transform folds in damping, frame inertia and gravity:
/// 1. Replace unwritten lanes of `current` (xyz at or below `-f32::MAX`,
///    inverse mass at or below zero) with `previous`.
/// 2. `delta = (cur - prev) * scale + accel` (or the turning matrices).
/// 3. Move `current` by `delta` and store the old current as `previous`,
///    both only for particles with finite mass (`previous.w > 0`).
///
/// `accelerations` are optional per-particle accelerations; pass an empty
/// slice to use gravity alone.
pub fn integrate_particles(
    current: &mut [Vec4],
    previous: &mut [Vec4],
    accelerations: &[Vec4],
    state: &IterationState,
) {
    let iter_dt_sq = state.iter_dt * state.iter_dt;

    for (i, (cur, prev)) in current.iter_mut().zip(previous.iter_mut()).enumerate() {
        let selected = select_written(*cur, *prev);
        let finite_mass = prev.w > 0.0;

        let accel = match accelerations.get(i) {
            Some(a) => xyz(*a) * iter_dt_sq + state.cur_bias,
            None => state.cur_bias,
        };

        let p = xyz(selected);
        let q = xyz(*prev);
        let delta = if state.is_turning {
            accel + state.prev_matrix * q + state.cur_matrix * p
        } else {
            (p - q) * state.position_scale + accel
        };

        if finite_mass {
            *cur = with_xyz(selected, p + delta);
            *prev = with_xyz(*prev, p + state.prev_bias);
        } else {
            *cur = selected;
            *prev = with_xyz(*prev, p);
        }
    }
}

#[inline]
fn select_written(current: Vec4, previous: Vec4) -> Vec4 {
    let pick = |c: f32, p: f32| if c > -f32::MAX { c } else { p };
    let p = Vec3::new(
        pick(current.x, previous.x),
        pick(current.y, previous.y),
        pick(current.z, previous.z),
    );
    let w = if current.w > 0.0 { current.w } else { previous.w };
    p.extend(w)
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Mat3;

    fn still_state() -> IterationState {
        IterationState {
            rotation_matrix: Mat3::IDENTITY,
            cur_bias: Vec3::ZERO,
            prev_bias: Vec3::ZERO,
            wind: Vec3::ZERO,
            prev_matrix: Mat3::ZERO,
            cur_matrix: Mat3::ZERO,
            position_scale: Vec3::ONE,
            damp_scale_update: Vec3::ZERO,
            remaining_iterations: 1,
            inv_num_iterations: 1.0,
            iter_dt: 0.01,
            is_turning: false,
        }
    }

    #[test]
    fn velocity_is_carried_over() {
        let mut cur = vec![Vec4::new(1.0, 0.0, 0.0, 1.0)];
        let mut prev = vec![Vec4::new(0.0, 0.0, 0.0, 1.0)];
        integrate_particles(&mut cur, &mut prev, &[], &still_state());
        assert_eq!(cur[0], Vec4::new(2.0, 0.0, 0.0, 1.0));
        assert_eq!(prev[0], Vec4::new(1.0, 0.0, 0.0, 1.0));
    }

    #[test]
    fn unwritten_lanes_take_previous_values() {
        let mut cur = vec![Vec4::new(-f32::MAX, 2.0, 0.0, 0.0)];
        let mut prev = vec![Vec4::new(5.0, 2.0, 0.0, 0.5)];
        integrate_particles(&mut cur, &mut prev, &[], &still_state());
        assert_eq!(cur[0], Vec4::new(5.0, 2.0, 0.0, 0.5));
    }

    #[test]
    fn infinite_mass_does_not_move() {
        let mut state = still_state();
        state.cur_bias = Vec3::new(0.0, -1.0, 0.0);
        let mut cur = vec![Vec4::new(1.0, 1.0, 1.0, 0.0)];
        let mut prev = vec![Vec4::new(0.0, 1.0, 1.0, 0.0)];
        integrate_particles(&mut cur, &mut prev, &[], &state);
        assert_eq!(cur[0], Vec4::new(1.0, 1.0, 1.0, 0.0));
    }

    #[test]
    fn acceleration_scales_with_dt_squared() {
        let mut cur = vec![Vec4::new(0.0, 0.0, 0.0, 1.0)];
        let mut prev = cur.clone();
        let accel = [Vec4::new(0.0, 100.0, 0.0, 0.0)];
        integrate_particles(&mut cur, &mut prev, &accel, &still_state());
        assert!((cur[0].y - 0.01).abs() < 1e-7, "y = {}", cur[0].y);
    }
}
