use glam::{Vec3, Vec4};

use crate::iteration_state::IterationState;
use crate::math::{xyz, EPSILON};

/// Aerodynamic drag and lift on the fabric's triangles.
///
/// For each triangle the air moves relative to the centroid by
/// `centroid - prev_centroid + wind`. Drag acts along that relative motion
/// scaled by `|cos|` of its angle to the face normal; lift acts
/// perpendicular to it, in the plane spanned with the normal, scaled by
/// `sin * cos`. The impulse is split between the vertices by inverse mass.
pub fn apply_wind(
    current: &mut [Vec4],
    previous: &[Vec4],
    triangles: &[u32],
    drag_coefficient: f32,
    lift_coefficient: f32,
    state: &IterationState,
) {
    if drag_coefficient == 0.0 && lift_coefficient == 0.0 {
        return;
    }

    for tri in triangles.chunks_exact(3) {
        let (i0, i1, i2) = (tri[0] as usize, tri[1] as usize, tri[2] as usize);
        let c0 = current[i0];
        let c1 = current[i1];
        let c2 = current[i2];

        let centroid = (xyz(c0) + xyz(c1) + xyz(c2)) / 3.0;
        let prev_centroid = (xyz(previous[i0]) + xyz(previous[i1]) + xyz(previous[i2])) / 3.0;

        let mut delta = centroid - prev_centroid + state.wind;
        if state.is_turning {
            // add the rotation of the frame
            delta = delta - centroid + state.rotation_matrix * centroid;
        }

        let normal = (xyz(c2) - xyz(c0)).cross(xyz(c1) - xyz(c0));

        let inv_sqr_scale = delta.length_squared() * normal.length_squared();
        if inv_sqr_scale < EPSILON {
            continue;
        }
        let scale = 1.0 / inv_sqr_scale.sqrt();

        let cos_theta = normal.dot(delta) * scale;
        let sin_theta = (1.0 - cos_theta * cos_theta).max(0.0).sqrt();

        // orthogonal to delta, in the delta-normal plane, same length as delta
        let lift_dir = delta.cross(normal).cross(delta * scale);

        let lift = lift_dir * (lift_coefficient * cos_theta * sin_theta);
        let drag = delta * (drag_coefficient * cos_theta.abs());
        let impulse: Vec3 = lift + drag;

        current[i0] = c0 - (impulse * c0.w).extend(0.0);
        current[i1] = c1 - (impulse * c1.w).extend(0.0);
        current[i2] = c2 - (impulse * c2.w).extend(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Mat3;

    fn state_with_wind(wind: Vec3) -> IterationState {
        IterationState {
            rotation_matrix: Mat3::IDENTITY,
            cur_bias: Vec3::ZERO,
            prev_bias: Vec3::ZERO,
            wind,
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

    fn triangle() -> Vec<Vec4> {
        vec![
            Vec4::new(0.0, 0.0, 0.0, 1.0),
            Vec4::new(1.0, 0.0, 0.0, 1.0),
            Vec4::new(0.0, 0.0, 1.0, 1.0),
        ]
    }

    #[test]
    fn head_on_air_pushes_face_along_flow() {
        let mut current = triangle();
        let previous = current.clone();
        // air moving towards -y relative to the cloth
        let state = state_with_wind(Vec3::new(0.0, 0.1, 0.0));
        apply_wind(&mut current, &previous, &[0, 1, 2], 0.5, 0.0, &state);
        for p in &current {
            assert!(p.y < 0.0, "drag should push against the relative motion, y = {}", p.y);
        }
    }

    #[test]
    fn no_coefficients_is_noop() {
        let mut current = triangle();
        let previous = current.clone();
        let state = state_with_wind(Vec3::new(0.0, 0.1, 0.0));
        apply_wind(&mut current, &previous, &[0, 1, 2], 0.0, 0.0, &state);
        assert_eq!(current, triangle());
    }
}
