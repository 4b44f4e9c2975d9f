use glam::{Mat3, Quat, Vec3};

use crate::cloth::Cloth;
use crate::math::{exp2_vec3, quat_exp, quat_log, star};

/// Per-frame part of the sub-step setup.
///
/// Constructing the factory advances the cloth's frame: it derives the
/// linear and angular velocity of the local frame from the current and
/// target pose, records the iteration time step, and moves the current pose
/// to the target.
#[derive(Clone, Copy, Debug)]
pub struct IterationStateFactory {
    pub num_iterations: u32,
    pub inv_num_iterations: f32,
    pub iter_dt: f32,
    /// Ratio of this frame's iteration dt to the previous frame's.
    pub iter_dt_ratio: f32,
    /// Smoothed iteration dt used to scale gravity.
    pub iter_dt_average: f32,
    current_rotation: Quat,
    prev_linear_velocity: Vec3,
    prev_angular_velocity: Vec3,
}

impl IterationStateFactory {
    pub fn new(cloth: &mut Cloth, frame_dt: f32) -> Self {
        let num_iterations = ((frame_dt * cloth.solver_frequency + 0.5) as i32).max(1) as u32;
        let inv_num_iterations = 1.0 / num_iterations as f32;
        let iter_dt = frame_dt * inv_num_iterations;

        let iter_dt_ratio = if cloth.prev_iter_dt != 0.0 {
            iter_dt / cloth.prev_iter_dt
        } else {
            1.0
        };
        let iter_dt_average = cloth.iter_dt_avg.average().unwrap_or(iter_dt);

        let factory = Self {
            num_iterations,
            inv_num_iterations,
            iter_dt,
            iter_dt_ratio,
            iter_dt_average,
            current_rotation: cloth.current_motion.rotation,
            prev_linear_velocity: cloth.linear_velocity,
            prev_angular_velocity: cloth.angular_velocity,
        };

        // advance the local frame to the target pose
        let inv_frame_dt = 1.0 / frame_dt;
        cloth.linear_velocity =
            (cloth.target_motion.translation - cloth.current_motion.translation) * inv_frame_dt;
        let dq = cloth.target_motion.rotation * cloth.current_motion.rotation.conjugate();
        cloth.angular_velocity = quat_log(dq) * inv_frame_dt;

        cloth.prev_iter_dt = iter_dt;
        cloth.iter_dt_avg.push(num_iterations as usize, iter_dt);
        cloth.current_motion = cloth.target_motion;

        factory
    }

    /// Build the sub-step transform for the frame set up by [`IterationStateFactory::new`].
    ///
    /// Particles advance as `x2 = x1 + cur * x1 + prev * x0 + bias`, with the
    /// inertia, drag, centrifugal and coriolis terms of the moving local
    /// frame folded into `cur`, `prev` and the biases.
    pub fn create(&self, cloth: &Cloth) -> IterationState {
        let n = self.num_iterations as f32;
        let iter_dt = self.iter_dt;
        let cur_linear_velocity = cloth.linear_velocity;
        let damp_exponent = cloth.stiffness_frequency * iter_dt;

        let translation = cur_linear_velocity * iter_dt;

        // gravity delta per iteration
        let gravity = cloth.gravity * (self.iter_dt_average * self.iter_dt_average);

        // scale of local particle velocity per iteration
        let damp_scale = exp2_vec3(cloth.log_damping * damp_exponent);
        // first iteration compensates for the change in time step
        let first_damp_scale = damp_scale * self.iter_dt_ratio;

        // portion of negative frame velocity transferred to the particles
        let linear_drag = (Vec3::ONE - exp2_vec3(cloth.linear_log_drag * damp_exponent)) * translation;

        // portion of frame acceleration transferred to the particles
        let linear_inertia =
            cloth.linear_inertia * iter_dt * (self.prev_linear_velocity - cur_linear_velocity);

        // split inertia between current and previous position with
        // alpha = (n + 1) / 2n so position and velocity match the frame motion
        let linear_alpha = (n + 1.0) * 0.5 * self.inv_num_iterations;
        let cur_linear_inertia = linear_inertia * linear_alpha;

        let inv_rotation = Mat3::from_quat(self.current_rotation.conjugate());

        // the full bias goes to the current position
        let bias = gravity - linear_drag;
        let cur_bias = inv_rotation * (cur_linear_inertia + bias);
        let prev_bias = inv_rotation * (linear_inertia - cur_linear_inertia);

        let wind = inv_rotation * (translation - cloth.wind_velocity * iter_dt);

        let is_turning = self.prev_angular_velocity.length_squared()
            + cloth.angular_velocity.length_squared()
            > 0.0;

        let mut state = IterationState {
            rotation_matrix: inv_rotation,
            cur_bias,
            prev_bias,
            wind,
            prev_matrix: Mat3::ZERO,
            cur_matrix: Mat3::ZERO,
            position_scale: first_damp_scale,
            damp_scale_update: damp_scale - first_damp_scale,
            remaining_iterations: self.num_iterations,
            inv_num_iterations: self.inv_num_iterations,
            iter_dt,
            is_turning,
        };

        if !is_turning {
            state.rotation_matrix = Mat3::IDENTITY;
            return state;
        }

        let cur_angular_velocity = inv_rotation * cloth.angular_velocity;
        let prev_angular_velocity = inv_rotation * self.prev_angular_velocity;

        // rotation for one iteration in local space
        let cur_inv_angle = cur_angular_velocity * -iter_dt;
        let prev_inv_angle = prev_angular_velocity * -iter_dt;

        let cur_inv_rotation = quat_exp(cur_inv_angle);
        let prev_inv_rotation = quat_exp(prev_inv_angle);

        let mut cur_matrix = Mat3::from_quat(cur_inv_rotation);
        let mut prev_matrix = Mat3::from_quat(prev_inv_rotation * cur_inv_rotation);

        state.rotation_matrix = cur_matrix;

        let angular_drag = Vec3::ONE - exp2_vec3(cloth.angular_log_drag * damp_exponent);
        let angular_acceleration = cur_angular_velocity - prev_angular_velocity;

        // sqr(epsilon) must stay > 0
        let epsilon = f32::MIN_POSITIVE.sqrt();
        let velocity_length_sqr = cur_angular_velocity.length_squared() + epsilon;
        let drag_length_sqr = (cur_angular_velocity * angular_drag).length_squared() + epsilon;
        let centrifugal_length_sqr =
            (cur_angular_velocity * cloth.centrifugal_inertia).length_squared() + epsilon;
        let acceleration_length_sqr = angular_acceleration.length_squared() + epsilon;
        let inertia_length_sqr =
            (angular_acceleration * cloth.angular_inertia).length_squared() + epsilon;

        let drag_scale = drag_length_sqr / (velocity_length_sqr * drag_length_sqr).sqrt();
        let inertia_scale = self.inv_num_iterations * inertia_length_sqr
            / (acceleration_length_sqr * inertia_length_sqr).sqrt();

        // part of the centrifugal force is already in the inertia term,
        // the remainder is 2(n-1)/n after scaling the inertia part
        let centrifugal_alpha = (2.0 * n - 1.0) * self.inv_num_iterations;
        let centrifugal_scale = centrifugal_alpha * centrifugal_length_sqr
            / (velocity_length_sqr * centrifugal_length_sqr).sqrt()
            - inertia_scale;

        let centrifugal_velocity = (prev_inv_angle + cur_inv_angle) * 0.5;
        let centrifugal_sqr_length = centrifugal_velocity.length_squared() * centrifugal_scale;

        let coriolis_matrix = star(centrifugal_velocity * centrifugal_scale);

        // M(i, j) is row i, column j
        for j in 0..3 {
            let centrifugal_j = -centrifugal_velocity[j] * centrifugal_scale;
            let damping = first_damp_scale[j];
            for i in 0..3 {
                let coriolis = coriolis_matrix.col(j)[i];
                let centrifugal = centrifugal_velocity[i] * centrifugal_j;
                let cur = cur_matrix.col(j)[i];
                let prev = prev_matrix.col(j)[i];

                prev_matrix.col_mut(j)[i] = centrifugal - coriolis + cur * (inertia_scale - damping)
                    - prev * inertia_scale;
                cur_matrix.col_mut(j)[i] =
                    centrifugal + coriolis + cur * (inertia_scale + damping + drag_scale);
            }
            cur_matrix.col_mut(j)[j] += centrifugal_sqr_length - inertia_scale - drag_scale;
            prev_matrix.col_mut(j)[j] += centrifugal_sqr_length;
        }

        state.prev_matrix = prev_matrix;
        state.cur_matrix = cur_matrix;
        state
    }
}

/// Transform applied to particles in each sub-step of a frame.
#[derive(Clone, Copy, Debug)]
pub struct IterationState {
    /// Rotation of the local frame over one iteration (identity when not turning).
    pub rotation_matrix: Mat3,
    /// Local-space bias added to the current position.
    pub cur_bias: Vec3,
    /// Local-space bias added to the previous position.
    pub prev_bias: Vec3,
    /// Air displacement per iteration relative to the frame.
    pub wind: Vec3,
    pub prev_matrix: Mat3,
    pub cur_matrix: Mat3,
    /// Per-axis velocity scale used while not turning.
    pub position_scale: Vec3,
    pub damp_scale_update: Vec3,
    pub remaining_iterations: u32,
    pub inv_num_iterations: f32,
    pub iter_dt: f32,
    pub is_turning: bool,
}

impl IterationState {
    /// Advance to the next iteration.
    pub fn update(&mut self) {
        if self.is_turning {
            self.cur_bias = self.rotation_matrix * self.cur_bias;
            self.prev_bias = self.rotation_matrix * self.prev_bias;
            self.wind = self.rotation_matrix * self.wind;

            // drop the time step ratio from the damping after the first iteration
            for i in 0..3 {
                let delta = self.rotation_matrix.col(i) * self.damp_scale_update;
                *self.prev_matrix.col_mut(i) -= delta;
                *self.cur_matrix.col_mut(i) += delta;
            }
        } else {
            self.position_scale += self.damp_scale_update;
        }
        self.damp_scale_update = Vec3::ZERO;

        self.remaining_iterations -= 1;
    }

    pub fn previous_alpha(&self) -> f32 {
        1.0 - self.remaining_iterations as f32 * self.inv_num_iterations
    }

    /// Interpolation weight of the target buffers for the running iteration;
    /// exactly one on the last iteration.
    pub fn current_alpha(&self) -> f32 {
        if self.is_last_iteration() {
            return 1.0;
        }
        self.previous_alpha() + self.inv_num_iterations
    }

    pub fn is_last_iteration(&self) -> bool {
        self.remaining_iterations == 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::{Factory, Platform};
    use crate::fabric::FabricData;
    use approx::assert_relative_eq;
    use glam::Vec4;

    fn single_particle_cloth() -> Cloth {
        let mut factory = Factory::new(Platform::Cpu);
        let fabric = factory
            .create_fabric(&FabricData {
                num_particles: 1,
                ..Default::default()
            })
            .unwrap();
        factory
            .create_cloth(&[Vec4::new(0.0, 0.0, 0.0, 1.0)], fabric)
            .unwrap()
    }

    #[test]
    fn iteration_count_rounds_to_nearest() {
        let mut cloth = single_particle_cloth();
        cloth.set_solver_frequency(300.0);
        let factory = IterationStateFactory::new(&mut cloth, 1.0 / 60.0);
        assert_eq!(factory.num_iterations, 5);
        assert_relative_eq!(factory.iter_dt, 1.0 / 300.0, epsilon = 1e-7);

        let factory = IterationStateFactory::new(&mut cloth, 1e-6);
        assert_eq!(factory.num_iterations, 1);
    }

    #[test]
    fn gravity_uses_squared_iteration_dt() {
        let mut cloth = single_particle_cloth();
        cloth.set_gravity(Vec3::new(0.0, -9.8, 0.0));
        let factory = IterationStateFactory::new(&mut cloth, 0.01);
        let state = factory.create(&cloth);
        assert!(!state.is_turning);
        let expected = -9.8 * factory.iter_dt * factory.iter_dt;
        assert_relative_eq!(state.cur_bias.y, expected, epsilon = 1e-9);
        assert_eq!(state.prev_bias, Vec3::ZERO);
    }

    #[test]
    fn alphas_cover_the_frame() {
        let mut cloth = single_particle_cloth();
        cloth.set_solver_frequency(400.0);
        let factory = IterationStateFactory::new(&mut cloth, 0.01);
        let mut state = factory.create(&cloth);
        assert_eq!(state.remaining_iterations, 4);
        assert_relative_eq!(state.previous_alpha(), 0.0);
        assert_relative_eq!(state.current_alpha(), 0.25);
        while state.remaining_iterations > 1 {
            state.update();
        }
        assert_eq!(state.current_alpha(), 1.0);
    }

    #[test]
    fn turning_frame_matches_closed_form() {
        // two iterations, half angle `a` per frame about y, unit inertia,
        // no damping or drag
        let a: f32 = 0.05;
        let mut cloth = single_particle_cloth();
        cloth.set_solver_frequency(120.0);
        cloth.set_gravity(Vec3::new(0.0, -9.8, 0.0));
        cloth.set_translation(Vec3::new(0.6, 0.0, 0.0));
        cloth.set_rotation(Quat::from_rotation_y(2.0 * a));

        let factory = IterationStateFactory::new(&mut cloth, 1.0 / 60.0);
        assert_eq!(factory.num_iterations, 2);
        let mut state = factory.create(&cloth);
        assert!(state.is_turning);

        // inertia_scale = 1/2, centrifugal_scale = 3/2 - 1/2 = 1,
        // centrifugal velocity (0, -a/4, 0), one iteration rotates by -a
        let (sin, cos) = a.sin_cos();
        let c2 = a * a / 16.0;
        let rotation = Mat3::from_rotation_y(-a);
        let cur = Mat3::from_cols(
            Vec3::new(1.5 * cos + c2 - 0.5, 0.0, a / 4.0 + 1.5 * sin),
            Vec3::Y,
            Vec3::new(-a / 4.0 - 1.5 * sin, 0.0, 1.5 * cos + c2 - 0.5),
        );
        let prev = Mat3::from_cols(
            Vec3::new(c2 - cos, 0.0, -a / 4.0 - sin),
            -Vec3::Y,
            Vec3::new(a / 4.0 + sin, 0.0, c2 - cos),
        );
        assert!(state.rotation_matrix.abs_diff_eq(rotation, 1e-6), "{:?}", state.rotation_matrix);
        assert!(state.cur_matrix.abs_diff_eq(cur, 1e-6), "{:?}", state.cur_matrix);
        assert!(state.prev_matrix.abs_diff_eq(prev, 1e-6), "{:?}", state.prev_matrix);

        // frame velocity 36 along x: inertia -0.3 per iteration, split 3/4 to 1/4
        let gravity = -9.8 / (120.0 * 120.0);
        let cur_bias = Vec3::new(-0.225, gravity, 0.0);
        let prev_bias = Vec3::new(-0.075, 0.0, 0.0);
        assert!(state.cur_bias.abs_diff_eq(cur_bias, 1e-6), "{}", state.cur_bias);
        assert!(state.prev_bias.abs_diff_eq(prev_bias, 1e-6), "{}", state.prev_bias);
        assert!(state.wind.abs_diff_eq(Vec3::new(0.3, 0.0, 0.0), 1e-6), "{}", state.wind);

        // biases follow the frame rotation from one iteration to the next
        state.update();
        assert!(state.cur_bias.abs_diff_eq(rotation * cur_bias, 1e-6));
        assert!(state.prev_bias.abs_diff_eq(rotation * prev_bias, 1e-6));
        assert!(state.cur_matrix.abs_diff_eq(cur, 1e-6));
    }
}
