use std::sync::Arc;

use glam::{Quat, Vec3, Vec4};
use tracing::warn;

use crate::buffer::{DoubleBuffer, MirroredBuffer};
use crate::collision::shapes::{CollisionShapes, RangeUpdate};
use crate::config::{ClothConfig, PhaseConfig};
use crate::error::{ClothError, Result};
use crate::fabric::{Fabric, IndexPair};
use crate::factory::Platform;
use crate::math::{
    decode_coefficient, encode_coefficient, safe_exp2, safe_exp2_vec3, safe_log2_vec3, xyz, Bounds, MovingAverage,
    Pose,
};
use crate::sleep::SleepState;
use crate::virtual_particles::{VirtualParticle, VirtualParticles};

/// Collision triangles the accelerated platform can hold per cloth.
pub const MAX_ACCELERATED_TRIANGLES: usize = 500;

/// One simulated cloth instance bound to a [`Fabric`].
///
/// Particles are `(x, y, z, inverse mass)`; an inverse mass of zero pins a
/// particle. Tunables taking a coefficient in [0, 1] are stored in log
/// space (see [`encode_coefficient`]) so they compose across sub-steps.
///
/// Every setter that changes the simulation wakes the cloth; writing an
/// unchanged value is a no-op.
#[derive(Clone, Debug)]
pub struct Cloth {
    pub(crate) fabric: Arc<Fabric>,
    pub(crate) platform: Platform,
    pub(crate) num_particles: usize,
    /// Current positions followed by previous positions.
    pub(crate) particles: MirroredBuffer<Vec4>,
    pub(crate) phase_configs: Vec<PhaseConfig>,

    pub(crate) current_motion: Pose,
    pub(crate) target_motion: Pose,
    pub(crate) linear_velocity: Vec3,
    pub(crate) angular_velocity: Vec3,
    pub(crate) prev_iter_dt: f32,
    pub(crate) iter_dt_avg: MovingAverage,

    pub(crate) gravity: Vec3,
    pub(crate) log_damping: Vec3,
    pub(crate) linear_log_drag: Vec3,
    pub(crate) angular_log_drag: Vec3,
    pub(crate) linear_inertia: Vec3,
    pub(crate) angular_inertia: Vec3,
    pub(crate) centrifugal_inertia: Vec3,
    pub(crate) solver_frequency: f32,
    pub(crate) stiffness_frequency: f32,

    pub(crate) tether_constraint_scale: f32,
    pub(crate) tether_constraint_log_stiffness: f32,
    pub(crate) motion_constraints: DoubleBuffer<Vec4>,
    pub(crate) separation_constraints: DoubleBuffer<Vec4>,
    pub(crate) motion_constraint_scale: f32,
    pub(crate) motion_constraint_bias: f32,
    pub(crate) motion_constraint_log_stiffness: f32,
    pub(crate) particle_accelerations: Vec<Vec4>,

    pub(crate) shapes: CollisionShapes,
    pub(crate) friction: f32,
    pub(crate) collision_mass_scale: f32,
    pub(crate) continuous_collision: bool,
    pub(crate) virtual_particles: VirtualParticles,

    pub(crate) self_collision_distance: f32,
    pub(crate) self_collision_log_stiffness: f32,
    pub(crate) self_collision_indices: Vec<u32>,
    pub(crate) rest_positions: Vec<Vec4>,

    pub(crate) wind_velocity: Vec3,
    pub(crate) drag_log_coefficient: f32,
    pub(crate) lift_log_coefficient: f32,

    pub(crate) sleep: SleepState,
    pub(crate) particle_bounds: Bounds,
    pub(crate) user_data: u64,
}

fn bounds_of(particles: &[Vec4]) -> Bounds {
    let mut bounds = Bounds::EMPTY;
    for p in particles {
        bounds.include(xyz(*p));
    }
    bounds
}

fn check_length(what: &'static str, expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(ClothError::MismatchedLength {
            what,
            expected,
            actual,
        });
    }
    Ok(())
}

impl Cloth {
    pub(crate) fn new(particles: &[Vec4], fabric: Arc<Fabric>, platform: Platform) -> Result<Self> {
        if particles.is_empty() {
            return Err(ClothError::EmptyParticles);
        }
        check_length("particles", fabric.num_particles() as usize, particles.len())?;
        if fabric.platform() != platform {
            return Err(ClothError::PlatformMismatch);
        }

        let num_particles = particles.len();
        let mut storage = Vec::with_capacity(2 * num_particles);
        storage.extend_from_slice(particles);
        storage.extend_from_slice(particles);

        let config = ClothConfig::default();
        let phase_configs = (0..fabric.num_phases())
            .map(|phase| PhaseConfig::new(phase as u16).transformed())
            .collect();

        Ok(Self {
            fabric,
            platform,
            num_particles,
            particles: MirroredBuffer::new(storage, platform.residency()),
            phase_configs,

            current_motion: Pose::IDENTITY,
            target_motion: Pose::IDENTITY,
            linear_velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            prev_iter_dt: 0.0,
            iter_dt_avg: MovingAverage::new(config.acceleration_filter_width as usize),

            gravity: config.gravity,
            log_damping: safe_log2_vec3(Vec3::ONE - config.damping),
            linear_log_drag: safe_log2_vec3(Vec3::ONE - config.linear_drag),
            angular_log_drag: safe_log2_vec3(Vec3::ONE - config.angular_drag),
            linear_inertia: config.linear_inertia,
            angular_inertia: config.angular_inertia,
            centrifugal_inertia: config.centrifugal_inertia,
            solver_frequency: config.solver_frequency,
            stiffness_frequency: config.stiffness_frequency,

            tether_constraint_scale: config.tether_constraint_scale,
            tether_constraint_log_stiffness: encode_coefficient(config.tether_constraint_stiffness),
            motion_constraints: DoubleBuffer::new(),
            separation_constraints: DoubleBuffer::new(),
            motion_constraint_scale: config.motion_constraint_scale,
            motion_constraint_bias: config.motion_constraint_bias,
            motion_constraint_log_stiffness: encode_coefficient(config.motion_constraint_stiffness),
            particle_accelerations: Vec::new(),

            shapes: CollisionShapes::default(),
            friction: config.friction,
            collision_mass_scale: config.collision_mass_scale,
            continuous_collision: config.continuous_collision,
            virtual_particles: VirtualParticles::default(),

            self_collision_distance: config.self_collision_distance,
            self_collision_log_stiffness: encode_coefficient(config.self_collision_stiffness),
            self_collision_indices: Vec::new(),
            rest_positions: Vec::new(),

            wind_velocity: config.wind_velocity,
            drag_log_coefficient: encode_coefficient(config.drag_coefficient),
            lift_log_coefficient: encode_coefficient(config.lift_coefficient),

            sleep: SleepState {
                threshold: config.sleep_threshold,
                test_interval: config.sleep_test_interval,
                after_count: config.sleep_after_count,
                ..Default::default()
            },
            particle_bounds: bounds_of(particles),
            user_data: 0,
        })
    }

    pub fn fabric(&self) -> &Arc<Fabric> {
        &self.fabric
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    // --- particles ---

    pub fn num_particles(&self) -> usize {
        self.num_particles
    }

    pub fn current_particles(&self) -> &[Vec4] {
        &self.particles.host()[..self.num_particles]
    }

    pub fn previous_particles(&self) -> &[Vec4] {
        &self.particles.host()[self.num_particles..]
    }

    /// Writable current positions; wakes the cloth.
    pub fn current_particles_mut(&mut self) -> &mut [Vec4] {
        self.sleep.wake_up();
        let n = self.num_particles;
        &mut self.particles.host_mut()[..n]
    }

    /// Writable previous positions; wakes the cloth.
    pub fn previous_particles_mut(&mut self) -> &mut [Vec4] {
        self.sleep.wake_up();
        let n = self.num_particles;
        &mut self.particles.host_mut()[n..]
    }

    // --- frame ---

    pub fn set_translation(&mut self, translation: Vec3) {
        if translation == self.target_motion.translation {
            return;
        }
        self.target_motion.translation = translation;
        self.wake_up();
    }

    pub fn translation(&self) -> Vec3 {
        self.target_motion.translation
    }

    pub fn set_rotation(&mut self, rotation: Quat) {
        if (rotation - self.target_motion.rotation).length_squared() == 0.0 {
            return;
        }
        self.target_motion.rotation = rotation;
        self.wake_up();
    }

    pub fn rotation(&self) -> Quat {
        self.target_motion.rotation
    }

    /// Local to world transform the cloth moves to during the next frame.
    pub fn target_pose(&self) -> Pose {
        self.target_motion
    }

    /// Jump to the target pose without transferring the motion to the
    /// particles.
    pub fn clear_inertia(&mut self) {
        self.current_motion = self.target_motion;
        self.linear_velocity = Vec3::ZERO;
        self.angular_velocity = Vec3::ZERO;
        self.wake_up();
    }

    /// Move the frame by `delta` without any inertia.
    pub fn teleport(&mut self, delta: Vec3) {
        self.current_motion.translation += delta;
        self.target_motion.translation += delta;
    }

    pub fn previous_iteration_dt(&self) -> f32 {
        self.prev_iter_dt
    }

    // --- global tunables ---

    pub fn set_gravity(&mut self, gravity: Vec3) {
        if gravity == self.gravity {
            return;
        }
        self.gravity = gravity;
        self.wake_up();
    }

    pub fn gravity(&self) -> Vec3 {
        self.gravity
    }

    pub fn set_damping(&mut self, damping: Vec3) {
        let value = safe_log2_vec3(Vec3::ONE - damping);
        if value == self.log_damping {
            return;
        }
        self.log_damping = value;
        self.wake_up();
    }

    pub fn damping(&self) -> Vec3 {
        Vec3::ONE - safe_exp2_vec3(self.log_damping)
    }

    pub fn set_linear_drag(&mut self, drag: Vec3) {
        let value = safe_log2_vec3(Vec3::ONE - drag);
        if value == self.linear_log_drag {
            return;
        }
        self.linear_log_drag = value;
        self.wake_up();
    }

    pub fn linear_drag(&self) -> Vec3 {
        Vec3::ONE - safe_exp2_vec3(self.linear_log_drag)
    }

    pub fn set_angular_drag(&mut self, drag: Vec3) {
        let value = safe_log2_vec3(Vec3::ONE - drag);
        if value == self.angular_log_drag {
            return;
        }
        self.angular_log_drag = value;
        self.wake_up();
    }

    pub fn angular_drag(&self) -> Vec3 {
        Vec3::ONE - safe_exp2_vec3(self.angular_log_drag)
    }

    pub fn set_linear_inertia(&mut self, inertia: Vec3) {
        if inertia == self.linear_inertia {
            return;
        }
        self.linear_inertia = inertia;
        self.wake_up();
    }

    pub fn linear_inertia(&self) -> Vec3 {
        self.linear_inertia
    }

    pub fn set_angular_inertia(&mut self, inertia: Vec3) {
        if inertia == self.angular_inertia {
            return;
        }
        self.angular_inertia = inertia;
        self.wake_up();
    }

    pub fn angular_inertia(&self) -> Vec3 {
        self.angular_inertia
    }

    pub fn set_centrifugal_inertia(&mut self, inertia: Vec3) {
        if inertia == self.centrifugal_inertia {
            return;
        }
        self.centrifugal_inertia = inertia;
        self.wake_up();
    }

    pub fn centrifugal_inertia(&self) -> Vec3 {
        self.centrifugal_inertia
    }

    pub fn set_solver_frequency(&mut self, frequency: f32) {
        if frequency == self.solver_frequency {
            return;
        }
        self.solver_frequency = frequency;
        self.iter_dt_avg.reset();
        self.wake_up();
    }

    pub fn solver_frequency(&self) -> f32 {
        self.solver_frequency
    }

    pub fn set_stiffness_frequency(&mut self, frequency: f32) {
        if frequency == self.stiffness_frequency {
            return;
        }
        self.stiffness_frequency = frequency;
        self.wake_up();
    }

    pub fn stiffness_frequency(&self) -> f32 {
        self.stiffness_frequency
    }

    /// Number of sub-steps averaged for the gravity time step.
    pub fn set_acceleration_filter_width(&mut self, width: u32) {
        self.iter_dt_avg.resize(width as usize);
    }

    pub fn acceleration_filter_width(&self) -> u32 {
        self.iter_dt_avg.width() as u32
    }

    /// Replace the phase solver settings. Phases without stiffness are
    /// skipped; phases run in the given order.
    pub fn set_phase_configs(&mut self, configs: &[PhaseConfig]) -> Result<()> {
        let num_phases = self.fabric.num_phases();
        if let Some(config) = configs.iter().find(|c| c.phase_index as usize >= num_phases) {
            return Err(ClothError::InvalidPhase {
                phase: config.phase_index as usize,
                num_phases,
                num_sets: self.fabric.num_sets(),
            });
        }

        self.phase_configs = configs
            .iter()
            .filter(|c| c.stiffness > 0.0)
            .map(PhaseConfig::transformed)
            .collect();
        self.wake_up();
        Ok(())
    }

    pub fn num_phase_configs(&self) -> usize {
        self.phase_configs.len()
    }

    // --- collision shapes ---

    fn shapes_updated(&mut self, update: RangeUpdate) {
        if update != RangeUpdate::Unchanged {
            self.wake_up();
        }
    }

    /// Replace spheres `[first, last)` with `spheres` (center, radius).
    pub fn set_spheres(&mut self, spheres: &[Vec4], first: usize, last: usize) -> Result<()> {
        let update = self.shapes.set_spheres(spheres, first, last)?;
        self.shapes_updated(update);
        Ok(())
    }

    pub fn num_spheres(&self) -> usize {
        self.shapes.num_spheres()
    }

    /// Replace capsules `[first, last)`; each capsule joins two spheres.
    pub fn set_capsules(&mut self, capsules: &[IndexPair], first: usize, last: usize) -> Result<()> {
        let update = self.shapes.set_capsules(capsules, first, last)?;
        self.shapes_updated(update);
        Ok(())
    }

    pub fn num_capsules(&self) -> usize {
        self.shapes.num_capsules()
    }

    /// Replace planes `[first, last)` with `planes` (normal, offset).
    pub fn set_planes(&mut self, planes: &[Vec4], first: usize, last: usize) -> Result<()> {
        let update = self.shapes.set_planes(planes, first, last)?;
        self.shapes_updated(update);
        Ok(())
    }

    pub fn num_planes(&self) -> usize {
        self.shapes.num_planes()
    }

    /// Replace convexes `[first, last)`; each convex is a mask over planes.
    pub fn set_convexes(&mut self, convexes: &[u32], first: usize, last: usize) -> Result<()> {
        let update = self.shapes.set_convexes(convexes, first, last)?;
        self.shapes_updated(update);
        Ok(())
    }

    pub fn num_convexes(&self) -> usize {
        self.shapes.num_convexes()
    }

    fn clamp_triangles<'a>(&self, vertices: &'a [Vec3], first: usize) -> &'a [Vec3] {
        if self.platform != Platform::Accelerated {
            return vertices;
        }
        let available = MAX_ACCELERATED_TRIANGLES.saturating_sub(first);
        if vertices.len() / 3 <= available {
            return vertices;
        }
        warn!(
            requested = vertices.len() / 3,
            kept = available,
            "collision triangle count clamped"
        );
        &vertices[..available * 3]
    }

    /// Replace triangles `[first, last)`, three vertices per triangle.
    pub fn set_triangles(&mut self, vertices: &[Vec3], first: usize, last: usize) -> Result<()> {
        let retained = self.shapes.num_triangles().saturating_sub(last.saturating_sub(first));
        let vertices = self.clamp_triangles(vertices, retained);
        let update = self.shapes.set_triangles(vertices, first, last)?;
        self.shapes_updated(update);
        Ok(())
    }

    /// Replace every triangle from `first` on, moving from `start` to
    /// `target` over the next frame.
    pub fn set_triangle_pairs(&mut self, start: &[Vec3], target: &[Vec3], first: usize) -> Result<()> {
        let start = self.clamp_triangles(start, first);
        let target = self.clamp_triangles(target, first);
        let update = self.shapes.set_triangle_pairs(start, target, first)?;
        self.shapes_updated(update);
        Ok(())
    }

    pub fn num_triangles(&self) -> usize {
        self.shapes.num_triangles()
    }

    pub fn set_continuous_collision(&mut self, enable: bool) {
        if enable == self.continuous_collision {
            return;
        }
        self.continuous_collision = enable;
        self.wake_up();
    }

    pub fn is_continuous_collision_enabled(&self) -> bool {
        self.continuous_collision
    }

    pub fn set_collision_mass_scale(&mut self, scale: f32) {
        if scale == self.collision_mass_scale {
            return;
        }
        self.collision_mass_scale = scale;
        self.wake_up();
    }

    pub fn collision_mass_scale(&self) -> f32 {
        self.collision_mass_scale
    }

    pub fn set_friction(&mut self, friction: f32) {
        if friction == self.friction {
            return;
        }
        self.friction = friction;
        self.wake_up();
    }

    pub fn friction(&self) -> f32 {
        self.friction
    }

    /// Replace the virtual particles and their weight table.
    pub fn set_virtual_particles(&mut self, particles: &[VirtualParticle], weights: &[Vec3]) -> Result<()> {
        self.virtual_particles = VirtualParticles::new(particles, weights, self.num_particles as u32)?;
        self.wake_up();
        Ok(())
    }

    pub fn num_virtual_particles(&self) -> usize {
        self.virtual_particles.len()
    }

    pub fn num_virtual_particle_weights(&self) -> usize {
        self.virtual_particles.num_weights()
    }

    // --- constraints ---

    pub fn set_tether_constraint_scale(&mut self, scale: f32) {
        if scale == self.tether_constraint_scale {
            return;
        }
        self.tether_constraint_scale = scale;
        self.wake_up();
    }

    pub fn tether_constraint_scale(&self) -> f32 {
        self.tether_constraint_scale
    }

    pub fn set_tether_constraint_stiffness(&mut self, stiffness: f32) {
        let value = encode_coefficient(stiffness);
        if value == self.tether_constraint_log_stiffness {
            return;
        }
        self.tether_constraint_log_stiffness = value;
        self.wake_up();
    }

    pub fn tether_constraint_stiffness(&self) -> f32 {
        1.0 - safe_exp2(self.tether_constraint_log_stiffness)
    }

    /// Set one motion sphere (center, radius) per particle. The first call
    /// sets the start state, later calls the target of the next frame.
    pub fn set_motion_constraints(&mut self, spheres: &[Vec4]) -> Result<()> {
        check_length("motion constraints", self.num_particles, spheres.len())?;
        self.motion_constraints.push(spheres);
        self.wake_up();
        Ok(())
    }

    pub fn clear_motion_constraints(&mut self) {
        self.motion_constraints.clear();
        self.wake_up();
    }

    pub fn num_motion_constraints(&self) -> usize {
        self.motion_constraints.len()
    }

    pub fn set_motion_constraint_scale_bias(&mut self, scale: f32, bias: f32) {
        if scale == self.motion_constraint_scale && bias == self.motion_constraint_bias {
            return;
        }
        self.motion_constraint_scale = scale;
        self.motion_constraint_bias = bias;
        self.wake_up();
    }

    pub fn motion_constraint_scale(&self) -> f32 {
        self.motion_constraint_scale
    }

    pub fn motion_constraint_bias(&self) -> f32 {
        self.motion_constraint_bias
    }

    pub fn set_motion_constraint_stiffness(&mut self, stiffness: f32) {
        let value = encode_coefficient(stiffness);
        if value == self.motion_constraint_log_stiffness {
            return;
        }
        self.motion_constraint_log_stiffness = value;
        self.wake_up();
    }

    pub fn motion_constraint_stiffness(&self) -> f32 {
        1.0 - safe_exp2(self.motion_constraint_log_stiffness)
    }

    /// Set one separation sphere per particle; particles are kept outside.
    pub fn set_separation_constraints(&mut self, spheres: &[Vec4]) -> Result<()> {
        check_length("separation constraints", self.num_particles, spheres.len())?;
        self.separation_constraints.push(spheres);
        self.wake_up();
        Ok(())
    }

    pub fn clear_separation_constraints(&mut self) {
        self.separation_constraints.clear();
        self.wake_up();
    }

    pub fn num_separation_constraints(&self) -> usize {
        self.separation_constraints.len()
    }

    /// Drop pending targets so shapes and constraints stay at their start
    /// state during the next frame.
    pub fn clear_interpolation(&mut self) {
        self.shapes.clear_interpolation();
        self.motion_constraints.clear_target();
        self.separation_constraints.clear_target();
        self.wake_up();
    }

    /// Per-particle accelerations (xyz) applied every sub-step.
    pub fn set_particle_accelerations(&mut self, accelerations: &[Vec4]) -> Result<()> {
        check_length("particle accelerations", self.num_particles, accelerations.len())?;
        self.particle_accelerations.clear();
        self.particle_accelerations.extend_from_slice(accelerations);
        self.wake_up();
        Ok(())
    }

    pub fn clear_particle_accelerations(&mut self) {
        self.particle_accelerations.clear();
        self.wake_up();
    }

    pub fn num_particle_accelerations(&self) -> usize {
        self.particle_accelerations.len()
    }

    // --- wind ---

    pub fn set_wind_velocity(&mut self, wind: Vec3) {
        if wind == self.wind_velocity {
            return;
        }
        self.wind_velocity = wind;
        self.wake_up();
    }

    pub fn wind_velocity(&self) -> Vec3 {
        self.wind_velocity
    }

    pub fn set_drag_coefficient(&mut self, coefficient: f32) {
        let value = encode_coefficient(coefficient);
        if value == self.drag_log_coefficient {
            return;
        }
        self.drag_log_coefficient = value;
        self.wake_up();
    }

    pub fn drag_coefficient(&self) -> f32 {
        1.0 - safe_exp2(self.drag_log_coefficient)
    }

    pub fn set_lift_coefficient(&mut self, coefficient: f32) {
        let value = encode_coefficient(coefficient);
        if value == self.lift_log_coefficient {
            return;
        }
        self.lift_log_coefficient = value;
        self.wake_up();
    }

    pub fn lift_coefficient(&self) -> f32 {
        1.0 - safe_exp2(self.lift_log_coefficient)
    }

    // --- self collision ---

    pub fn set_self_collision_distance(&mut self, distance: f32) {
        if distance == self.self_collision_distance {
            return;
        }
        self.self_collision_distance = distance;
        self.wake_up();
    }

    pub fn self_collision_distance(&self) -> f32 {
        self.self_collision_distance
    }

    pub fn set_self_collision_stiffness(&mut self, stiffness: f32) {
        let value = encode_coefficient(stiffness);
        if value == self.self_collision_log_stiffness {
            return;
        }
        self.self_collision_log_stiffness = value;
        self.wake_up();
    }

    pub fn self_collision_stiffness(&self) -> f32 {
        1.0 - safe_exp2(self.self_collision_log_stiffness)
    }

    pub(crate) fn is_self_collision_enabled(&self) -> bool {
        self.self_collision_distance.min(-self.self_collision_log_stiffness) > 0.0
    }

    /// Restrict self and inter collision to a particle subset; empty
    /// selects all particles.
    pub fn set_self_collision_indices(&mut self, indices: &[u32]) -> Result<()> {
        let num_particles = self.num_particles as u32;
        if let Some(&index) = indices.iter().find(|&&i| i >= num_particles) {
            return Err(ClothError::IndexOutOfRange { index, num_particles });
        }
        self.self_collision_indices = indices.to_vec();
        self.wake_up();
        Ok(())
    }

    pub fn num_self_collision_indices(&self) -> usize {
        self.self_collision_indices.len()
    }

    /// Rest configuration; particles closer than the self collision
    /// distance at rest never collide. Empty disables the test.
    pub fn set_rest_positions(&mut self, positions: &[Vec4]) -> Result<()> {
        if !positions.is_empty() {
            check_length("rest positions", self.num_particles, positions.len())?;
        }
        self.rest_positions = positions.to_vec();
        self.wake_up();
        Ok(())
    }

    pub fn num_rest_positions(&self) -> usize {
        self.rest_positions.len()
    }

    // --- bounds, sleep, user data ---

    /// Center of the local particle bounds after the last frame.
    pub fn bounding_box_center(&self) -> Vec3 {
        self.particle_bounds.center()
    }

    /// Half extent of the local particle bounds after the last frame.
    pub fn bounding_box_scale(&self) -> Vec3 {
        self.particle_bounds.half_extent()
    }

    pub fn set_sleep_threshold(&mut self, threshold: f32) {
        if threshold == self.sleep.threshold {
            return;
        }
        self.sleep.threshold = threshold;
        self.wake_up();
    }

    pub fn sleep_threshold(&self) -> f32 {
        self.sleep.threshold
    }

    /// Milliseconds of simulated time between sleep tests.
    pub fn set_sleep_test_interval(&mut self, interval: u32) {
        if interval == self.sleep.test_interval {
            return;
        }
        self.sleep.test_interval = interval;
        self.wake_up();
    }

    pub fn sleep_test_interval(&self) -> u32 {
        self.sleep.test_interval
    }

    pub fn set_sleep_after_count(&mut self, count: u32) {
        if count == self.sleep.after_count {
            return;
        }
        self.sleep.after_count = count;
        self.wake_up();
    }

    pub fn sleep_after_count(&self) -> u32 {
        self.sleep.after_count
    }

    pub fn sleep_pass_count(&self) -> u32 {
        self.sleep.pass_counter
    }

    pub fn is_asleep(&self) -> bool {
        self.sleep.is_asleep()
    }

    pub fn put_to_sleep(&mut self) {
        self.sleep.put_to_sleep();
    }

    pub fn wake_up(&mut self) {
        self.sleep.wake_up();
    }

    pub fn set_user_data(&mut self, user_data: u64) {
        self.user_data = user_data;
    }

    pub fn user_data(&self) -> u64 {
        self.user_data
    }

    // --- configuration ---

    /// Route every field of `config` through its setter.
    pub fn apply_config(&mut self, config: &ClothConfig) {
        self.set_gravity(config.gravity);
        self.set_damping(config.damping);
        self.set_linear_drag(config.linear_drag);
        self.set_angular_drag(config.angular_drag);
        self.set_linear_inertia(config.linear_inertia);
        self.set_angular_inertia(config.angular_inertia);
        self.set_centrifugal_inertia(config.centrifugal_inertia);
        self.set_solver_frequency(config.solver_frequency);
        self.set_stiffness_frequency(config.stiffness_frequency);
        self.set_acceleration_filter_width(config.acceleration_filter_width);
        self.set_tether_constraint_scale(config.tether_constraint_scale);
        self.set_tether_constraint_stiffness(config.tether_constraint_stiffness);
        self.set_motion_constraint_scale_bias(config.motion_constraint_scale, config.motion_constraint_bias);
        self.set_motion_constraint_stiffness(config.motion_constraint_stiffness);
        self.set_friction(config.friction);
        self.set_collision_mass_scale(config.collision_mass_scale);
        self.set_continuous_collision(config.continuous_collision);
        self.set_self_collision_distance(config.self_collision_distance);
        self.set_self_collision_stiffness(config.self_collision_stiffness);
        self.set_sleep_threshold(config.sleep_threshold);
        self.set_sleep_test_interval(config.sleep_test_interval);
        self.set_sleep_after_count(config.sleep_after_count);
        self.set_wind_velocity(config.wind_velocity);
        self.set_drag_coefficient(config.drag_coefficient);
        self.set_lift_coefficient(config.lift_coefficient);
    }

    pub fn config(&self) -> ClothConfig {
        ClothConfig {
            gravity: self.gravity(),
            damping: self.damping(),
            linear_drag: self.linear_drag(),
            angular_drag: self.angular_drag(),
            linear_inertia: self.linear_inertia,
            angular_inertia: self.angular_inertia,
            centrifugal_inertia: self.centrifugal_inertia,
            solver_frequency: self.solver_frequency,
            stiffness_frequency: self.stiffness_frequency,
            acceleration_filter_width: self.acceleration_filter_width(),
            tether_constraint_scale: self.tether_constraint_scale,
            tether_constraint_stiffness: self.tether_constraint_stiffness(),
            motion_constraint_scale: self.motion_constraint_scale,
            motion_constraint_bias: self.motion_constraint_bias,
            motion_constraint_stiffness: self.motion_constraint_stiffness(),
            friction: self.friction,
            collision_mass_scale: self.collision_mass_scale,
            continuous_collision: self.continuous_collision,
            self_collision_distance: self.self_collision_distance,
            self_collision_stiffness: self.self_collision_stiffness(),
            sleep_threshold: self.sleep.threshold,
            sleep_test_interval: self.sleep.test_interval,
            sleep_after_count: self.sleep.after_count,
            wind_velocity: self.wind_velocity,
            drag_coefficient: self.drag_coefficient(),
            lift_coefficient: self.lift_coefficient(),
        }
    }

    // --- frame bookkeeping used by the solver ---

    /// Per-iteration coefficient for a log-space tunable.
    pub(crate) fn coefficient(&self, log: f32, iter_dt: f32) -> f32 {
        decode_coefficient(log, self.stiffness_frequency * iter_dt)
    }

    /// Move reached targets to start once a frame is done.
    pub(crate) fn end_frame(&mut self) {
        self.motion_constraints.pop();
        self.separation_constraints.pop();
        self.shapes.pop();
    }

    /// Rebind to an equivalent fabric of another platform.
    pub(crate) fn rebind(&mut self, fabric: Arc<Fabric>) -> Result<()> {
        self.platform = fabric.platform();
        self.particles.migrate(self.platform.residency());
        self.fabric = fabric;
        if self.platform == Platform::Accelerated && self.shapes.num_triangles() > MAX_ACCELERATED_TRIANGLES {
            warn!(
                triangles = self.shapes.num_triangles(),
                "collision triangles beyond the accelerated limit are dropped"
            );
            let count = self.shapes.num_triangles();
            self.shapes.set_triangles(&[], MAX_ACCELERATED_TRIANGLES, count)?;
        }
        Ok(())
    }
}
