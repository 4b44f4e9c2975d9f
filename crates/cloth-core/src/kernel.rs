//! One frame of one cloth.
//!
//! The kernel sub-steps the cloth `round(dt * solver_frequency)` times
//! (at least once). Each iteration runs, in order:
//! 1. Verlet integration with frame inertia, damping and gravity
//! 2. Wind drag and lift
//! 3. Motion constraints
//! 4. Tethers
//! 5. Fabric phases
//! 6. Separation constraints
//! 7. Shape collision
//! 8. Self collision
//! 9. Sleep test

use glam::Vec4;
use tracing::trace;

use crate::cloth::Cloth;
use crate::collision::{self, Collision, CollisionBuffers, CollisionParams};
use crate::constraints::fabric::solve_fabric;
use crate::constraints::motion::{constrain_motion, MotionParams};
use crate::constraints::separation::constrain_separation;
use crate::constraints::tether::constrain_tethers;
use crate::constraints::Interpolated;
use crate::forces::integrate::integrate_particles;
use crate::forces::wind::apply_wind;
use crate::grid::SortedKeys;
use crate::iteration_state::IterationStateFactory;
use crate::math::{xyz, Bounds};
use crate::scratch::ScratchBuffers;
use crate::self_collision::{self, self_collide, SelfCollisionParams};

/// Reusable per-cloth buffers of the kernel.
#[derive(Clone, Debug, Default)]
pub struct KernelScratch {
    pub collision: CollisionBuffers,
    pub self_collision: SortedKeys,
}

/// What one frame of one cloth did.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct KernelReport {
    pub num_iterations: u32,
    pub inv_num_iterations: f32,
    /// Fabric constraints visited over all iterations.
    pub num_constraints: usize,
    /// Self-collision pairs resolved over all iterations.
    pub num_self_collisions: usize,
}

impl ScratchBuffers for KernelScratch {
    type Sizing = Cloth;

    fn estimate(cloth: &Cloth) -> usize {
        estimate_scratch_memory(cloth)
    }

    fn reserve(&mut self, cloth: &Cloth) {
        self.collision.reserve(&cloth.shapes);
        if let Some(num_indices) = self_collision_count(cloth) {
            self.self_collision.reserve(num_indices);
        }
    }
}

/// Particles taking part in self-collision, if it is on.
fn self_collision_count(cloth: &Cloth) -> Option<usize> {
    if !cloth.is_self_collision_enabled() {
        return None;
    }
    Some(if cloth.self_collision_indices.is_empty() {
        cloth.num_particles
    } else {
        cloth.self_collision_indices.len()
    })
}

/// Worst-case temporary bytes one frame of `cloth` needs.
pub fn estimate_scratch_memory(cloth: &Cloth) -> usize {
    const STACK: usize = 32 * 32;

    let shapes = &cloth.shapes;
    let collision_temp = collision::estimate_temporary_memory(shapes);
    let self_collision_temp = self_collision_count(cloth).map_or(0, self_collision::estimate_temporary_memory);

    STACK + collision::estimate_persistent_memory(shapes) + collision_temp.max(self_collision_temp)
}

/// Advance `cloth` by `dt` seconds. Does nothing for a zero `dt`.
pub fn simulate_cloth(cloth: &mut Cloth, dt: f32, scratch: &mut KernelScratch) -> KernelReport {
    if dt == 0.0 {
        return KernelReport::default();
    }

    let factory = IterationStateFactory::new(cloth, dt);
    let mut state = factory.create(cloth);
    let iter_dt = factory.iter_dt;
    let stiffness_exponent = cloth.stiffness_frequency * iter_dt;

    let tether_stiffness = cloth.coefficient(cloth.tether_constraint_log_stiffness, iter_dt);
    let tether_scale = cloth.tether_constraint_scale * cloth.fabric.tether_length_scale();
    let motion = MotionParams {
        scale: cloth.motion_constraint_scale,
        bias: cloth.motion_constraint_bias,
        stiffness: cloth.coefficient(cloth.motion_constraint_log_stiffness, iter_dt),
    };
    let drag = cloth.coefficient(cloth.drag_log_coefficient, iter_dt);
    let lift = cloth.coefficient(cloth.lift_log_coefficient, iter_dt);
    let self_collision_stiffness = cloth.coefficient(cloth.self_collision_log_stiffness, iter_dt);

    let collision_params = CollisionParams {
        friction: cloth.friction,
        mass_scale: cloth.collision_mass_scale,
        continuous: cloth.continuous_collision,
    };

    let mut report = KernelReport {
        num_iterations: factory.num_iterations,
        inv_num_iterations: factory.inv_num_iterations,
        ..Default::default()
    };

    // disjoint field borrows for the iteration loop
    let Cloth {
        fabric,
        num_particles,
        particles,
        phase_configs,
        motion_constraints,
        separation_constraints,
        particle_accelerations,
        shapes,
        virtual_particles,
        self_collision_distance,
        self_collision_indices,
        rest_positions,
        sleep,
        particle_bounds,
        ..
    } = cloth;

    let (current, previous) = particles.device_mut().split_at_mut(*num_particles);
    let mut collision = Collision::new(shapes, collision_params, *particle_bounds, &mut scratch.collision);

    let self_collision = SelfCollisionParams {
        distance: *self_collision_distance,
        stiffness: self_collision_stiffness,
        indices: self_collision_indices.as_slice(),
        rest_positions: rest_positions.as_slice(),
    };

    while state.remaining_iterations > 0 {
        integrate_particles(current, previous, particle_accelerations, &state);
        apply_wind(current, previous, fabric.triangles(), drag, lift, &state);

        if !motion_constraints.is_empty() {
            let spheres = Interpolated::new(motion_constraints, state.current_alpha());
            constrain_motion(current, &spheres, &motion);
        }

        constrain_tethers(current, fabric.tethers(), tether_scale, tether_stiffness);

        report.num_constraints += solve_fabric(current, fabric, phase_configs, stiffness_exponent);

        if !separation_constraints.is_empty() {
            let spheres = Interpolated::new(separation_constraints, state.current_alpha());
            constrain_separation(current, &spheres);
        }

        collision.collide(shapes, current, previous, virtual_particles, &state);

        if self_collision.is_enabled() {
            let bounds = collision.particle_bounds();
            report.num_self_collisions += self_collide(current, &self_collision, &bounds, &mut scratch.self_collision);
        }

        sleep.update(current, previous, iter_dt);
        state.update();
    }

    *particle_bounds = bounds_of(current);

    trace!(
        iterations = report.num_iterations,
        constraints = report.num_constraints,
        self_collisions = report.num_self_collisions,
        "cloth simulated"
    );
    report
}

fn bounds_of(particles: &[Vec4]) -> Bounds {
    let mut bounds = Bounds::EMPTY;
    for p in particles {
        bounds.include(xyz(*p));
    }
    bounds
}
