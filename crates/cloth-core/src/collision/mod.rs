//! Particle collision against rigid shapes.
//!
//! Each iteration runs, in order:
//! 1. convexes (discrete, with friction)
//! 2. triangles (discrete)
//! 3. particle bounds update
//! 4. spheres and capsules, through an 8-cell per-axis broad phase, either
//!    swept (continuous collision) or discrete, then virtual particles.

pub mod cone;
pub mod convex;
pub mod grid;
pub mod narrow;
pub mod shapes;
pub mod triangle;

use glam::{Vec3, Vec4};

use crate::constraints::Interpolated;
use crate::fabric::IndexPair;
use crate::iteration_state::IterationState;
use crate::math::{with_xyz, xyz, Bounds, EPSILON};
use crate::scratch::reserve_len;
use crate::virtual_particles::VirtualParticles;

use cone::{generate_cones, Cone};
use grid::ShapeGrid;
use narrow::{ShapeContext, ShapeFrame};
use shapes::CollisionShapes;
use triangle::{generate_triangles, TriangleData};

/// Sums the push-out vectors of all contacts of one particle.
#[derive(Clone, Copy, Debug)]
pub struct ImpulseAccumulator {
    pub delta: Vec3,
    /// Summed velocity of the touched shapes, for friction.
    pub velocity: Vec3,
    pub count: f32,
}

impl Default for ImpulseAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl ImpulseAccumulator {
    pub fn new() -> Self {
        Self {
            delta: Vec3::ZERO,
            velocity: Vec3::ZERO,
            count: EPSILON,
        }
    }

    #[inline]
    pub fn add(&mut self, v: Vec3, scale: f32) {
        self.delta += v * scale;
        self.count += 1.0;
    }

    #[inline]
    pub fn subtract(&mut self, v: Vec3, scale: f32) {
        self.delta -= v * scale;
        self.count += 1.0;
    }

    #[inline]
    pub fn add_velocity(&mut self, v: Vec3) {
        self.velocity += v;
    }

    pub fn is_hit(&self) -> bool {
        self.count > EPSILON
    }
}

/// Tangential correction of the previous position.
///
/// The relative tangential velocity is reduced in proportion to the
/// contact depth, never past zero. Subtract the result from the previous
/// position.
pub fn friction_impulse(
    accum: &ImpulseAccumulator,
    cur: Vec3,
    prev: Vec3,
    inv_num_collisions: f32,
    coefficient: f32,
) -> Vec3 {
    let delta_sq = accum.delta.length_squared();
    let rcp_delta = 1.0 / (delta_sq + EPSILON).sqrt();
    let normal = accum.delta * rcp_delta;

    let relative_velocity = cur - prev - accum.velocity * inv_num_collisions;
    let tangential = relative_velocity - normal * relative_velocity.dot(normal);
    let rcp_tangential = 1.0 / (tangential.length_squared() + EPSILON).sqrt();

    let j = (-coefficient * delta_sq * rcp_delta * rcp_tangential).max(-1.0);
    tangential * j
}

/// Per-cloth collision parameters.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct CollisionParams {
    pub friction: f32,
    pub mass_scale: f32,
    pub continuous: bool,
}

impl CollisionParams {
    fn needs_previous_shapes(&self) -> bool {
        self.continuous || self.friction > 0.0
    }
}

/// Buffers reused across frames by the collision pass of one cloth.
#[derive(Clone, Debug, Default)]
pub struct CollisionBuffers {
    cur: ShapeFrame,
    prev: ShapeFrame,
    planes: Vec<Vec4>,
    distances: Vec<f32>,
    triangles: Vec<TriangleData>,
}

impl CollisionBuffers {
    /// Allocate room for the shapes of `shapes` in every buffer.
    pub fn reserve(&mut self, shapes: &CollisionShapes) {
        for frame in [&mut self.cur, &mut self.prev] {
            reserve_len(&mut frame.spheres, shapes.num_spheres());
            reserve_len(&mut frame.cones, shapes.num_capsules());
        }
        reserve_len(&mut self.planes, shapes.num_planes());
        reserve_len(&mut self.distances, shapes.num_planes());
        reserve_len(&mut self.triangles, shapes.num_triangles());
    }
}

/// Bytes of temporary shape data for one iteration.
pub fn estimate_temporary_memory(shapes: &CollisionShapes) -> usize {
    let triangles = shapes.num_triangles() * std::mem::size_of::<TriangleData>();
    let planes = shapes.num_planes() * std::mem::size_of::<Vec4>() * 2;
    triangles.max(planes)
}

/// Bytes of sphere and cone data kept for the current and previous
/// iteration.
pub fn estimate_persistent_memory(shapes: &CollisionShapes) -> usize {
    let spheres = shapes.num_spheres() * std::mem::size_of::<Vec4>() * 2;
    let cones = shapes.num_capsules() * std::mem::size_of::<Cone>() * 2;
    spheres + cones
}

/// Collision pass of one cloth over one frame.
pub struct Collision<'a> {
    params: CollisionParams,
    buffers: &'a mut CollisionBuffers,
    has_prev: bool,
    grid: ShapeGrid,
    cur_bounds: Bounds,
    prev_bounds: Bounds,
}

impl<'a> Collision<'a> {
    /// Start a frame; `particle_bounds` are the bounds at the end of the
    /// previous frame.
    pub fn new(
        shapes: &CollisionShapes,
        params: CollisionParams,
        particle_bounds: Bounds,
        buffers: &'a mut CollisionBuffers,
    ) -> Self {
        let has_prev = params.needs_previous_shapes();
        if has_prev {
            // the start state acts as the iteration before the first
            generate_spheres(&mut buffers.cur.spheres, Interpolated::new(&shapes.spheres, 0.0));
            generate_cones(&mut buffers.cur.cones, &buffers.cur.spheres, &shapes.capsules);
        }

        Self {
            params,
            buffers,
            has_prev,
            grid: ShapeGrid::default(),
            cur_bounds: particle_bounds,
            prev_bounds: particle_bounds,
        }
    }

    /// Bounds of the particles as of the last iteration.
    pub fn particle_bounds(&self) -> Bounds {
        self.cur_bounds
    }

    pub fn collide(
        &mut self,
        shapes: &CollisionShapes,
        current: &mut [Vec4],
        previous: &mut [Vec4],
        virtual_particles: &VirtualParticles,
        state: &IterationState,
    ) {
        let alpha = state.current_alpha();

        self.collide_convexes(shapes, current, previous, alpha);
        self.collide_triangles(shapes, current, alpha);

        self.compute_bounds(current, previous);

        if shapes.spheres.is_empty() {
            return;
        }

        if self.has_prev {
            std::mem::swap(&mut self.buffers.cur, &mut self.buffers.prev);
        }
        generate_spheres(&mut self.buffers.cur.spheres, Interpolated::new(&shapes.spheres, alpha));
        // cones are needed by the next iteration even if nothing overlaps now
        generate_cones(&mut self.buffers.cur.cones, &self.buffers.cur.spheres, &shapes.capsules);

        if !self.build_acceleration() {
            return;
        }

        if self.params.continuous {
            self.collide_particles_swept(&shapes.capsules, current, previous);
        }

        self.grid.merge();

        if !self.params.continuous {
            self.collide_particles(&shapes.capsules, current, previous);
        }

        if !virtual_particles.is_empty() {
            self.collide_virtual_particles(&shapes.capsules, current, previous, virtual_particles);
        }
    }

    fn context<'b>(&'b self, capsules: &'b [IndexPair]) -> ShapeContext<'b> {
        ShapeContext {
            cur: &self.buffers.cur,
            prev: if self.has_prev {
                &self.buffers.prev
            } else {
                &self.buffers.cur
            },
            capsules,
            friction: self.params.friction > 0.0,
        }
    }

    /// Track particle bounds and restore inverse masses scaled by the
    /// previous iteration's contacts.
    fn compute_bounds(&mut self, current: &mut [Vec4], previous: &[Vec4]) {
        let mut bounds = Bounds::EMPTY;
        for (cur, prev) in current.iter_mut().zip(previous) {
            bounds.include(xyz(*cur));
            if cur.w > 0.0 {
                cur.w = prev.w;
            }
        }
        self.prev_bounds = self.cur_bounds;
        self.cur_bounds = bounds;
    }

    /// Fit the grid to where particles and spheres overlap.
    fn build_acceleration(&mut self) -> bool {
        let mut shape_bounds = sphere_bounds(&self.buffers.cur.spheres);
        let mut particle_bounds = self.cur_bounds;
        if self.params.continuous {
            shape_bounds = shape_bounds.union(&sphere_bounds(&self.buffers.prev.spheres));
            particle_bounds = particle_bounds.union(&self.prev_bounds);
        }

        if !self.grid.reset(&shape_bounds.intersect(&particle_bounds)) {
            return false;
        }

        if self.params.continuous {
            self.grid.add_spheres(&self.buffers.prev.spheres);
        }
        self.grid.add_spheres(&self.buffers.cur.spheres);
        self.grid.add_cones(&self.buffers.cur.cones);
        true
    }

    fn collide_particles(&self, capsules: &[IndexPair], current: &mut [Vec4], previous: &mut [Vec4]) {
        let ctx = self.context(capsules);
        for (cur, prev) in current.iter_mut().zip(previous.iter_mut()) {
            let p = xyz(*cur);
            let mut accum = ImpulseAccumulator::new();
            let spheres = narrow::collide_cones(p, self.grid.lookup(p), &ctx, &mut accum);
            narrow::collide_spheres(p, spheres, &ctx, &mut accum);

            if accum.is_hit() {
                apply_impulse(&accum, p, cur, prev, &self.params);
            }
        }
    }

    fn collide_particles_swept(
        &self,
        capsules: &[IndexPair],
        current: &mut [Vec4],
        previous: &mut [Vec4],
    ) {
        let ctx = self.context(capsules);
        for (cur, prev) in current.iter_mut().zip(previous.iter_mut()) {
            let prev_pos = xyz(*prev);
            let mut p = xyz(*cur);
            let mut accum = ImpulseAccumulator::new();
            let mask = self.grid.lookup_swept(prev_pos, p);
            let spheres = narrow::collide_cones_swept(prev_pos, &mut p, mask, &ctx, &mut accum);
            narrow::collide_spheres_swept(prev_pos, &mut p, spheres, &ctx, &mut accum);

            // positions moved back by a swept hit are kept only with a contact
            if accum.is_hit() {
                apply_impulse(&accum, p, cur, prev, &self.params);
            }
        }
    }

    fn collide_virtual_particles(
        &self,
        capsules: &[IndexPair],
        current: &mut [Vec4],
        previous: &mut [Vec4],
        virtual_particles: &VirtualParticles,
    ) {
        let ctx = self.context(capsules);
        let weights = virtual_particles.weights();

        for particle in virtual_particles.particles() {
            let p = virtual_particles.interpolate(particle, current);

            let mut accum = ImpulseAccumulator::new();
            let spheres = narrow::collide_cones(p, self.grid.lookup(p), &ctx, &mut accum);
            narrow::collide_spheres(p, spheres, &ctx, &mut accum);
            if !accum.is_hit() {
                continue;
            }

            let inv_num_collisions = 1.0 / accum.count;
            let delta = accum.delta * inv_num_collisions;
            let w = weights[particle.weight as usize];
            let w3 = [w.x, w.y, w.z];

            if self.params.friction > 0.0 {
                let q = virtual_particles.interpolate(particle, previous);
                let impulse = friction_impulse(&accum, p, q, inv_num_collisions, self.params.friction);
                for (&i, &wk) in particle.indices.iter().zip(&w3) {
                    let prev = &mut previous[i as usize];
                    *prev = with_xyz(*prev, xyz(*prev) - impulse * (wk * w.w));
                }
            }

            let weight_scale = if self.params.mass_scale > 0.0 {
                let sqr_delta = accum.delta.length_squared() * inv_num_collisions * inv_num_collisions;
                1.0 / (1.0 + self.params.mass_scale * sqr_delta)
            } else {
                1.0
            };

            for (&i, &wk) in particle.indices.iter().zip(&w3) {
                let cur = &mut current[i as usize];
                let w_scale = 1.0 + (weight_scale - 1.0) * wk;
                *cur = (xyz(*cur) + delta * (wk * w.w)).extend(cur.w * w_scale);
            }
        }
    }

    fn collide_convexes(&mut self, shapes: &CollisionShapes, current: &mut [Vec4], previous: &mut [Vec4], alpha: f32) {
        if shapes.convexes.is_empty() {
            return;
        }

        let planes = Interpolated::new(&shapes.planes, alpha);
        self.buffers.planes.clear();
        self.buffers.planes.extend((0..planes.len()).map(|i| planes.get(i)));
        self.buffers.distances.resize(planes.len(), 0.0);

        let friction = self.params.friction;
        for (cur, prev) in current.iter_mut().zip(previous.iter_mut()) {
            let p = xyz(*cur);
            let mut accum = ImpulseAccumulator::new();
            convex::collide_convexes(
                p,
                &self.buffers.planes,
                &shapes.convexes,
                &mut self.buffers.distances,
                &mut accum,
            );
            if !accum.is_hit() {
                continue;
            }

            let inv_num_collisions = 1.0 / accum.count;
            if friction > 0.0 {
                let impulse = friction_impulse(&accum, p, xyz(*prev), inv_num_collisions, friction);
                *prev = with_xyz(*prev, xyz(*prev) - impulse);
            }
            *cur = with_xyz(*cur, p + accum.delta * inv_num_collisions);
        }
    }

    fn collide_triangles(&mut self, shapes: &CollisionShapes, current: &mut [Vec4], alpha: f32) {
        if shapes.triangles.is_empty() {
            return;
        }

        let vertices = Interpolated::new(&shapes.triangles, alpha);
        generate_triangles(
            &mut self.buffers.triangles,
            (0..vertices.len()).map(|i| vertices.get(i)),
        );

        for cur in current.iter_mut() {
            let p = xyz(*cur);
            let mut accum = ImpulseAccumulator::new();
            triangle::collide_triangles(p, &self.buffers.triangles, &mut accum);
            if accum.is_hit() {
                *cur = with_xyz(*cur, p + accum.delta / accum.count);
            }
        }
    }
}

/// Friction, mass scaling and push-out of one particle; `p` is the
/// particle position after any swept correction.
fn apply_impulse(accum: &ImpulseAccumulator, p: Vec3, cur: &mut Vec4, prev: &mut Vec4, params: &CollisionParams) {
    let inv_num_collisions = 1.0 / accum.count;

    if params.friction > 0.0 {
        let impulse = friction_impulse(accum, p, xyz(*prev), inv_num_collisions, params.friction);
        *prev = with_xyz(*prev, xyz(*prev) - impulse);
    }

    let mut w = cur.w;
    if params.mass_scale > 0.0 {
        let sqr_delta = inv_num_collisions * inv_num_collisions * accum.delta.length_squared();
        w *= 1.0 / (1.0 + params.mass_scale * sqr_delta);
    }

    *cur = (p + accum.delta * inv_num_collisions).extend(w);
}

fn generate_spheres(spheres: &mut Vec<Vec4>, source: Interpolated<'_, Vec4>) {
    spheres.clear();
    spheres.extend((0..source.len()).map(|i| {
        let s = source.get(i);
        xyz(s).extend(s.w.max(0.0))
    }));
}

fn sphere_bounds(spheres: &[Vec4]) -> Bounds {
    let mut bounds = Bounds::EMPTY;
    for s in spheres {
        let r = Vec3::splat(s.w);
        bounds.include(xyz(*s) - r);
        bounds.include(xyz(*s) + r);
    }
    bounds
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use glam::Mat3;

    fn last_iteration() -> IterationState {
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

    fn sphere_shapes() -> CollisionShapes {
        let mut shapes = CollisionShapes::default();
        shapes.set_spheres(&[Vec4::new(0.0, 0.0, 0.0, 1.0)], 0, 0).unwrap();
        shapes
    }

    fn run(shapes: &CollisionShapes, params: CollisionParams, cur: &mut [Vec4], prev: &mut [Vec4]) {
        let mut bounds = Bounds::EMPTY;
        for p in cur.iter().chain(prev.iter()) {
            bounds.include(xyz(*p));
        }
        let mut buffers = CollisionBuffers::default();
        let mut collision = Collision::new(shapes, params, bounds, &mut buffers);
        collision.collide(shapes, cur, prev, &VirtualParticles::default(), &last_iteration());
    }

    #[test]
    fn discrete_sphere_pushes_particle_out() {
        let shapes = sphere_shapes();
        let mut cur = vec![Vec4::new(0.5, 0.0, 0.0, 1.0), Vec4::new(3.0, 0.0, 0.0, 1.0)];
        let mut prev = cur.clone();
        run(&shapes, CollisionParams::default(), &mut cur, &mut prev);
        assert_relative_eq!(cur[0].x, 1.0, epsilon = 1e-5);
        assert_eq!(cur[1], Vec4::new(3.0, 0.0, 0.0, 1.0));
    }

    #[test]
    fn tunneling_needs_continuous_collision() {
        let shapes = sphere_shapes();
        let start = vec![Vec4::new(-2.0, 0.0, 0.0, 1.0)];
        let end = vec![Vec4::new(2.0, 0.0, 0.0, 1.0)];

        let mut cur = end.clone();
        let mut prev = start.clone();
        run(&shapes, CollisionParams::default(), &mut cur, &mut prev);
        assert_eq!(cur, end);

        let mut cur = end.clone();
        let mut prev = start.clone();
        let params = CollisionParams {
            continuous: true,
            ..Default::default()
        };
        run(&shapes, params, &mut cur, &mut prev);
        assert!(cur[0].x <= -0.99, "particle should stop at the entry point, x = {}", cur[0].x);
    }

    #[test]
    fn mass_scale_lowers_inverse_mass_on_contact() {
        let shapes = sphere_shapes();
        let mut cur = vec![Vec4::new(0.5, 0.0, 0.0, 1.0)];
        let mut prev = cur.clone();
        let params = CollisionParams {
            mass_scale: 10.0,
            ..Default::default()
        };
        run(&shapes, params, &mut cur, &mut prev);
        assert!(cur[0].w < 1.0, "w = {}", cur[0].w);
    }

    #[test]
    fn friction_opposes_tangential_motion() {
        let mut accum = ImpulseAccumulator::new();
        accum.subtract(Vec3::Y, -0.1);
        let cur = Vec3::new(0.1, 0.0, 0.0);
        let impulse = friction_impulse(&accum, cur, Vec3::ZERO, 1.0, 0.5);
        // previous position moves towards current, reducing velocity
        let prev = Vec3::ZERO - impulse;
        assert!(prev.x > 0.0 && prev.x <= 0.1, "prev = {prev}");
        assert_relative_eq!(prev.y, 0.0);
    }

    #[test]
    fn memory_estimates_scale_with_shapes() {
        let shapes = sphere_shapes();
        assert_eq!(estimate_persistent_memory(&shapes), 32);
        assert_eq!(estimate_temporary_memory(&shapes), 0);
    }
}
