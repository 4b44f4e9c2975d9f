//! Collision between particles of different cloth instances.
//!
//! Runs once per frame after every cloth has been simulated. Each iteration:
//! 1. Sweep the world bounds of all cloths along the longest axis and keep
//!    the pairs accepted by the filter.
//! 2. Move particles inside an overlap region to world space and turn their
//!    previous position into a scaled impulse.
//! 3. Sort the gathered particles into a grid and push apart close pairs
//!    from overlapping cloths.
//! 4. Move the particles back and rebuild the previous positions.

use glam::{Mat3, Vec3, Vec4};

use crate::config::InterCollisionConfig;
use crate::grid::{ParticleGrid, SortedKeys};
use crate::math::{longest_axis, xyz, Bounds, Pose, EPSILON};
use crate::scratch::{reserve_len, ScratchBuffers};

/// Decides whether two cloths, identified by user data, may collide.
pub type InterCollisionFilter = dyn Fn(u64, u64) -> bool + Send + Sync;

/// One cloth taking part in inter-collision.
pub struct InterCollisionInstance<'a> {
    pub current: &'a mut [Vec4],
    pub previous: &'a mut [Vec4],
    /// Particles taking part; empty means all of them.
    pub indices: &'a [u32],
    /// Local to world transform.
    pub pose: Pose,
    /// Local particle bounds.
    pub bounds: Bounds,
    /// `elasticity / iterations` of the cloth's last frame.
    pub impulse_scale: f32,
    pub user_data: u64,
}

impl InterCollisionInstance<'_> {
    fn num_particles(&self) -> usize {
        if self.indices.is_empty() {
            self.current.len()
        } else {
            self.indices.len()
        }
    }

    fn particle_index(&self, k: usize) -> usize {
        if self.indices.is_empty() {
            k
        } else {
            self.indices[k] as usize
        }
    }

    fn expanded_bounds(&self, distance: f32) -> Bounds {
        Bounds::from_center_extent(self.bounds.center(), self.bounds.half_extent() + Vec3::splat(distance))
    }
}

#[derive(Clone, Copy, Debug)]
struct Candidate {
    cloth: u32,
    particle: u32,
}

/// Buffers reused across frames by the inter-collision pass.
#[derive(Clone, Debug, Default)]
pub struct InterCollisionBuffers {
    world_bounds: Vec<Bounds>,
    sweep_order: Vec<usize>,
    overlap_bounds: Vec<Bounds>,
    /// Row-major `num_cloths * num_cloths`; `[a][b]` lets `a` push `b`.
    overlaps: Vec<bool>,
    candidates: Vec<Candidate>,
    keys: SortedKeys,
}

/// Size of one inter-collision pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InterCollisionSizing {
    pub num_cloths: usize,
    /// Particles over all cloths.
    pub num_particles: usize,
}

impl ScratchBuffers for InterCollisionBuffers {
    type Sizing = InterCollisionSizing;

    fn estimate(sizing: &InterCollisionSizing) -> usize {
        estimate_temporary_memory(sizing.num_cloths, sizing.num_particles)
    }

    fn reserve(&mut self, sizing: &InterCollisionSizing) {
        let n = sizing.num_cloths;
        reserve_len(&mut self.world_bounds, n);
        reserve_len(&mut self.sweep_order, n);
        reserve_len(&mut self.overlap_bounds, n);
        reserve_len(&mut self.overlaps, n * n);
        reserve_len(&mut self.candidates, sizing.num_particles);
        self.keys.reserve(sizing.num_particles);
    }
}

/// Bytes of temporary storage one inter-collision pass needs.
pub fn estimate_temporary_memory(num_cloths: usize, num_particles: usize) -> usize {
    let bounds = 2 * num_cloths * std::mem::size_of::<Bounds>() + num_cloths * std::mem::size_of::<usize>();
    let candidates = num_particles * std::mem::size_of::<Candidate>();
    let overlaps = num_cloths * num_cloths;

    let keys = num_particles * std::mem::size_of::<u32>();
    let histograms = 1024 * std::mem::size_of::<u32>();
    bounds + candidates + overlaps + 2 * keys + (keys + histograms).max(keys)
}

/// Resolve proximity between particles of different cloths.
///
/// Returns the number of pairs pushed apart over all iterations.
pub fn inter_collide(
    instances: &mut [InterCollisionInstance],
    config: &InterCollisionConfig,
    filter: &InterCollisionFilter,
    buffers: &mut InterCollisionBuffers,
) -> usize {
    if config.iterations == 0 || config.distance <= 0.0 || instances.len() < 2 {
        return 0;
    }

    let mut num_collisions = 0;
    for _ in 0..config.iterations {
        let bounds = gather_candidates(instances, config.distance, filter, buffers);
        if buffers.candidates.is_empty() {
            continue;
        }
        num_collisions += collide_candidates(instances, config, &bounds, buffers);
        scatter_candidates(instances, &buffers.candidates);
    }
    num_collisions
}

/// Broad phase. Fills the overlap matrix and the candidate list, moving
/// candidates to world space. Returns the world bounds of the candidates.
fn gather_candidates(
    instances: &mut [InterCollisionInstance],
    distance: f32,
    filter: &InterCollisionFilter,
    buffers: &mut InterCollisionBuffers,
) -> Bounds {
    let n = instances.len();

    buffers.world_bounds.clear();
    let mut total = Bounds::EMPTY;
    for instance in instances.iter() {
        let world = instance
            .expanded_bounds(distance)
            .transformed(Mat3::from_quat(instance.pose.rotation), instance.pose.translation);
        total = total.union(&world);
        buffers.world_bounds.push(world);
    }

    let axis = longest_axis(total.upper - total.lower);
    let world_bounds = &buffers.world_bounds;
    buffers.sweep_order.clear();
    buffers.sweep_order.extend(0..n);
    buffers
        .sweep_order
        .sort_by(|&i, &j| world_bounds[i].lower[axis].total_cmp(&world_bounds[j].lower[axis]));

    buffers.overlaps.clear();
    buffers.overlaps.resize(n * n, false);
    buffers.candidates.clear();

    let mut candidate_bounds = Bounds::EMPTY;

    for i in 0..n {
        let a = buffers.sweep_order[i];
        let axis_min = world_bounds[a].lower[axis];
        let axis_max = world_bounds[a].upper[axis];

        let local_bounds = instances[a].expanded_bounds(distance);
        let to_local = instances[a].pose.inverse();

        buffers.overlap_bounds.clear();
        for j in 0..n {
            let b = buffers.sweep_order[j];
            if world_bounds[b].lower[axis] > axis_max {
                break;
            }
            // earlier boxes are not sorted by their upper end
            if i == j || world_bounds[b].upper[axis] < axis_min {
                continue;
            }
            if !filter(instances[a].user_data, instances[b].user_data) {
                continue;
            }

            buffers.overlaps[a * n + b] = true;

            let b_to_a = to_local.compose(&instances[b].pose);
            let b_bounds = instances[b]
                .expanded_bounds(distance)
                .transformed(Mat3::from_quat(b_to_a.rotation), b_to_a.translation);
            let overlap = local_bounds.intersect(&b_bounds);
            if !overlap.is_empty() {
                buffers.overlap_bounds.push(overlap);
            }
        }

        if buffers.overlap_bounds.is_empty() || instances[a].impulse_scale <= 0.0 {
            continue;
        }

        let instance = &mut instances[a];
        let pose = instance.pose;
        let inv_impulse_scale = 1.0 / instance.impulse_scale;

        for k in 0..instance.num_particles() {
            let index = instance.particle_index(k);
            let p = instance.current[index];
            let local = xyz(p);
            if !buffers.overlap_bounds.iter().any(|b| b.contains(local)) {
                continue;
            }

            let world = pose.transform_point(local);
            let q = instance.previous[index];
            let impulse = (p - q) * inv_impulse_scale;

            instance.current[index] = world.extend(p.w);
            instance.previous[index] = pose.rotate(xyz(impulse)).extend(impulse.w);
            candidate_bounds.include(world);

            buffers.candidates.push(Candidate {
                cloth: a as u32,
                particle: index as u32,
            });
        }
    }

    candidate_bounds
}

/// Narrow phase over the world-space candidates.
fn collide_candidates(
    instances: &mut [InterCollisionInstance],
    config: &InterCollisionConfig,
    bounds: &Bounds,
    buffers: &mut InterCollisionBuffers,
) -> usize {
    let n = instances.len();
    let grid = ParticleGrid::new(bounds, config.distance);
    let candidates = &buffers.candidates;
    let overlaps = &buffers.overlaps;

    buffers.keys.sort(
        candidates
            .iter()
            .map(|c| grid.key(xyz(instances[c.cloth as usize].current[c.particle as usize]))),
    );

    let sqr_distance = config.distance * config.distance;
    let mut num_collisions = 0;

    buffers.keys.for_each_pair(grid.search_cells(), |a, b| {
        let (ca, cb) = (candidates[a], candidates[b]);
        let (ia, ib) = (ca.cloth as usize, cb.cloth as usize);
        if !overlaps[ia * n + ib] {
            return;
        }
        let (pa, pb) = (ca.particle as usize, cb.particle as usize);

        let p0 = instances[ia].current[pa];
        let p1 = instances[ib].current[pb];
        let diff = xyz(p1) - xyz(p0);
        let sqr_length = diff.length_squared();
        // coincident particles have no separating direction
        if sqr_length > sqr_distance || sqr_length <= EPSILON {
            return;
        }

        let ratio = config.distance / sqr_length.sqrt();
        let scale = config.stiffness / (EPSILON + p0.w + p1.w);
        let delta = (diff - diff * ratio) * scale;

        instances[ia].current[pa] = (xyz(p0) + delta * p0.w).extend(p0.w);
        instances[ib].current[pb] = (xyz(p1) - delta * p1.w).extend(p1.w);

        // impulses live in the previous positions until scattered back
        let i0 = instances[ia].previous[pa];
        let i1 = instances[ib].previous[pb];
        instances[ia].previous[pa] = (xyz(i0) + delta * p0.w).extend(i0.w);
        instances[ib].previous[pb] = (xyz(i1) - delta * p1.w).extend(i1.w);

        num_collisions += 1;
    });

    num_collisions
}

/// Move candidates back to local space and rebuild previous positions
/// from their impulses.
fn scatter_candidates(instances: &mut [InterCollisionInstance], candidates: &[Candidate]) {
    let mut last_cloth = usize::MAX;
    let mut to_local = Pose::IDENTITY;
    let mut impulse_scale = 0.0;

    for candidate in candidates {
        let cloth = candidate.cloth as usize;
        let instance = &mut instances[cloth];
        if cloth != last_cloth {
            to_local = instance.pose.inverse();
            impulse_scale = instance.impulse_scale;
            last_cloth = cloth;
        }

        let index = candidate.particle as usize;
        let p = instance.current[index];
        let impulse = instance.previous[index] * impulse_scale;

        let local = to_local.transform_point(xyz(p));
        instance.current[index] = local.extend(p.w);
        // inverse mass must not turn negative through round-off
        instance.previous[index] = (local - to_local.rotate(xyz(impulse))).extend((p.w - impulse.w).max(0.0));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use glam::Quat;

    fn bounds_of(particles: &[Vec4]) -> Bounds {
        let mut bounds = Bounds::EMPTY;
        for p in particles {
            bounds.include(xyz(*p));
        }
        bounds
    }

    fn instance<'a>(current: &'a mut [Vec4], previous: &'a mut [Vec4], pose: Pose, user_data: u64) -> InterCollisionInstance<'a> {
        let bounds = bounds_of(current);
        InterCollisionInstance {
            current,
            previous,
            indices: &[],
            pose,
            bounds,
            impulse_scale: 1.0,
            user_data,
        }
    }

    fn config(distance: f32) -> InterCollisionConfig {
        InterCollisionConfig {
            distance,
            stiffness: 1.0,
            iterations: 1,
            elasticity: 1.0,
        }
    }

    fn always(_: u64, _: u64) -> bool {
        true
    }

    #[test]
    fn overlapping_particles_are_separated() {
        let mut cur_a = vec![Vec4::new(0.0, 0.0, 0.0, 1.0)];
        let mut prev_a = cur_a.clone();
        let mut cur_b = vec![Vec4::new(0.05, 0.0, 0.0, 1.0)];
        let mut prev_b = cur_b.clone();

        let mut instances = [
            instance(&mut cur_a, &mut prev_a, Pose::IDENTITY, 0),
            instance(&mut cur_b, &mut prev_b, Pose::IDENTITY, 1),
        ];
        let hits = inter_collide(&mut instances, &config(0.1), &always, &mut InterCollisionBuffers::default());
        assert_eq!(hits, 1);
        drop(instances);

        assert_relative_eq!(cur_b[0].x - cur_a[0].x, 0.1, epsilon = 1e-4);
        // equal masses: the pair's center stays put
        assert_relative_eq!(cur_a[0].x + cur_b[0].x, 0.05, epsilon = 1e-5);
        // unit impulse scale turns the whole correction into velocity
        assert_relative_eq!(prev_a[0].x, 0.0, epsilon = 1e-5);
        assert_relative_eq!(prev_a[0].w, 1.0);
    }

    #[test]
    fn filter_rejects_pairs() {
        let mut cur_a = vec![Vec4::new(0.0, 0.0, 0.0, 1.0)];
        let mut prev_a = cur_a.clone();
        let mut cur_b = vec![Vec4::new(0.05, 0.0, 0.0, 1.0)];
        let mut prev_b = cur_b.clone();

        let mut instances = [
            instance(&mut cur_a, &mut prev_a, Pose::IDENTITY, 0),
            instance(&mut cur_b, &mut prev_b, Pose::IDENTITY, 1),
        ];
        let never = |_: u64, _: u64| false;
        let hits = inter_collide(&mut instances, &config(0.1), &never, &mut InterCollisionBuffers::default());
        assert_eq!(hits, 0);
        drop(instances);
        assert_eq!(cur_a[0], Vec4::new(0.0, 0.0, 0.0, 1.0));
        assert_eq!(cur_b[0], Vec4::new(0.05, 0.0, 0.0, 1.0));
    }

    #[test]
    fn collision_happens_in_world_space() {
        // both particles sit at the local origin, but the second cloth is
        // translated 0.05 along x and rotated about y
        let mut cur_a = vec![Vec4::new(0.0, 0.0, 0.0, 1.0)];
        let mut prev_a = cur_a.clone();
        let mut cur_b = vec![Vec4::new(0.0, 0.0, 0.0, 1.0)];
        let mut prev_b = cur_b.clone();

        let pose_b = Pose::new(Vec3::new(0.05, 0.0, 0.0), Quat::from_rotation_y(std::f32::consts::FRAC_PI_2));
        let mut instances = [
            instance(&mut cur_a, &mut prev_a, Pose::IDENTITY, 0),
            instance(&mut cur_b, &mut prev_b, pose_b, 1),
        ];
        let hits = inter_collide(&mut instances, &config(0.1), &always, &mut InterCollisionBuffers::default());
        assert_eq!(hits, 1);
        drop(instances);

        let world_b = pose_b.transform_point(xyz(cur_b[0]));
        assert_relative_eq!(world_b.x - cur_a[0].x, 0.1, epsilon = 1e-4);
        assert_relative_eq!(world_b.y, 0.0, epsilon = 1e-5);
    }

    #[test]
    fn impulse_scale_weights_velocity_change() {
        let mut cur_a = vec![Vec4::new(0.0, 0.0, 0.0, 1.0)];
        let mut prev_a = cur_a.clone();
        let mut cur_b = vec![Vec4::new(0.05, 0.0, 0.0, 1.0)];
        let mut prev_b = cur_b.clone();

        let mut a = instance(&mut cur_a, &mut prev_a, Pose::IDENTITY, 0);
        a.impulse_scale = 0.5;
        let mut instances = [a, instance(&mut cur_b, &mut prev_b, Pose::IDENTITY, 1)];
        inter_collide(&mut instances, &config(0.1), &always, &mut InterCollisionBuffers::default());
        drop(instances);

        // positions move by the full correction, velocities by the scaled one
        let moved_a = cur_a[0].x;
        let velocity_a = cur_a[0].x - prev_a[0].x;
        assert_relative_eq!(moved_a, -0.025, epsilon = 1e-5);
        assert_relative_eq!(velocity_a, 0.5 * moved_a, epsilon = 1e-5);
        let velocity_b = cur_b[0].x - prev_b[0].x;
        assert_relative_eq!(velocity_b, 0.025, epsilon = 1e-5);
    }

    #[test]
    fn coincident_cloths_stay_finite() {
        let mut cur_a = vec![Vec4::new(0.0, 0.0, 0.0, 1.0)];
        let mut prev_a = cur_a.clone();
        let mut cur_b = vec![Vec4::new(0.0, 0.0, 0.0, 1.0)];
        let mut prev_b = cur_b.clone();

        let mut instances = [
            instance(&mut cur_a, &mut prev_a, Pose::IDENTITY, 0),
            instance(&mut cur_b, &mut prev_b, Pose::IDENTITY, 1),
        ];
        let hits = inter_collide(&mut instances, &config(0.1), &always, &mut InterCollisionBuffers::default());
        assert_eq!(hits, 0);
        drop(instances);

        for p in [cur_a[0], prev_a[0], cur_b[0], prev_b[0]] {
            assert!(p.is_finite(), "{p}");
        }
    }

    #[test]
    fn long_cloth_reaches_past_shorter_neighbor() {
        // the first cloth spans both others; the second ends before the third
        let mut cur_a = vec![
            Vec4::new(0.0, 0.0, 0.0, 1.0),
            Vec4::new(5.0, 0.0, 0.0, 1.0),
            Vec4::new(10.0, 0.0, 0.0, 1.0),
        ];
        let mut prev_a = cur_a.clone();
        let mut cur_b = vec![Vec4::new(1.0, 0.0, 0.0, 1.0), Vec4::new(2.0, 0.0, 0.0, 1.0)];
        let mut prev_b = cur_b.clone();
        let mut cur_c = vec![Vec4::new(5.05, 0.0, 0.0, 1.0)];
        let mut prev_c = cur_c.clone();

        let mut instances = [
            instance(&mut cur_a, &mut prev_a, Pose::IDENTITY, 0),
            instance(&mut cur_b, &mut prev_b, Pose::IDENTITY, 1),
            instance(&mut cur_c, &mut prev_c, Pose::IDENTITY, 2),
        ];
        let hits = inter_collide(&mut instances, &config(0.1), &always, &mut InterCollisionBuffers::default());
        assert_eq!(hits, 1);
        drop(instances);

        assert_relative_eq!(cur_c[0].x - cur_a[1].x, 0.1, epsilon = 1e-4);
        assert_eq!(cur_b[0], Vec4::new(1.0, 0.0, 0.0, 1.0));
    }

    #[test]
    fn single_cloth_is_skipped() {
        let mut cur = vec![Vec4::new(0.0, 0.0, 0.0, 1.0), Vec4::new(0.01, 0.0, 0.0, 1.0)];
        let mut prev = cur.clone();
        let mut instances = [instance(&mut cur, &mut prev, Pose::IDENTITY, 0)];
        let hits = inter_collide(&mut instances, &config(0.1), &always, &mut InterCollisionBuffers::default());
        assert_eq!(hits, 0);
    }
}
