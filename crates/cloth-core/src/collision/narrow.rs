//! Sphere and cone contact for single points, discrete and swept.

use glam::{Vec3, Vec4};

use super::cone::Cone;
use super::grid::ShapeMask;
use super::ImpulseAccumulator;
use crate::fabric::IndexPair;
use crate::math::{xyz, EPSILON};

/// Trajectories that only graze the outer 20% of a shape are left to the
/// discrete test.
const SKELETON_WIDTH: f32 = (1.0 - 0.2) * (1.0 - 0.2) - 1.0;

/// Sphere and cone data of one iteration.
#[derive(Clone, Debug, Default)]
pub struct ShapeFrame {
    pub spheres: Vec<Vec4>,
    pub cones: Vec<Cone>,
}

/// Shapes of the current and previous iteration.
pub struct ShapeContext<'a> {
    pub cur: &'a ShapeFrame,
    /// Equal to `cur` when neither friction nor continuous collision is on.
    pub prev: &'a ShapeFrame,
    pub capsules: &'a [IndexPair],
    pub friction: bool,
}

impl ShapeContext<'_> {
    fn sphere_velocity(&self, index: usize) -> Vec3 {
        xyz(self.cur.spheres[index] - self.prev.spheres[index])
    }
}

/// Iterate the set bits of `mask` from lowest to highest.
#[inline]
pub(super) fn bits(mut mask: u32) -> impl Iterator<Item = usize> {
    std::iter::from_fn(move || {
        if mask == 0 {
            return None;
        }
        let index = mask.trailing_zeros() as usize;
        mask &= mask - 1;
        Some(index)
    })
}

/// Push `p` out of the cones in `mask`.
///
/// Returns the candidate spheres left to test: a cone contact on the
/// cylindrical section covers its end spheres, a miss of the infinite
/// cone rules out both.
pub fn collide_cones(p: Vec3, mask: ShapeMask, ctx: &ShapeContext<'_>, accum: &mut ImpulseAccumulator) -> u32 {
    let mut spheres = mask.spheres;

    for index in bits(mask.cones) {
        let cone = &ctx.cur.cones[index];

        let delta = p - cone.center;
        let dot = delta.dot(cone.axis);
        let radius = (dot * cone.slope + cone.radius).max(0.0);
        let sqr_distance = delta.length_squared() - dot * dot;

        if !(radius * radius > sqr_distance) {
            spheres &= !cone.both_mask;
            continue;
        }

        let sqr_distance = sqr_distance.max(EPSILON);
        let inv_distance = 1.0 / sqr_distance.sqrt();
        let base = dot + cone.slope * sqr_distance * inv_distance;

        let left = base < -cone.half_length;
        let right = base > cone.half_length;

        // the end sphere on the particle's side still needs testing
        if !left {
            spheres &= !cone.first_mask;
        }
        if !right {
            spheres &= !cone.second_mask();
        }
        if left || right {
            continue;
        }

        let offset = delta - cone.axis * base;
        let scale = radius * inv_distance * cone.sqr_cosine - cone.sqr_cosine;
        accum.add(offset, scale);

        if ctx.friction {
            let capsule = ctx.capsules[index];
            let v0 = ctx.sphere_velocity(capsule.first as usize);
            let v1 = ctx.sphere_velocity(capsule.second as usize);
            let t = dot * 0.5 + 0.5;
            accum.add_velocity(v0 + (v1 - v0) * t);
        }
    }

    spheres
}

/// Push `p` out of the spheres in `mask`.
pub fn collide_spheres(p: Vec3, mask: u32, ctx: &ShapeContext<'_>, accum: &mut ImpulseAccumulator) {
    for index in bits(mask) {
        let sphere = ctx.cur.spheres[index];
        let delta = p - xyz(sphere);

        let neg_scale = 1.0 - sphere.w / (EPSILON + delta.length_squared()).sqrt();
        if neg_scale >= 0.0 {
            continue;
        }
        accum.subtract(delta, neg_scale);

        if ctx.friction {
            accum.add_velocity(ctx.sphere_velocity(index));
        }
    }
}

/// Roots of the swept point against a moving round shape.
///
/// `prev`/`cur` are the particle offsets from the shape in the metric of
/// the shape (full vector for spheres, distance to the axis for cones),
/// `prev_radius`/`cur_radius` the shape radius at the particle.
struct SweptHit {
    toi: f32,
    sqrt_d: f32,
    minus_a: f32,
    hit: bool,
}

fn sweep(dot_prev_prev: f32, dot_prev_cur: f32, dot_cur_cur: f32, prev_radius: f32, cur_radius: f32) -> SweptHit {
    let discriminant = dot_prev_cur * dot_prev_cur - dot_cur_cur * dot_prev_prev;
    let sqrt_d = discriminant.sqrt();
    let half_b = dot_prev_cur - dot_prev_prev;
    let minus_a = dot_prev_cur - dot_cur_cur + half_b;

    // time of impact, 0 if the particle started inside
    let toi = (half_b + sqrt_d).min(0.0) / minus_a;
    let mut hit = toi < 1.0 && half_b < sqrt_d;

    // skip trajectories that only touch the outer skin
    let r_min = prev_radius + half_b * minus_a * (cur_radius - prev_radius);
    hit &= discriminant > minus_a * r_min * r_min * SKELETON_WIDTH;

    // a is negative when one shape contains the other; discrete handles it
    hit &= minus_a < -EPSILON;

    SweptHit {
        toi,
        sqrt_d,
        minus_a,
        hit,
    }
}

impl SweptHit {
    /// Fraction of the remaining path to undo, reduced when the clamped
    /// trajectory stays within the shape skin.
    fn push_back(&self, one_minus_toi: f32) -> f32 {
        let minus_k = if one_minus_toi > EPSILON {
            self.sqrt_d / (self.minus_a * one_minus_toi)
        } else {
            0.0
        };
        one_minus_toi / (1.0 - minus_k)
    }
}

/// Swept cone test of the path `prev_pos -> cur_pos`.
///
/// Moves `cur_pos` back to the time of impact on a tunneling hit and
/// returns the candidate spheres left to test.
pub fn collide_cones_swept(
    prev_pos: Vec3,
    cur_pos: &mut Vec3,
    mask: ShapeMask,
    ctx: &ShapeContext<'_>,
    accum: &mut ImpulseAccumulator,
) -> u32 {
    let mut spheres = mask.spheres;

    for index in bits(mask.cones) {
        let prev_cone = &ctx.prev.cones[index];
        let cone = &ctx.cur.cones[index];

        let prev = prev_pos - prev_cone.center;
        let prev_tuv = prev.cross(prev_cone.axis);
        let prev_dot = prev.dot(prev_cone.axis);
        let prev_radius = (prev_dot * prev_cone.slope + prev_cone.radius).max(0.0);

        let mut cur = *cur_pos - cone.center;
        let cur_tuv = cur.cross(cone.axis);
        let mut cur_dot = cur.dot(cone.axis);
        let mut cur_radius = (cur_dot * cone.slope + cone.radius).max(0.0);
        let mut cur_sqr_distance = EPSILON + cur_tuv.length_squared();

        let swept = sweep(
            prev_tuv.length_squared() - prev_radius * prev_radius,
            prev_tuv.dot(cur_tuv) - prev_radius * cur_radius,
            cur_sqr_distance - cur_radius * cur_radius,
            prev_radius,
            cur_radius,
        );

        if swept.hit {
            let mut delta = prev - cur;

            // position and axis at the time of impact
            let pos = prev - delta * swept.toi;
            let cur_scaled_axis = cone.axis * cone.half_length;
            let delta_scaled_axis = cur_scaled_axis - prev_cone.axis * prev_cone.half_length;
            let one_minus_toi = 1.0 - swept.toi;

            let axis = cur_scaled_axis - delta_scaled_axis * one_minus_toi;
            let slope = prev_cone.slope * one_minus_toi + cone.slope * swept.toi;

            let inv_half_length = 1.0 / axis.length();
            let dot = pos.dot(axis) * inv_half_length;
            let sqr_distance = pos.length_squared() - dot * dot;
            let inv_distance = if sqr_distance > 0.0 {
                1.0 / sqr_distance.sqrt()
            } else {
                0.0
            };

            let base = dot + slope * sqr_distance * inv_distance;
            let scale = base * inv_half_length;

            // impact on the cone section
            if scale.abs() < 1.0 {
                delta += delta_scaled_axis * scale;
                cur += delta * swept.push_back(one_minus_toi);

                cur_dot = cur.dot(cone.axis);
                cur_radius = (cur_dot * cone.slope + cone.radius).max(0.0);
                cur_sqr_distance = cur.length_squared() - cur_dot * cur_dot;
                *cur_pos = cone.center + cur;
            }
        }

        let contact = cur_radius * cur_radius > cur_sqr_distance;

        // neither swept nor resting contact rules out both end spheres
        if !swept.hit && !contact {
            spheres &= !cone.both_mask;
        }
        if !contact {
            continue;
        }

        let inv_distance = if cur_sqr_distance > 0.0 {
            1.0 / cur_sqr_distance.sqrt()
        } else {
            0.0
        };
        let base = cur_dot + cone.slope * cur_sqr_distance * inv_distance;

        let left = base < -cone.half_length;
        let right = base > cone.half_length;

        // end spheres may only be skipped after a swept cone hit
        if swept.hit {
            let mut cull = 0;
            if !left {
                cull |= cone.first_mask;
            }
            if !right {
                cull |= cone.second_mask();
            }
            spheres &= !cull;
        }

        if left || right {
            continue;
        }

        let offset = cur - cone.axis * base;
        let scale = cur_radius * inv_distance * cone.sqr_cosine - cone.sqr_cosine;
        accum.add(offset, scale);

        if ctx.friction {
            let capsule = ctx.capsules[index];
            let v0 = ctx.sphere_velocity(capsule.first as usize);
            let v1 = ctx.sphere_velocity(capsule.second as usize);
            let t = cur_dot * 0.5 + 0.5;
            accum.add_velocity(v0 + (v1 - v0) * t);
        }
    }

    spheres
}

/// Swept sphere test of the path `prev_pos -> cur_pos`.
pub fn collide_spheres_swept(
    prev_pos: Vec3,
    cur_pos: &mut Vec3,
    mask: u32,
    ctx: &ShapeContext<'_>,
    accum: &mut ImpulseAccumulator,
) {
    for index in bits(mask) {
        let prev_sphere = ctx.prev.spheres[index];
        let sphere = ctx.cur.spheres[index];

        let prev = prev_pos - xyz(prev_sphere);
        let prev_radius = prev_sphere.w;
        let mut cur = *cur_pos - xyz(sphere);
        let cur_radius = sphere.w;

        let mut sqr_distance = EPSILON + cur.length_squared();

        let swept = sweep(
            prev.length_squared() - prev_radius * prev_radius,
            prev.dot(cur) - prev_radius * cur_radius,
            sqr_distance - cur_radius * cur_radius,
            prev_radius,
            cur_radius,
        );

        if swept.hit {
            let delta = prev - cur;
            cur += delta * swept.push_back(1.0 - swept.toi);
            *cur_pos = xyz(sphere) + cur;
            sqr_distance = EPSILON + cur.length_squared();
        }

        let neg_scale = 1.0 - cur_radius / sqr_distance.sqrt();
        if neg_scale >= 0.0 {
            continue;
        }
        accum.subtract(cur, neg_scale);

        if ctx.friction {
            accum.add_velocity(ctx.sphere_velocity(index));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn frame(spheres: &[Vec4], capsules: &[IndexPair]) -> ShapeFrame {
        let mut cones = Vec::new();
        super::super::cone::generate_cones(&mut cones, spheres, capsules);
        ShapeFrame {
            spheres: spheres.to_vec(),
            cones,
        }
    }

    #[test]
    fn bits_visits_set_bits_in_order() {
        assert_eq!(bits(0b1010_0001).collect::<Vec<_>>(), vec![0, 5, 7]);
        assert_eq!(bits(0).count(), 0);
    }

    #[test]
    fn point_inside_sphere_is_pushed_to_surface() {
        let shapes = frame(&[Vec4::new(0.0, 0.0, 0.0, 1.0)], &[]);
        let ctx = ShapeContext {
            cur: &shapes,
            prev: &shapes,
            capsules: &[],
            friction: false,
        };
        let mut accum = ImpulseAccumulator::new();
        let p = Vec3::new(0.0, 0.25, 0.0);
        collide_spheres(p, 1, &ctx, &mut accum);
        assert!(accum.is_hit());
        let moved = p + accum.delta / accum.count;
        assert_relative_eq!(moved.y, 1.0, epsilon = 1e-4);
    }

    #[test]
    fn point_inside_capsule_uses_cone_and_skips_spheres() {
        let spheres = [Vec4::new(-1.0, 0.0, 0.0, 0.5), Vec4::new(1.0, 0.0, 0.0, 0.5)];
        let shapes = frame(&spheres, &[IndexPair::new(0, 1)]);
        let ctx = ShapeContext {
            cur: &shapes,
            prev: &shapes,
            capsules: &[IndexPair::new(0, 1)],
            friction: false,
        };
        let mut accum = ImpulseAccumulator::new();
        let p = Vec3::new(0.0, 0.25, 0.0);
        let mask = ShapeMask {
            spheres: 0b11,
            cones: 0b1,
        };
        let remaining = collide_cones(p, mask, &ctx, &mut accum);
        assert_eq!(remaining, 0);
        let moved = p + accum.delta / accum.count;
        assert_relative_eq!(moved.y, 0.5, epsilon = 1e-4);
    }

    #[test]
    fn swept_path_through_sphere_stops_at_entry() {
        let shapes = frame(&[Vec4::new(0.0, 0.0, 0.0, 1.0)], &[]);
        let ctx = ShapeContext {
            cur: &shapes,
            prev: &shapes,
            capsules: &[],
            friction: false,
        };
        let mut accum = ImpulseAccumulator::new();
        let prev = Vec3::new(-2.0, 0.0, 0.0);
        let mut cur = Vec3::new(2.0, 0.0, 0.0);
        collide_spheres_swept(prev, &mut cur, 1, &ctx, &mut accum);
        assert!(cur.x < 0.0, "particle should stop before the center, x = {}", cur.x);
    }

    #[test]
    fn swept_path_missing_sphere_is_untouched() {
        let shapes = frame(&[Vec4::new(0.0, 0.0, 0.0, 1.0)], &[]);
        let ctx = ShapeContext {
            cur: &shapes,
            prev: &shapes,
            capsules: &[],
            friction: false,
        };
        let mut accum = ImpulseAccumulator::new();
        let prev = Vec3::new(-2.0, 3.0, 0.0);
        let mut cur = Vec3::new(2.0, 3.0, 0.0);
        collide_spheres_swept(prev, &mut cur, 1, &ctx, &mut accum);
        assert!(!accum.is_hit());
        assert_eq!(cur, Vec3::new(2.0, 3.0, 0.0));
    }
}
