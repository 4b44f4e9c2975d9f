use glam::{Vec3, Vec4};

use super::narrow::bits;
use super::ImpulseAccumulator;
use crate::math::xyz;

/// Collide `p` with convex solids bounded by `planes`.
///
/// `distances` is scratch space of at least `planes.len()` entries. A
/// particle is inside a convex when it lies behind every plane of the
/// convex's mask; it is then pushed out through the least penetrated plane.
pub fn collide_convexes(
    p: Vec3,
    planes: &[Vec4],
    convexes: &[u32],
    distances: &mut [f32],
    accum: &mut ImpulseAccumulator,
) {
    let mut inside = 0u32;
    for (i, (plane, distance)) in planes.iter().zip(distances.iter_mut()).enumerate() {
        *distance = plane.w + xyz(*plane).dot(p);
        if *distance < 0.0 {
            inside |= 1 << i;
        }
    }
    if inside == 0 {
        return;
    }

    for &convex in convexes {
        if convex & inside != convex {
            continue;
        }

        let mut planes_in_mask = bits(convex);
        let Some(first) = planes_in_mask.next() else {
            continue;
        };
        let mut normal = xyz(planes[first]);
        let mut max_distance = distances[first];
        for index in planes_in_mask {
            if distances[index] > max_distance {
                normal = xyz(planes[index]);
                max_distance = distances[index];
            }
        }

        accum.subtract(normal, max_distance);
    }
}
