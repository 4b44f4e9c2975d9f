use glam::Vec3;

use super::ImpulseAccumulator;

/// Precomputed closest-point data of one collision triangle.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TriangleData {
    pub base: Vec3,
    pub edge0: Vec3,
    pub edge1: Vec3,
    pub normal: Vec3,
    pub edge0_sqr_length: f32,
    pub edge1_sqr_length: f32,
    pub edge0_dot_edge1: f32,
    pub inv_det: f32,
    pub inv_denom: f32,
    pub inv_edge0_sqr_length: f32,
    pub inv_edge1_sqr_length: f32,
}

impl TriangleData {
    pub fn new(p0: Vec3, p1: Vec3, p2: Vec3) -> Self {
        let edge0 = p1 - p0;
        let edge1 = p2 - p0;
        let normal = edge0.cross(edge1);

        let edge0_sqr_length = edge0.length_squared();
        let edge1_sqr_length = edge1.length_squared();
        let edge0_dot_edge1 = edge0.dot(edge1);

        let det = edge0_sqr_length * edge1_sqr_length - edge0_dot_edge1 * edge0_dot_edge1;
        let denom = edge0_sqr_length + edge1_sqr_length - edge0_dot_edge1 - edge0_dot_edge1;

        Self {
            base: p0,
            edge0,
            edge1,
            normal: normal / normal.length(),
            edge0_sqr_length,
            edge1_sqr_length,
            edge0_dot_edge1,
            inv_det: 1.0 / det,
            inv_denom: 1.0 / denom,
            inv_edge0_sqr_length: 1.0 / edge0_sqr_length,
            inv_edge1_sqr_length: 1.0 / edge1_sqr_length,
        }
    }
}

/// Fill `data` from flat triangle vertices.
pub fn generate_triangles(data: &mut Vec<TriangleData>, vertices: impl Iterator<Item = Vec3>) {
    data.clear();
    let mut vertices = vertices;
    while let (Some(p0), Some(p1), Some(p2)) = (vertices.next(), vertices.next(), vertices.next()) {
        data.push(TriangleData::new(p0, p1, p2));
    }
}

/// Push `p` to the front of the closest triangle if it lies behind it.
///
/// Only the closest triangle counts; distances of points behind a
/// triangle are inflated slightly so a front-facing neighbor at equal
/// distance wins.
pub fn collide_triangles(p: Vec3, triangles: &[TriangleData], accum: &mut ImpulseAccumulator) {
    let mut normal = Vec3::ZERO;
    let mut normal_distance = 0.0f32;
    let mut min_sqr_length = f32::MAX;

    for tri in triangles {
        let delta = p - tri.base;

        let delta_dot_edge0 = delta.dot(tri.edge0);
        let delta_dot_edge1 = delta.dot(tri.edge1);
        let delta_dot_normal = delta.dot(tri.normal);

        let s = tri.edge1_sqr_length * delta_dot_edge0 - tri.edge0_dot_edge1 * delta_dot_edge1;
        let t = tri.edge0_sqr_length * delta_dot_edge1 - tri.edge0_dot_edge1 * delta_dot_edge0;

        let mut s1 = if t > 0.0 {
            s * tri.inv_det
        } else {
            delta_dot_edge0 * tri.inv_edge0_sqr_length
        };
        let t1 = if s > 0.0 {
            t * tri.inv_det
        } else {
            delta_dot_edge1 * tri.inv_edge1_sqr_length
        };

        // closest point on the far edge
        if 1.0 < s1 + t1 {
            s1 = (tri.edge1_sqr_length - tri.edge0_dot_edge1 + delta_dot_edge0 - delta_dot_edge1) * tri.inv_denom;
        }

        let s = s1.clamp(0.0, 1.0);
        let t = t1.min(1.0 - s).max(0.0);

        let offset = delta - tri.edge0 * s - tri.edge1 * t;
        let mut sqr_length = offset.length_squared();
        if delta_dot_normal < 0.0 {
            sqr_length += sqr_length * 1e-4;
        }

        if sqr_length < min_sqr_length {
            normal = tri.normal;
            normal_distance = delta_dot_normal;
            min_sqr_length = sqr_length;
        }
    }

    if normal_distance < 0.0 {
        accum.subtract(normal, normal_distance);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn floor_triangle() -> TriangleData {
        // counter-clockwise seen from +y, so the normal points up
        TriangleData::new(Vec3::new(-1.0, 0.0, -1.0), Vec3::new(-1.0, 0.0, 3.0), Vec3::new(3.0, 0.0, -1.0))
    }

    #[test]
    fn normal_is_unit_length() {
        let tri = floor_triangle();
        assert!(tri.normal.abs_diff_eq(Vec3::Y, 1e-6), "normal = {}", tri.normal);
    }

    #[test]
    fn point_below_triangle_is_lifted() {
        let tris = [floor_triangle()];
        let mut accum = ImpulseAccumulator::new();
        let p = Vec3::new(0.0, -0.1, 0.0);
        collide_triangles(p, &tris, &mut accum);
        assert!(accum.is_hit());
        let moved = p + accum.delta / accum.count;
        assert_relative_eq!(moved.y, 0.0, epsilon = 1e-5);
    }

    #[test]
    fn point_above_triangle_is_free() {
        let tris = [floor_triangle()];
        let mut accum = ImpulseAccumulator::new();
        collide_triangles(Vec3::new(0.0, 0.1, 0.0), &tris, &mut accum);
        assert!(!accum.is_hit());
    }

    #[test]
    fn generate_groups_vertices_by_three() {
        let mut data = Vec::new();
        let vertices = [Vec3::ZERO, Vec3::X, Vec3::Z, Vec3::ZERO, Vec3::Y, Vec3::X, Vec3::ONE];
        generate_triangles(&mut data, vertices.into_iter());
        assert_eq!(data.len(), 2);
    }
}
