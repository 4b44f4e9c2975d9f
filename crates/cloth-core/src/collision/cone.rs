use glam::{Vec3, Vec4};

use crate::fabric::IndexPair;
use crate::math::xyz;

/// Tapered capsule between two collision spheres.
///
/// The cone is the convex hull of both spheres, stored as a truncated
/// cone touching them plus the masks of its end spheres.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Cone {
    pub center: Vec3,
    /// Radius at the center, measured perpendicular to the axis.
    pub radius: f32,
    /// Unit axis from the first to the second sphere.
    pub axis: Vec3,
    /// Radius change per unit of axis length.
    pub slope: f32,
    pub sqr_cosine: f32,
    pub half_length: f32,
    pub first_mask: u32,
    pub both_mask: u32,
}

impl Cone {
    /// Build the cone of `capsule` from sphere data `spheres`.
    pub fn new(spheres: &[Vec4], capsule: IndexPair) -> Self {
        let first = spheres[capsule.first as usize];
        let second = spheres[capsule.second as usize];

        let center = (second + first) * 0.5;
        let axis = (second - first) * 0.5;

        let sqr_axis_length = xyz(axis).length_squared();
        let sqr_cone_length = sqr_axis_length - axis.w * axis.w;

        // degenerate when one sphere contains the other
        let (inv_axis_length, inv_cone_length) = if sqr_cone_length > 0.0 {
            (1.0 / sqr_axis_length.sqrt(), 1.0 / sqr_cone_length.sqrt())
        } else {
            (0.0, 0.0)
        };

        let axis_length = sqr_axis_length * inv_axis_length;
        let slope = axis.w * inv_cone_length;

        let sine = axis.w * inv_axis_length;
        let first_mask = 1u32 << capsule.first;

        Self {
            center: xyz(center),
            radius: (axis.w + first.w) * inv_cone_length * axis_length,
            axis: xyz(axis) * inv_axis_length,
            slope,
            sqr_cosine: 1.0 - sine * sine,
            half_length: axis_length,
            first_mask,
            both_mask: first_mask | 1u32 << capsule.second,
        }
    }

    pub fn second_mask(&self) -> u32 {
        self.first_mask ^ self.both_mask
    }
}

/// Regenerate all cones for one set of sphere data.
///
/// Capsules referencing missing spheres get an empty cone, which the
/// broad phase never reports.
pub fn generate_cones(cones: &mut Vec<Cone>, spheres: &[Vec4], capsules: &[IndexPair]) {
    let num_spheres = spheres.len() as u32;
    cones.clear();
    cones.extend(capsules.iter().map(|&capsule| {
        if capsule.first < num_spheres && capsule.second < num_spheres {
            Cone::new(spheres, capsule)
        } else {
            Cone::default()
        }
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn cylinder_has_no_slope() {
        let spheres = [Vec4::new(-1.0, 0.0, 0.0, 0.5), Vec4::new(1.0, 0.0, 0.0, 0.5)];
        let cone = Cone::new(&spheres, IndexPair::new(0, 1));
        assert_eq!(cone.center, Vec3::ZERO);
        assert_eq!(cone.axis, Vec3::X);
        assert_eq!(cone.slope, 0.0);
        assert_relative_eq!(cone.radius, 0.5);
        assert_relative_eq!(cone.half_length, 1.0);
        assert_relative_eq!(cone.sqr_cosine, 1.0);
        assert_eq!(cone.both_mask, 0b11);
        assert_eq!(cone.second_mask(), 0b10);
    }

    #[test]
    fn nested_spheres_give_degenerate_cone() {
        let spheres = [Vec4::new(0.0, 0.0, 0.0, 2.0), Vec4::new(0.5, 0.0, 0.0, 0.5)];
        let cone = Cone::new(&spheres, IndexPair::new(0, 1));
        assert_eq!(cone.radius, 0.0);
        assert_eq!(cone.axis, Vec3::ZERO);
    }
}
