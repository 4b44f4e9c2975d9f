use glam::{Mat3, Quat, Vec3, Vec4};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Machine epsilon used as the distance bias throughout the solver.
pub const EPSILON: f32 = f32::EPSILON;

/// Log-space value representing a coefficient of exactly zero after `1 - exp2`.
pub const LOG_ZERO: f32 = -(f32::MAX_EXP as f32);

/// `log2(x)` that maps zero (and negatives) to [`LOG_ZERO`] instead of `-inf`.
#[inline]
pub fn safe_log2(x: f32) -> f32 {
    if x > 0.0 {
        x.log2()
    } else {
        LOG_ZERO
    }
}

/// Inverse of [`safe_log2`]: values at or below [`LOG_ZERO`] decode to zero.
#[inline]
pub fn safe_exp2(x: f32) -> f32 {
    if x > LOG_ZERO {
        x.exp2()
    } else {
        0.0
    }
}

#[inline]
pub fn safe_log2_vec3(v: Vec3) -> Vec3 {
    Vec3::new(safe_log2(v.x), safe_log2(v.y), safe_log2(v.z))
}

#[inline]
pub fn safe_exp2_vec3(v: Vec3) -> Vec3 {
    Vec3::new(safe_exp2(v.x), safe_exp2(v.y), safe_exp2(v.z))
}

#[inline]
pub fn exp2_vec3(v: Vec3) -> Vec3 {
    Vec3::new(v.x.exp2(), v.y.exp2(), v.z.exp2())
}

/// Store a linear coefficient `c` in [0, 1] as `log2(1 - c)`.
#[inline]
pub fn encode_coefficient(c: f32) -> f32 {
    safe_log2(1.0 - c)
}

/// Decode a log-space coefficient for a step of `exponent` (frequency * dt).
///
/// A coefficient of exactly one stays one for every step size.
#[inline]
pub fn decode_coefficient(log: f32, exponent: f32) -> f32 {
    if log <= LOG_ZERO {
        return 1.0;
    }
    1.0 - (log * exponent).exp2()
}

/// Rotation vector (axis * half angle) of a unit quaternion.
pub fn quat_log(q: Quat) -> Vec3 {
    let imaginary = Vec3::new(q.x, q.y, q.z);
    let theta = imaginary.length();
    let mut scale = if theta > EPSILON {
        theta.min(1.0).asin() / theta
    } else {
        1.0
    };
    if q.w < 0.0 {
        scale = -scale;
    }
    imaginary * scale
}

/// Inverse of [`quat_log`].
pub fn quat_exp(v: Vec3) -> Quat {
    let theta = v.length();
    let scale = if theta > EPSILON { theta.sin() / theta } else { 1.0 };
    Quat::from_xyzw(v.x * scale, v.y * scale, v.z * scale, theta.cos())
}

/// Cross-product matrix: `star(a) * b == a.cross(b)`.
pub fn star(v: Vec3) -> Mat3 {
    Mat3::from_cols(
        Vec3::new(0.0, v.z, -v.y),
        Vec3::new(-v.z, 0.0, v.x),
        Vec3::new(v.y, -v.x, 0.0),
    )
}

#[inline]
pub fn xyz(v: Vec4) -> Vec3 {
    Vec3::new(v.x, v.y, v.z)
}

/// Replace the xyz part of `v`, keeping w.
#[inline]
pub fn with_xyz(v: Vec4, p: Vec3) -> Vec4 {
    Vec4::new(p.x, p.y, p.z, v.w)
}

#[inline]
pub fn lerp4(a: Vec4, b: Vec4, t: f32) -> Vec4 {
    a + (b - a) * t
}

/// Index of the largest component (ties resolve towards z).
#[inline]
pub fn longest_axis(edge: Vec3) -> usize {
    if edge.x > edge.y {
        if edge.x > edge.z {
            0
        } else {
            2
        }
    } else if edge.y > edge.z {
        1
    } else {
        2
    }
}

/// Rigid transform of a cloth's local frame in world space.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub translation: Vec3,
    pub rotation: Quat,
}

impl Default for Pose {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Pose {
    pub const IDENTITY: Pose = Pose {
        translation: Vec3::ZERO,
        rotation: Quat::IDENTITY,
    };

    pub fn new(translation: Vec3, rotation: Quat) -> Self {
        Self {
            translation,
            rotation,
        }
    }

    pub fn transform_point(&self, p: Vec3) -> Vec3 {
        self.rotation * p + self.translation
    }

    pub fn rotate(&self, v: Vec3) -> Vec3 {
        self.rotation * v
    }

    pub fn inverse(&self) -> Pose {
        let rotation = self.rotation.conjugate();
        Pose {
            translation: rotation * -self.translation,
            rotation,
        }
    }

    /// `self * other`: apply `other` first.
    pub fn compose(&self, other: &Pose) -> Pose {
        Pose {
            translation: self.transform_point(other.translation),
            rotation: self.rotation * other.rotation,
        }
    }
}

/// Fixed-width moving average of per-iteration time steps.
///
/// Samples are pushed with a repeat count so a frame of `n` sub-steps
/// contributes `n` entries. Only the newest `width` samples are kept.
#[derive(Clone, Debug)]
pub struct MovingAverage {
    samples: VecDeque<f32>,
    width: usize,
}

impl MovingAverage {
    pub fn new(width: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(width),
            width,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn reset(&mut self) {
        self.samples.clear();
    }

    /// Change the window, dropping the oldest samples if it shrinks.
    pub fn resize(&mut self, width: usize) {
        self.width = width;
        while self.samples.len() > width {
            self.samples.pop_front();
        }
    }

    pub fn push(&mut self, count: usize, value: f32) {
        for _ in 0..count.min(self.width) {
            if self.samples.len() == self.width {
                self.samples.pop_front();
            }
            self.samples.push_back(value);
        }
    }

    pub fn average(&self) -> Option<f32> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.samples.iter().sum::<f32>() / self.samples.len() as f32)
    }
}

/// Axis-aligned bounds over `Vec3`; an empty box has `lower > upper`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Bounds {
    pub lower: Vec3,
    pub upper: Vec3,
}

impl Bounds {
    pub const EMPTY: Bounds = Bounds {
        lower: Vec3::splat(f32::MAX),
        upper: Vec3::splat(-f32::MAX),
    };

    pub fn from_center_extent(center: Vec3, half_extent: Vec3) -> Self {
        Self {
            lower: center - half_extent,
            upper: center + half_extent,
        }
    }

    pub fn include(&mut self, p: Vec3) {
        self.lower = self.lower.min(p);
        self.upper = self.upper.max(p);
    }

    pub fn union(&self, other: &Bounds) -> Bounds {
        Bounds {
            lower: self.lower.min(other.lower),
            upper: self.upper.max(other.upper),
        }
    }

    pub fn intersect(&self, other: &Bounds) -> Bounds {
        Bounds {
            lower: self.lower.max(other.lower),
            upper: self.upper.min(other.upper),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lower.x > self.upper.x || self.lower.y > self.upper.y || self.lower.z > self.upper.z
    }

    pub fn contains(&self, p: Vec3) -> bool {
        p.cmpge(self.lower).all() && p.cmple(self.upper).all()
    }

    pub fn center(&self) -> Vec3 {
        (self.upper + self.lower) * 0.5
    }

    pub fn half_extent(&self) -> Vec3 {
        (self.upper - self.lower) * 0.5
    }

    /// Bounds of this box after an affine transform.
    pub fn transformed(&self, rotation: Mat3, translation: Vec3) -> Bounds {
        let center = rotation * self.center() + translation;
        let half = self.half_extent();
        let abs = Mat3::from_cols(
            rotation.x_axis.abs(),
            rotation.y_axis.abs(),
            rotation.z_axis.abs(),
        );
        let extent = abs * half;
        Bounds::from_center_extent(center, extent)
    }
}
