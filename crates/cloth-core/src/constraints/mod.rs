pub mod fabric;
pub mod motion;
pub mod separation;
pub mod tether;

use glam::Vec4;

use crate::buffer::DoubleBuffer;
use crate::math::lerp4;

/// Read-only view of a start/target buffer at one point of the frame.
///
/// With no target the start values are used as is. On the last iteration
/// `alpha` is exactly one and the target values are returned unmodified.
#[derive(Clone, Copy, Debug)]
pub struct Interpolated<'a, T> {
    start: &'a [T],
    target: &'a [T],
    alpha: f32,
}

impl<'a, T: Copy> Interpolated<'a, T> {
    pub fn new(buffer: &'a DoubleBuffer<T>, alpha: f32) -> Self {
        Self {
            start: &buffer.start,
            target: &buffer.target,
            alpha,
        }
    }

    pub fn from_slices(start: &'a [T], target: &'a [T], alpha: f32) -> Self {
        Self {
            start,
            target,
            alpha,
        }
    }

    pub fn len(&self) -> usize {
        self.start.len()
    }

    pub fn is_empty(&self) -> bool {
        self.start.is_empty()
    }

    pub fn start(&self) -> &'a [T] {
        self.start
    }

    pub fn has_target(&self) -> bool {
        !self.target.is_empty()
    }
}

impl<'a> Interpolated<'a, Vec4> {
    #[inline]
    pub fn get(&self, i: usize) -> Vec4 {
        if self.target.is_empty() {
            self.start[i]
        } else if self.alpha >= 1.0 {
            self.target[i]
        } else {
            lerp4(self.start[i], self.target[i], self.alpha)
        }
    }
}

impl<'a> Interpolated<'a, glam::Vec3> {
    #[inline]
    pub fn get(&self, i: usize) -> glam::Vec3 {
        if self.target.is_empty() {
            self.start[i]
        } else if self.alpha >= 1.0 {
            self.target[i]
        } else {
            self.start[i].lerp(self.target[i], self.alpha)
        }
    }
}
