use glam::{Vec3, Vec4};

use crate::buffer::DoubleBuffer;
use crate::error::{ClothError, Result};
use crate::fabric::IndexPair;

/// Maximum number of spheres, capsules, planes or convexes of one cloth.
pub const MAX_PRIMITIVES: usize = 32;

/// Rigid collision shapes of a cloth in local space.
///
/// Spheres (center, radius), planes (normal, offset) and triangles (three
/// vertices each) are double buffered so a collider can move across the
/// frame. Capsules reference sphere pairs; convexes are bit masks over
/// planes.
#[derive(Clone, Debug, Default)]
pub struct CollisionShapes {
    pub spheres: DoubleBuffer<Vec4>,
    pub capsules: Vec<IndexPair>,
    pub planes: DoubleBuffer<Vec4>,
    pub convexes: Vec<u32>,
    pub triangles: DoubleBuffer<Vec3>,
}

/// Outcome of a ranged write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RangeUpdate {
    /// Nothing was stored.
    Unchanged,
    /// Values were written without changing the element count.
    Values,
    /// The element count changed.
    Resized,
}

impl RangeUpdate {
    pub fn resized(self) -> bool {
        self == RangeUpdate::Resized
    }
}

fn check_range(first: usize, last: usize, len: usize) -> Result<()> {
    if first > last || last > len {
        return Err(ClothError::InvalidRange { first, last, len });
    }
    Ok(())
}

fn check_count(kind: &'static str, count: usize) -> Result<()> {
    if count > MAX_PRIMITIVES {
        return Err(ClothError::TooManyPrimitives { kind, count });
    }
    Ok(())
}

/// Replace `[first, last)` of a start/target buffer with `values`.
///
/// An empty buffer is initialized with `values` as start. Otherwise the
/// elements after the range shift, inserted elements start out at their
/// new values and every written element becomes the frame target, so an
/// existing shape moves continuously to its new state.
fn replace_range<T: Copy>(
    buffer: &mut DoubleBuffer<T>,
    values: &[T],
    first: usize,
    last: usize,
) -> RangeUpdate {
    let old_size = buffer.start.len();
    let new_size = values.len() + old_size - (last - first);

    if old_size == 0 && new_size == 0 {
        return RangeUpdate::Unchanged;
    }

    if old_size == 0 {
        buffer.start = values.to_vec();
        buffer.target.clear();
        return RangeUpdate::Resized;
    }

    // targets default to the current start
    if buffer.target.len() < old_size {
        let missing = buffer.start[buffer.target.len()..old_size].to_vec();
        buffer.target.extend(missing);
    }

    let mut update = RangeUpdate::Values;
    if new_size != old_size {
        let inserted = &values[values.len().min(last - first)..];
        let removed = (last - first).saturating_sub(values.len());
        let tail = last;
        let new_last = first + values.len();

        splice(&mut buffer.start, tail, new_last, removed, inserted);
        splice(&mut buffer.target, tail, new_last, removed, inserted);
        update = RangeUpdate::Resized;
    }

    buffer.target[first..first + values.len()].copy_from_slice(values);
    update
}

// Move `[tail..]` to `new_tail` and fill the gap after `tail` with `inserted`.
fn splice<T: Copy>(vec: &mut Vec<T>, tail: usize, new_tail: usize, removed: usize, inserted: &[T]) {
    if removed > 0 {
        vec.drain(new_tail..new_tail + removed);
    } else {
        let at = tail.min(vec.len());
        vec.splice(at..at, inserted.iter().copied());
    }
}

impl CollisionShapes {
    pub fn num_spheres(&self) -> usize {
        self.spheres.len()
    }

    pub fn num_capsules(&self) -> usize {
        self.capsules.len()
    }

    pub fn num_planes(&self) -> usize {
        self.planes.len()
    }

    pub fn num_convexes(&self) -> usize {
        self.convexes.len()
    }

    pub fn num_triangles(&self) -> usize {
        self.triangles.len() / 3
    }

    pub fn is_empty(&self) -> bool {
        self.spheres.is_empty() && self.convexes.is_empty() && self.triangles.is_empty()
    }

    /// Replace spheres `[first, last)`.
    ///
    /// Capsules referencing spheres after the range are renumbered;
    /// capsules referencing removed spheres are dropped.
    pub fn set_spheres(&mut self, spheres: &[Vec4], first: usize, last: usize) -> Result<RangeUpdate> {
        let old_size = self.spheres.len();
        check_range(first, last, old_size)?;
        let new_size = spheres.len() + old_size - (last - first);
        check_count("spheres", new_size)?;

        let update = replace_range(&mut self.spheres, spheres, first, last);
        if old_size != 0 && new_size != old_size {
            let delta = new_size as i64 - old_size as i64;
            let boundary = (last as i64 + delta.min(0)) as u32;
            self.capsules.retain_mut(|capsule| {
                let a = shift_index(&mut capsule.first, boundary, delta);
                let b = shift_index(&mut capsule.second, boundary, delta);
                !(a || b)
            });
        }
        Ok(update)
    }

    /// Replace capsules `[first, last)`; each capsule is a pair of sphere indices.
    pub fn set_capsules(&mut self, capsules: &[IndexPair], first: usize, last: usize) -> Result<RangeUpdate> {
        let old_size = self.capsules.len();
        check_range(first, last, old_size)?;
        let new_size = capsules.len() + old_size - (last - first);
        check_count("capsules", new_size)?;

        self.capsules.splice(first..last, capsules.iter().copied());
        Ok(if new_size != old_size {
            RangeUpdate::Resized
        } else {
            RangeUpdate::Values
        })
    }

    /// Replace planes `[first, last)`.
    ///
    /// Convex masks are remapped to the shifted plane bits; convexes that
    /// lose all planes are dropped.
    pub fn set_planes(&mut self, planes: &[Vec4], first: usize, last: usize) -> Result<RangeUpdate> {
        let old_size = self.planes.len();
        check_range(first, last, old_size)?;
        let new_size = planes.len() + old_size - (last - first);
        check_count("planes", new_size)?;

        let update = replace_range(&mut self.planes, planes, first, last);
        if old_size != 0 && new_size != old_size {
            let delta = new_size as i64 - old_size as i64;
            let boundary = (last as i64 + delta.min(0)) as u32;
            let keep = low_bits(boundary);
            self.convexes.retain_mut(|convex| {
                let mut remapped = *convex & keep;
                if delta < 0 {
                    remapped |= (*convex).checked_shr((-delta) as u32).unwrap_or(0) & !keep;
                } else {
                    remapped |= (*convex & !keep).checked_shl(delta as u32).unwrap_or(0);
                }
                *convex = remapped;
                remapped != 0
            });
        }
        Ok(update)
    }

    /// Replace convexes `[first, last)`; each convex is a mask of planes.
    pub fn set_convexes(&mut self, convexes: &[u32], first: usize, last: usize) -> Result<RangeUpdate> {
        let old_size = self.convexes.len();
        check_range(first, last, old_size)?;
        let new_size = convexes.len() + old_size - (last - first);
        check_count("convexes", new_size)?;

        self.convexes.splice(first..last, convexes.iter().copied());
        Ok(if new_size != old_size {
            RangeUpdate::Resized
        } else {
            RangeUpdate::Values
        })
    }

    /// Replace triangles `[first, last)`, given as three vertices each.
    pub fn set_triangles(&mut self, triangles: &[Vec3], first: usize, last: usize) -> Result<RangeUpdate> {
        let old_size = self.triangles.len();
        if triangles.len() % 3 != 0 {
            return Err(ClothError::MismatchedLength {
                what: "triangle vertices",
                expected: triangles.len() / 3 * 3,
                actual: triangles.len(),
            });
        }
        check_range(first * 3, last * 3, old_size)?;
        Ok(replace_range(&mut self.triangles, triangles, first * 3, last * 3))
    }

    /// Replace all triangles from `first` on with explicit start and
    /// target positions.
    pub fn set_triangle_pairs(&mut self, start: &[Vec3], target: &[Vec3], first: usize) -> Result<RangeUpdate> {
        if start.len() != target.len() || start.len() % 3 != 0 {
            return Err(ClothError::MismatchedLength {
                what: "target triangle vertices",
                expected: start.len(),
                actual: target.len(),
            });
        }
        let old_size = self.triangles.len();
        let first = first * 3;
        check_range(first, old_size, old_size)?;

        if old_size == 0 && start.is_empty() {
            return Ok(RangeUpdate::Unchanged);
        }

        // targets default to the current start
        let retained = &self.triangles.start[..first];
        self.triangles.target.truncate(first);
        if self.triangles.target.len() < first {
            let missing = retained[self.triangles.target.len()..].to_vec();
            self.triangles.target.extend(missing);
        }
        self.triangles.start.truncate(first);
        self.triangles.start.extend_from_slice(start);
        self.triangles.target.extend_from_slice(target);

        Ok(if self.triangles.len() != old_size {
            RangeUpdate::Resized
        } else {
            RangeUpdate::Values
        })
    }

    /// Drop all targets so every shape stays at its start state.
    pub fn clear_interpolation(&mut self) {
        self.spheres.clear_target();
        self.planes.clear_target();
        self.triangles.clear_target();
    }

    /// Move reached targets to start at the end of a frame.
    pub fn pop(&mut self) {
        self.spheres.pop();
        self.planes.pop();
        self.triangles.pop();
    }
}

// Renumber an index at or after `boundary` by `delta`; true if the index
// fell into the removed range.
fn shift_index(index: &mut u32, boundary: u32, delta: i64) -> bool {
    if *index < boundary {
        return false;
    }
    let shifted = *index as i64 + delta;
    *index = shifted.max(0) as u32;
    shifted < boundary as i64
}

fn low_bits(count: u32) -> u32 {
    if count >= 32 {
        u32::MAX
    } else {
        (1u32 << count) - 1
    }
}
