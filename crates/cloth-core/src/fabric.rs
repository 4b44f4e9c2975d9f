use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{ClothError, Result};
use crate::factory::Platform;

/// Number of constraints solved per batch; sets are padded to a multiple.
pub const BATCH_WIDTH: usize = 4;

/// Rest value of padding constraints. Never produces a correction.
pub const PADDING_REST_VALUE: f32 = f32::NEG_INFINITY;

/// Pair of particle indices.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct IndexPair {
    pub first: u32,
    pub second: u32,
}

impl IndexPair {
    pub const fn new(first: u32, second: u32) -> Self {
        Self { first, second }
    }
}

/// Long-range constraint bounding a particle's distance from `anchor`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Tether {
    pub anchor: u32,
    pub length: f32,
}

/// Stable identity of a fabric across factories.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FabricId(pub u64);

/// Hands out fabric ids. Factories that must recognize each other's fabrics
/// share one allocator.
#[derive(Debug, Default)]
pub struct FabricIdAllocator {
    next: AtomicU64,
}

impl FabricIdAllocator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(0),
        }
    }

    pub fn allocate(&self) -> FabricId {
        FabricId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

/// Flat, unpadded fabric description used for construction and extraction.
///
/// `sets[i]` is the exclusive end of set `i` in `rest_values`; set 0 starts
/// at 0. `indices` holds two particle indices per rest value. Tethers are
/// laid out `tether_anchors[k * num_particles + i]` for the k-th tether of
/// particle i.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FabricData {
    pub num_particles: u32,
    pub phases: Vec<u32>,
    pub sets: Vec<u32>,
    pub rest_values: Vec<f32>,
    pub indices: Vec<u32>,
    pub tether_anchors: Vec<u32>,
    pub tether_lengths: Vec<f32>,
    pub triangles: Vec<u32>,
}

/// Immutable constraint topology shared by cloth instances.
#[derive(Clone, Debug)]
pub struct Fabric {
    id: FabricId,
    platform: Platform,
    num_particles: u32,
    /// Set index of each phase.
    phases: Vec<u32>,
    /// Padded set boundaries, `num_sets + 1` entries starting at 0.
    sets: Vec<u32>,
    rest_values: Vec<f32>,
    indices: Vec<IndexPair>,
    tethers: Vec<Tether>,
    tether_length_scale: f32,
    triangles: Vec<u32>,
}

fn check_index(index: u32, num_particles: u32) -> Result<()> {
    if index >= num_particles {
        return Err(ClothError::IndexOutOfRange {
            index,
            num_particles,
        });
    }
    Ok(())
}

impl Fabric {
    pub(crate) fn new(data: &FabricData, id: FabricId, platform: Platform) -> Result<Self> {
        let n = data.num_particles;

        if data.indices.len() != data.rest_values.len() * 2 {
            return Err(ClothError::MismatchedLength {
                what: "constraint indices",
                expected: data.rest_values.len() * 2,
                actual: data.indices.len(),
            });
        }
        if data.tether_anchors.len() != data.tether_lengths.len() {
            return Err(ClothError::MismatchedLength {
                what: "tether lengths",
                expected: data.tether_anchors.len(),
                actual: data.tether_lengths.len(),
            });
        }
        if n > 0 && data.tether_anchors.len() % n as usize != 0 {
            return Err(ClothError::MismatchedLength {
                what: "tether anchors",
                expected: data.tether_anchors.len() / n as usize * n as usize,
                actual: data.tether_anchors.len(),
            });
        }
        if data.triangles.len() % 3 != 0 {
            return Err(ClothError::MismatchedLength {
                what: "triangle indices",
                expected: data.triangles.len() / 3 * 3,
                actual: data.triangles.len(),
            });
        }
        for (phase, &set) in data.phases.iter().enumerate() {
            if set as usize >= data.sets.len() {
                return Err(ClothError::InvalidPhase {
                    phase,
                    num_phases: data.phases.len(),
                    num_sets: data.sets.len(),
                });
            }
        }
        let mut begin = 0;
        for &end in &data.sets {
            if end < begin || end as usize > data.rest_values.len() {
                return Err(ClothError::InvalidRange {
                    first: begin as usize,
                    last: end as usize,
                    len: data.rest_values.len(),
                });
            }
            begin = end;
        }
        for &index in data
            .indices
            .iter()
            .chain(&data.tether_anchors)
            .chain(&data.triangles)
        {
            check_index(index, n)?;
        }

        // pad every set to the batch width with self-referencing dummies
        let mut sets = Vec::with_capacity(data.sets.len() + 1);
        let mut rest_values = Vec::with_capacity(data.rest_values.len() + data.sets.len() * 3);
        let mut indices = Vec::with_capacity(rest_values.capacity());
        sets.push(0);
        let mut begin = 0usize;
        for &end in &data.sets {
            let end = end as usize;
            for c in begin..end {
                rest_values.push(data.rest_values[c]);
                indices.push(IndexPair::new(data.indices[2 * c], data.indices[2 * c + 1]));
            }
            let mut count = end - begin;
            while count % BATCH_WIDTH != 0 {
                let index = indices.last().map_or(0, |pair: &IndexPair| pair.second);
                rest_values.push(PADDING_REST_VALUE);
                indices.push(IndexPair::new(index, index));
                count += 1;
            }
            sets.push(rest_values.len() as u32);
            begin = end;
        }

        let tethers = data
            .tether_anchors
            .iter()
            .zip(&data.tether_lengths)
            .map(|(&anchor, &length)| Tether { anchor, length })
            .collect();

        Ok(Self {
            id,
            platform,
            num_particles: n,
            phases: data.phases.clone(),
            sets,
            rest_values,
            indices,
            tethers,
            tether_length_scale: 1.0,
            triangles: data.triangles.clone(),
        })
    }

    pub fn id(&self) -> FabricId {
        self.id
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn num_particles(&self) -> u32 {
        self.num_particles
    }

    pub fn num_phases(&self) -> usize {
        self.phases.len()
    }

    pub fn num_sets(&self) -> usize {
        self.sets.len() - 1
    }

    /// Number of real (unpadded) distance constraints.
    pub fn num_constraints(&self) -> usize {
        self.rest_values
            .iter()
            .filter(|&&r| r != PADDING_REST_VALUE)
            .count()
    }

    pub fn num_tethers(&self) -> usize {
        self.tethers.len()
    }

    pub fn num_triangles(&self) -> usize {
        self.triangles.len() / 3
    }

    pub fn phase_set(&self, phase: usize) -> u32 {
        self.phases[phase]
    }

    /// Padded constraint range of `set`.
    pub fn set_range(&self, set: usize) -> Range<usize> {
        self.sets[set] as usize..self.sets[set + 1] as usize
    }

    /// Padded constraint range solved for `phase`.
    pub fn phase_range(&self, phase: usize) -> Range<usize> {
        self.set_range(self.phases[phase] as usize)
    }

    pub fn rest_values(&self) -> &[f32] {
        &self.rest_values
    }

    pub fn indices(&self) -> &[IndexPair] {
        &self.indices
    }

    pub fn tethers(&self) -> &[Tether] {
        &self.tethers
    }

    pub fn tether_length_scale(&self) -> f32 {
        self.tether_length_scale
    }

    pub fn triangles(&self) -> &[u32] {
        &self.triangles
    }

    pub fn scale_rest_values(&mut self, scale: f32) {
        for r in self.rest_values.iter_mut() {
            if *r != PADDING_REST_VALUE {
                *r *= scale;
            }
        }
    }

    pub fn scale_tether_lengths(&mut self, scale: f32) {
        self.tether_length_scale *= scale;
    }

    /// Unpadded arrays matching the construction input.
    pub fn data(&self) -> FabricData {
        let mut sets = Vec::with_capacity(self.num_sets());
        let mut rest_values = Vec::with_capacity(self.rest_values.len());
        let mut indices: Vec<IndexPair> = Vec::with_capacity(self.indices.len());
        for set in 0..self.num_sets() {
            for c in self.set_range(set) {
                if self.rest_values[c] != PADDING_REST_VALUE {
                    rest_values.push(self.rest_values[c]);
                    indices.push(self.indices[c]);
                }
            }
            sets.push(rest_values.len() as u32);
        }

        FabricData {
            num_particles: self.num_particles,
            phases: self.phases.clone(),
            sets,
            rest_values,
            indices: bytemuck::cast_slice::<IndexPair, u32>(&indices).to_vec(),
            tether_anchors: self.tethers.iter().map(|t| t.anchor).collect(),
            tether_lengths: self
                .tethers
                .iter()
                .map(|t| t.length * self.tether_length_scale)
                .collect(),
            triangles: self.triangles.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strip() -> FabricData {
        // 3 particles in a row, two edges in one set plus one bending edge
        FabricData {
            num_particles: 3,
            phases: vec![0, 1],
            sets: vec![2, 3],
            rest_values: vec![1.0, 1.0, 2.0],
            indices: vec![0, 1, 1, 2, 0, 2],
            ..Default::default()
        }
    }

    #[test]
    fn sets_are_padded_to_batch_width() {
        let fabric = Fabric::new(&strip(), FabricId(0), Platform::Cpu).unwrap();
        assert_eq!(fabric.num_sets(), 2);
        assert_eq!(fabric.set_range(0), 0..4);
        assert_eq!(fabric.set_range(1), 4..8);
        assert_eq!(fabric.rest_values()[2], PADDING_REST_VALUE);
        let dummy = fabric.indices()[3];
        assert_eq!(dummy.first, dummy.second);
        assert_eq!(fabric.num_constraints(), 3);
    }

    #[test]
    fn padding_is_stripped_on_extraction() {
        let data = strip();
        let fabric = Fabric::new(&data, FabricId(7), Platform::Cpu).unwrap();
        assert_eq!(fabric.data(), data);
    }

    #[test]
    fn rejects_out_of_range_index() {
        let mut data = strip();
        data.indices[5] = 3;
        let err = Fabric::new(&data, FabricId(0), Platform::Cpu).unwrap_err();
        assert_eq!(
            err,
            ClothError::IndexOutOfRange {
                index: 3,
                num_particles: 3
            }
        );
    }

    #[test]
    fn id_allocator_is_monotonic() {
        let ids = FabricIdAllocator::new();
        let a = ids.allocate();
        let b = ids.allocate();
        assert!(b > a);
    }
}
