use glam::Vec3;

use crate::math::{longest_axis, Bounds, EPSILON};
use crate::scratch::reserve_len;

/// Cells across each hash axis, excluding the sentinel rows.
const HASH_CELLS: f32 = 253.0;
/// Cells along the sweep axis, excluding the sentinel rows.
const SWEEP_CELLS: f32 = 65533.0;
/// Low 16 bits of a key: the sweep axis coordinate.
const SWEEP_MASK: u32 = 0xffff;
/// Key offsets of the forward neighbor columns: (+1, 0), (-1, +1), (0, +1), (+1, +1).
const NEIGHBOR_OFFSETS: [u32; 4] = [0x0001_0000, 0x00ff_0000, 0x0100_0000, 0x0101_0000];

/// Uniform grid for particle-particle proximity queries.
///
/// The longest axis of the bounds is the sweep axis and gets 16 bits of
/// resolution; the two other axes get 8 bits each. A particle's key packs
/// `sweep | hash0 << 16 | hash1 << 24`, so sorting keys groups particles
/// into columns along the sweep axis. Coordinate 0 and the top cell are
/// reserved, which keeps neighbor offsets from wrapping into the next row.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ParticleGrid {
    scale: Vec3,
    bias: Vec3,
    size: Vec3,
    sweep_axis: usize,
    hash_axes: [usize; 2],
    search_cells: u32,
}

impl ParticleGrid {
    /// Grid over `bounds` with cells no smaller than `distance` across.
    pub fn new(bounds: &Bounds, distance: f32) -> Self {
        let lower = bounds.lower;
        let edge = (bounds.upper - lower).max(Vec3::splat(EPSILON));

        let sweep_axis = longest_axis(edge);
        let hash_axes = [(sweep_axis + 1) % 3, (sweep_axis + 2) % 3];

        let mut cell = (edge / HASH_CELLS).max(Vec3::splat(distance));
        cell[sweep_axis] = edge[sweep_axis] / SWEEP_CELLS;

        let mut size = Vec3::splat(HASH_CELLS + 1.0);
        size[sweep_axis] = SWEEP_CELLS + 1.0;

        let scale = cell.recip();
        let bias = -lower * scale + Vec3::ONE;

        // number of sweep cells a collision can span; a collapsed sweep axis
        // spans them all
        let spanned = (scale[sweep_axis] * distance).floor().min(SWEEP_MASK as f32);
        let search_cells = (spanned as u32).saturating_add(2);

        Self {
            scale,
            bias,
            size,
            sweep_axis,
            hash_axes,
            search_cells,
        }
    }

    pub fn sweep_axis(&self) -> usize {
        self.sweep_axis
    }

    pub fn search_cells(&self) -> u32 {
        self.search_cells
    }

    /// Cell key of `p`. Points outside the bounds clamp to the border cells.
    #[inline]
    pub fn key(&self, p: Vec3) -> u32 {
        let cell = (p * self.scale + self.bias).min(self.size).max(Vec3::ONE).floor();
        let [h0, h1] = self.hash_axes;
        cell[self.sweep_axis] as u32 | (cell[h0] as u32) << 16 | (cell[h1] as u32) << 24
    }
}

/// Radix sort of 32-bit keys, 8 bits per pass.
///
/// Writes the permutation that sorts `keys` into `order`; `swap` is
/// scratch. The sort is stable.
pub fn radix_sort(keys: &[u32], order: &mut Vec<u32>, swap: &mut Vec<u32>) {
    let n = keys.len();

    // 1. Build all four histograms in one pass
    let mut histograms = [[0u32; 256]; 4];
    for &key in keys {
        for (pass, histogram) in histograms.iter_mut().enumerate() {
            histogram[(key >> (8 * pass)) as usize & 0xff] += 1;
        }
    }

    // 2. Prefix sum each histogram into scatter offsets
    for histogram in histograms.iter_mut() {
        let mut sum = 0;
        for slot in histogram.iter_mut() {
            let count = *slot;
            *slot = sum;
            sum += count;
        }
    }

    // 3. Scatter, least significant digit first
    order.clear();
    order.extend(0..n as u32);
    swap.clear();
    swap.resize(n, 0);
    for (pass, offsets) in histograms.iter_mut().enumerate() {
        for &index in order.iter() {
            let digit = (keys[index as usize] >> (8 * pass)) as usize & 0xff;
            swap[offsets[digit] as usize] = index;
            offsets[digit] += 1;
        }
        std::mem::swap(order, swap);
    }
}

/// Keys of a particle set, sorted for a forward neighbor walk.
///
/// Reused across frames; buffers only grow.
#[derive(Clone, Debug, Default)]
pub struct SortedKeys {
    keys: Vec<u32>,
    order: Vec<u32>,
    sorted: Vec<u32>,
    swap: Vec<u32>,
}

impl SortedKeys {
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Allocate room for sorting `len` keys.
    pub fn reserve(&mut self, len: usize) {
        for buffer in [&mut self.keys, &mut self.order, &mut self.sorted, &mut self.swap] {
            reserve_len(buffer, len);
        }
    }

    /// Sort `keys`. The `n`th key belongs to entry `n`.
    pub fn sort(&mut self, keys: impl IntoIterator<Item = u32>) {
        self.keys.clear();
        self.keys.extend(keys);
        radix_sort(&self.keys, &mut self.order, &mut self.swap);

        self.sorted.clear();
        let keys = &self.keys;
        self.sorted.extend(self.order.iter().map(|&i| keys[i as usize]));
    }

    /// Entries in key order.
    pub fn order(&self) -> &[u32] {
        &self.order
    }

    /// Sorted keys.
    pub fn keys(&self) -> &[u32] {
        &self.sorted
    }

    /// Visit every pair of entries whose cells lie within `search_cells`
    /// along the sweep axis and in the same or a forward neighbor column.
    ///
    /// Each unordered pair is visited at most once. `visit(a, b)` receives
    /// the entries' positions in the input key sequence.
    pub fn for_each_pair(&self, search_cells: u32, mut visit: impl FnMut(usize, usize)) {
        let keys = &self.sorted;
        let first_of = |key: u32| keys.partition_point(|&k| k < key);

        for (i, &key) in keys.iter().enumerate() {
            let first_key = key - search_cells.min(key & SWEEP_MASK);
            let last_key = key.saturating_add(search_cells).min(key | SWEEP_MASK);
            let a = self.order[i] as usize;

            // same column, ahead of this entry
            for &b in &self.order[i + 1..first_of(last_key)] {
                visit(a, b as usize);
            }

            for offset in NEIGHBOR_OFFSETS {
                let begin = first_of(first_key.saturating_add(offset));
                let end = first_of(last_key.saturating_add(offset));
                for &b in &self.order[begin..end] {
                    visit(a, b as usize);
                }
            }
        }
    }
}
