//! In-place radix sorts over the arena orders
//!
//! Both sorts are most-significant-byte-first counting sorts over ranges of `order1`.
//! Each pass buckets a range on one byte of the packed records, permutes the range in
//! place by following cycles, and recurses into every bucket holding more than one read.
//!
//! The forward sort keeps `order2` in step with `order1`: after it, `order2[p]` is the
//! sorted position of the mate of the read at sorted position `p`. The complement sort
//! orders the reverse-complement strands and only rebuilds `order1`.

use tracing::{debug, trace};

use crate::arena::{try_zeroed, Arena, OrderLayout};
use crate::error::Result;
use crate::nuc::complement_byte;

/// Placed records between two progress events
const PROGRESS_INTERVAL: u64 = 1 << 20;

/// Count of records placed by a sort, traced every [`PROGRESS_INTERVAL`]
#[derive(Debug, Clone, Copy)]
struct Progress {
    label: &'static str,
    moved: u64,
}
impl Progress {
    fn new(label: &'static str) -> Self {
        Self { label, moved: 0 }
    }

    /// Counts one placed record, returns true when an event was emitted
    fn tick(&mut self) -> bool {
        self.moved += 1;
        if self.moved % PROGRESS_INTERVAL == 0 {
            trace!(placed = self.moved, "{} sort progress", self.label);
            return true;
        }
        false
    }
}

/// State of a cycle being followed through `order1` and `order2`
///
/// A cycle starts at `hole`, the first unplaced position of a pass, carrying the read
/// that sat there. Each step drops the carried read at its bucket head and picks up the
/// read it evicts, until a read lands back in the hole.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cycle {
    /// No read carried
    Idle,

    /// Carrying `record`, whose mate currently sits at position `mate`
    Following { hole: usize, record: u32, mate: usize },

    /// Carrying `record`, whose mate was just placed at `slot` and still waits for
    /// its `order2` entry
    PendingPairWrite { hole: usize, record: u32, slot: usize },
}
impl Cycle {
    fn start(order1: &[u32], order2: &[u32], hole: usize) -> Self {
        Self::Following {
            hole,
            record: order1[hole],
            mate: order2[hole] as usize,
        }
    }

    fn record(self) -> Option<u32> {
        match self {
            Self::Idle => None,
            Self::Following { record, .. } | Self::PendingPairWrite { record, .. } => Some(record),
        }
    }
}

/// Drops the carried read at `dest` and returns the next state of the cycle
///
/// Keeps the invariant that every read not being carried has a correct `order2` entry,
/// and that the entry of its mate points back at it.
fn relocate(order1: &mut [u32], order2: &mut [u32], state: Cycle, dest: usize) -> Cycle {
    let (hole, record, mate) = match state {
        Cycle::Idle => return Cycle::Idle,
        Cycle::Following { hole, record, mate } => (hole, record, mate),
        Cycle::PendingPairWrite { hole, record, slot } => (hole, record, slot),
    };

    if dest == hole {
        order1[dest] = record;
        order2[dest] = mate as u32;
        order2[mate] = dest as u32;
        return Cycle::Idle;
    }

    let evicted = order1[dest];
    let evicted_mate = order2[dest] as usize;
    order1[dest] = record;

    if mate == dest {
        // the evicted read is our mate: both entries are written once it lands
        Cycle::PendingPairWrite {
            hole,
            record: evicted,
            slot: dest,
        }
    } else {
        order2[dest] = mate as u32;
        order2[mate] = dest as u32;
        Cycle::Following {
            hole,
            record: evicted,
            mate: evicted_mate,
        }
    }
}

/// Bucket heads seeded at `start` and bucket ends for one pass
fn bucket_bounds(counts: &[usize; 256], start: usize) -> ([usize; 256], [usize; 256]) {
    let mut heads = [0usize; 256];
    let mut ends = [0usize; 256];
    let mut acc = start;
    for b in 0..256 {
        heads[b] = acc;
        acc += counts[b];
        ends[b] = acc;
    }
    (heads, ends)
}

/// Borrowed state of a forward sort
struct ForwardSorter<'a> {
    records: &'a [u8],
    record_size: usize,
    depth: usize,
    order1: &'a mut [u32],
    order2: &'a mut [u32],
    placed: &'a mut [bool],
    progress: Progress,
}
impl ForwardSorter<'_> {
    #[inline]
    fn key(&self, record: u32, shift: usize) -> usize {
        self.records[record as usize * self.record_size + shift] as usize
    }

    fn sort_range(&mut self, start: usize, end: usize, shift: usize) {
        let mut counts = [0usize; 256];
        for p in start..end {
            counts[self.key(self.order1[p], shift)] += 1;
        }
        let (mut heads, ends) = bucket_bounds(&counts, start);

        self.placed[start..end].fill(false);
        for i in start..end {
            if self.placed[i] {
                continue;
            }
            let mut state = Cycle::start(self.order1, self.order2, i);
            while let Some(record) = state.record() {
                let bucket = self.key(record, shift);
                let dest = heads[bucket];
                heads[bucket] += 1;
                self.placed[dest] = true;
                self.progress.tick();
                state = relocate(self.order1, self.order2, state, dest);
            }
        }

        if shift + 1 < self.depth {
            let mut lo = start;
            for &hi in &ends {
                if hi - lo > 1 {
                    self.sort_range(lo, hi, shift + 1);
                }
                lo = hi;
            }
        }
    }
}

/// Borrowed state of a complement sort
struct ComplementSorter<'a> {
    records: &'a [u8],
    record_size: usize,
    order1: &'a mut [u32],
    placed: &'a mut [bool],
    progress: Progress,
}
impl ComplementSorter<'_> {
    #[inline]
    fn key(&self, record: u32, shift: usize) -> usize {
        complement_byte(self.records[record as usize * self.record_size + shift]) as usize
    }

    fn sort_range(&mut self, start: usize, end: usize, shift: usize) {
        let mut counts = [0usize; 256];
        for p in start..end {
            counts[self.key(self.order1[p], shift)] += 1;
        }
        let (mut heads, ends) = bucket_bounds(&counts, start);

        self.placed[start..end].fill(false);
        for i in start..end {
            if self.placed[i] {
                continue;
            }
            let mut carried = self.order1[i];
            loop {
                let bucket = self.key(carried, shift);
                let dest = heads[bucket];
                heads[bucket] += 1;
                self.placed[dest] = true;
                self.progress.tick();
                if dest == i {
                    self.order1[i] = carried;
                    break;
                }
                std::mem::swap(&mut carried, &mut self.order1[dest]);
            }
        }

        if shift > 0 {
            let mut lo = start;
            for &hi in &ends {
                if hi - lo > 1 {
                    self.sort_range(lo, hi, shift - 1);
                }
                lo = hi;
            }
        }
    }
}

impl Arena {
    /// Sorts `order1` by forward sequence, keeping `order2` on the mates
    ///
    /// Starts over from [`Arena::fill_identity_order`] unless `order2` already holds the
    /// mate positions of every read. Afterwards `order1[p]` is the record at sorted
    /// position `p` and `order2[p]` the sorted position of its mate. Equal reads end up
    /// adjacent in no particular order.
    ///
    /// On error (scratch allocation only) the orders are left untouched.
    pub fn sort_buffer(&mut self) -> Result<()> {
        let n = self.read_count();
        let mut placed = try_zeroed::<bool>(n)?;
        if self.layout != OrderLayout::ForwardSorted || self.paired != n {
            self.fill_identity_order();
        }
        debug!(reads = n, "sorting forward strands");

        let mut sorter = ForwardSorter {
            records: bytemuck::cast_slice(&self.records),
            record_size: self.record_size(),
            depth: self.packed_bytes(),
            order1: &mut self.order1[..n],
            order2: &mut self.order2[..n],
            placed: &mut placed,
            progress: Progress::new("forward"),
        };
        if n > 1 {
            sorter.sort_range(0, n, 0);
        }
        self.layout = OrderLayout::ForwardSorted;
        Ok(())
    }

    /// Sorts `order1` by reverse-complement sequence
    ///
    /// Starts from the byte holding the last base and walks toward the first one,
    /// bucketing on [`complement_byte`]. `order2` is not used by the sort itself; if a
    /// forward sort left mate positions in it they are turned back into mate ids first.
    pub fn comp_sort_buffer(&mut self) -> Result<()> {
        let n = self.read_count();
        let mut placed = try_zeroed::<bool>(n)?;
        if self.layout == OrderLayout::ForwardSorted || self.paired != n {
            self.fill_identity_order();
        }
        debug!(reads = n, "sorting reverse-complement strands");

        let last = (self.read_size() - 1) / 4;
        let mut sorter = ComplementSorter {
            records: bytemuck::cast_slice(&self.records),
            record_size: self.record_size(),
            order1: &mut self.order1[..n],
            placed: &mut placed,
            progress: Progress::new("complement"),
        };
        if n > 1 {
            sorter.sort_range(0, n, last);
        }
        self.layout = OrderLayout::Complement;
        Ok(())
    }

    /// Moves every record to its forward-sorted position
    ///
    /// Follows the cycles of `order1` with a single record of scratch, then resets
    /// `order1` to the identity. `order2` already holds positions and is kept as is,
    /// so afterwards record ids and forward ranks coincide. Does nothing unless the
    /// last sort was [`Arena::sort_buffer`] over every loaded read.
    pub fn apply_forward_order(&mut self) -> Result<()> {
        if self.layout != OrderLayout::ForwardSorted || self.paired != self.read_count() {
            return Ok(());
        }
        let n = self.read_count();
        let size = self.record_size();
        let mut done = try_zeroed::<bool>(n)?;
        let mut scratch = try_zeroed::<u8>(size)?;
        debug!(reads = n, "compacting records into forward order");

        let order1 = &self.order1[..n];
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(&mut self.records);
        for i in 0..n {
            if done[i] {
                continue;
            }
            done[i] = true;
            if order1[i] as usize == i {
                continue;
            }
            scratch.copy_from_slice(&bytes[i * size..(i + 1) * size]);
            let mut j = i;
            loop {
                let src = order1[j] as usize;
                if src == i {
                    bytes[j * size..(j + 1) * size].copy_from_slice(&scratch);
                    break;
                }
                bytes.copy_within(src * size..(src + 1) * size, j * size);
                done[src] = true;
                j = src;
            }
        }

        self.reset_order1();
        self.layout = OrderLayout::Pairing;
        Ok(())
    }
}
