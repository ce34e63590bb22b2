//! Prefix hash index
//!
//! Two tables of [`HASH_BUCKETS`] cumulative offsets, keyed on the first eight bases
//! (two packed bytes) of each strand. Bucket `k` of a table spans the sorted positions
//! `index[k]..index[k + 1]`, the last bucket ending at the read count.

use std::ops::Range;

use tracing::debug;

use crate::arena::Arena;
use crate::error::Result;
use crate::nuc::complement_byte;
use crate::HASH_BUCKETS;

/// Forward hash key: the first two packed bytes of a record
#[inline]
#[must_use]
pub fn forward_key(record: &[u8]) -> usize {
    ((record[0] as usize) << 8) | record[1] as usize
}

/// Reverse hash key: the first two bytes of the reverse-complement frame
///
/// `last` is the index of the byte holding the final base of the read.
#[inline]
#[must_use]
pub fn reverse_key(record: &[u8], last: usize) -> usize {
    ((complement_byte(record[last]) as usize) << 8) | complement_byte(record[last - 1]) as usize
}

/// Half-open range of sorted positions covered by bucket `key`
#[inline]
pub(crate) fn bucket_range(index: &[u32], key: usize, read_count: usize) -> Range<usize> {
    let start = index[key] as usize;
    let end = index.get(key + 1).map_or(read_count, |&e| e as usize);
    start..end
}

/// Turns per-key counts into exclusive prefix sums in place
fn prefix_sum(index: &mut [u32]) {
    let mut acc = 0u32;
    for slot in index.iter_mut() {
        let count = *slot;
        *slot = acc;
        acc += count;
    }
}

impl Arena {
    /// Rebuilds `index1` from the records in forward-sorted storage
    ///
    /// The key counts do not depend on the order, but the offsets are only meaningful
    /// once the records have been moved into forward order.
    pub fn build_forward_index(&mut self) -> Result<()> {
        let n = self.read_count();
        let mut index = std::mem::take(&mut self.index1);
        index.fill(0);
        for id in 0..n {
            index[forward_key(self.record(id))] += 1;
        }
        prefix_sum(&mut index);
        self.index1 = index;
        debug!(reads = n, "built forward hash index");
        Ok(())
    }

    /// Rebuilds `index2` from the reverse-complement frames of the records
    ///
    /// Offsets address the complement ordering held in `order1`.
    pub fn build_reverse_index(&mut self) -> Result<()> {
        let n = self.read_count();
        let last = (self.read_size() - 1) / 4;
        let mut index = std::mem::take(&mut self.index2);
        index.fill(0);
        for id in 0..n {
            index[reverse_key(self.record(id), last)] += 1;
        }
        prefix_sum(&mut index);
        self.index2 = index;
        debug!(reads = n, "built reverse hash index");
        Ok(())
    }
}
