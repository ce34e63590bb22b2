//! Packed-read arena
//!
//! The arena owns every read of an index as a fixed-size packed record, together with
//! the two permutation arrays and the two hash-bucket tables derived from them. Its shape
//! (read length, record size, slot count) is fixed at construction.
//!
//! Records are stored in 16-byte aligned lanes so that the vectorized codec can work
//! on whole blocks; a record is always a whole number of lanes.

use std::fmt;

use bytemuck::{Pod, Zeroable};
use tracing::debug;

use crate::error::{ArenaError, Result};
use crate::{nuc, HASH_BUCKETS, MIN_QUERY_LENGTH};

/// Alignment and granularity of packed records in bytes
pub const LANE_SIZE: usize = 16;

/// Largest number of records an arena can address (32-bit orders, signed references)
pub const MAX_RECORDS: usize = i32::MAX as usize;

/// Bytes of order tables held per record slot (`order1`, `order2`, complement ranks)
pub(crate) const ORDER_BYTES_PER_RECORD: usize = 3 * size_of::<u32>();

/// A 16-byte aligned block of packed bases
#[derive(Clone, Copy, Default, PartialEq, Eq)]
#[repr(C, align(16))]
pub(crate) struct Lane([u8; LANE_SIZE]);

// Safety: `Lane` is a plain byte array; its size equals its alignment so there is no padding.
unsafe impl Zeroable for Lane {}
unsafe impl Pod for Lane {}

/// Allocates a zero-initialized vector, reporting failure instead of aborting
pub(crate) fn try_zeroed<T: Zeroable + Clone>(len: usize) -> Result<Vec<T>> {
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(len)
        .map_err(|e| ArenaError::allocation::<T>(len, e))?;
    buffer.resize(len, T::zeroed());
    Ok(buffer)
}

/// Record size in bytes for reads of `read_length` bases
///
/// Four bases per byte, rounded up to a whole number of lanes.
#[must_use]
pub const fn record_size_for(read_length: usize) -> usize {
    nuc::packed_len(read_length).div_ceil(LANE_SIZE) * LANE_SIZE
}

/// How `order2` currently describes the pairing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OrderLayout {
    /// `order1` is the identity and `order2[id]` the record id of the mate
    Pairing,
    /// After a forward sort: `order2[p]` is the sorted position of the mate of `order1[p]`
    ForwardSorted,
    /// After a complement sort: `order2[id]` is the record id of the mate
    Complement,
}

/// The packed-read store
pub struct Arena {
    /// Packed records in storage order
    pub(crate) records: Vec<Lane>,
    /// Record ids in sorted order (forward, then complement after the second pass)
    pub(crate) order1: Vec<u32>,
    /// Pairing partner of each record, then sorted position of each mate
    pub(crate) order2: Vec<u32>,
    /// Forward hash buckets
    pub(crate) index1: Vec<u32>,
    /// Reverse-complement hash buckets
    pub(crate) index2: Vec<u32>,
    pub(crate) layout: OrderLayout,
    /// Leading records whose mates are recorded in `order2`
    pub(crate) paired: usize,

    read_size: usize,
    record_size: usize,
    read_count: usize,
    max_record: usize,
    pub(crate) letter_count: [u64; 4],
}
impl Arena {
    /// Creates an arena sized from a memory budget
    ///
    /// # Arguments
    ///
    /// * `capacity_bytes` - Memory budget for records and order tables
    /// * `read_length` - Fixed number of bases indexed per read
    /// * `max_reads` - Upper bound on the number of reads, `0` for no bound
    ///
    /// The slot count is the smallest of what fits the budget, `max_reads` and
    /// [`MAX_RECORDS`], rounded down to an even number so that pairs always fit.
    ///
    /// # Example
    ///
    /// ```
    /// use readix::Arena;
    ///
    /// let arena = Arena::new(1 << 20, 100, 1000).unwrap();
    /// assert_eq!(arena.record_size(), 32);
    /// assert_eq!(arena.max_record(), 1000);
    /// ```
    pub fn new(capacity_bytes: usize, read_length: usize, max_reads: usize) -> Result<Self> {
        if read_length < MIN_QUERY_LENGTH {
            return Err(ArenaError::ReadLengthTooShort(read_length).into());
        }
        let record_size = record_size_for(read_length);
        let mut max_record = capacity_bytes / (record_size + ORDER_BYTES_PER_RECORD);
        if max_reads > 0 {
            max_record = max_record.min(max_reads);
        }
        max_record = max_record.min(MAX_RECORDS) & !1;
        Self::with_shape(read_length, max_record)
    }

    /// Allocates an empty arena with exactly `max_record` slots
    pub(crate) fn with_shape(read_size: usize, max_record: usize) -> Result<Self> {
        if read_size < MIN_QUERY_LENGTH {
            return Err(ArenaError::ReadLengthTooShort(read_size).into());
        }
        let record_size = record_size_for(read_size);
        let records = try_zeroed::<Lane>(max_record * (record_size / LANE_SIZE))?;
        let order1 = try_zeroed::<u32>(max_record)?;
        let order2 = try_zeroed::<u32>(max_record)?;
        let index1 = try_zeroed::<u32>(HASH_BUCKETS)?;
        let index2 = try_zeroed::<u32>(HASH_BUCKETS)?;

        debug!(
            read_size,
            record_size,
            max_record,
            "allocated arena of {} bytes",
            max_record * (record_size + 2 * size_of::<u32>())
        );

        Ok(Self {
            records,
            order1,
            order2,
            index1,
            index2,
            layout: OrderLayout::Pairing,
            paired: 0,
            read_size,
            record_size,
            read_count: 0,
            max_record,
            letter_count: [0; 4],
        })
    }

    /// Number of bases indexed per read
    #[must_use]
    pub fn read_size(&self) -> usize {
        self.read_size
    }

    /// Size of a packed record in bytes (a multiple of [`LANE_SIZE`])
    #[must_use]
    pub fn record_size(&self) -> usize {
        self.record_size
    }

    /// Number of packed bytes carrying bases; the rest of a record is zero padding
    #[must_use]
    pub fn packed_bytes(&self) -> usize {
        nuc::packed_len(self.read_size)
    }

    /// Number of reads loaded (always even)
    #[must_use]
    pub fn read_count(&self) -> usize {
        self.read_count
    }

    /// Same as [`Arena::read_count`]
    #[must_use]
    pub fn len(&self) -> usize {
        self.read_count
    }

    /// True until a first pair is appended
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read_count == 0
    }

    /// Number of record slots
    #[must_use]
    pub fn max_record(&self) -> usize {
        self.max_record
    }

    /// Base composition of the loaded reads, in code order A, C, T, G
    #[must_use]
    pub fn letter_count(&self) -> [u64; 4] {
        self.letter_count
    }

    /// First order table (see [`Arena::sort_buffer`] and [`Arena::comp_sort_buffer`])
    #[must_use]
    pub fn order1(&self) -> &[u32] {
        &self.order1[..self.read_count]
    }

    /// Second order table (pairing, then mate positions after the forward sort)
    #[must_use]
    pub fn order2(&self) -> &[u32] {
        &self.order2[..self.read_count]
    }

    /// Forward hash buckets
    #[must_use]
    pub fn index1(&self) -> &[u32] {
        &self.index1
    }

    /// Reverse-complement hash buckets
    #[must_use]
    pub fn index2(&self) -> &[u32] {
        &self.index2
    }

    /// All record bytes of the loaded reads, in storage order
    #[must_use]
    pub fn records_bytes(&self) -> &[u8] {
        let bytes: &[u8] = bytemuck::cast_slice(&self.records);
        &bytes[..self.read_count * self.record_size]
    }

    pub(crate) fn records_bytes_mut(&mut self) -> &mut [u8] {
        bytemuck::cast_slice_mut(&mut self.records)
    }

    /// Packed bytes of record `id`
    ///
    /// # Panics
    ///
    /// Panics if `id` is not a slot of the arena
    #[inline]
    pub(crate) fn record(&self, id: usize) -> &[u8] {
        let bytes: &[u8] = bytemuck::cast_slice(&self.records);
        &bytes[id * self.record_size..(id + 1) * self.record_size]
    }

    /// Packed bytes of a loaded record
    pub fn record_at(&self, id: usize) -> Result<&[u8]> {
        self.check_record(id)?;
        Ok(self.record(id))
    }

    /// Mutable packed bytes of a loaded record
    pub fn record_at_mut(&mut self, id: usize) -> Result<&mut [u8]> {
        self.check_record(id)?;
        let size = self.record_size;
        Ok(&mut self.records_bytes_mut()[id * size..(id + 1) * size])
    }

    fn check_record(&self, id: usize) -> Result<()> {
        if id >= self.read_count {
            return Err(ArenaError::RecordOutOfRange {
                requested: id,
                available: self.read_count,
            }
            .into());
        }
        Ok(())
    }

    /// Encodes a read pair into the next two free slots
    ///
    /// Reads longer than the indexed length are truncated; shorter reads are rejected.
    /// On error the arena is left unchanged.
    ///
    /// # Example
    ///
    /// ```
    /// use readix::Arena;
    ///
    /// let mut arena = Arena::new(1 << 16, 8, 0).unwrap();
    /// arena.append_pair(b"AACCTTGG", b"CCGGAATTAA").unwrap();
    /// assert_eq!(arena.read_count(), 2);
    /// assert!(arena.append_pair(b"AACC", b"CCGGAATT").is_err());
    /// assert_eq!(arena.read_count(), 2);
    /// ```
    pub fn append_pair(&mut self, forward: &[u8], reverse: &[u8]) -> Result<()> {
        if self.read_count + 2 > self.max_record {
            return Err(ArenaError::CapacityExceeded {
                capacity: self.max_record,
                requested: self.read_count + 2,
            }
            .into());
        }
        for read in [forward, reverse] {
            if read.len() < self.read_size {
                return Err(ArenaError::ReadTooShort {
                    expected: self.read_size,
                    got: read.len(),
                }
                .into());
            }
        }

        // Slots past `read_count` are free: a failed encode leaves no visible state
        let size = self.record_size;
        let first = self.read_count;
        for (slot, read) in [forward, reverse].into_iter().enumerate() {
            let offset = (first + slot) * size;
            let read = &read[..self.read_size];
            nuc::encode_into(read, &mut self.records_bytes_mut()[offset..offset + size])?;
        }

        for read in [forward, reverse] {
            for &base in &read[..self.read_size] {
                if let Some(code) = nuc::code_of(base) {
                    self.letter_count[code as usize] += 1;
                }
            }
        }
        self.read_count += 2;
        Ok(())
    }

    /// Resets `order1` to the identity and `order2` to the pairing partners
    ///
    /// Mates already recorded in `order2` are kept, whatever sort ran last; records
    /// appended since then pair as `2i` with `2i+1`.
    pub fn fill_identity_order(&mut self) {
        let n = self.read_count;
        if self.layout == OrderLayout::ForwardSorted {
            self.unsort_pairing();
        }
        for i in 0..n {
            self.order1[i] = i as u32;
        }
        for i in self.paired.min(n)..n {
            self.order2[i] = (i ^ 1) as u32;
        }
        self.paired = n;
        self.layout = OrderLayout::Pairing;
    }

    /// Turns mate positions back into mate ids, undoing a forward sort in place
    fn unsort_pairing(&mut self) {
        let n = self.paired.min(self.read_count);
        let (order1, order2) = (&mut self.order1[..n], &mut self.order2[..n]);
        for p in 0..n {
            order2[p] = order1[order2[p] as usize];
        }
        // permute both tables by `order1` until it is the identity
        for p in 0..n {
            while order1[p] as usize != p {
                let q = order1[p] as usize;
                order1.swap(p, q);
                order2.swap(p, q);
            }
        }
        self.layout = OrderLayout::Pairing;
    }

    /// Resets `order1` to the identity, leaving `order2` untouched
    pub(crate) fn reset_order1(&mut self) {
        for (i, id) in self.order1[..self.read_count].iter_mut().enumerate() {
            *id = i as u32;
        }
    }

    /// Inverts `order1` into the complement rank of every record
    pub(crate) fn complement_ranks(&self) -> Result<Vec<u32>> {
        let mut complement = try_zeroed::<u32>(self.read_count)?;
        for (rank, &id) in self.order1[..self.read_count].iter().enumerate() {
            complement[id as usize] = rank as u32;
        }
        Ok(complement)
    }

    /// Marks `read_count` slots as loaded after they were filled in place, with
    /// `order1` in complement order and `order2` holding mate ids
    pub(crate) fn restore_sorted(&mut self, read_count: usize) {
        debug_assert!(read_count <= self.max_record);
        self.read_count = read_count;
        self.paired = read_count;
        self.layout = OrderLayout::Complement;
    }
}

impl fmt::Debug for Arena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arena")
            .field("read_size", &self.read_size)
            .field("record_size", &self.record_size)
            .field("read_count", &self.read_count)
            .field("max_record", &self.max_record)
            .field("letter_count", &self.letter_count)
            .field("layout", &self.layout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod testing {
    use super::*;
    use crate::error::{CodecError, Error};

    #[test]
    fn test_record_size() {
        assert_eq!(record_size_for(8), 16);
        assert_eq!(record_size_for(64), 16);
        assert_eq!(record_size_for(65), 32);
        assert_eq!(record_size_for(150), 48);
    }

    #[test]
    fn test_capacity_clamping() -> Result<()> {
        // 16 byte records + 12 bytes of orders per slot
        let arena = Arena::new(28 * 10 + 27, 8, 0)?;
        assert_eq!(arena.max_record(), 10);

        let arena = Arena::new(28 * 11, 8, 0)?;
        assert_eq!(arena.max_record(), 10, "slot count is kept even");

        let arena = Arena::new(1 << 20, 8, 6)?;
        assert_eq!(arena.max_record(), 6);
        Ok(())
    }

    #[test]
    fn test_read_length_too_short() {
        assert!(matches!(
            Arena::new(1 << 10, 7, 0),
            Err(Error::ArenaError(ArenaError::ReadLengthTooShort(7)))
        ));
    }

    #[test]
    fn test_records_aligned() -> Result<()> {
        let arena = Arena::new(1 << 12, 20, 0)?;
        let bytes: &[u8] = bytemuck::cast_slice(&arena.records);
        assert_eq!(bytes.as_ptr() as usize % LANE_SIZE, 0);
        Ok(())
    }

    #[test]
    fn test_append_pair() -> Result<()> {
        let mut arena = Arena::new(1 << 12, 8, 0)?;
        assert!(arena.is_empty());
        arena.append_pair(b"AACCTTGG", b"ccggaatt")?;
        assert_eq!(arena.read_count(), 2);
        assert_eq!(arena.len(), 2);
        assert!(!arena.is_empty());
        assert_eq!(arena.record_at(0)?[..2], [0b00_00_01_01, 0b10_10_11_11]);
        assert_eq!(arena.record_at(1)?[..2], [0b01_01_11_11, 0b00_00_10_10]);
        assert!(arena.record_at(0)?[2..].iter().all(|&b| b == 0));
        assert_eq!(arena.letter_count(), [4, 4, 4, 4]);
        assert!(arena.record_at(2).is_err());
        Ok(())
    }

    #[test]
    fn test_append_truncates_long_reads() -> Result<()> {
        let mut arena = Arena::new(1 << 12, 9, 0)?;
        arena.append_pair(b"AAAAAAAAAGGGG", b"CCCCCCCCCN")?;
        assert_eq!(nuc::decode(arena.record_at(0)?, 0, 9)?, "AAAAAAAAA");
        assert_eq!(nuc::decode(arena.record_at(1)?, 0, 9)?, "CCCCCCCCC");
        // the padding past the read stays zero
        assert_eq!(arena.record_at(0)?[2], 0);
        assert_eq!(arena.letter_count(), [9, 9, 0, 0]);
        Ok(())
    }

    #[test]
    fn test_append_short_read_rejected() -> Result<()> {
        let mut arena = Arena::new(1 << 12, 8, 0)?;
        let result = arena.append_pair(b"AACCTTGG", b"AACC");
        assert!(matches!(
            result,
            Err(Error::ArenaError(ArenaError::ReadTooShort {
                expected: 8,
                got: 4
            }))
        ));
        assert_eq!(arena.read_count(), 0);
        Ok(())
    }

    #[test]
    fn test_append_invalid_leaves_state() -> Result<()> {
        let mut arena = Arena::new(1 << 12, 8, 0)?;
        arena.append_pair(b"AACCTTGG", b"CCGGAATT")?;
        let result = arena.append_pair(b"TTTTTTTT", b"AACCNTGG");
        assert!(matches!(
            result,
            Err(Error::CodecError(CodecError::InvalidAlphabet { base: b'N', .. }))
        ));
        assert_eq!(arena.read_count(), 2);
        assert_eq!(arena.letter_count(), [4, 4, 4, 4]);
        Ok(())
    }

    #[test]
    fn test_capacity_exceeded() -> Result<()> {
        let mut arena = Arena::new(1 << 12, 8, 4)?;
        arena.append_pair(b"AACCTTGG", b"CCGGAATT")?;
        arena.append_pair(b"TTGGAACC", b"AACCTTGG")?;
        let result = arena.append_pair(b"GGGGGGGG", b"CCCCCCCC");
        assert!(matches!(
            result,
            Err(Error::ArenaError(ArenaError::CapacityExceeded {
                capacity: 4,
                requested: 6
            }))
        ));
        assert_eq!(arena.read_count(), 4);
        Ok(())
    }

    #[test]
    fn test_fill_identity_order() -> Result<()> {
        let mut arena = Arena::new(1 << 12, 8, 0)?;
        for _ in 0..3 {
            arena.append_pair(b"AACCTTGG", b"CCGGAATT")?;
        }
        arena.fill_identity_order();
        let first = (arena.order1().to_vec(), arena.order2().to_vec());
        arena.fill_identity_order();
        assert_eq!(arena.order1(), first.0.as_slice());
        assert_eq!(arena.order2(), first.1.as_slice());
        assert_eq!(arena.order1(), &[0, 1, 2, 3, 4, 5]);
        assert_eq!(arena.order2(), &[1, 0, 3, 2, 5, 4]);
        Ok(())
    }

    #[test]
    fn test_fill_identity_order_after_sort() -> Result<()> {
        let mut arena = Arena::new(1 << 12, 8, 0)?;
        arena.append_pair(b"TTTTTTTT", b"CCCCCCCC")?;
        arena.append_pair(b"GGGGGGGG", b"AAAAAAAA")?;
        arena.fill_identity_order();
        arena.sort_buffer()?;
        assert_eq!(arena.order1(), &[3, 1, 0, 2]);

        arena.fill_identity_order();
        assert_eq!(arena.order1(), &[0, 1, 2, 3]);
        assert_eq!(arena.order2(), &[1, 0, 3, 2]);
        Ok(())
    }

    #[test]
    fn test_fill_identity_order_keeps_compacted_mates() -> Result<()> {
        let mut arena = Arena::new(1 << 12, 8, 0)?;
        arena.append_pair(b"GGGGGGGG", b"AAAAAAAA")?;
        arena.append_pair(b"CCCCCCCC", b"TTTTTTTT")?;
        arena.fill_identity_order();
        arena.sort_buffer()?;
        arena.apply_forward_order()?;
        // storage order is now A, C, T, G
        assert_eq!(arena.order2(), &[3, 2, 1, 0]);

        arena.append_pair(b"ACACACAC", b"GTGTGTGT")?;
        arena.fill_identity_order();
        assert_eq!(arena.order1(), &[0, 1, 2, 3, 4, 5]);
        assert_eq!(arena.order2(), &[3, 2, 1, 0, 5, 4]);
        Ok(())
    }
}
