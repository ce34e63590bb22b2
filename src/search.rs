//! Prefix queries over a built index
//!
//! A [`ReadIndex`] is an [`Arena`] whose records sit in forward-sorted storage, with
//! `order1` holding the reverse-complement ordering and both hash tables built. It
//! only hands out shared references, so it can be queried from many threads at once.
//!
//! Queries on the reverse strand are compared against the reverse-complement frame of
//! each record. When the read length is not a multiple of four that frame starts with
//! the complement of the zero padding (`T` bases), so queries are shifted by the same
//! number of bases before they are compared.

use std::cmp::Ordering;

use tracing::info;

use crate::arena::Arena;
use crate::error::{CodecError, Result, SearchError};
use crate::hash::bucket_range;
use crate::nuc::{self, complement_byte, LAST_BYTE_MASK};
use crate::record::{PrefixRange, ReadRef, StrandCounts};
use crate::MIN_QUERY_LENGTH;

/// Ordering a query is compared against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Strand {
    Forward,
    Reverse,
}

/// A packed query lined up with the frames of one ordering
#[derive(Debug)]
struct PackedQuery {
    bytes: Vec<u8>,
    nbases: usize,
}
impl PackedQuery {
    fn hash_key(&self) -> usize {
        ((self.bytes[0] as usize) << 8) | self.bytes[1] as usize
    }
}

/// Checks a query before any table is touched
fn check_query(key: &[u8], length: usize) -> Result<()> {
    if length < MIN_QUERY_LENGTH {
        return Err(SearchError::QueryTooShort {
            min: MIN_QUERY_LENGTH,
            got: length,
        }
        .into());
    }
    if length > key.len() {
        return Err(SearchError::KeyTooShort {
            length,
            key: key.len(),
        }
        .into());
    }
    Ok(())
}

/// Shifts a packed query right by `pad` bases and fills them with `T`
///
/// The result is one byte longer than the input when `pad > 0`.
fn shift_query(packed: &[u8], pad: usize) -> Vec<u8> {
    if pad == 0 {
        return packed.to_vec();
    }
    let carry = 2 * pad as u32;
    let keep = 8 - carry;
    let mut out = Vec::with_capacity(packed.len() + 1);
    let mut prev = 0u8;
    for &byte in packed.iter().chain(std::iter::once(&0)) {
        out.push(prev.wrapping_shl(keep) | byte.wrapping_shr(carry));
        prev = byte;
    }
    // the complement of an A (zero) padding base is T (0b10)
    out[0] |= (0xFFu8 << keep) & 0xAA;
    out
}

/// First position of `lo..hi` for which `before` is false, assuming it is monotone
fn partition(mut lo: usize, mut hi: usize, before: impl Fn(usize) -> bool) -> usize {
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if before(mid) {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    lo
}

/// A frozen, queryable read index
///
/// # Example
///
/// ```
/// use readix::{Arena, ReadIndex, ReadRef};
///
/// let mut arena = Arena::new(1 << 16, 8, 0).unwrap();
/// arena.append_pair(b"AACCTTGG", b"CCGGAATT").unwrap();
/// arena.append_pair(b"TTGGAACC", b"AACCTTGG").unwrap();
/// let index = ReadIndex::build(arena).unwrap();
///
/// let hits = index.lookup_forward(b"AACCTTGG", 8).unwrap();
/// assert_eq!(hits.count, 2);
/// let first = ReadRef::Forward(hits.start as u32);
/// assert_eq!(index.get_sequence(first, 0, 8).unwrap(), "AACCTTGG");
/// ```
pub struct ReadIndex {
    arena: Arena,
    /// Forward record id -> rank in the complement ordering
    complement: Vec<u32>,
    /// Index of the byte holding the last base of a read
    last: usize,
    /// Padding bases leading the reverse-complement frame
    pad: usize,
}
impl ReadIndex {
    /// Sorts both strands of the arena and builds the hash tables
    ///
    /// Records are moved into forward-sorted storage, so forward ranks and record ids
    /// coincide in the returned index.
    pub fn build(mut arena: Arena) -> Result<Self> {
        info!(reads = arena.read_count(), read_size = arena.read_size(), "building index");
        arena.fill_identity_order();
        arena.sort_buffer()?;
        arena.apply_forward_order()?;
        arena.comp_sort_buffer()?;
        Self::from_sorted(arena)
    }

    /// Completes an arena whose records are in forward order and whose `order1` holds
    /// the complement ordering
    pub(crate) fn from_sorted(mut arena: Arena) -> Result<Self> {
        let complement = arena.complement_ranks()?;
        arena.build_forward_index()?;
        arena.build_reverse_index()?;
        let read_size = arena.read_size();
        Ok(Self {
            arena,
            complement,
            last: (read_size - 1) / 4,
            pad: (4 - read_size % 4) % 4,
        })
    }

    /// The underlying arena
    #[must_use]
    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    /// Rank of each record in the complement ordering
    #[must_use]
    pub fn complement(&self) -> &[u32] {
        &self.complement
    }

    /// Gives the arena back, e.g. to load more reads and build again
    ///
    /// Pairs keep their mates across rebuilds.
    #[must_use]
    pub fn into_arena(self) -> Arena {
        self.arena
    }

    /// Number of bases per indexed read
    #[must_use]
    pub fn read_size(&self) -> usize {
        self.arena.read_size()
    }

    /// Number of indexed reads
    #[must_use]
    pub fn len(&self) -> usize {
        self.arena.read_count()
    }

    /// True if no read was indexed
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    /// Record id of the read behind a reference
    pub fn record_id(&self, read: ReadRef) -> Result<usize> {
        self.check_ref(read)?;
        Ok(match read {
            ReadRef::Forward(rank) => rank as usize,
            ReadRef::Reverse(rank) => self.arena.order1[rank as usize] as usize,
        })
    }

    fn check_ref(&self, read: ReadRef) -> Result<()> {
        if read.rank() >= self.len() {
            return Err(SearchError::InvalidReadRef(read.to_signed()).into());
        }
        Ok(())
    }

    /// Byte `j` of the frame at `rank` in the ordering of `strand`
    #[inline]
    fn frame_byte(&self, strand: Strand, rank: usize, j: usize) -> u8 {
        match strand {
            Strand::Forward => self.arena.record(rank)[j],
            Strand::Reverse => {
                let id = self.arena.order1[rank] as usize;
                complement_byte(self.arena.record(id)[self.last - j])
            }
        }
    }

    /// Compares the first `nbases` bases of two frames given byte by byte
    ///
    /// Only the bytes covering `nbases` are read.
    #[inline]
    fn compare_frames(
        nbases: usize,
        left: impl Fn(usize) -> u8,
        right: impl Fn(usize) -> u8,
    ) -> Ordering {
        let full = nbases / 4;
        for j in 0..full {
            match left(j).cmp(&right(j)) {
                Ordering::Equal => {}
                other => return other,
            }
        }
        if nbases % 4 == 0 {
            return Ordering::Equal;
        }
        let mask = LAST_BYTE_MASK[nbases % 4];
        (left(full) & mask).cmp(&(right(full) & mask))
    }

    fn compare(&self, strand: Strand, rank: usize, packed: &PackedQuery) -> Ordering {
        Self::compare_frames(
            packed.nbases,
            |j| self.frame_byte(strand, rank, j),
            |j| packed.bytes[j],
        )
    }

    /// Packs and aligns a query for the ordering of `strand`
    fn pack_query(&self, strand: Strand, key: &[u8], length: usize) -> Result<PackedQuery> {
        let packed = nuc::encode(&key[..length])?;
        Ok(match strand {
            Strand::Forward => PackedQuery {
                bytes: packed,
                nbases: length,
            },
            Strand::Reverse => PackedQuery {
                bytes: shift_query(&packed, self.pad),
                nbases: length + self.pad,
            },
        })
    }

    fn search(&self, strand: Strand, key: &[u8], length: usize) -> Result<PrefixRange> {
        check_query(key, length)?;
        if length > self.read_size() || self.is_empty() {
            return Ok(PrefixRange::EMPTY);
        }
        let packed = self.pack_query(strand, key, length)?;
        let index = match strand {
            Strand::Forward => self.arena.index1(),
            Strand::Reverse => self.arena.index2(),
        };
        let bucket = bucket_range(index, packed.hash_key(), self.len());

        let start = partition(bucket.start, bucket.end, |p| {
            self.compare(strand, p, &packed) == Ordering::Less
        });
        let end = partition(start, bucket.end, |p| {
            self.compare(strand, p, &packed) != Ordering::Greater
        });
        Ok(PrefixRange {
            start,
            count: end - start,
        })
    }

    /// Forward-sorted positions of the reads starting with the first `length` bases of `key`
    pub fn lookup_forward(&self, key: &[u8], length: usize) -> Result<PrefixRange> {
        self.search(Strand::Forward, key, length)
    }

    /// Complement-sorted positions of the reads whose reverse complement starts with the
    /// first `length` bases of `key`
    pub fn lookup_reverse(&self, key: &[u8], length: usize) -> Result<PrefixRange> {
        self.search(Strand::Reverse, key, length)
    }

    /// First read starting with the query, forward strand first
    ///
    /// # Example
    ///
    /// ```
    /// use readix::{Arena, ReadIndex, ReadRef};
    ///
    /// let mut arena = Arena::new(1 << 16, 10, 0).unwrap();
    /// arena.append_pair(b"AACCGGTTAC", b"GGGGCCCCAA").unwrap();
    /// let index = ReadIndex::build(arena).unwrap();
    ///
    /// // reverse complement of the first read
    /// let hit = index.lookup(b"GTAACCGGTT", 10).unwrap();
    /// assert!(matches!(hit, Some(ReadRef::Reverse(_))));
    /// assert_eq!(index.lookup(b"TTTTTTTT", 8).unwrap(), None);
    /// ```
    pub fn lookup(&self, key: &[u8], length: usize) -> Result<Option<ReadRef>> {
        let forward = self.lookup_forward(key, length)?;
        if !forward.is_empty() {
            return Ok(Some(ReadRef::Forward(forward.start as u32)));
        }
        let reverse = self.lookup_reverse(key, length)?;
        Ok((!reverse.is_empty()).then(|| ReadRef::Reverse(reverse.start as u32)))
    }

    /// Matching ranges on both strands
    pub fn count(&self, key: &[u8], length: usize) -> Result<StrandCounts> {
        Ok(StrandCounts {
            forward: self.lookup_forward(key, length)?,
            reverse: self.lookup_reverse(key, length)?,
        })
    }

    /// Every read starting with the query, forward hits first
    pub fn read_ids(&self, key: &[u8], length: usize) -> Result<Vec<ReadRef>> {
        let counts = self.count(key, length)?;
        let forward = counts
            .forward
            .positions()
            .map(|p| ReadRef::Forward(p as u32));
        let reverse = counts
            .reverse
            .positions()
            .map(|p| ReadRef::Reverse(p as u32));
        Ok(forward.chain(reverse).collect())
    }

    /// The next read of the same ordering if it shares the first `length` bases
    ///
    /// Never crosses from one strand to the other.
    pub fn next(&self, current: ReadRef, length: usize) -> Result<Option<ReadRef>> {
        if length < MIN_QUERY_LENGTH {
            return Err(SearchError::QueryTooShort {
                min: MIN_QUERY_LENGTH,
                got: length,
            }
            .into());
        }
        self.check_ref(current)?;
        let rank = current.rank();
        if rank + 1 >= self.len() || length > self.read_size() {
            return Ok(None);
        }

        let (strand, nbases, next) = match current {
            ReadRef::Forward(_) => (Strand::Forward, length, ReadRef::Forward(rank as u32 + 1)),
            ReadRef::Reverse(_) => (
                Strand::Reverse,
                length + self.pad,
                ReadRef::Reverse(rank as u32 + 1),
            ),
        };
        let same = Self::compare_frames(
            nbases,
            |j| self.frame_byte(strand, rank, j),
            |j| self.frame_byte(strand, rank + 1, j),
        ) == Ordering::Equal;
        Ok(same.then_some(next))
    }

    /// Decodes `length` bases of a read starting at base `start` of its strand
    pub fn get_sequence(&self, read: ReadRef, start: usize, length: usize) -> Result<String> {
        let id = self.record_id(read)?;
        let record = self.arena.record(id);
        match read {
            ReadRef::Forward(_) => {
                if start.saturating_add(length) > self.read_size() {
                    return Err(CodecError::OutOfFrame {
                        start,
                        end: start.saturating_add(length),
                        available: self.read_size(),
                    }
                    .into());
                }
                nuc::decode(record, start, length)
            }
            ReadRef::Reverse(_) => nuc::decode_complement(record, self.read_size(), start, length),
        }
    }

    /// The mate of a read, on the opposite strand
    ///
    /// Paired reads face each other, so the mate of a forward hit is reported through its
    /// reverse complement and the mate of a reverse hit through its forward sequence.
    pub fn mate(&self, read: ReadRef) -> Result<ReadRef> {
        let id = self.record_id(read)?;
        let mate = self.arena.order2[id] as usize;
        Ok(match read {
            ReadRef::Forward(_) => ReadRef::Reverse(self.complement[mate]),
            ReadRef::Reverse(_) => ReadRef::Forward(mate as u32),
        })
    }
}

#[cfg(test)]
mod testing {
    use rand::{Rng, SeedableRng, rngs::SmallRng};

    use super::*;
    use crate::error::Error;
    use crate::nuc::BASES;
    use crate::RNG_SEED;

    fn reverse_complement(read: &[u8]) -> Vec<u8> {
        read.iter()
            .rev()
            .map(|&b| match b {
                b'A' => b'T',
                b'C' => b'G',
                b'G' => b'C',
                _ => b'A',
            })
            .collect()
    }

    fn pair_index() -> Result<ReadIndex> {
        let mut arena = Arena::new(1 << 16, 8, 0)?;
        arena.append_pair(b"AACCTTGG", b"CCGGAATT")?;
        arena.append_pair(b"TTGGAACC", b"AACCTTGG")?;
        ReadIndex::build(arena)
    }

    /// Random reads together with the index built from them
    fn random_index(pairs: usize, read_size: usize) -> Result<(Vec<Vec<u8>>, ReadIndex)> {
        let mut rng = SmallRng::seed_from_u64(RNG_SEED);
        let mut reads = Vec::new();
        let mut arena = Arena::new(1 << 22, read_size, 0)?;
        for _ in 0..pairs {
            // a small alphabet on the first bases keeps the buckets busy
            let mut pair = [Vec::new(), Vec::new()];
            for read in &mut pair {
                read.extend((0..4).map(|_| BASES[rng.random_range(0..2)]));
                read.extend((4..read_size).map(|_| BASES[rng.random_range(0..4)]));
            }
            arena.append_pair(&pair[0], &pair[1])?;
            reads.extend(pair);
        }
        Ok((reads, ReadIndex::build(arena)?))
    }

    #[test]
    fn test_shift_query() {
        // AACCTTGG shifted by one base: T AAC CTTG G___
        let packed = nuc::encode(b"AACCTTGG").unwrap();
        assert_eq!(
            shift_query(&packed, 1),
            [0b10_00_00_01, 0b01_10_10_11, 0b11_00_00_00]
        );
        assert_eq!(shift_query(&packed, 0), packed);
        assert_eq!(shift_query(&packed, 3)[0], 0b10_10_10_00);
    }

    #[test]
    fn test_two_pair_scenario() -> Result<()> {
        let index = pair_index()?;

        let range = index.lookup_forward(b"AACCTTGG", 8)?;
        assert_eq!(range.count, 2);
        for p in range.positions() {
            assert_eq!(index.get_sequence(ReadRef::Forward(p as u32), 0, 8)?, "AACCTTGG");
        }
        assert_eq!(index.lookup_forward(b"AACCTTGA", 8)?.count, 0);

        // reverse complements: CCAAGGTT (twice), AATTCCGG, GGTTCCAA
        let range = index.lookup_reverse(b"CCAAGGTT", 8)?;
        assert_eq!(range.count, 2);
        let hit = index.lookup(b"GGTTCCAA", 8)?;
        let Some(read @ ReadRef::Reverse(_)) = hit else {
            panic!("expected a reverse hit, got {hit:?}");
        };
        assert_eq!(index.get_sequence(read, 0, 8)?, "GGTTCCAA");

        // GGTTCCAA is read TTGGAACC on the reverse strand, its mate is AACCTTGG
        let mate = index.mate(read)?;
        assert!(matches!(mate, ReadRef::Forward(_)));
        assert_eq!(index.get_sequence(mate, 0, 8)?, "AACCTTGG");
        assert_eq!(index.mate(mate)?, read);
        Ok(())
    }

    #[test]
    fn test_forward_coverage() -> Result<()> {
        for read_size in [13, 16] {
            let (reads, index) = random_index(200, read_size)?;
            for read in &reads {
                for length in [8, 11, read_size] {
                    let range = index.lookup_forward(read, length)?;
                    let expected = reads.iter().filter(|r| r[..length] == read[..length]).count();
                    assert_eq!(range.count, expected);
                    let seq = index.get_sequence(ReadRef::Forward(range.start as u32), 0, length)?;
                    assert_eq!(seq.as_bytes(), &read[..length]);
                }
            }
        }
        Ok(())
    }

    #[test]
    fn test_reverse_coverage() -> Result<()> {
        for read_size in [9, 14, 15, 16] {
            let (reads, index) = random_index(200, read_size)?;
            let complements: Vec<Vec<u8>> = reads.iter().map(|r| reverse_complement(r)).collect();
            for rc in &complements {
                for length in [8, 10, read_size] {
                    let range = index.lookup_reverse(rc, length)?;
                    let expected = complements
                        .iter()
                        .filter(|r| r[..length] == rc[..length])
                        .count();
                    assert_eq!(range.count, expected, "{}", String::from_utf8_lossy(rc));
                    for p in range.positions() {
                        let seq = index.get_sequence(ReadRef::Reverse(p as u32), 0, length)?;
                        assert_eq!(seq.as_bytes(), &rc[..length]);
                    }
                }
            }
        }
        Ok(())
    }

    #[test]
    fn test_next_walks_ties() -> Result<()> {
        let (reads, index) = random_index(150, 12)?;
        for read in reads.iter().take(40) {
            let counts = index.count(read, 8)?;
            let mut current = ReadRef::Forward(counts.forward.start as u32);
            let mut seen = 1;
            while let Some(next) = index.next(current, 8)? {
                current = next;
                seen += 1;
            }
            assert_eq!(seen, counts.forward.count);

            let rc = reverse_complement(read);
            let reverse = index.lookup_reverse(&rc, 8)?;
            let mut current = ReadRef::Reverse(reverse.start as u32);
            let mut seen = 1;
            while let Some(next) = index.next(current, 8)? {
                assert!(next.is_reverse());
                current = next;
                seen += 1;
            }
            assert_eq!(seen, reverse.count);
        }
        Ok(())
    }

    #[test]
    fn test_read_ids() -> Result<()> {
        let index = pair_index()?;
        let ids = index.read_ids(b"AACCTTGG", 8)?;
        assert_eq!(ids.len(), 2);
        assert!(ids.iter().all(|r| !r.is_reverse()));
        let ids = index.read_ids(b"CCAAGGTT", 8)?;
        assert_eq!(ids.len(), 2);
        assert!(ids.iter().all(|r| r.is_reverse()));
        Ok(())
    }

    #[test]
    fn test_mates_are_involutive() -> Result<()> {
        let (_, index) = random_index(100, 10)?;
        for rank in 0..index.len() as u32 {
            for read in [ReadRef::Forward(rank), ReadRef::Reverse(rank)] {
                let mate = index.mate(read)?;
                assert_ne!(mate.is_reverse(), read.is_reverse());
                assert_eq!(index.mate(mate)?, read);
                assert_ne!(index.record_id(mate)?, index.record_id(read)?);
            }
        }
        Ok(())
    }

    #[test]
    fn test_rebuild_keeps_mates() -> Result<()> {
        let pairs: [(&[u8], &[u8]); 3] = [
            (b"GGGGGGGG", b"AAAAAAAA"),
            (b"CCCCCCCC", b"TTTTTTTT"),
            (b"ACACACAC", b"GTGTGTGT"),
        ];
        let mut arena = Arena::new(1 << 16, 8, 0)?;
        for (fwd, rev) in &pairs[..2] {
            arena.append_pair(fwd, rev)?;
        }
        let mut arena = ReadIndex::build(arena)?.into_arena();
        arena.append_pair(pairs[2].0, pairs[2].1)?;
        let index = ReadIndex::build(arena)?;

        for (fwd, rev) in pairs {
            for (read, expected) in [(fwd, rev), (rev, fwd)] {
                let hit = index.lookup_forward(read, 8)?;
                assert_eq!(hit.count, 1);
                let mate = index.mate(ReadRef::Forward(hit.start as u32))?;
                let mate_id = index.record_id(mate)? as u32;
                assert_eq!(
                    index.get_sequence(ReadRef::Forward(mate_id), 0, 8)?.as_bytes(),
                    expected
                );
            }
        }
        Ok(())
    }

    #[test]
    fn test_query_errors() -> Result<()> {
        let index = pair_index()?;
        assert!(matches!(
            index.lookup(b"AACCTTG", 7),
            Err(Error::SearchError(SearchError::QueryTooShort { min: 8, got: 7 }))
        ));
        assert!(matches!(
            index.lookup(b"AACCTTGG", 9),
            Err(Error::SearchError(SearchError::KeyTooShort { length: 9, key: 8 }))
        ));
        assert!(matches!(
            index.lookup(b"AACCNTGG", 8),
            Err(Error::CodecError(CodecError::InvalidAlphabet { base: b'N', .. }))
        ));
        assert!(index.next(ReadRef::Forward(4), 8).is_err());
        assert!(index.get_sequence(ReadRef::Reverse(0), 4, 5).is_err());
        assert!(index.get_sequence(ReadRef::Forward(0), 4, 5).is_err());
        Ok(())
    }

    #[test]
    fn test_query_longer_than_reads() -> Result<()> {
        let index = pair_index()?;
        assert_eq!(index.lookup(b"AACCTTGGA", 9)?, None);
        assert_eq!(index.count(b"AACCTTGGA", 9)?.total(), 0);
        Ok(())
    }

    #[test]
    fn test_empty_index() -> Result<()> {
        let index = ReadIndex::build(Arena::new(1 << 12, 8, 0)?)?;
        assert!(index.is_empty());
        assert_eq!(index.lookup(b"AACCTTGG", 8)?, None);
        Ok(())
    }

    #[test]
    fn test_index_is_sync() {
        fn assert_sync<T: Sync + Send>() {}
        assert_sync::<ReadIndex>();
    }
}
