use std::fmt;

use crate::error::{Result, SearchError};

/// A read of the index seen on one strand
///
/// The rank is the position of the read in the ordering of its strand: the forward
/// ordering for [`ReadRef::Forward`] and the reverse-complement ordering for
/// [`ReadRef::Reverse`].
///
/// # Example
///
/// ```
/// use readix::ReadRef;
///
/// assert_eq!(ReadRef::Forward(0).to_signed(), 1);
/// assert_eq!(ReadRef::Reverse(4).to_signed(), -5);
/// assert_eq!(ReadRef::from_signed(-5).unwrap(), ReadRef::Reverse(4));
/// assert!(ReadRef::from_signed(0).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ReadRef {
    /// Rank in the forward ordering (also the record id of the read)
    Forward(u32),

    /// Rank in the reverse-complement ordering
    Reverse(u32),
}
impl ReadRef {
    /// Rank of the read in the ordering of its strand
    #[inline]
    #[must_use]
    pub fn rank(self) -> usize {
        match self {
            Self::Forward(rank) | Self::Reverse(rank) => rank as usize,
        }
    }

    #[inline]
    #[must_use]
    pub fn is_reverse(self) -> bool {
        matches!(self, Self::Reverse(_))
    }

    /// Signed one-based form: `rank + 1` forward, `-(rank + 1)` reverse
    #[inline]
    #[must_use]
    pub fn to_signed(self) -> i64 {
        match self {
            Self::Forward(rank) => i64::from(rank) + 1,
            Self::Reverse(rank) => -(i64::from(rank) + 1),
        }
    }

    /// Parses the signed one-based form, rejecting zero and out-of-range values
    pub fn from_signed(value: i64) -> Result<Self> {
        let rank = value.unsigned_abs().checked_sub(1);
        match rank.and_then(|r| u32::try_from(r).ok()) {
            Some(rank) if value > 0 => Ok(Self::Forward(rank)),
            Some(rank) => Ok(Self::Reverse(rank)),
            None => Err(SearchError::InvalidReadRef(value).into()),
        }
    }
}

impl fmt::Display for ReadRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_signed())
    }
}

/// A contiguous run of sorted positions sharing a query prefix
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrefixRange {
    /// First sorted position of the run
    pub start: usize,

    /// Number of reads in the run (`0` when nothing matches)
    pub count: usize,
}
impl PrefixRange {
    /// An empty range
    pub const EMPTY: Self = Self { start: 0, count: 0 };

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    #[inline]
    #[must_use]
    pub fn end(&self) -> usize {
        self.start + self.count
    }

    /// Sorted positions of the run
    #[inline]
    pub fn positions(&self) -> std::ops::Range<usize> {
        self.start..self.end()
    }
}

/// Match counts of a query on both strands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StrandCounts {
    pub forward: PrefixRange,
    pub reverse: PrefixRange,
}
impl StrandCounts {
    /// Total number of matching reads over both strands
    #[must_use]
    pub fn total(&self) -> usize {
        self.forward.count + self.reverse.count
    }

    /// First matching read, preferring the forward strand
    #[must_use]
    pub fn first(&self) -> Option<ReadRef> {
        if !self.forward.is_empty() {
            Some(ReadRef::Forward(self.forward.start as u32))
        } else if !self.reverse.is_empty() {
            Some(ReadRef::Reverse(self.reverse.start as u32))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod testing {
    use super::*;

    #[test]
    fn test_signed_round_trip() -> Result<()> {
        for r in [ReadRef::Forward(0), ReadRef::Reverse(0), ReadRef::Forward(u32::MAX)] {
            assert_eq!(ReadRef::from_signed(r.to_signed())?, r);
        }
        Ok(())
    }

    #[test]
    fn test_invalid_signed() {
        assert!(ReadRef::from_signed(0).is_err());
        assert!(ReadRef::from_signed(i64::from(u32::MAX) + 2).is_err());
        assert!(ReadRef::from_signed(i64::MIN).is_err());
    }

    #[test]
    fn test_first_prefers_forward() {
        let range = |start, count| PrefixRange { start, count };
        let counts = StrandCounts {
            forward: range(4, 0),
            reverse: range(2, 3),
        };
        assert_eq!(counts.first(), Some(ReadRef::Reverse(2)));
        let counts = StrandCounts {
            forward: range(7, 1),
            ..counts
        };
        assert_eq!(counts.first(), Some(ReadRef::Forward(7)));
        assert_eq!(StrandCounts::default().first(), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(ReadRef::Reverse(9).to_string(), "-10");
        assert_eq!(ReadRef::Forward(9).to_string(), "10");
    }

    #[test]
    fn test_prefix_range() {
        let range = PrefixRange { start: 4, count: 3 };
        assert_eq!(range.end(), 7);
        assert_eq!(range.positions().collect::<Vec<_>>(), [4, 5, 6]);
        assert!(PrefixRange::EMPTY.is_empty());
    }
}
