use bytemuck::{Pod, Zeroable};

use crate::arena::{record_size_for, Arena, MAX_RECORDS};
use crate::error::{IndexError, Result};
use crate::{INDEX_MAGIC, INDEX_VERSION, MIN_QUERY_LENGTH};

/// Reads are stored as mate pairs
pub const FLAG_PAIRED: u32 = 1 << 0;

/// Records are stored in forward-sorted order
pub const FLAG_FORWARD_SORTED: u32 = 1 << 1;

/// Size of the header file in bytes
pub const SIZE_HEADER: usize = size_of::<IndexHeader>();

/// Header of a persisted index, stored alone in the `.ogx` file
#[derive(Clone, Copy, Debug, PartialEq, Eq, Zeroable, Pod)]
#[repr(C)]
pub struct IndexHeader {
    // File Type Metadata (12 bytes)
    /// Magic number
    magic: [u8; 8],
    /// Format version
    pub version: u32,

    // Shape (20 bytes)
    /// Bases indexed per read
    pub read_size: u32,
    /// Bytes per packed record
    pub record_size: u32,
    /// Number of stored reads
    pub read_count: u32,
    /// Number of slots of the arena that built the index
    pub max_record: u32,
    /// A bitfield describing the stored layout
    pub flags: u32,

    // Composition (32 bytes)
    /// Base counts in code order A, C, T, G
    pub letter_count: [u64; 4],

    /// Reserved for future use
    reserved: [u64; 6],
}
impl IndexHeader {
    /// Describes the layout of a built arena
    #[must_use]
    pub fn from_arena(arena: &Arena) -> Self {
        Self {
            magic: *INDEX_MAGIC,
            version: INDEX_VERSION,
            read_size: arena.read_size() as u32,
            record_size: arena.record_size() as u32,
            read_count: arena.read_count() as u32,
            max_record: arena.max_record() as u32,
            flags: FLAG_PAIRED | FLAG_FORWARD_SORTED,
            letter_count: arena.letter_count(),
            reserved: [0; 6],
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }

    /// Parses and validates a header
    ///
    /// `bytes` must be exactly [`SIZE_HEADER`] long.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let header: Self = bytemuck::pod_read_unaligned(bytes);
        if header.magic != *INDEX_MAGIC {
            return Err(IndexError::InvalidMagicNumber(header.magic).into());
        }
        if header.version != INDEX_VERSION {
            return Err(IndexError::UnsupportedVersion(header.version).into());
        }
        header.validate()?;
        Ok(header)
    }

    fn validate(&self) -> Result<()> {
        let inconsistent =
            |reason: &'static str| -> Result<()> { Err(IndexError::InconsistentHeader(reason).into()) };
        if (self.read_size as usize) < MIN_QUERY_LENGTH {
            return inconsistent("read size below the hash key length");
        }
        if self.record_size as usize != record_size_for(self.read_size as usize) {
            return inconsistent("record size does not match the read size");
        }
        if self.read_count > self.max_record || self.max_record as usize > MAX_RECORDS {
            return inconsistent("read count exceeds the record capacity");
        }
        if self.read_count % 2 != 0 {
            return inconsistent("odd number of paired reads");
        }
        if self.flags & FLAG_FORWARD_SORTED == 0 {
            return inconsistent("records are not stored in forward order");
        }
        Ok(())
    }

    #[must_use]
    pub fn is_paired(&self) -> bool {
        self.flags & FLAG_PAIRED != 0
    }
}

#[cfg(test)]
mod testing {
    use super::*;
    use crate::error::Error;

    fn sample_header() -> Result<IndexHeader> {
        let mut arena = Arena::new(1 << 12, 10, 0)?;
        arena.append_pair(b"ACGTACGTAC", b"TTTTGGGGCC")?;
        Ok(IndexHeader::from_arena(&arena))
    }

    #[test]
    fn test_header_size() {
        assert_eq!(SIZE_HEADER, 112);
    }

    #[test]
    fn test_header_round_trip() -> Result<()> {
        let header = sample_header()?;
        let parsed = IndexHeader::from_bytes(header.as_bytes())?;
        assert_eq!(parsed, header);
        assert_eq!(parsed.read_count, 2);
        assert_eq!(parsed.record_size, 16);
        assert_eq!(parsed.letter_count, [3, 5, 6, 6]);
        assert!(parsed.is_paired());
        Ok(())
    }

    #[test]
    fn test_header_bad_magic() -> Result<()> {
        let mut bytes = sample_header()?.as_bytes().to_vec();
        bytes[0] = b'X';
        assert!(matches!(
            IndexHeader::from_bytes(&bytes),
            Err(Error::IndexError(IndexError::InvalidMagicNumber(_)))
        ));
        Ok(())
    }

    #[test]
    fn test_header_inconsistent() -> Result<()> {
        let mut header = sample_header()?;
        header.record_size = 32;
        assert!(matches!(
            IndexHeader::from_bytes(header.as_bytes()),
            Err(Error::IndexError(IndexError::InconsistentHeader(_)))
        ));

        let mut header = sample_header()?;
        header.version += 1;
        assert!(matches!(
            IndexHeader::from_bytes(header.as_bytes()),
            Err(Error::IndexError(IndexError::UnsupportedVersion(_)))
        ));
        Ok(())
    }
}
