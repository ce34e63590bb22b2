//! On-disk layout of an index
//!
//! An index is persisted as four files sharing a prefix:
//!
//! * `<prefix>.ogx` - the [`IndexHeader`]
//! * `<prefix>.ofx` - the packed records in forward-sorted order
//! * `<prefix>.opx` - the mate positions (`order2`) as little-endian `u32`
//! * `<prefix>.orx` - the reverse-complement ordering (`order1`) as little-endian `u32`
//!
//! The hash tables and the complement ranks are rebuilt on load.

mod header;

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use memmap2::Mmap;
use tracing::{debug, info};

pub use header::{IndexHeader, FLAG_FORWARD_SORTED, FLAG_PAIRED, SIZE_HEADER};

use crate::arena::{try_zeroed, Arena};
use crate::error::{IndexError, Result};
use crate::ReadIndex;

/// Directory suffix of an index created from a name
pub const INDEX_DIR_SUFFIX: &str = "odx";

/// Paths of the four files of an index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexPaths {
    pub header: PathBuf,
    pub records: PathBuf,
    pub pairs: PathBuf,
    pub reverse: PathBuf,
}
impl IndexPaths {
    /// Paths sharing an arbitrary prefix
    pub fn new<P: AsRef<Path>>(prefix: P) -> Self {
        let with_ext = |ext: &str| {
            let mut path = OsString::from(prefix.as_ref().as_os_str());
            path.push(".");
            path.push(ext);
            PathBuf::from(path)
        };
        Self {
            header: with_ext("ogx"),
            records: with_ext("ofx"),
            pairs: with_ext("opx"),
            reverse: with_ext("orx"),
        }
    }

    /// Paths of the index stored for `name`, under `<name>.odx/index`
    ///
    /// # Example
    ///
    /// ```
    /// use std::path::Path;
    /// use readix::IndexPaths;
    ///
    /// let paths = IndexPaths::from_name("sample");
    /// assert_eq!(paths.header, Path::new("sample.odx/index.ogx"));
    /// ```
    pub fn from_name<P: AsRef<Path>>(name: P) -> Self {
        let mut dir = OsString::from(name.as_ref().as_os_str());
        dir.push(".");
        dir.push(INDEX_DIR_SUFFIX);
        Self::new(PathBuf::from(dir).join("index"))
    }

    /// Whether all four files are present
    #[must_use]
    pub fn exists(&self) -> bool {
        [&self.header, &self.records, &self.pairs, &self.reverse]
            .iter()
            .all(|p| p.is_file())
    }
}

fn file_len(path: &Path) -> Result<u64> {
    Ok(fs::metadata(path)?.len())
}

fn check_len(path: &Path, actual: u64, expected: u64) -> Result<()> {
    if actual != expected {
        return Err(IndexError::SizeMismatch {
            file: path.display().to_string(),
            expected,
            actual,
        }
        .into());
    }
    Ok(())
}

fn write_order(path: &Path, order: &[u32]) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    order
        .iter()
        .try_for_each(|&x| writer.write_u32::<LittleEndian>(x))?;
    writer.flush()?;
    Ok(())
}

/// Reads a little-endian `u32` array of exactly `dst.len()` entries
fn read_order(path: &Path, dst: &mut [u32]) -> Result<()> {
    check_len(path, file_len(path)?, 4 * dst.len() as u64)?;
    let bytes = fs::read(path)?;
    check_len(path, bytes.len() as u64, 4 * dst.len() as u64)?;
    LittleEndian::read_u32_into(&bytes, dst);
    Ok(())
}

/// Fails unless `order` holds every id below its length exactly once
fn check_permutation(order: &[u32], name: &'static str) -> Result<()> {
    let mut seen = try_zeroed::<bool>(order.len())?;
    for &id in order {
        match seen.get_mut(id as usize) {
            Some(slot) if !*slot => *slot = true,
            _ => return Err(IndexError::NotAPermutation(name).into()),
        }
    }
    Ok(())
}

/// Fails unless every read is the mate of its mate, and not its own
fn check_pairs(order2: &[u32]) -> Result<()> {
    for (p, &mate) in order2.iter().enumerate() {
        if mate as usize == p || order2[mate as usize] as usize != p {
            return Err(IndexError::NotAPermutation("pair").into());
        }
    }
    Ok(())
}

impl ReadIndex {
    /// Writes the index to the four files of `paths`
    ///
    /// Missing parent directories are created.
    pub fn save(&self, paths: &IndexPaths) -> Result<()> {
        if let Some(parent) = paths.header.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let arena = self.arena();

        let header = IndexHeader::from_arena(arena);
        fs::write(&paths.header, header.as_bytes())?;

        let mut writer = BufWriter::new(File::create(&paths.records)?);
        writer.write_all(arena.records_bytes())?;
        writer.flush()?;

        write_order(&paths.pairs, arena.order2())?;
        write_order(&paths.reverse, arena.order1())?;

        info!(
            reads = arena.read_count(),
            path = %paths.header.display(),
            "saved index"
        );
        Ok(())
    }

    /// Loads an index from the four files of `paths`
    ///
    /// Every file is checked against the header before anything is allocated, and both
    /// orders against the stored reads before the hash tables are rebuilt.
    pub fn load(paths: &IndexPaths) -> Result<Self> {
        let bytes = fs::read(&paths.header)?;
        check_len(&paths.header, bytes.len() as u64, SIZE_HEADER as u64)?;
        let header = IndexHeader::from_bytes(&bytes)?;
        let n = header.read_count as usize;
        debug!(?header, "read index header");

        let records_len = u64::from(header.read_count) * u64::from(header.record_size);
        let order_len = 4 * u64::from(header.read_count);
        check_len(&paths.records, file_len(&paths.records)?, records_len)?;
        check_len(&paths.pairs, file_len(&paths.pairs)?, order_len)?;
        check_len(&paths.reverse, file_len(&paths.reverse)?, order_len)?;

        let mut arena = Arena::with_shape(header.read_size as usize, n)?;

        // Map the records and copy them into the aligned lanes
        let file = File::open(&paths.records)?;
        let mmap = unsafe { Mmap::map(&file)? };
        check_len(&paths.records, mmap.len() as u64, records_len)?;
        arena.records_bytes_mut()[..mmap.len()].copy_from_slice(&mmap);

        read_order(&paths.pairs, &mut arena.order2[..n])?;
        read_order(&paths.reverse, &mut arena.order1[..n])?;
        check_permutation(&arena.order2[..n], "pair")?;
        check_pairs(&arena.order2[..n])?;
        check_permutation(&arena.order1[..n], "reverse")?;

        arena.restore_sorted(n);
        arena.letter_count = header.letter_count;

        info!(reads = n, path = %paths.header.display(), "loaded index");
        ReadIndex::from_sorted(arena)
    }
}
