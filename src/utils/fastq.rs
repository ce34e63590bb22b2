//! Paired FASTQ loading
//!
//! Reads mate pairs from two FASTQ files in lockstep, or from a single interleaved file,
//! and packs them into an [`Arena`]. Compressed inputs are decoded transparently.
//!
//! A single-end input can stand in for pairs, each read then being paired with its own
//! reverse complement.
//!
//! Reads are first trimmed at the 5' end and hard clipped at the first low-quality base
//! when asked to, then cut to the indexed read length. Reads with bases outside of ACGT
//! go through the configured [`Policy`], and pairs where either read ends up shorter
//! than the indexed length are dropped.

use std::fs::{self, File};
use std::io::Read;
use std::path::Path;

use rand::{SeedableRng, rngs::SmallRng};
use seq_io::fastq::{Reader, Record};
use tracing::{debug, info, warn};

use crate::arena::{record_size_for, Arena, ORDER_BYTES_PER_RECORD};
use crate::error::{ArenaError, Error, IntoReadixError, LoadError, Result};
use crate::{nuc, Policy, RNG_SEED};

type BoxedRead = Box<dyn Read>;

/// Memory budget used when it can not be derived from the input
pub const DEFAULT_MEMORY: usize = 64 << 20;

/// Assumed expansion of compressed FASTQ when estimating the number of reads
const COMPRESSION_RATIO: u64 = 8;

/// Bytes of a FASTQ record beyond its sequence and qualities (`@`, `+` and newlines)
const FASTQ_OVERHEAD: u64 = 6;

/// Offset of Sanger / Illumina 1.8+ quality characters
pub const DEFAULT_QUALITY_OFFSET: u8 = 33;

/// Options of a [`PairedFastq`] load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoaderConfig {
    /// Indexed read length, estimated from the first pair if unset
    pub read_length: Option<usize>,
    /// Number of leading pairs to skip
    pub skip: usize,
    /// Maximum number of reads to load (`0` for no limit)
    pub max_reads: usize,
    /// Memory budget of the arena in bytes, estimated from the input if unset
    pub memory: Option<usize>,
    /// Handling of reads with bases outside of ACGT
    pub policy: Policy,
    /// Bases removed from the start of every read
    pub five_prime_trim: usize,
    /// Reads are cut before their first base scoring at most this quality (`0` keeps them whole)
    pub quality_cut: u8,
    /// Value of the quality character scoring zero
    pub quality_offset: u8,
    /// Reads come from a single-end input and are paired with their reverse complement
    pub single: bool,
    /// Drop pairs whose read names differ (ignoring a `/1` or `/2` suffix)
    pub check_pairing: bool,
}
impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            read_length: None,
            skip: 0,
            max_reads: 0,
            memory: None,
            policy: Policy::default(),
            five_prime_trim: 0,
            quality_cut: 0,
            quality_offset: DEFAULT_QUALITY_OFFSET,
            single: false,
            check_pairing: false,
        }
    }
}
impl LoaderConfig {
    #[must_use]
    pub fn read_length(mut self, length: usize) -> Self {
        self.read_length = Some(length);
        self
    }

    #[must_use]
    pub fn skip(mut self, pairs: usize) -> Self {
        self.skip = pairs;
        self
    }

    #[must_use]
    pub fn max_reads(mut self, reads: usize) -> Self {
        self.max_reads = reads;
        self
    }

    #[must_use]
    pub fn memory(mut self, bytes: usize) -> Self {
        self.memory = Some(bytes);
        self
    }

    #[must_use]
    pub fn policy(mut self, policy: Policy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn five_prime_trim(mut self, bases: usize) -> Self {
        self.five_prime_trim = bases;
        self
    }

    /// Hard clips reads at their first base scoring `quality` or less
    #[must_use]
    pub fn quality_cut(mut self, quality: u8) -> Self {
        self.quality_cut = quality;
        self
    }

    #[must_use]
    pub fn quality_offset(mut self, offset: u8) -> Self {
        self.quality_offset = offset;
        self
    }

    #[must_use]
    pub fn single(mut self, single: bool) -> Self {
        self.single = single;
        self
    }

    #[must_use]
    pub fn check_pairing(mut self, check: bool) -> Self {
        self.check_pairing = check;
        self
    }
}

/// Counters of a finished load
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadStats {
    /// Pairs read from the input, skipped ones included
    pub pairs_read: usize,
    /// Pairs skipped at the start of the input
    pub pairs_skipped: usize,
    /// Pairs appended to the arena
    pub pairs_loaded: usize,
    /// Pairs dropped because a read was shorter than the indexed length
    pub pairs_too_short: usize,
    /// Pairs dropped by the invalid-base policy
    pub pairs_rejected: usize,
    /// Pairs dropped because the read names did not match
    pub pairs_bad_ids: usize,
    /// Reads hard clipped at a low-quality base
    pub reads_quality_clipped: usize,
    /// Reads cut down to the indexed length
    pub reads_truncated: usize,
    /// Whether loading stopped because the arena was full
    pub capacity_reached: bool,
}

/// Upper bound on the number of reads of `read_length` bases held by a FASTQ input
///
/// Each loaded read takes at least its sequence, its qualities and the record syntax.
/// Compressed inputs are assumed to expand by a fixed ratio.
#[must_use]
pub fn estimate_capacity(input_bytes: u64, compressed: bool, read_length: usize) -> usize {
    let bytes = if compressed {
        input_bytes.saturating_mul(COMPRESSION_RATIO)
    } else {
        input_bytes
    };
    let per_read = 2 * read_length as u64 + FASTQ_OVERHEAD;
    usize::try_from(bytes / per_read).unwrap_or(usize::MAX)
}

enum Source {
    Paired(Reader<BoxedRead>, Reader<BoxedRead>),
    Interleaved(Reader<BoxedRead>),
    Single(Reader<BoxedRead>),
}

/// A FASTQ record copied out of its reader
#[derive(Debug, Default)]
struct RawRead {
    /// Read name, up to the first whitespace
    id: Vec<u8>,
    seq: Vec<u8>,
    qual: Vec<u8>,
}
impl RawRead {
    fn fill<R: Record>(&mut self, record: &R) {
        let head = record.head();
        let id = head
            .split(u8::is_ascii_whitespace)
            .next()
            .unwrap_or(head);
        self.id.clear();
        self.id.extend_from_slice(id);
        self.seq.clear();
        self.seq.extend_from_slice(record.seq());
        self.qual.clear();
        self.qual.extend_from_slice(record.qual());
    }

    /// Becomes the reverse complement of `other`
    fn fill_reverse_complement(&mut self, other: &RawRead) {
        self.id.clear();
        self.id.extend_from_slice(&other.id);
        self.seq.clear();
        nuc::reverse_complement_into(&other.seq, &mut self.seq);
        self.qual.clear();
        self.qual.extend(other.qual.iter().rev());
    }

    /// Name shared by both reads of a pair
    fn pair_id(&self) -> &[u8] {
        self.id
            .strip_suffix(b"/1")
            .or_else(|| self.id.strip_suffix(b"/2"))
            .unwrap_or(self.id.as_slice())
    }

    /// Removes `five_prime` leading bases, then cuts the read before its first base
    /// scoring at most `cut`; returns whether the read was clipped
    fn trim(&mut self, five_prime: usize, cut: u8, offset: u8) -> bool {
        let lead = five_prime.min(self.seq.len());
        self.seq.drain(..lead);
        self.qual.drain(..lead.min(self.qual.len()));
        if cut == 0 {
            return false;
        }
        let first_bad = self
            .qual
            .iter()
            .position(|&q| q.saturating_sub(offset) <= cut);
        match first_bad {
            Some(end) if end < self.seq.len() => {
                self.seq.truncate(end);
                self.qual.truncate(end);
                true
            }
            _ => false,
        }
    }
}

/// Copies the next record of `reader` into `read`, `false` at the end of the input
fn next_record(reader: &mut Reader<BoxedRead>, read: &mut RawRead) -> Result<bool> {
    match reader.next() {
        Some(record) => {
            let record = record.map_err(IntoReadixError::into_readix_error)?;
            read.fill(&record);
            Ok(true)
        }
        None => Ok(false),
    }
}

/// Applies the policy to a read if needed, `None` if the pair must be dropped
fn prepare<'a>(
    raw: &'a [u8],
    clean: &'a mut Vec<u8>,
    policy: Policy,
    rng: &mut SmallRng,
) -> Result<Option<&'a [u8]>> {
    if raw.iter().all(|&b| nuc::code_of(b).is_some()) {
        return Ok(Some(raw));
    }
    if policy.handle(raw, clean, rng)? {
        Ok(Some(clean.as_slice()))
    } else {
        Ok(None)
    }
}

/// A source of mate pairs in FASTQ format
pub struct PairedFastq {
    source: Source,
    config: LoaderConfig,
    /// Total size of the inputs and whether any of them is compressed, when known
    input_size: Option<(u64, bool)>,
    fwd: RawRead,
    rev: RawRead,
    fclean: Vec<u8>,
    rclean: Vec<u8>,
    rng: SmallRng,
}
impl PairedFastq {
    fn with_inputs(
        forward: BoxedRead,
        reverse: Option<BoxedRead>,
        config: LoaderConfig,
    ) -> Result<Self> {
        let source = match (reverse, config.single) {
            (Some(_), true) => return Err(LoadError::SingleWithReverse.into()),
            (Some(reverse), false) => Source::Paired(Reader::new(forward), Reader::new(reverse)),
            (None, false) => Source::Interleaved(Reader::new(forward)),
            (None, true) => Source::Single(Reader::new(forward)),
        };
        Ok(Self {
            source,
            config,
            input_size: None,
            fwd: RawRead::default(),
            rev: RawRead::default(),
            fclean: Vec::new(),
            rclean: Vec::new(),
            rng: SmallRng::seed_from_u64(RNG_SEED),
        })
    }

    /// Wraps already opened inputs, decompressing them if needed
    ///
    /// Without a reverse input, the forward input is read as interleaved pairs, or as
    /// single-end reads if [`LoaderConfig::single`] is set.
    pub fn from_readers(
        forward: BoxedRead,
        reverse: Option<BoxedRead>,
        config: LoaderConfig,
    ) -> Result<Self> {
        let decompress = |input: BoxedRead| -> Result<BoxedRead> {
            let (reader, _format) =
                niffler::get_reader(input).map_err(IntoReadixError::into_readix_error)?;
            Ok(reader)
        };
        let forward = decompress(forward)?;
        let reverse = reverse.map(decompress).transpose()?;
        Self::with_inputs(forward, reverse, config)
    }

    /// Opens FASTQ files, plain or compressed
    pub fn from_paths<P: AsRef<Path>>(
        forward: P,
        reverse: Option<P>,
        config: LoaderConfig,
    ) -> Result<Self> {
        let mut input_bytes = 0;
        let mut compressed = false;
        let mut open = |path: &Path| -> Result<BoxedRead> {
            input_bytes += fs::metadata(path)?.len();
            let (reader, format) = niffler::get_reader(Box::new(File::open(path)?))
                .map_err(IntoReadixError::into_readix_error)?;
            compressed |= format != niffler::compression::Format::No;
            Ok(reader)
        };
        let forward = open(forward.as_ref())?;
        let reverse = reverse.map(|p| open(p.as_ref())).transpose()?;

        let mut fastq = Self::with_inputs(forward, reverse, config)?;
        fastq.input_size = Some((input_bytes, compressed));
        Ok(fastq)
    }

    /// Reads the next pair into the raw buffers, `false` at the end of the input
    fn next_pair(&mut self) -> Result<bool> {
        let (got_fwd, got_rev) = match &mut self.source {
            Source::Paired(fwd, rev) => (
                next_record(fwd, &mut self.fwd)?,
                next_record(rev, &mut self.rev)?,
            ),
            Source::Interleaved(reader) => {
                if !next_record(reader, &mut self.fwd)? {
                    return Ok(false);
                }
                (true, next_record(reader, &mut self.rev)?)
            }
            Source::Single(reader) => {
                if !next_record(reader, &mut self.fwd)? {
                    return Ok(false);
                }
                self.rev.fill_reverse_complement(&self.fwd);
                (true, true)
            }
        };
        match (got_fwd, got_rev) {
            (true, true) => Ok(true),
            (false, false) => Ok(false),
            (true, false) if matches!(self.source, Source::Interleaved(_)) => {
                Err(LoadError::UnpairedInput("interleaved input").into())
            }
            (true, false) => Err(LoadError::UnpairedInput("reverse input").into()),
            (false, true) => Err(LoadError::UnpairedInput("forward input").into()),
        }
    }

    /// Reads and trims the next pair, `false` at the end of the input
    fn next_trimmed_pair(&mut self, stats: &mut LoadStats) -> Result<bool> {
        if !self.next_pair()? {
            return Ok(false);
        }
        let LoaderConfig {
            five_prime_trim,
            quality_cut,
            quality_offset,
            ..
        } = self.config;
        for read in [&mut self.fwd, &mut self.rev] {
            if read.trim(five_prime_trim, quality_cut, quality_offset) {
                stats.reads_quality_clipped += 1;
            }
        }
        Ok(true)
    }

    /// Appends the current pair, `false` once the arena is full
    fn append_current(
        &mut self,
        arena: &mut Arena,
        read_length: usize,
        stats: &mut LoadStats,
    ) -> Result<bool> {
        let policy = self.config.policy;
        let fwd = prepare(&self.fwd.seq, &mut self.fclean, policy, &mut self.rng)?;
        let rev = prepare(&self.rev.seq, &mut self.rclean, policy, &mut self.rng)?;
        match (fwd, rev) {
            (Some(fwd), Some(rev)) if fwd.len() >= read_length && rev.len() >= read_length => {
                match arena.append_pair(fwd, rev) {
                    Ok(()) => {}
                    Err(Error::ArenaError(ArenaError::CapacityExceeded { .. })) => {
                        stats.capacity_reached = true;
                        return Ok(false);
                    }
                    Err(e) => return Err(e),
                }
                stats.pairs_loaded += 1;
                stats.reads_truncated +=
                    usize::from(fwd.len() > read_length) + usize::from(rev.len() > read_length);
            }
            (Some(_), Some(_)) => stats.pairs_too_short += 1,
            _ => stats.pairs_rejected += 1,
        }
        Ok(true)
    }

    /// Memory budget for reads of `read_length` bases
    fn budget(&self, read_length: usize) -> usize {
        if let Some(memory) = self.config.memory {
            return memory;
        }
        match self.input_size {
            Some((bytes, compressed)) => estimate_capacity(bytes, compressed, read_length)
                .max(2)
                .saturating_mul(record_size_for(read_length) + ORDER_BYTES_PER_RECORD),
            None => DEFAULT_MEMORY,
        }
    }

    /// Loads every remaining pair into a new arena
    pub fn load(mut self) -> Result<(Arena, LoadStats)> {
        let mut stats = LoadStats::default();

        while stats.pairs_skipped < self.config.skip {
            if !self.next_pair()? {
                break;
            }
            stats.pairs_read += 1;
            stats.pairs_skipped += 1;
        }

        let has_first = self.next_trimmed_pair(&mut stats)?;
        let read_length = match self.config.read_length {
            Some(length) => length,
            None if has_first => self.fwd.seq.len().min(self.rev.seq.len()),
            None => return Err(LoadError::EmptyInput.into()),
        };
        let mut arena = Arena::new(self.budget(read_length), read_length, self.config.max_reads)?;
        debug!(read_length, max_record = arena.max_record(), "allocated arena for FASTQ input");

        let mut more = has_first;
        while more {
            stats.pairs_read += 1;
            if self.config.check_pairing && self.fwd.pair_id() != self.rev.pair_id() {
                stats.pairs_bad_ids += 1;
            } else if !self.append_current(&mut arena, read_length, &mut stats)? {
                break;
            }
            more = self.next_trimmed_pair(&mut stats)?;
        }

        let limited_by_memory =
            self.config.max_reads == 0 || arena.max_record() < (self.config.max_reads & !1);
        if stats.capacity_reached && limited_by_memory {
            warn!(
                loaded = arena.read_count(),
                "arena is full, remaining pairs were not loaded (raise the memory budget)"
            );
        }
        info!(
            read_length,
            pairs_loaded = stats.pairs_loaded,
            pairs_skipped = stats.pairs_skipped,
            pairs_too_short = stats.pairs_too_short,
            pairs_rejected = stats.pairs_rejected,
            pairs_bad_ids = stats.pairs_bad_ids,
            reads_quality_clipped = stats.reads_quality_clipped,
            reads_truncated = stats.reads_truncated,
            "loaded FASTQ input"
        );
        Ok((arena, stats))
    }
}
