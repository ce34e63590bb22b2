//! # readix
//!
//! A packed index of paired-end short reads answering "which reads start with this
//! k-mer" on both strands.
//!
//! ## Overview
//!
//! Reads are cut to a fixed length and packed two bits per base into an [`Arena`].
//! Building a [`ReadIndex`] sorts the reads twice with an in-place radix sort: once by
//! their forward sequence, and once by their reverse complement. Both orderings are
//! covered by a hash table keyed on their first eight bases, and a query is answered by
//! binary search inside its hash bucket.
//!
//! Mates are tracked through the forward sort, so the mate of any hit can be found
//! without searching again.
//!
//! ## Encoding
//!
//! Bases are encoded as `A=0, C=1, T=2, G=3`, the first base of a read in the most
//! significant bits of the first byte. Under this code the complement of a base is
//! `code ^ 2`. Records are padded with zeros to a multiple of 16 bytes.
//!
//! ```text
//! A C T G | G T C A | A A C .
//! 00011011  11100100  00000100  (zero padding)
//! ```
//!
//! ## Files
//!
//! An index is stored under a common prefix (see [`IndexPaths`]):
//!
//! ```text
//! ┌───────────────────┐
//! │  .ogx  header     │ 112 bytes
//! ├───────────────────┤
//! │  .ofx  records    │ read_count * record_size bytes, forward sorted
//! ├───────────────────┤
//! │  .opx  mates      │ read_count * u32
//! ├───────────────────┤
//! │  .orx  complement │ read_count * u32
//! └───────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use readix::{Arena, ReadIndex, ReadRef};
//!
//! let mut arena = Arena::new(1 << 20, 10, 0)?;
//! arena.append_pair(b"ACGTTGCAAC", b"GGATCCATGA")?;
//! arena.append_pair(b"ACGTTGCAGG", b"TTTTCCCCAA")?;
//! let index = ReadIndex::build(arena)?;
//!
//! let counts = index.count(b"ACGTTGCA", 8)?;
//! assert_eq!(counts.forward.count, 2);
//!
//! let hit = ReadRef::Forward(counts.forward.start as u32);
//! let mate = index.mate(hit)?;
//! assert!(mate.is_reverse());
//! # Ok::<(), readix::Error>(())
//! ```

/// Two-bit nucleotide codec
pub mod nuc;

/// Packed-read storage
pub mod arena;

/// Error definitions
pub mod error;

/// Prefix hash tables
pub mod hash;

/// Parallel batch queries
mod parallel;

/// Invalid nucleotide policy
mod policy;

/// Read references and match ranges
mod record;

/// Prefix search over a built index
mod search;

/// Vectorized codec lanes
pub mod simd;

/// Radix sorts of the arena orders
mod sort;

/// On-disk index files
pub mod store;

/// FASTQ loading
pub mod utils;

pub use arena::Arena;
pub use error::{Error, IntoReadixError, Result};
pub use policy::{Policy, RNG_SEED};
pub use record::{PrefixRange, ReadRef, StrandCounts};
pub use search::ReadIndex;
pub use store::{IndexHeader, IndexPaths};
pub use utils::{LoadStats, LoaderConfig, PairedFastq};

/// Shortest query (and read length) served by the hash index
pub const MIN_QUERY_LENGTH: usize = 8;

/// Number of buckets of each hash table (all 8-base prefixes)
pub const HASH_BUCKETS: usize = 1 << 16;

/// Magic number of the index header
pub const INDEX_MAGIC: &[u8; 8] = b"RDXINDEX";

/// Version of the on-disk index format
pub const INDEX_VERSION: u32 = 1;
