use std::collections::TryReserveError;
use std::error::Error as StdError;

/// Custom Result type for readix operations, wrapping the custom [`Error`] type
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for the readix library, encompassing all possible error cases
/// that can occur while packing, sorting, indexing, querying or persisting reads.
///
/// A query that finds nothing is not an error: lookups return `None` or an empty
/// [`PrefixRange`](crate::PrefixRange).
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Errors raised by the 2-bit nucleotide codec
    #[error("Error in nucleotide codec: {0}")]
    CodecError(#[from] CodecError),

    /// Errors raised while filling the packed-read arena
    #[error("Error in read arena: {0}")]
    ArenaError(#[from] ArenaError),

    /// Errors raised by prefix queries
    #[error("Error in query: {0}")]
    SearchError(#[from] SearchError),

    /// Errors raised while loading a persisted index
    #[error("Error processing index: {0}")]
    IndexError(#[from] IndexError),

    /// Errors raised while pairing and filtering FASTQ input
    #[error("Error loading reads: {0}")]
    LoadError(#[from] LoadError),

    /// Standard I/O errors
    #[error("Error with IO: {0}")]
    IoError(#[from] std::io::Error),

    /// UTF-8 conversion errors
    #[error("Error with UTF8: {0}")]
    Utf8Error(#[from] std::str::Utf8Error),

    /// Generic errors for other unexpected situations
    #[error("Generic error: {0}")]
    GenericError(#[from] Box<dyn StdError + Send + Sync>),
}
impl Error {
    /// Checks if the error is a failure to obtain backing storage
    #[must_use]
    pub fn is_allocation_failure(&self) -> bool {
        matches!(self, Self::ArenaError(ArenaError::AllocationFailure { .. }))
    }

    /// Checks if the error reports a damaged or incompatible on-disk index
    #[must_use]
    pub fn is_corrupt_index(&self) -> bool {
        matches!(self, Self::IndexError(_))
    }

    /// Process exit code used by the command-line driver
    ///
    /// * `1` - backing storage could not be allocated
    /// * `2` - fatal I/O, usage or input error (including corrupt indices)
    /// * `3` - internal failure
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            _ if self.is_allocation_failure() => 1,
            Self::IoError(_)
            | Self::Utf8Error(_)
            | Self::IndexError(_)
            | Self::LoadError(_)
            | Self::CodecError(CodecError::InvalidAlphabet { .. })
            | Self::SearchError(_)
            | Self::ArenaError(_) => 2,
            Self::CodecError(_) | Self::GenericError(_) => 3,
        }
    }
}

/// Errors raised by the 2-bit nucleotide codec
#[derive(thiserror::Error, Debug)]
pub enum CodecError {
    /// A byte outside of {A,C,G,T,a,c,g,t} was found
    ///
    /// # Fields
    /// * `base` - The offending byte
    /// * `position` - Its position in the input
    #[error("Invalid nucleotide base: {base} at position {position}")]
    InvalidAlphabet { base: u8, position: usize },

    /// A decode request reaches past the packed frame
    #[error("Requested bases {start}..{end} lie outside the packed frame of {available} bases")]
    OutOfFrame {
        start: usize,
        end: usize,
        available: usize,
    },
}

/// Errors raised while filling the packed-read arena
#[derive(thiserror::Error, Debug)]
pub enum ArenaError {
    /// The arena has no free slot for another read pair
    #[error("Arena capacity exceeded: {requested} reads requested with room for {capacity}")]
    CapacityExceeded { capacity: usize, requested: usize },

    /// A read is shorter than the fixed read length of the arena
    #[error("Read length ({got}) is shorter than the indexed read length ({expected})")]
    ReadTooShort { expected: usize, got: usize },

    /// The indexed read length cannot hold a full hash key
    #[error("Indexed read length ({0}) must be at least {min} bases", min = crate::MIN_QUERY_LENGTH)]
    ReadLengthTooShort(usize),

    /// Backing storage could not be obtained
    #[error("Unable to allocate {bytes} bytes of backing storage")]
    AllocationFailure { bytes: usize },

    /// A record id beyond the loaded reads was requested
    #[error("Requested record ({requested}) is out of record range ({available})")]
    RecordOutOfRange { requested: usize, available: usize },
}
impl ArenaError {
    /// Builds an allocation failure for `count` elements of `T`
    pub(crate) fn allocation<T>(count: usize, _source: TryReserveError) -> Self {
        Self::AllocationFailure {
            bytes: count.saturating_mul(size_of::<T>()),
        }
    }
}

/// Errors raised by prefix queries
#[derive(thiserror::Error, Debug)]
pub enum SearchError {
    /// The query is shorter than the 8 bases addressed by the hash index
    #[error("Query length ({got}) is shorter than the minimum of {min} bases")]
    QueryTooShort { min: usize, got: usize },

    /// The requested query length is longer than the key provided
    #[error("Query length ({length}) exceeds the provided key ({key} bases)")]
    KeyTooShort { length: usize, key: usize },

    /// A read reference does not address a read of this index
    #[error("Read reference {0} does not address a read of this index")]
    InvalidReadRef(i64),
}

/// Errors raised while loading a persisted index
#[derive(thiserror::Error, Debug)]
pub enum IndexError {
    /// The magic number in the header does not match the expected value
    #[error("Invalid magic number: {0:?}")]
    InvalidMagicNumber([u8; 8]),

    /// The format version in the header is not supported
    #[error("Unsupported index version: {0}")]
    UnsupportedVersion(u32),

    /// A file of the index does not have the size implied by the header
    #[error("Size of {file} ({actual} bytes) does not match the header ({expected} bytes)")]
    SizeMismatch {
        file: String,
        expected: u64,
        actual: u64,
    },

    /// The header scalars contradict each other
    #[error("Inconsistent index header: {0}")]
    InconsistentHeader(&'static str),

    /// A persisted order is not a permutation of the stored reads
    #[error("Persisted {0} order is not a permutation of the stored reads")]
    NotAPermutation(&'static str),
}

/// Errors raised while pairing and filtering FASTQ input
#[derive(thiserror::Error, Debug)]
pub enum LoadError {
    /// The forward and reverse inputs do not contain the same number of reads
    #[error("Forward and reverse inputs are not paired: {0} ended first")]
    UnpairedInput(&'static str),

    /// No read was available to estimate the read length from
    #[error("Empty FASTQ input")]
    EmptyInput,

    /// Single-end loading was asked for together with a reverse input
    #[error("Single-end reads are loaded from one input, but a reverse input was given")]
    SingleWithReverse,

    /// The input contains invalid nucleotides and the policy rejects them
    #[error("Invalid nucleotides found in sequence: {0}")]
    InvalidNucleotideSequence(String),
}

/// Trait for converting arbitrary errors into `Error`
pub trait IntoReadixError {
    fn into_readix_error(self) -> Error;
}

impl<E> IntoReadixError for E
where
    E: StdError + Send + Sync + 'static,
{
    fn into_readix_error(self) -> Error {
        Error::GenericError(Box::new(self))
    }
}
