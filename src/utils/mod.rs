//! Utility modules for loading reads into an index

pub mod fastq;

pub use fastq::{estimate_capacity, LoadStats, LoaderConfig, PairedFastq};
