//! Vectorized 16-base lanes for the nucleotide codec
//!
//! Contains word-parallel (SWAR) implementations that encode and decode 16 nucleotides
//! at a time. They are portable across targets and bit-identical to the scalar codec.

use std::sync::OnceLock;

pub mod swar;

/// Check if the vectorized path is enabled and not disabled by environment
pub fn is_simd_supported() -> bool {
    static SUPPORTED: OnceLock<bool> = OnceLock::new();

    // Check for environment override once per process
    *SUPPORTED.get_or_init(|| std::env::var("DISABLE_SIMD").is_err())
}
