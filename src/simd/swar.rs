//! 16-nucleotide blocks processed as a single `u128`.
//!
//! Bases are loaded big-endian so that the first base of the block sits in the most
//! significant byte, which is also where it ends up in the packed output.

use crate::nuc::QUAD_LUT;

const ONES: u128 = u128::from_ne_bytes([0x01; 16]);
const LOW7: u128 = u128::from_ne_bytes([0x7F; 16]);
const HIGH: u128 = u128::from_ne_bytes([0x80; 16]);
const CASE: u128 = u128::from_ne_bytes([0x20; 16]);
const CODE: u128 = u128::from_ne_bytes([0x03; 16]);

/// High bit of each byte set iff that byte of `v` is zero.
#[inline(always)]
fn zero_bytes(v: u128) -> u128 {
    !(((v & LOW7) + LOW7) | v) & HIGH
}

/// Return `true` if every byte in `v` is a valid nucleotide (case-insensitive).
#[inline(always)]
fn valid_block(v: u128) -> bool {
    let lower = v | CASE;
    let hits = zero_bytes(lower ^ (ONES * u128::from(b'a')))
        | zero_bytes(lower ^ (ONES * u128::from(b'c')))
        | zero_bytes(lower ^ (ONES * u128::from(b'g')))
        | zero_bytes(lower ^ (ONES * u128::from(b't')));
    hits == HIGH
}

/// Encode 16 ASCII nucleotides into 4 packed bytes.
///
/// Returns `None` if any byte is not a nucleotide; the caller falls back to the
/// scalar path to locate it.
#[inline]
#[must_use]
pub fn encode_block(block: &[u8; 16]) -> Option<[u8; 4]> {
    let v = u128::from_be_bytes(*block);
    if !valid_block(v) {
        return None;
    }

    // ASCII -> 2-bit code, one code per byte: code = (b >> 1) & 3
    let codes = (v >> 1) & CODE;

    // Fold four byte-spread codes of each 32-bit lane into a single byte
    let mut packed = [0u8; 4];
    for (lane, out) in packed.iter_mut().enumerate() {
        let l = (codes >> (96 - 32 * lane)) as u32;
        *out = ((l >> 18) | (l >> 12) | (l >> 6) | l) as u8;
    }
    Some(packed)
}

/// Decode 4 packed bytes into 16 ASCII nucleotides.
#[inline]
#[must_use]
pub fn decode_block(packed: &[u8; 4]) -> [u8; 16] {
    let mut out = [0u8; 16];
    for (dst, &byte) in out.chunks_exact_mut(4).zip(packed) {
        dst.copy_from_slice(&QUAD_LUT[byte as usize]);
    }
    out
}
