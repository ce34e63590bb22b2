//! Nucleotide encoding and decoding module
//!
//! Reads are packed 4 bases per byte, the first base in the two most significant bits,
//! using the codes A=0, C=1, T=2, G=3. This is `(ascii >> 1) & 3` for both upper and
//! lower case letters, and it is the order in which packed bytes compare, so sorting
//! packed records sorts reads lexicographically under A < C < T < G.
//!
//! Under these codes the complement of a base is `code ^ 2` (A <-> T, C <-> G).
//!
//! Full 16-base blocks go through the vectorized path in [`crate::simd`] when it is
//! enabled; both paths produce identical bytes.

use crate::error::{CodecError, Result};
use crate::simd::{is_simd_supported, swar};

/// ASCII letter of each 2-bit code
pub const BASES: [u8; 4] = *b"ACTG";

/// Mask keeping the first `n` bases of a packed byte, indexed by `n` in `0..4`
pub const LAST_BYTE_MASK: [u8; 4] = [0x00, 0xC0, 0xF0, 0xFC];

const INVALID: u8 = 0xFF;

/// ASCII -> 2-bit code, `0xFF` for anything that is not a nucleotide
static CODE_LUT: [u8; 256] = {
    let mut t = [INVALID; 256];
    let mut code = 0;
    while code < 4 {
        let upper = BASES[code];
        t[upper as usize] = code as u8;
        t[(upper | 0x20) as usize] = code as u8;
        code += 1;
    }
    t
};

/// Packed byte -> its 4 ASCII bases
pub(crate) static QUAD_LUT: [[u8; 4]; 256] = {
    let mut t = [[0u8; 4]; 256];
    let mut byte = 0;
    while byte < 256 {
        let mut i = 0;
        while i < 4 {
            t[byte][i] = BASES[(byte >> (6 - 2 * i)) & 3];
            i += 1;
        }
        byte += 1;
    }
    t
};

/// Packed byte -> the byte holding the reverse complement of its 4 bases
static COMPLEMENT_LUT: [u8; 256] = {
    let mut t = [0u8; 256];
    let mut byte = 0;
    while byte < 256 {
        let comp = (byte as u8) ^ 0xAA;
        t[byte] = ((comp & 0x03) << 6)
            | ((comp & 0x0C) << 2)
            | ((comp & 0x30) >> 2)
            | ((comp & 0xC0) >> 6);
        byte += 1;
    }
    t
};

/// Complement of a single 2-bit code
#[inline]
#[must_use]
pub const fn complement_code(code: u8) -> u8 {
    code ^ 2
}

/// Reverses the four bases of a packed byte and complements each of them
#[inline]
#[must_use]
pub fn complement_byte(byte: u8) -> u8 {
    COMPLEMENT_LUT[byte as usize]
}

/// Reverse complement of an ASCII read, appended to `output`
///
/// Case is kept; bytes other than ACGT are copied unchanged.
pub fn reverse_complement_into(input: &[u8], output: &mut Vec<u8>) {
    output.extend(input.iter().rev().map(|&base| match base {
        b'A' => b'T',
        b'C' => b'G',
        b'G' => b'C',
        b'T' => b'A',
        b'a' => b't',
        b'c' => b'g',
        b'g' => b'c',
        b't' => b'a',
        other => other,
    }));
}

/// 2-bit code of an ASCII nucleotide, `None` if it is not one of ACGTacgt
#[inline]
#[must_use]
pub fn code_of(base: u8) -> Option<u8> {
    let code = CODE_LUT[base as usize];
    (code != INVALID).then_some(code)
}

/// Number of bytes required to pack `nbases` nucleotides
#[inline]
#[must_use]
pub const fn packed_len(nbases: usize) -> usize {
    nbases.div_ceil(4)
}

/// 2-bit code of base `index` of a packed sequence
#[inline]
#[must_use]
pub fn base_at(packed: &[u8], index: usize) -> u8 {
    (packed[index / 4] >> (6 - 2 * (index % 4))) & 3
}

/// Encodes nucleotides one base at a time
///
/// `output` must hold at least [`packed_len`] bytes; the bytes covering the input are
/// overwritten, unused bits of the final byte are zeroed.
pub fn encode_scalar(input: &[u8], output: &mut [u8]) -> Result<()> {
    for (chunk_idx, (chunk, out)) in input.chunks(4).zip(output.iter_mut()).enumerate() {
        let mut byte = 0u8;
        for (i, &base) in chunk.iter().enumerate() {
            let code = code_of(base).ok_or(CodecError::InvalidAlphabet {
                base,
                position: chunk_idx * 4 + i,
            })?;
            byte |= code << (6 - 2 * i);
        }
        *out = byte;
    }
    Ok(())
}

/// Encodes nucleotides into a packed output slice with potential vectorized acceleration
///
/// # Arguments
///
/// * `input` - A slice of ASCII nucleotides (A, C, G, T in either case)
/// * `output` - A mutable slice of at least [`packed_len`] bytes
///
/// # Returns
///
/// * `Ok(())` - If encoding was successful
/// * `Err(Error)` - If invalid nucleotides were found in the input, in which case the
///   content of `output` is unspecified
///
/// # Panics
///
/// If `output` is shorter than [`packed_len`] of the input.
pub fn encode_into(input: &[u8], output: &mut [u8]) -> Result<()> {
    let need = packed_len(input.len());
    assert!(output.len() >= need, "output too small for packed input");

    let mut done = 0;
    if is_simd_supported() {
        for (block, out) in input.chunks_exact(16).zip(output.chunks_exact_mut(4)) {
            let Some(packed) = block.try_into().ok().and_then(swar::encode_block) else {
                // rerun on scalar to report the offending base
                break;
            };
            out.copy_from_slice(&packed);
            done += 16;
        }
    }

    encode_scalar(&input[done..], &mut output[done / 4..need]).map_err(|err| match err {
        crate::Error::CodecError(CodecError::InvalidAlphabet { base, position }) => {
            CodecError::InvalidAlphabet {
                base,
                position: position + done,
            }
            .into()
        }
        other => other,
    })
}

/// Encodes nucleotides into a newly allocated packed buffer
///
/// # Example
///
/// ```
/// use readix::nuc;
///
/// let packed = nuc::encode(b"ACTGG").unwrap();
/// assert_eq!(packed, vec![0b00_01_10_11, 0b11_00_00_00]);
/// ```
pub fn encode(input: &[u8]) -> Result<Vec<u8>> {
    let mut output = vec![0u8; packed_len(input.len())];
    encode_into(input, &mut output)?;
    Ok(output)
}

fn check_frame(start: usize, length: usize, available: usize) -> Result<()> {
    if start.saturating_add(length) > available {
        return Err(CodecError::OutOfFrame {
            start,
            end: start.saturating_add(length),
            available,
        }
        .into());
    }
    Ok(())
}

/// Decodes `length` bases starting at base `start` and appends them to `output`
pub fn decode_into(packed: &[u8], start: usize, length: usize, output: &mut Vec<u8>) -> Result<()> {
    check_frame(start, length, packed.len() * 4)?;
    output.reserve(length);

    let end = start + length;
    let mut pos = start;

    // leading bases up to a byte boundary
    while pos < end && pos % 4 != 0 {
        output.push(BASES[base_at(packed, pos) as usize]);
        pos += 1;
    }

    // byte-aligned body
    if is_simd_supported() {
        while end - pos >= 16 {
            let b = pos / 4;
            let quad = [packed[b], packed[b + 1], packed[b + 2], packed[b + 3]];
            output.extend_from_slice(&swar::decode_block(&quad));
            pos += 16;
        }
    }
    while end - pos >= 4 {
        output.extend_from_slice(&QUAD_LUT[packed[pos / 4] as usize]);
        pos += 4;
    }

    // trailing bases
    while pos < end {
        output.push(BASES[base_at(packed, pos) as usize]);
        pos += 1;
    }
    Ok(())
}

/// Decodes `length` bases starting at base `start` of a packed sequence
///
/// # Example
///
/// ```
/// use readix::nuc;
///
/// let packed = nuc::encode(b"GATTACA").unwrap();
/// assert_eq!(nuc::decode(&packed, 1, 4).unwrap(), "ATTA");
/// ```
pub fn decode(packed: &[u8], start: usize, length: usize) -> Result<String> {
    let mut output = Vec::with_capacity(length);
    decode_into(packed, start, length, &mut output)?;
    Ok(ascii_string(output))
}

/// Decodes the reverse-complement strand of a packed read
///
/// Base `i` of the result is the complement of forward base `read_size - 1 - (start + i)`,
/// so `start` counts from the 3' end of the stored read.
///
/// # Example
///
/// ```
/// use readix::nuc;
///
/// let packed = nuc::encode(b"AACCGT").unwrap();
/// assert_eq!(nuc::decode_complement(&packed, 6, 0, 6).unwrap(), "ACGGTT");
/// ```
pub fn decode_complement(
    packed: &[u8],
    read_size: usize,
    start: usize,
    length: usize,
) -> Result<String> {
    check_frame(read_size, 0, packed.len() * 4)?;
    check_frame(start, length, read_size)?;

    let output: Vec<u8> = (start..start + length)
        .map(|i| BASES[complement_code(base_at(packed, read_size - 1 - i)) as usize])
        .collect();
    Ok(ascii_string(output))
}

/// Every byte pushed by the decoders comes from [`BASES`]
fn ascii_string(bytes: Vec<u8>) -> String {
    bytes.into_iter().map(char::from).collect()
}
