//! Nucleotide sequence validation and correction policies
//!
//! The arena only stores reads over {A,C,G,T}. This module provides policies for
//! handling reads containing anything else (N calls, IUPAC codes, stray bytes)
//! while loading FASTQ input: clipping, skipping, rejecting, or correcting them.

use std::str::FromStr;

use rand::Rng;

use crate::error::{LoadError, Result};
use crate::nuc;

/// A global seed for the random number generator used in randomized policies
///
/// This seed ensures reproducible behavior when using the `RandomDraw` policy
/// across different runs of the program.
pub const RNG_SEED: u64 = 42;

/// Policy for handling reads with invalid nucleotides during loading
///
/// The default policy is `Clip`, which keeps the read up to its first invalid
/// base. A clipped read shorter than the indexed length is later dropped with its mate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Policy {
    /// Truncate the read before its first invalid nucleotide (default policy)
    #[default]
    Clip,

    /// Skip read pairs containing invalid nucleotides
    IgnorePair,

    /// Fail with an error when invalid nucleotides are encountered
    BreakOnInvalid,

    /// Replace invalid nucleotides with randomly chosen valid nucleotides (A, C, G, or T)
    RandomDraw,

    /// Replace all invalid nucleotides with 'A'
    SetToA,

    /// Replace all invalid nucleotides with 'C'
    SetToC,

    /// Replace all invalid nucleotides with 'G'
    SetToG,

    /// Replace all invalid nucleotides with 'T'
    SetToT,
}
impl Policy {
    /// Helper method to replace invalid nucleotides with a specific nucleotide
    fn fill_with_known(sequence: &[u8], val: u8, ibuf: &mut Vec<u8>) {
        ibuf.extend(sequence.iter().map(|&n| match nuc::code_of(n) {
            Some(_) => n,
            None => val,
        }));
    }

    /// Helper method to replace invalid nucleotides with random valid nucleotides
    fn fill_with_random<R: Rng>(sequence: &[u8], rng: &mut R, ibuf: &mut Vec<u8>) {
        for &n in sequence {
            ibuf.push(match nuc::code_of(n) {
                Some(_) => n,
                None => nuc::BASES[rng.random_range(0..4)],
            });
        }
    }

    /// Process a read containing invalid nucleotides according to the policy
    ///
    /// The buffer is cleared first, then filled with the corrected read.
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - If the corrected read in `ibuf` should be used
    /// * `Ok(false)` - If the read pair should be skipped (`IgnorePair`)
    /// * `Err(Error)` - For `BreakOnInvalid`
    ///
    /// # Examples
    ///
    /// ```
    /// # use readix::{Policy, Result, RNG_SEED};
    /// # use rand::{SeedableRng, rngs::SmallRng};
    /// # fn main() -> Result<()> {
    /// let mut output = Vec::new();
    /// let mut rng = SmallRng::seed_from_u64(RNG_SEED);
    ///
    /// assert!(Policy::SetToA.handle(b"ACGTNX", &mut output, &mut rng)?);
    /// assert_eq!(output, b"ACGTAA");
    ///
    /// assert!(Policy::Clip.handle(b"ACGTNX", &mut output, &mut rng)?);
    /// assert_eq!(output, b"ACGT");
    /// # Ok(())
    /// # }
    /// ```
    pub fn handle<R: Rng>(&self, sequence: &[u8], ibuf: &mut Vec<u8>, rng: &mut R) -> Result<bool> {
        ibuf.clear();

        match self {
            Self::Clip => {
                let valid = sequence
                    .iter()
                    .position(|&n| nuc::code_of(n).is_none())
                    .unwrap_or(sequence.len());
                ibuf.extend_from_slice(&sequence[..valid]);
                Ok(true)
            }
            Self::IgnorePair => Ok(false),
            Self::BreakOnInvalid => {
                let seq_str = std::str::from_utf8(sequence)?.to_string();
                Err(LoadError::InvalidNucleotideSequence(seq_str).into())
            }
            Self::RandomDraw => {
                Self::fill_with_random(sequence, rng, ibuf);
                Ok(true)
            }
            Self::SetToA => {
                Self::fill_with_known(sequence, b'A', ibuf);
                Ok(true)
            }
            Self::SetToC => {
                Self::fill_with_known(sequence, b'C', ibuf);
                Ok(true)
            }
            Self::SetToG => {
                Self::fill_with_known(sequence, b'G', ibuf);
                Ok(true)
            }
            Self::SetToT => {
                Self::fill_with_known(sequence, b'T', ibuf);
                Ok(true)
            }
        }
    }
}

impl FromStr for Policy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "clip" => Ok(Self::Clip),
            "ignore" | "skip" => Ok(Self::IgnorePair),
            "break" | "fail" => Ok(Self::BreakOnInvalid),
            "random" => Ok(Self::RandomDraw),
            "a" => Ok(Self::SetToA),
            "c" => Ok(Self::SetToC),
            "g" => Ok(Self::SetToG),
            "t" => Ok(Self::SetToT),
            _ => Err(format!(
                "unknown policy '{s}' [clip, ignore, break, random, a, c, g, t]"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    #[test]
    fn test_default_policy() {
        assert_eq!(Policy::default(), Policy::Clip);
    }

    #[test]
    fn test_clip_policy() {
        let mut output = Vec::new();
        let mut rng = SmallRng::seed_from_u64(RNG_SEED);

        assert!(Policy::Clip.handle(b"ACGTNACGT", &mut output, &mut rng).unwrap());
        assert_eq!(output, b"ACGT");

        assert!(Policy::Clip.handle(b"NACGT", &mut output, &mut rng).unwrap());
        assert!(output.is_empty());
    }

    #[test]
    fn test_ignore_pair_policy() {
        let mut output = vec![b'A'];
        let mut rng = SmallRng::seed_from_u64(RNG_SEED);

        let should_process = Policy::IgnorePair
            .handle(b"ACGTNX", &mut output, &mut rng)
            .unwrap();

        assert!(!should_process);
        assert!(output.is_empty());
    }

    #[test]
    fn test_break_on_invalid_policy() {
        let mut output = Vec::new();
        let mut rng = SmallRng::seed_from_u64(RNG_SEED);

        let result = Policy::BreakOnInvalid.handle(b"ACGTNX", &mut output, &mut rng);

        assert!(matches!(
            result,
            Err(crate::Error::LoadError(LoadError::InvalidNucleotideSequence(_)))
        ));
    }

    #[test]
    fn test_set_to_policies() {
        let mut output = Vec::new();
        let mut rng = SmallRng::seed_from_u64(RNG_SEED);
        for (policy, expected) in [
            (Policy::SetToA, b"ACGTAA"),
            (Policy::SetToC, b"ACGTCC"),
            (Policy::SetToG, b"ACGTGG"),
            (Policy::SetToT, b"ACGTTT"),
        ] {
            assert!(policy.handle(b"ACGTNX", &mut output, &mut rng).unwrap());
            assert_eq!(&output, expected);
        }
    }

    #[test]
    fn test_lowercase_nucleotides_are_valid() {
        let mut output = Vec::new();
        let mut rng = SmallRng::seed_from_u64(RNG_SEED);

        Policy::SetToA.handle(b"acgtn", &mut output, &mut rng).unwrap();

        assert_eq!(output, b"acgtA");
    }

    #[test]
    fn test_random_draw_deterministic_with_seed() {
        let sequence = b"NNNNNNNN";
        let mut output1 = Vec::new();
        let mut output2 = Vec::new();
        let mut rng1 = SmallRng::seed_from_u64(RNG_SEED);
        let mut rng2 = SmallRng::seed_from_u64(RNG_SEED);

        Policy::RandomDraw
            .handle(sequence, &mut output1, &mut rng1)
            .unwrap();
        Policy::RandomDraw
            .handle(sequence, &mut output2, &mut rng2)
            .unwrap();

        assert_eq!(output1, output2);
        assert!(output1.iter().all(|&b| nuc::code_of(b).is_some()));
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!("clip".parse::<Policy>().unwrap(), Policy::Clip);
        assert_eq!("Ignore".parse::<Policy>().unwrap(), Policy::IgnorePair);
        assert_eq!("random".parse::<Policy>().unwrap(), Policy::RandomDraw);
        assert_eq!("T".parse::<Policy>().unwrap(), Policy::SetToT);
        assert!("n".parse::<Policy>().is_err());
    }
}
