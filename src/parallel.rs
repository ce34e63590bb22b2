use std::thread;

use tracing::debug;

use crate::{ReadIndex, ReadRef, Result, StrandCounts};

impl ReadIndex {
    /// Looks up many queries in parallel
    ///
    /// The queries are split into contiguous batches, one per thread, and the results are
    /// returned in query order. The first failing query fails the whole batch.
    ///
    /// # Arguments
    ///
    /// * `keys` - The queries, each at least `length` bases long
    /// * `length` - Number of bases of each query to match
    /// * `num_threads` - The number of threads to spawn (`0` for one per CPU)
    ///
    /// # Example
    ///
    /// ```
    /// use readix::{Arena, ReadIndex};
    ///
    /// let mut arena = Arena::new(1 << 16, 8, 0).unwrap();
    /// arena.append_pair(b"AACCTTGG", b"CCGGAATT").unwrap();
    /// let index = ReadIndex::build(arena).unwrap();
    ///
    /// let hits = index.lookup_batch(&["AACCTTGG", "GGGGGGGG"], 8, 2).unwrap();
    /// assert!(hits[0].is_some());
    /// assert!(hits[1].is_none());
    /// ```
    pub fn lookup_batch<K>(
        &self,
        keys: &[K],
        length: usize,
        num_threads: usize,
    ) -> Result<Vec<Option<ReadRef>>>
    where
        K: AsRef<[u8]> + Sync,
    {
        self.map_batch(keys, num_threads, |key| self.lookup(key, length))
    }

    /// Counts the matches of many queries on both strands in parallel
    ///
    /// Batching and error handling follow [`ReadIndex::lookup_batch`].
    pub fn count_batch<K>(
        &self,
        keys: &[K],
        length: usize,
        num_threads: usize,
    ) -> Result<Vec<StrandCounts>>
    where
        K: AsRef<[u8]> + Sync,
    {
        self.map_batch(keys, num_threads, |key| self.count(key, length))
    }

    fn map_batch<K, T, F>(&self, keys: &[K], num_threads: usize, query: F) -> Result<Vec<T>>
    where
        K: AsRef<[u8]> + Sync,
        T: Clone + Default + Send,
        F: Fn(&[u8]) -> Result<T> + Sync,
    {
        // Calculate the number of threads to use
        let num_threads = if num_threads == 0 {
            num_cpus::get()
        } else {
            num_threads.min(num_cpus::get())
        }
        .max(1);

        let mut results = vec![T::default(); keys.len()];
        if keys.is_empty() {
            return Ok(results);
        }
        let per_thread = keys.len().div_ceil(num_threads);
        debug!(queries = keys.len(), num_threads, "batch query");

        let query = &query;
        thread::scope(|scope| -> Result<()> {
            let handles: Vec<_> = keys
                .chunks(per_thread)
                .zip(results.chunks_mut(per_thread))
                .map(|(batch, out)| {
                    scope.spawn(move || -> Result<()> {
                        for (key, slot) in batch.iter().zip(out.iter_mut()) {
                            *slot = query(key.as_ref())?;
                        }
                        Ok(())
                    })
                })
                .collect();

            for handle in handles {
                handle
                    .join()
                    .unwrap_or_else(|panic| std::panic::resume_unwind(panic))?;
            }
            Ok(())
        })?;

        Ok(results)
    }
}

#[cfg(test)]
mod testing {
    use rand::{Rng, SeedableRng, rngs::SmallRng};

    use super::*;
    use crate::nuc::BASES;
    use crate::{Arena, RNG_SEED};

    #[test]
    fn test_batch_matches_sequential() -> Result<()> {
        let mut rng = SmallRng::seed_from_u64(RNG_SEED);
        let mut arena = Arena::new(1 << 20, 12, 0)?;
        let mut keys = Vec::new();
        for _ in 0..200 {
            let fwd: Vec<u8> = (0..12).map(|_| BASES[rng.random_range(0..4)]).collect();
            let rev: Vec<u8> = (0..12).map(|_| BASES[rng.random_range(0..4)]).collect();
            arena.append_pair(&fwd, &rev)?;
            keys.push(fwd);
            keys.push((0..12).map(|_| BASES[rng.random_range(0..4)]).collect());
        }
        let index = ReadIndex::build(arena)?;

        for num_threads in [0, 1, 3] {
            let batch = index.lookup_batch(&keys, 10, num_threads)?;
            for (key, hit) in keys.iter().zip(&batch) {
                assert_eq!(*hit, index.lookup(key, 10)?);
            }
        }
        Ok(())
    }

    #[test]
    fn test_count_batch_matches_sequential() -> Result<()> {
        let mut rng = SmallRng::seed_from_u64(RNG_SEED);
        let mut arena = Arena::new(1 << 20, 10, 0)?;
        let mut keys = Vec::new();
        for _ in 0..150 {
            // two-letter reads share prefixes on both strands
            let fwd: Vec<u8> = (0..10).map(|_| BASES[rng.random_range(0..2)]).collect();
            let rev: Vec<u8> = (0..10).map(|_| BASES[rng.random_range(0..4)]).collect();
            arena.append_pair(&fwd, &rev)?;
            keys.push(fwd);
        }
        let index = ReadIndex::build(arena)?;

        let counts = index.count_batch(&keys, 8, 4)?;
        assert_eq!(counts.len(), keys.len());
        for (key, counts) in keys.iter().zip(&counts) {
            assert_eq!(*counts, index.count(key, 8)?);
            assert!(counts.forward.count >= 1);
            assert_eq!(counts.first(), index.lookup(key, 8)?);
        }
        assert!(index.count_batch(&["AACC"], 8, 1).is_err());
        Ok(())
    }

    #[test]
    fn test_batch_propagates_errors() -> Result<()> {
        let mut arena = Arena::new(1 << 16, 8, 0)?;
        arena.append_pair(b"AACCTTGG", b"CCGGAATT")?;
        let index = ReadIndex::build(arena)?;
        assert!(index.lookup_batch(&["AACCTTGG", "AACC"], 8, 2).is_err());
        assert!(index.lookup_batch::<&str>(&[], 8, 2)?.is_empty());
        Ok(())
    }
}
