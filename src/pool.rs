//! Fixed-size worker pool for data-parallel fan-out.
//!
//! Tasks never share mutable state: each one produces its own output and
//! [`WorkerPool::scatter`] hands the outputs back in task order once every
//! task has finished.

use std::cmp::Ordering;

use rayon::prelude::*;

use crate::error::Result;

/// Row count above which sorts run on the pool
pub const DEFAULT_PARALLEL_SORT_THRESHOLD: usize = 1 << 16;

/// A rayon pool, or nothing when running single-threaded
#[derive(Debug)]
pub struct WorkerPool {
    pool: Option<rayon::ThreadPool>,
    threads: usize,
    sort_threshold: usize,
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::sequential()
    }
}

impl WorkerPool {
    /// Pool with `threads` workers; one thread or less runs everything inline.
    ///
    /// # Errors
    ///
    /// Returns [`crate::ReasonerError::ThreadPool`] if rayon cannot spawn the workers.
    pub fn new(threads: usize) -> Result<Self> {
        if threads <= 1 {
            return Ok(Self::sequential());
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("chainlog-worker-{i}"))
            .build()?;
        log::debug!("Started worker pool with {threads} threads");
        Ok(Self {
            pool: Some(pool),
            threads,
            sort_threshold: DEFAULT_PARALLEL_SORT_THRESHOLD,
        })
    }

    /// Pool that runs every task on the calling thread
    #[must_use]
    pub fn sequential() -> Self {
        Self {
            pool: None,
            threads: 1,
            sort_threshold: DEFAULT_PARALLEL_SORT_THRESHOLD,
        }
    }

    /// Sets the row count above which sorting fans out
    #[must_use]
    pub fn with_sort_threshold(mut self, rows: usize) -> Self {
        self.sort_threshold = rows;
        self
    }

    /// Number of workers
    #[must_use]
    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Whether tasks actually run in parallel
    #[must_use]
    pub fn is_parallel(&self) -> bool {
        self.pool.is_some()
    }

    /// Runs `f` on every item and returns the results in item order
    pub fn scatter<T, R, F>(&self, items: Vec<T>, f: F) -> Vec<R>
    where
        T: Send,
        R: Send,
        F: Fn(T) -> R + Sync + Send,
    {
        match &self.pool {
            Some(pool) if items.len() > 1 => {
                pool.install(|| items.into_par_iter().map(f).collect())
            }
            _ => items.into_iter().map(f).collect(),
        }
    }

    /// Sorts the row indices `0..rows` with the given comparison
    pub fn sort_permutation<F>(&self, rows: usize, compare: F) -> Vec<usize>
    where
        F: Fn(&usize, &usize) -> Ordering + Sync,
    {
        let mut permutation: Vec<usize> = (0..rows).collect();
        match &self.pool {
            Some(pool) if rows > self.sort_threshold => {
                log::trace!("Parallel sort of {rows} rows");
                pool.install(|| permutation.par_sort_unstable_by(&compare));
            }
            _ => permutation.sort_unstable_by(&compare),
        }
        permutation
    }
}
