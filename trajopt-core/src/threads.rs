//! Fork–join thread pool scoped to a solver's lifetime.
//!
//! The pool is built once (at `setup`) with an explicit thread count and
//! reused across all outer iterations. Parallel regions hand each task an
//! exclusive range of stages; there are no locks on solver hot paths.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ThreadPoolError {
    #[error("failed to build thread pool: {0}")]
    Build(String),
}

/// A fixed-size fork–join pool.
pub struct ThreadPool {
    inner: rayon::ThreadPool,
    num_threads: usize,
}

impl ThreadPool {
    /// Build a pool with `num_threads` workers (at least one).
    pub fn new(num_threads: usize) -> Result<Self, ThreadPoolError> {
        let num_threads = num_threads.max(1);
        let inner = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build()
            .map_err(|e| ThreadPoolError::Build(e.to_string()))?;
        Ok(Self { inner, num_threads })
    }

    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    /// Run `op` inside the pool; rayon parallel iterators invoked from within
    /// execute on this pool's workers.
    pub fn install<R: Send>(&self, op: impl FnOnce() -> R + Send) -> R {
        self.inner.install(op)
    }
}
