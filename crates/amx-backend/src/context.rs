use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::error::{BackendError, Result};

/// Mutable per-instance state: the worker count and the pool it sizes.
#[derive(Debug)]
pub struct BackendContext {
    n_threads: usize,
    pool: ThreadPool,
}

fn build_pool(n_threads: usize) -> Result<ThreadPool> {
    if n_threads == 0 {
        return Err(BackendError::InvalidArgument(
            "n_threads must be at least 1".to_string(),
        ));
    }
    ThreadPoolBuilder::new()
        .num_threads(n_threads)
        .thread_name(|idx| format!("amx-worker{idx}"))
        .build()
        .map_err(|e| BackendError::ThreadPool(e.to_string()))
}

impl BackendContext {
    pub fn new(n_threads: usize) -> Result<Self> {
        Ok(BackendContext {
            n_threads,
            pool: build_pool(n_threads)?,
        })
    }

    pub fn n_threads(&self) -> usize {
        self.n_threads
    }

    /// Resize the worker pool. A no-op when the count is unchanged.
    pub fn set_n_threads(&mut self, n_threads: usize) -> Result<()> {
        if n_threads != self.n_threads {
            self.pool = build_pool(n_threads)?;
            self.n_threads = n_threads;
            log::debug!("AMX worker pool resized to {} threads", n_threads);
        }
        Ok(())
    }

    /// Run `f` inside the worker pool.
    pub fn install<R, F>(&self, f: F) -> R
    where
        F: FnOnce() -> R + Send,
        R: Send,
    {
        self.pool.install(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_threads_rejected() {
        assert!(matches!(
            BackendContext::new(0),
            Err(BackendError::InvalidArgument(_))
        ));
        let mut ctx = BackendContext::new(2).unwrap();
        assert!(ctx.set_n_threads(0).is_err());
        assert_eq!(ctx.n_threads(), 2);
    }

    #[test]
    fn test_resize_pool() {
        let mut ctx = BackendContext::new(1).unwrap();
        assert_eq!(ctx.install(rayon::current_num_threads), 1);
        ctx.set_n_threads(3).unwrap();
        assert_eq!(ctx.n_threads(), 3);
        assert_eq!(ctx.install(rayon::current_num_threads), 3);
    }
}
