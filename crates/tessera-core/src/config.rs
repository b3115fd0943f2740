use crate::error::{Error, Result};

// KernelConfig: per-invocation launch parameters
//
// Work-group sizes and the emulated compute-unit count are plain values
// handed to every launch, so two launches with different block sizes can
// run side by side in one process.

/// Launch parameters shared by all kernels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelConfig {
    /// Work-group size elementwise launches are rounded up to.
    pub local_size: usize,
    /// Block size of the sum and loss-sum reduction trees.
    pub reduce_local_size: usize,
    /// Block size of the softmax-cross-entropy row kernels.
    pub row_local_size: usize,
    /// OS threads cooperating on the lanes of one block.
    pub workers: usize,
    /// Compute units assumed by the sum-parallelism heuristic.
    pub compute_units: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            local_size: 256,
            reduce_local_size: 256,
            row_local_size: 128,
            workers: 4,
            compute_units: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        }
    }
}

impl KernelConfig {
    pub fn local_size(mut self, n: usize) -> Self {
        self.local_size = n;
        self
    }

    pub fn reduce_local_size(mut self, n: usize) -> Self {
        self.reduce_local_size = n;
        self
    }

    pub fn row_local_size(mut self, n: usize) -> Self {
        self.row_local_size = n;
        self
    }

    pub fn workers(mut self, n: usize) -> Self {
        self.workers = n;
        self
    }

    pub fn compute_units(mut self, n: usize) -> Self {
        self.compute_units = n;
        self
    }

    /// Reject values no launch can use. Block sizes feed binary tree folds
    /// and must be powers of two.
    pub fn validate(&self) -> Result<()> {
        if self.local_size == 0 {
            return Err(Error::InvalidConfig("local_size must be nonzero".into()));
        }
        for (name, size) in [
            ("reduce_local_size", self.reduce_local_size),
            ("row_local_size", self.row_local_size),
        ] {
            if !size.is_power_of_two() {
                return Err(Error::InvalidConfig(format!(
                    "{} must be a nonzero power of two, got {}",
                    name, size
                )));
            }
        }
        // A one-lane loss-sum pass never shrinks its input.
        if self.reduce_local_size < 2 {
            return Err(Error::InvalidConfig(format!(
                "reduce_local_size must be at least 2, got {}",
                self.reduce_local_size
            )));
        }
        if self.workers == 0 {
            return Err(Error::InvalidConfig("workers must be nonzero".into()));
        }
        if self.compute_units == 0 {
            return Err(Error::InvalidConfig("compute_units must be nonzero".into()));
        }
        Ok(())
    }
}
