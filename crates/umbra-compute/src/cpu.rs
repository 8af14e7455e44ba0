//! CPU compute backend using Rayon for shared-memory parallelism.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use rayon::prelude::*;

use crate::backend::{
    check_partition, BackendType, ComputeBackend, ComputeError, DeviceInfo, SliceFill, SliceReport,
};

/// CPU backend that parallelises slices across threads via Rayon.
///
/// `new()` runs on Rayon's global pool; `with_threads` builds a dedicated
/// pool so callers can pin the worker count (e.g. to compare outputs across
/// thread counts).
pub struct CpuBackend {
    pool: Option<rayon::ThreadPool>,
    num_threads: usize,
}

impl CpuBackend {
    /// Create a new CPU backend using all available threads.
    pub fn new() -> Self {
        Self {
            pool: None,
            num_threads: rayon::current_num_threads(),
        }
    }

    /// Create a CPU backend with a dedicated pool of `num_threads` workers.
    pub fn with_threads(num_threads: usize) -> Result<Self, ComputeError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|i| format!("umbra-worker-{i}"))
            .build()
            .map_err(|e| ComputeError::Unavailable(e.to_string()))?;
        Ok(Self {
            num_threads: pool.current_num_threads(),
            pool: Some(pool),
        })
    }

    pub fn num_threads(&self) -> usize {
        self.num_threads
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ComputeBackend for CpuBackend {
    fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            name: format!("CPU ({} threads)", self.num_threads),
            backend_type: BackendType::Cpu,
            compute_units: Some(self.num_threads),
        }
    }

    fn fill_slices(
        &self,
        buffer: &mut [f64],
        slice_len: usize,
        fill_fn: &SliceFill<'_>,
    ) -> Result<Vec<SliceReport>, ComputeError> {
        check_partition(buffer.len(), slice_len)?;

        let mut run = || {
            buffer
                .par_chunks_mut(slice_len)
                .enumerate()
                .map(|(index, slice)| {
                    // Panics surface as WorkerFailure; the caller discards the buffer.
                    panic::catch_unwind(AssertUnwindSafe(|| fill_fn(index, slice))).unwrap_or_else(
                        |payload| {
                            Err(ComputeError::WorkerFailure {
                                slice: index,
                                reason: panic_message(payload.as_ref()),
                            })
                        },
                    )
                })
                .collect::<Result<Vec<_>, _>>()
        };

        match &self.pool {
            Some(pool) => pool.install(run),
            None => run(),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".into()
    }
}
