//! Compute backend trait and device abstraction.
//!
//! The [`ComputeBackend`] trait abstracts over execution environments so
//! that the optics code in `umbra-core` never touches a thread pool
//! directly. A backend receives the whole output buffer, splits it into
//! disjoint, equally sized slices and runs the same fill function on each.

use thiserror::Error;

/// Errors originating from compute backends.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ComputeError {
    #[error("Backend not available: {0}")]
    Unavailable(String),

    #[error("Buffer of {buffer_len} values cannot be split into slices of {slice_len}")]
    InvalidPartition { buffer_len: usize, slice_len: usize },

    #[error("Worker failed on slice {slice}: {reason}")]
    WorkerFailure { slice: usize, reason: String },
}

/// Describes the capabilities of a compute backend.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub name: String,
    pub backend_type: BackendType,
    pub compute_units: Option<usize>,
}

/// The type of compute backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    Cpu,
}

/// Numerical diagnostics produced while filling one slice.
///
/// Reports are returned by value and merged by the caller in slice order,
/// so workers never share mutable state.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SliceReport {
    /// Evaluations that went through a reduced-accuracy branch.
    pub degraded_evaluations: usize,
    /// Largest phase increment (radians) between adjacent quadrature nodes.
    pub max_phase_step: f64,
}

/// Signature of the per-slice fill function: slice index and the slice's
/// exclusive window into the output buffer. The closure may borrow from
/// the caller for `'a`.
pub type SliceFill<'a> =
    dyn Fn(usize, &mut [f64]) -> Result<SliceReport, ComputeError> + Send + Sync + 'a;

/// Abstraction over compute backends.
pub trait ComputeBackend: Send + Sync {
    /// Return information about the device.
    fn device_info(&self) -> DeviceInfo;

    /// Fill `buffer` slice by slice.
    ///
    /// `buffer` is split into consecutive chunks of `slice_len` values and
    /// `fill_fn` is called exactly once per chunk. The returned reports are
    /// ordered by slice index regardless of scheduling. Any failing slice
    /// aborts the whole call, since the buffer is then only partly written.
    fn fill_slices(
        &self,
        buffer: &mut [f64],
        slice_len: usize,
        fill_fn: &SliceFill<'_>,
    ) -> Result<Vec<SliceReport>, ComputeError>;
}

/// Check that `buffer_len` splits into whole slices of `slice_len`.
pub fn check_partition(buffer_len: usize, slice_len: usize) -> Result<(), ComputeError> {
    if slice_len == 0 || buffer_len % slice_len != 0 {
        return Err(ComputeError::InvalidPartition { buffer_len, slice_len });
    }
    Ok(())
}
