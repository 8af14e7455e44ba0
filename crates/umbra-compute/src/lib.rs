//! # Umbra Compute
//!
//! Compute backend abstraction for the Umbra workspace. This crate provides
//! a [`ComputeBackend`](backend::ComputeBackend) trait that isolates the
//! PSF synthesis code from how the output volume is scheduled across
//! threads.
//!
//! ## Available backends
//!
//! | Backend | Feature flag | Status |
//! |---------|-------------|--------|
//! | CPU (Rayon) | `cpu` (default) | Implemented |

pub mod backend;

#[cfg(feature = "cpu")]
pub mod cpu;

pub use backend::{BackendType, ComputeBackend, ComputeError, DeviceInfo, SliceFill, SliceReport};

#[cfg(feature = "cpu")]
pub use cpu::CpuBackend;
