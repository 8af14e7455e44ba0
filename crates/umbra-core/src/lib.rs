//! # Umbra Core
//!
//! The numerical backbone of Umbra. This crate synthesises three-dimensional
//! point-spread functions of a widefield fluorescence microscope from the
//! Gibson-Lanni optical path difference model, and calibrates the model's
//! free parameters against a measured image.
//!
//! ## Architecture
//!
//! Forward models implement the [`synthesis::ForwardModel`] trait, which
//! turns an [`types::OpticalParameters`] record and an
//! [`types::ImageGeometry`] into a [`types::SyntheticImage`]. The optimiser
//! treats any forward model as an expensive oracle and scores candidates
//! with [`objective::compare`].
//!
//! ## Modules
//!
//! - [`types`]: Parameter records, image geometry and volumes.
//! - [`error`]: Configuration errors and numeric warnings.
//! - [`special`]: Zero-order Bessel function of the first kind.
//! - [`opd`]: Gibson-Lanni optical path difference model.
//! - [`cache`]: Per-depth OPD samples over the pupil radius.
//! - [`integrator`]: Pupil quadrature for a single voxel.
//! - [`synthesis`]: Volume synthesis (PSF and bead-spread function).
//! - [`objective`]: Image comparison metrics.
//! - [`optimizer`]: Bounded Nelder-Mead parameter calibration.

pub mod cache;
pub mod error;
pub mod integrator;
pub mod objective;
pub mod opd;
pub mod optimizer;
pub mod special;
pub mod synthesis;
pub mod types;
