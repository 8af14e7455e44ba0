//! Core types shared across the Umbra pipeline.
//!
//! This module defines the optical parameter record, the sampling geometry
//! of an output volume, and the volume container itself. Lengths carry their
//! unit in the field name (`_nm`, `_um`, `_mm`); every conversion goes
//! through [`NM_PER_UM`] or [`NM_PER_MM`].

use std::fmt;

use ndarray::{Array3, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;

/// Nanometres per micrometre.
pub const NM_PER_UM: f64 = 1.0e3;
/// Nanometres per millimetre.
pub const NM_PER_MM: f64 = 1.0e6;

/// Gibson-Lanni model parameters for one imaging condition.
///
/// Quantities the model distinguishes carry a *design* value (what the
/// objective was engineered for) and an *actual* value (what was present
/// during imaging); their mismatch produces spherical aberration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpticalParameters {
    /// Numerical aperture of the objective (unitless).
    pub numerical_aperture: f64,
    /// Lateral magnification of the objective (unitless).
    pub magnification: f64,
    /// Mechanical tube length (mm).
    pub mechanical_tube_length_mm: f64,
    /// Emission wavelength in vacuum (nm).
    pub emission_wavelength_nm: f64,
    /// Design cover slip refractive index.
    pub design_cover_slip_refractive_index: f64,
    /// Actual cover slip refractive index.
    pub actual_cover_slip_refractive_index: f64,
    /// Design cover slip thickness (µm).
    pub design_cover_slip_thickness_um: f64,
    /// Actual cover slip thickness (µm).
    pub actual_cover_slip_thickness_um: f64,
    /// Design immersion oil refractive index.
    pub design_immersion_oil_refractive_index: f64,
    /// Actual immersion oil refractive index.
    pub actual_immersion_oil_refractive_index: f64,
    /// Design immersion oil thickness (µm).
    pub design_immersion_oil_thickness_um: f64,
    /// Actual immersion oil thickness at nominal focus (µm).
    pub actual_immersion_oil_thickness_um: f64,
    /// Design specimen layer refractive index.
    pub design_specimen_layer_refractive_index: f64,
    /// Actual specimen layer refractive index.
    pub actual_specimen_layer_refractive_index: f64,
    /// Depth of the point source below the cover slip (nm).
    pub actual_point_source_depth_nm: f64,
    /// Design distance from the back focal plane to the detector (mm).
    pub design_detector_distance_mm: f64,
    /// Actual distance from the back focal plane to the detector (mm).
    pub actual_detector_distance_mm: f64,
}

impl Default for OpticalParameters {
    /// A 1.4 NA, 63x oil objective at 550 nm with every actual value equal
    /// to its design value (aberration-free).
    fn default() -> Self {
        Self {
            numerical_aperture: 1.4,
            magnification: 63.0,
            mechanical_tube_length_mm: 160.0,
            emission_wavelength_nm: 550.0,
            design_cover_slip_refractive_index: 1.522,
            actual_cover_slip_refractive_index: 1.522,
            design_cover_slip_thickness_um: 170.0,
            actual_cover_slip_thickness_um: 170.0,
            design_immersion_oil_refractive_index: 1.515,
            actual_immersion_oil_refractive_index: 1.515,
            design_immersion_oil_thickness_um: 100.0,
            actual_immersion_oil_thickness_um: 100.0,
            design_specimen_layer_refractive_index: 1.515,
            actual_specimen_layer_refractive_index: 1.515,
            actual_point_source_depth_nm: 0.0,
            design_detector_distance_mm: 160.0,
            actual_detector_distance_mm: 160.0,
        }
    }
}

impl OpticalParameters {
    /// Read a single field.
    pub fn get(&self, id: ParameterId) -> f64 {
        match id {
            ParameterId::NumericalAperture => self.numerical_aperture,
            ParameterId::Magnification => self.magnification,
            ParameterId::MechanicalTubeLengthMm => self.mechanical_tube_length_mm,
            ParameterId::EmissionWavelengthNm => self.emission_wavelength_nm,
            ParameterId::DesignCoverSlipRefractiveIndex => self.design_cover_slip_refractive_index,
            ParameterId::ActualCoverSlipRefractiveIndex => self.actual_cover_slip_refractive_index,
            ParameterId::DesignCoverSlipThicknessUm => self.design_cover_slip_thickness_um,
            ParameterId::ActualCoverSlipThicknessUm => self.actual_cover_slip_thickness_um,
            ParameterId::DesignImmersionOilRefractiveIndex => {
                self.design_immersion_oil_refractive_index
            }
            ParameterId::ActualImmersionOilRefractiveIndex => {
                self.actual_immersion_oil_refractive_index
            }
            ParameterId::DesignImmersionOilThicknessUm => self.design_immersion_oil_thickness_um,
            ParameterId::ActualImmersionOilThicknessUm => self.actual_immersion_oil_thickness_um,
            ParameterId::DesignSpecimenLayerRefractiveIndex => {
                self.design_specimen_layer_refractive_index
            }
            ParameterId::ActualSpecimenLayerRefractiveIndex => {
                self.actual_specimen_layer_refractive_index
            }
            ParameterId::ActualPointSourceDepthNm => self.actual_point_source_depth_nm,
            ParameterId::DesignDetectorDistanceMm => self.design_detector_distance_mm,
            ParameterId::ActualDetectorDistanceMm => self.actual_detector_distance_mm,
        }
    }

    /// Return a copy with one field replaced.
    pub fn with(&self, id: ParameterId, value: f64) -> Self {
        let mut out = self.clone();
        let field = match id {
            ParameterId::NumericalAperture => &mut out.numerical_aperture,
            ParameterId::Magnification => &mut out.magnification,
            ParameterId::MechanicalTubeLengthMm => &mut out.mechanical_tube_length_mm,
            ParameterId::EmissionWavelengthNm => &mut out.emission_wavelength_nm,
            ParameterId::DesignCoverSlipRefractiveIndex => {
                &mut out.design_cover_slip_refractive_index
            }
            ParameterId::ActualCoverSlipRefractiveIndex => {
                &mut out.actual_cover_slip_refractive_index
            }
            ParameterId::DesignCoverSlipThicknessUm => &mut out.design_cover_slip_thickness_um,
            ParameterId::ActualCoverSlipThicknessUm => &mut out.actual_cover_slip_thickness_um,
            ParameterId::DesignImmersionOilRefractiveIndex => {
                &mut out.design_immersion_oil_refractive_index
            }
            ParameterId::ActualImmersionOilRefractiveIndex => {
                &mut out.actual_immersion_oil_refractive_index
            }
            ParameterId::DesignImmersionOilThicknessUm => {
                &mut out.design_immersion_oil_thickness_um
            }
            ParameterId::ActualImmersionOilThicknessUm => {
                &mut out.actual_immersion_oil_thickness_um
            }
            ParameterId::DesignSpecimenLayerRefractiveIndex => {
                &mut out.design_specimen_layer_refractive_index
            }
            ParameterId::ActualSpecimenLayerRefractiveIndex => {
                &mut out.actual_specimen_layer_refractive_index
            }
            ParameterId::ActualPointSourceDepthNm => &mut out.actual_point_source_depth_nm,
            ParameterId::DesignDetectorDistanceMm => &mut out.design_detector_distance_mm,
            ParameterId::ActualDetectorDistanceMm => &mut out.actual_detector_distance_mm,
        };
        *field = value;
        out
    }

    /// Check every field before any synthesis work starts.
    ///
    /// The source depth may be zero; everything else must be strictly
    /// positive. The aperture must fit inside the design media and
    /// the actual immersion oil, and the magnification must exceed it.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        for id in ParameterId::ALL {
            let value = self.get(id);
            let parameter = id.name();
            if !value.is_finite() {
                return Err(ConfigurationError::NonFinite { parameter, value });
            }
            if id.allows_zero() {
                if value < 0.0 {
                    return Err(ConfigurationError::Negative { parameter, value });
                }
            } else if value <= 0.0 {
                return Err(ConfigurationError::NonPositive { parameter, value });
            }
        }

        let na = self.numerical_aperture;
        if self.magnification <= na {
            return Err(ConfigurationError::MagnificationBelowAperture {
                magnification: self.magnification,
                numerical_aperture: na,
            });
        }

        let limits = [
            ("design cover slip", self.design_cover_slip_refractive_index),
            ("design immersion oil", self.design_immersion_oil_refractive_index),
            ("actual immersion oil", self.actual_immersion_oil_refractive_index),
            ("design specimen layer", self.design_specimen_layer_refractive_index),
        ];
        for (layer, index) in limits {
            if na > index {
                return Err(ConfigurationError::ApertureExceedsIndex {
                    numerical_aperture: na,
                    layer,
                    index,
                });
            }
        }
        Ok(())
    }
}

/// Identifies one scalar field of [`OpticalParameters`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterId {
    NumericalAperture,
    Magnification,
    MechanicalTubeLengthMm,
    EmissionWavelengthNm,
    DesignCoverSlipRefractiveIndex,
    ActualCoverSlipRefractiveIndex,
    DesignCoverSlipThicknessUm,
    ActualCoverSlipThicknessUm,
    DesignImmersionOilRefractiveIndex,
    ActualImmersionOilRefractiveIndex,
    DesignImmersionOilThicknessUm,
    ActualImmersionOilThicknessUm,
    DesignSpecimenLayerRefractiveIndex,
    ActualSpecimenLayerRefractiveIndex,
    ActualPointSourceDepthNm,
    DesignDetectorDistanceMm,
    ActualDetectorDistanceMm,
}

impl ParameterId {
    pub const ALL: [ParameterId; 17] = [
        ParameterId::NumericalAperture,
        ParameterId::Magnification,
        ParameterId::MechanicalTubeLengthMm,
        ParameterId::EmissionWavelengthNm,
        ParameterId::DesignCoverSlipRefractiveIndex,
        ParameterId::ActualCoverSlipRefractiveIndex,
        ParameterId::DesignCoverSlipThicknessUm,
        ParameterId::ActualCoverSlipThicknessUm,
        ParameterId::DesignImmersionOilRefractiveIndex,
        ParameterId::ActualImmersionOilRefractiveIndex,
        ParameterId::DesignImmersionOilThicknessUm,
        ParameterId::ActualImmersionOilThicknessUm,
        ParameterId::DesignSpecimenLayerRefractiveIndex,
        ParameterId::ActualSpecimenLayerRefractiveIndex,
        ParameterId::ActualPointSourceDepthNm,
        ParameterId::DesignDetectorDistanceMm,
        ParameterId::ActualDetectorDistanceMm,
    ];

    /// Field name as used in job files.
    pub fn name(self) -> &'static str {
        match self {
            ParameterId::NumericalAperture => "numerical_aperture",
            ParameterId::Magnification => "magnification",
            ParameterId::MechanicalTubeLengthMm => "mechanical_tube_length_mm",
            ParameterId::EmissionWavelengthNm => "emission_wavelength_nm",
            ParameterId::DesignCoverSlipRefractiveIndex => "design_cover_slip_refractive_index",
            ParameterId::ActualCoverSlipRefractiveIndex => "actual_cover_slip_refractive_index",
            ParameterId::DesignCoverSlipThicknessUm => "design_cover_slip_thickness_um",
            ParameterId::ActualCoverSlipThicknessUm => "actual_cover_slip_thickness_um",
            ParameterId::DesignImmersionOilRefractiveIndex => {
                "design_immersion_oil_refractive_index"
            }
            ParameterId::ActualImmersionOilRefractiveIndex => {
                "actual_immersion_oil_refractive_index"
            }
            ParameterId::DesignImmersionOilThicknessUm => "design_immersion_oil_thickness_um",
            ParameterId::ActualImmersionOilThicknessUm => "actual_immersion_oil_thickness_um",
            ParameterId::DesignSpecimenLayerRefractiveIndex => {
                "design_specimen_layer_refractive_index"
            }
            ParameterId::ActualSpecimenLayerRefractiveIndex => {
                "actual_specimen_layer_refractive_index"
            }
            ParameterId::ActualPointSourceDepthNm => "actual_point_source_depth_nm",
            ParameterId::DesignDetectorDistanceMm => "design_detector_distance_mm",
            ParameterId::ActualDetectorDistanceMm => "actual_detector_distance_mm",
        }
    }

    /// Physical unit of the field.
    pub fn unit(self) -> &'static str {
        match self {
            ParameterId::EmissionWavelengthNm | ParameterId::ActualPointSourceDepthNm => "nm",
            ParameterId::DesignCoverSlipThicknessUm
            | ParameterId::ActualCoverSlipThicknessUm
            | ParameterId::DesignImmersionOilThicknessUm
            | ParameterId::ActualImmersionOilThicknessUm => "µm",
            ParameterId::MechanicalTubeLengthMm
            | ParameterId::DesignDetectorDistanceMm
            | ParameterId::ActualDetectorDistanceMm => "mm",
            _ => "unitless",
        }
    }

    /// Only the source depth may be zero (a source on the cover slip).
    pub fn allows_zero(self) -> bool {
        self == ParameterId::ActualPointSourceDepthNm
    }
}

impl fmt::Display for ParameterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Sampling grid of a 3D volume.
///
/// Voxel `(ix, iy, iz)` sits at `origin + index * spacing`, except along z
/// when `custom_z_positions_nm` is present: slice `iz` is then exactly the
/// `iz`-th listed coordinate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageGeometry {
    /// Voxel counts along (x, y, z).
    pub size: [usize; 3],
    /// Voxel spacing along (x, y, z) in nm.
    pub spacing_nm: [f64; 3],
    /// Position of voxel (0, 0, 0) in nm.
    pub origin_nm: [f64; 3],
    /// Explicit per-slice z coordinates (nm), one per slice.
    #[serde(default)]
    pub custom_z_positions_nm: Option<Vec<f64>>,
}

impl ImageGeometry {
    /// A grid whose centre voxel (or centre between voxels) is at the origin.
    pub fn centered(size: [usize; 3], spacing_nm: [f64; 3]) -> Self {
        let mut origin_nm = [0.0; 3];
        for axis in 0..3 {
            origin_nm[axis] = -0.5 * size[axis].saturating_sub(1) as f64 * spacing_nm[axis];
        }
        Self {
            size,
            spacing_nm,
            origin_nm,
            custom_z_positions_nm: None,
        }
    }

    /// Evenly spaced slice positions centred about z = 0, starting from the
    /// top slice: `z_k = 0.5 (nz - 1) dz - k dz`.
    pub fn centered_z_positions(nz: usize, dz_nm: f64) -> Vec<f64> {
        let z_max = 0.5 * nz.saturating_sub(1) as f64 * dz_nm;
        (0..nz).map(|k| z_max - k as f64 * dz_nm).collect()
    }

    /// Attach explicit slice positions; the list must have one entry per slice.
    pub fn with_custom_z_positions(mut self, positions_nm: Vec<f64>) -> Result<Self, ConfigurationError> {
        self.custom_z_positions_nm = Some(positions_nm);
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        const AXES: [&str; 3] = ["x", "y", "z"];
        for axis in 0..3 {
            if self.size[axis] == 0 {
                return Err(ConfigurationError::InvalidGeometry(format!(
                    "{} size must be at least 1",
                    AXES[axis]
                )));
            }
            let spacing = self.spacing_nm[axis];
            if !spacing.is_finite() || spacing <= 0.0 {
                return Err(ConfigurationError::InvalidGeometry(format!(
                    "{} spacing must be positive and finite, got {spacing}",
                    AXES[axis]
                )));
            }
            if !self.origin_nm[axis].is_finite() {
                return Err(ConfigurationError::InvalidGeometry(format!(
                    "{} origin must be finite",
                    AXES[axis]
                )));
            }
        }
        if let Some(positions) = &self.custom_z_positions_nm {
            if positions.len() != self.size[2] {
                return Err(ConfigurationError::InvalidGeometry(format!(
                    "{} custom z positions supplied for {} slices",
                    positions.len(),
                    self.size[2]
                )));
            }
            if let Some(bad) = positions.iter().find(|z| !z.is_finite()) {
                return Err(ConfigurationError::InvalidGeometry(format!(
                    "custom z position {bad} is not finite"
                )));
            }
        }
        Ok(())
    }

    pub fn x_position(&self, ix: usize) -> f64 {
        self.origin_nm[0] + ix as f64 * self.spacing_nm[0]
    }

    pub fn y_position(&self, iy: usize) -> f64 {
        self.origin_nm[1] + iy as f64 * self.spacing_nm[1]
    }

    /// Axial coordinate of slice `iz`, honouring custom positions.
    pub fn z_position(&self, iz: usize) -> f64 {
        match &self.custom_z_positions_nm {
            Some(positions) => positions[iz],
            None => self.origin_nm[2] + iz as f64 * self.spacing_nm[2],
        }
    }

    pub fn voxel_position(&self, ix: usize, iy: usize, iz: usize) -> [f64; 3] {
        [self.x_position(ix), self.y_position(iy), self.z_position(iz)]
    }

    /// Array shape in `[z, y, x]` order.
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.size[2], self.size[1], self.size[0])
    }

    /// Number of voxels in one z-slice.
    pub fn slice_len(&self) -> usize {
        self.size[0] * self.size[1]
    }

    pub fn voxel_count(&self) -> usize {
        self.size.iter().product()
    }

    /// Describe the first difference from `other`, if any. Spacings and
    /// positions are compared to a relative tolerance of 1e-9.
    pub fn mismatch(&self, other: &ImageGeometry) -> Option<String> {
        if self.size != other.size {
            return Some(format!("size {:?} vs {:?}", self.size, other.size));
        }
        let close = |a: f64, b: f64| (a - b).abs() <= 1e-9 * a.abs().max(b.abs()).max(1.0);
        for axis in 0..3 {
            if !close(self.spacing_nm[axis], other.spacing_nm[axis]) {
                return Some(format!("spacing {:?} vs {:?}", self.spacing_nm, other.spacing_nm));
            }
            // z positions are compared slice by slice below
            if axis < 2 && !close(self.origin_nm[axis], other.origin_nm[axis]) {
                return Some(format!("origin {:?} vs {:?}", self.origin_nm, other.origin_nm));
            }
        }
        for iz in 0..self.size[2] {
            if !close(self.z_position(iz), other.z_position(iz)) {
                return Some(format!(
                    "slice {iz} at z={} nm vs z={} nm",
                    self.z_position(iz),
                    other.z_position(iz)
                ));
            }
        }
        None
    }
}

/// A dense scalar volume indexed `[z, y, x]` together with its geometry.
///
/// Produced by synthesis and never modified afterwards. Measured volumes use
/// the same container via [`SyntheticImage::from_array`].
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticImage {
    geometry: ImageGeometry,
    data: Array3<f64>,
}

impl SyntheticImage {
    /// Wrap a `[z, y, x]` array; its shape must match the geometry.
    pub fn from_array(geometry: ImageGeometry, data: Array3<f64>) -> Result<Self, ConfigurationError> {
        geometry.validate()?;
        if data.dim() != geometry.shape() {
            return Err(ConfigurationError::InvalidGeometry(format!(
                "data shape {:?} does not match geometry shape {:?}",
                data.dim(),
                geometry.shape()
            )));
        }
        Ok(Self { geometry, data })
    }

    /// Wrap a flat buffer in `[z, y, x]` (x fastest) order.
    pub fn from_vec(geometry: ImageGeometry, values: Vec<f64>) -> Result<Self, ConfigurationError> {
        geometry.validate()?;
        let data = Array3::from_shape_vec(geometry.shape(), values)
            .map_err(|e| ConfigurationError::InvalidGeometry(e.to_string()))?;
        Ok(Self { geometry, data })
    }

    pub fn geometry(&self) -> &ImageGeometry {
        &self.geometry
    }

    pub fn data(&self) -> &Array3<f64> {
        &self.data
    }

    pub fn into_data(self) -> Array3<f64> {
        self.data
    }

    pub fn value_at(&self, ix: usize, iy: usize, iz: usize) -> f64 {
        self.data[[iz, iy, ix]]
    }

    /// The `iz`-th z-slice, indexed `[y, x]`.
    pub fn slice(&self, iz: usize) -> ArrayView2<'_, f64> {
        self.data.index_axis(Axis(0), iz)
    }

    /// Smallest finite value, if any.
    pub fn min(&self) -> Option<f64> {
        self.data
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .fold(None::<f64>, |acc, v| Some(acc.map_or(v, |m: f64| m.min(v))))
    }

    /// Largest finite value, if any.
    pub fn max(&self) -> Option<f64> {
        self.data
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .fold(None::<f64>, |acc, v| Some(acc.map_or(v, |m: f64| m.max(v))))
    }

    /// Voxel index `[x, y, z]` of the largest finite value. Ties resolve to
    /// the first voxel in storage order.
    pub fn argmax(&self) -> Option<[usize; 3]> {
        let mut best: Option<((usize, usize, usize), f64)> = None;
        for (index, &v) in self.data.indexed_iter() {
            if !v.is_finite() {
                continue;
            }
            if best.map_or(true, |(_, b)| v > b) {
                best = Some((index, v));
            }
        }
        best.map(|((iz, iy, ix), _)| [ix, iy, iz])
    }

    /// Physical position (nm) of the brightest voxel, used as an estimate of
    /// where the point source sits in a measured volume.
    pub fn max_position_nm(&self) -> Option<[f64; 3]> {
        self.argmax()
            .map(|[ix, iy, iz]| self.geometry.voxel_position(ix, iy, iz))
    }
}
