// src/derivatives/mod.rs
pub mod buffer;
pub mod rotation;
pub mod unit_cell;

pub use buffer::{AccumulationBuffer, Image};
pub use rotation::{RotationAxis, RotationManager};
pub use unit_cell::{UnitCellManager, METRIC_COEFFICIENTS};

use crate::physics::lattice::{gauss_shape_derivative, gauss_shape_second_derivative};
use nalgebra::{Matrix3, Vector3};

/// Locally computed quantities of one contribution
/// (pixel, sub-pixel, channel, mosaic domain, reflection).
#[derive(Debug, Clone, Copy)]
pub struct ContributionTerms {
    /// Scattering vector (1/Å)
    pub q: Vector3<f64>,
    /// Offset from the nearest reflection scaled by Ncells
    pub v: Vector3<f64>,
    pub ncells: Vector3<f64>,
    /// |F(h0)|
    pub f_cell: f64,
    pub f_latt: f64,
    pub source_i: f64,
    pub capture_fraction: f64,
    pub omega_pixel: f64,
    pub fudge: f64,
}

impl ContributionTerms {
    pub fn intensity(&self) -> f64 {
        self.f_cell * self.f_cell
            * self.f_latt * self.f_latt
            * self.source_i
            * self.capture_fraction
            * self.omega_pixel
    }
}

/// Chain rule from the derivative of the orientation matrix M
/// (columns a, b, c in the lab frame) to dI for one contribution.
pub fn intensity_derivative(d_m: &Matrix3<f64>, t: &ContributionTerms) -> f64 {
    // h = M^T q
    let dh = d_m.tr_mul(&t.q);
    let dv = dh.component_mul(&t.ncells);
    let d_hrad = 2.0 * t.v.dot(&dv);
    let d_flatt = gauss_shape_derivative(t.f_latt, d_hrad, t.fudge);

    2.0 * t.f_cell * t.f_cell * t.f_latt * d_flatt
        * t.source_i
        * t.capture_fraction
        * t.omega_pixel
}

/// Second derivative of I for a parameter with orientation derivatives
/// `d_m` and `d2_m`.
///
/// # Formula
/// ```text
/// d²V     = Nabc ⊙ (d²Mᵀ q)
/// d²Hrad  = 2 (dV·dV + V·d²V)
/// d²I     = 2 |F|² (dFlatt² + Flatt d²Flatt) source_I capture omega
/// ```
pub fn intensity_curvature(d_m: &Matrix3<f64>, d2_m: &Matrix3<f64>, t: &ContributionTerms) -> f64 {
    let dv = d_m.tr_mul(&t.q).component_mul(&t.ncells);
    let d2v = d2_m.tr_mul(&t.q).component_mul(&t.ncells);
    let d_hrad = 2.0 * t.v.dot(&dv);
    let d2_hrad = 2.0 * (dv.dot(&dv) + t.v.dot(&d2v));
    let d_flatt = gauss_shape_derivative(t.f_latt, d_hrad, t.fudge);
    let d2_flatt = gauss_shape_second_derivative(t.f_latt, d_hrad, d2_hrad, t.fudge);

    2.0 * t.f_cell * t.f_cell * (d_flatt * d_flatt + t.f_latt * d2_flatt)
        * t.source_i
        * t.capture_fraction
        * t.omega_pixel
}
