// src/derivatives/unit_cell.rs
use super::buffer::AccumulationBuffer;
use super::{intensity_curvature, intensity_derivative, ContributionTerms};
use crate::error::{Result, SimError};
use nalgebra::Matrix3;

/// Number of upper-triangular entries that define dB
pub const METRIC_COEFFICIENTS: usize = 6;

/// Derivative manager for one free unit-cell parameter.
#[derive(Debug, Clone)]
pub struct UnitCellManager {
    pub name: &'static str,
    pub buffer: AccumulationBuffer,
    pub db: Matrix3<f64>,
    pub d2b: Matrix3<f64>,
    /// False while `db` was built for a metric matrix that is no longer in use
    pub db_current: bool,
    pub d2b_current: bool,
}

fn upper_triangular(coefficients: &[f64]) -> Result<Matrix3<f64>> {
    if coefficients.len() != METRIC_COEFFICIENTS {
        return Err(SimError::CoefficientCount {
            expected: METRIC_COEFFICIENTS,
            found: coefficients.len(),
        });
    }
    let c = coefficients;
    Ok(Matrix3::new(
        c[0], c[1], c[2],
        0.0, c[3], c[4],
        0.0, 0.0, c[5],
    ))
}

impl UnitCellManager {
    pub fn new(name: &'static str, rows: usize, cols: usize) -> Result<Self> {
        Ok(Self {
            name,
            buffer: AccumulationBuffer::initialize(rows, cols)?,
            db: Matrix3::zeros(),
            d2b: Matrix3::zeros(),
            db_current: true,
            d2b_current: true,
        })
    }

    /// Rebuild dB from `[b11, b12, b13, b22, b23, b33]`.
    pub fn set_derivative_matrix(&mut self, coefficients: &[f64]) -> Result<()> {
        self.db = upper_triangular(coefficients)?;
        self.db_current = true;
        Ok(())
    }

    /// Rebuild d²B from the same six-entry layout
    pub fn set_second_derivative_matrix(&mut self, coefficients: &[f64]) -> Result<()> {
        self.d2b = upper_triangular(coefficients)?;
        self.d2b_current = true;
        Ok(())
    }

    /// dM = (N * RXYZ) * U * dB, where `mosaic_rxyz` is the cached
    /// product of the domain matrix and the composed rotation.
    pub fn orientation_derivative(&self, mosaic_rxyz: &Matrix3<f64>, u: &Matrix3<f64>) -> Matrix3<f64> {
        mosaic_rxyz * u * self.db
    }

    pub fn orientation_curvature(&self, mosaic_rxyz: &Matrix3<f64>, u: &Matrix3<f64>) -> Matrix3<f64> {
        mosaic_rxyz * u * self.d2b
    }

    pub fn compute_curvature(
        &self,
        mosaic_rxyz: &Matrix3<f64>,
        u: &Matrix3<f64>,
        terms: &ContributionTerms,
    ) -> f64 {
        let d_m = self.orientation_derivative(mosaic_rxyz, u);
        intensity_curvature(&d_m, &self.orientation_curvature(mosaic_rxyz, u), terms)
    }

    pub fn compute_contribution(
        &self,
        mosaic_rxyz: &Matrix3<f64>,
        u: &Matrix3<f64>,
        terms: &ContributionTerms,
    ) -> f64 {
        intensity_derivative(&self.orientation_derivative(mosaic_rxyz, u), terms)
    }
}
