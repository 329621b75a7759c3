// src/derivatives/rotation.rs
use super::buffer::AccumulationBuffer;
use super::{intensity_curvature, intensity_derivative, ContributionTerms};
use crate::error::Result;
use nalgebra::{Matrix3, Vector3};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationAxis {
    X,
    Y,
    Z,
}

impl RotationAxis {
    pub const ALL: [RotationAxis; 3] = [RotationAxis::X, RotationAxis::Y, RotationAxis::Z];

    /// Position of this rotation in the product Rx * Ry * Rz
    pub fn index(self) -> usize {
        match self {
            RotationAxis::X => 0,
            RotationAxis::Y => 1,
            RotationAxis::Z => 2,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            RotationAxis::X => "rotX",
            RotationAxis::Y => "rotY",
            RotationAxis::Z => "rotZ",
        }
    }

    fn entry(self) -> &'static AxisEntry {
        &AXIS_TABLE[self.index()]
    }

    pub fn unit_vector(self) -> Vector3<f64> {
        let a = self.entry().axis;
        Vector3::new(a[0], a[1], a[2])
    }

    pub fn matrix(self, angle: f64) -> Matrix3<f64> {
        (self.entry().matrix)(angle)
    }

    pub fn derivative(self, angle: f64) -> Matrix3<f64> {
        (self.entry().derivative)(angle)
    }

    /// d²R/dθ² = -(R - e eᵀ): the in-plane block of R negated, zero along the axis
    pub fn second_derivative(self, angle: f64) -> Matrix3<f64> {
        let e = self.unit_vector();
        -(self.matrix(angle) - e * e.transpose())
    }
}

struct AxisEntry {
    axis: [f64; 3],
    matrix: fn(f64) -> Matrix3<f64>,
    derivative: fn(f64) -> Matrix3<f64>,
}

static AXIS_TABLE: [AxisEntry; 3] = [
    AxisEntry { axis: [1.0, 0.0, 0.0], matrix: rot_x, derivative: d_rot_x },
    AxisEntry { axis: [0.0, 1.0, 0.0], matrix: rot_y, derivative: d_rot_y },
    AxisEntry { axis: [0.0, 0.0, 1.0], matrix: rot_z, derivative: d_rot_z },
];

fn rot_x(t: f64) -> Matrix3<f64> {
    let (s, c) = t.sin_cos();
    Matrix3::new(
        1.0, 0.0, 0.0,
        0.0, c, -s,
        0.0, s, c,
    )
}

fn d_rot_x(t: f64) -> Matrix3<f64> {
    let (s, c) = t.sin_cos();
    Matrix3::new(
        0.0, 0.0, 0.0,
        0.0, -s, -c,
        0.0, c, -s,
    )
}

fn rot_y(t: f64) -> Matrix3<f64> {
    let (s, c) = t.sin_cos();
    Matrix3::new(
        c, 0.0, s,
        0.0, 1.0, 0.0,
        -s, 0.0, c,
    )
}

fn d_rot_y(t: f64) -> Matrix3<f64> {
    let (s, c) = t.sin_cos();
    Matrix3::new(
        -s, 0.0, c,
        0.0, 0.0, 0.0,
        -c, 0.0, -s,
    )
}

fn rot_z(t: f64) -> Matrix3<f64> {
    let (s, c) = t.sin_cos();
    Matrix3::new(
        c, -s, 0.0,
        s, c, 0.0,
        0.0, 0.0, 1.0,
    )
}

fn d_rot_z(t: f64) -> Matrix3<f64> {
    let (s, c) = t.sin_cos();
    Matrix3::new(
        -s, -c, 0.0,
        c, -s, 0.0,
        0.0, 0.0, 0.0,
    )
}

/// Derivative manager for one crystal rotation angle (radians).
#[derive(Debug, Clone)]
pub struct RotationManager {
    pub axis: RotationAxis,
    pub buffer: AccumulationBuffer,
    pub r: Matrix3<f64>,
    pub dr: Matrix3<f64>,
    pub d2r: Matrix3<f64>,
}

impl RotationManager {
    pub fn new(axis: RotationAxis, rows: usize, cols: usize) -> Result<Self> {
        let mut manager = Self {
            axis,
            buffer: AccumulationBuffer::initialize(rows, cols)?,
            r: Matrix3::identity(),
            dr: Matrix3::zeros(),
            d2r: Matrix3::zeros(),
        };
        manager.set_r();
        Ok(manager)
    }

    pub fn set_r(&mut self) {
        self.r = self.axis.matrix(self.buffer.value);
        self.dr = self.axis.derivative(self.buffer.value);
        self.d2r = self.axis.second_derivative(self.buffer.value);
    }

    /// dM for one mosaic domain: the product N * Rx * Ry * Rz * U * B with
    /// this manager's rotation replaced by dR.
    pub fn orientation_derivative(
        &self,
        rotations: &[Matrix3<f64>; 3],
        mosaic: &Matrix3<f64>,
        u: &Matrix3<f64>,
        b: &Matrix3<f64>,
    ) -> Matrix3<f64> {
        let mut parts = *rotations;
        parts[self.axis.index()] = self.dr;
        mosaic * parts[0] * parts[1] * parts[2] * u * b
    }

    /// d²M for one mosaic domain, with this manager's rotation replaced by d²R
    pub fn orientation_curvature(
        &self,
        rotations: &[Matrix3<f64>; 3],
        mosaic: &Matrix3<f64>,
        u: &Matrix3<f64>,
        b: &Matrix3<f64>,
    ) -> Matrix3<f64> {
        let mut parts = *rotations;
        parts[self.axis.index()] = self.d2r;
        mosaic * parts[0] * parts[1] * parts[2] * u * b
    }

    pub fn compute_contribution(
        &self,
        rotations: &[Matrix3<f64>; 3],
        mosaic: &Matrix3<f64>,
        u: &Matrix3<f64>,
        b: &Matrix3<f64>,
        terms: &ContributionTerms,
    ) -> f64 {
        let d_m = self.orientation_derivative(rotations, mosaic, u, b);
        intensity_derivative(&d_m, terms)
    }

    pub fn compute_curvature(
        &self,
        rotations: &[Matrix3<f64>; 3],
        mosaic: &Matrix3<f64>,
        u: &Matrix3<f64>,
        b: &Matrix3<f64>,
        terms: &ContributionTerms,
    ) -> f64 {
        let d_m = self.orientation_derivative(rotations, mosaic, u, b);
        let d2_m = self.orientation_curvature(rotations, mosaic, u, b);
        intensity_curvature(&d_m, &d2_m, terms)
    }
}
