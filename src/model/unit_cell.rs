// src/model/unit_cell.rs
use crate::error::{Result, SimError};
use nalgebra::Matrix3;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unit cell parameters (Angstroms, degrees)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UnitCell {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
}

impl Default for UnitCell {
    fn default() -> Self {
        Self { a: 40.0, b: 40.0, c: 40.0, alpha: 90.0, beta: 90.0, gamma: 90.0 }
    }
}

impl fmt::Display for UnitCell {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "a={:.4} b={:.4} c={:.4} Å, α={:.3} β={:.3} γ={:.3}°",
            self.a, self.b, self.c, self.alpha, self.beta, self.gamma
        )
    }
}

/// Index into the six cell parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellParam {
    A,
    B,
    C,
    Alpha,
    Beta,
    Gamma,
}

impl UnitCell {
    pub fn get(&self, p: CellParam) -> f64 {
        match p {
            CellParam::A => self.a,
            CellParam::B => self.b,
            CellParam::C => self.c,
            CellParam::Alpha => self.alpha,
            CellParam::Beta => self.beta,
            CellParam::Gamma => self.gamma,
        }
    }

    pub fn set(&mut self, p: CellParam, v: f64) {
        match p {
            CellParam::A => self.a = v,
            CellParam::B => self.b = v,
            CellParam::C => self.c = v,
            CellParam::Alpha => self.alpha = v,
            CellParam::Beta => self.beta = v,
            CellParam::Gamma => self.gamma = v,
        }
    }

    /// sqrt(1 - cos²α - cos²β - cos²γ + 2 cosα cosβ cosγ)
    fn volume_factor(&self) -> f64 {
        let (ca, cb, cg) = (
            self.alpha.to_radians().cos(),
            self.beta.to_radians().cos(),
            self.gamma.to_radians().cos(),
        );
        let arg = 1.0 - ca * ca - cb * cb - cg * cg + 2.0 * ca * cb * cg;
        arg.max(0.0).sqrt()
    }

    pub fn volume(&self) -> f64 {
        self.a * self.b * self.c * self.volume_factor()
    }

    pub fn validate(&self) -> Result<()> {
        if self.a <= 0.0 || self.b <= 0.0 || self.c <= 0.0 {
            return Err(SimError::DegenerateCell);
        }
        if self.volume_factor() < 1e-9 || self.gamma.to_radians().sin().abs() < 1e-9 {
            return Err(SimError::DegenerateCell);
        }
        Ok(())
    }

    /// Orthogonalization matrix B, columns are a, b, c
    /// with a along x and b in the xy plane.
    ///
    /// # Formula
    /// ```text
    /// | a   b cosγ   c cosβ                 |
    /// | 0   b sinγ   c (cosα - cosβ cosγ)/sinγ |
    /// | 0   0        c V'/sinγ              |
    /// ```
    pub fn orthogonalization_matrix(&self) -> Matrix3<f64> {
        let (ca, cb) = (self.alpha.to_radians().cos(), self.beta.to_radians().cos());
        let (sg, cg) = self.gamma.to_radians().sin_cos();
        let vf = self.volume_factor();
        Matrix3::new(
            self.a, self.b * cg, self.c * cb,
            0.0, self.b * sg, self.c * (ca - cb * cg) / sg,
            0.0, 0.0, self.c * vf / sg,
        )
    }

    /// dB/dp for one of the six cell parameters. Angle derivatives are per degree.
    pub fn orthogonalization_derivative(&self, p: CellParam) -> Matrix3<f64> {
        let (sa, ca) = self.alpha.to_radians().sin_cos();
        let (sb, cb) = self.beta.to_radians().sin_cos();
        let (sg, cg) = self.gamma.to_radians().sin_cos();
        let vf = self.volume_factor();
        let c = self.c;
        let per_degree = std::f64::consts::PI / 180.0;

        match p {
            CellParam::A => Matrix3::new(
                1.0, 0.0, 0.0,
                0.0, 0.0, 0.0,
                0.0, 0.0, 0.0,
            ),
            CellParam::B => Matrix3::new(
                0.0, cg, 0.0,
                0.0, sg, 0.0,
                0.0, 0.0, 0.0,
            ),
            CellParam::C => Matrix3::new(
                0.0, 0.0, cb,
                0.0, 0.0, (ca - cb * cg) / sg,
                0.0, 0.0, vf / sg,
            ),
            CellParam::Alpha => {
                let dvf = sa * (ca - cb * cg) / vf;
                Matrix3::new(
                    0.0, 0.0, 0.0,
                    0.0, 0.0, -c * sa / sg,
                    0.0, 0.0, c * dvf / sg,
                ) * per_degree
            }
            CellParam::Beta => {
                let dvf = sb * (cb - ca * cg) / vf;
                Matrix3::new(
                    0.0, 0.0, -c * sb,
                    0.0, 0.0, c * sb * cg / sg,
                    0.0, 0.0, c * dvf / sg,
                ) * per_degree
            }
            CellParam::Gamma => {
                let dvf = sg * (cg - ca * cb) / vf;
                Matrix3::new(
                    0.0, -self.b * sg, 0.0,
                    0.0, self.b * cg, c * (cb - ca * cg) / (sg * sg),
                    0.0, 0.0, c * (dvf * sg - vf * cg) / (sg * sg),
                ) * per_degree
            }
        }
    }

    /// d²B/dp² for one cell parameter. B is linear in each length, so only
    /// the angles give a non-zero result (per degree²).
    pub fn orthogonalization_second_derivative(&self, p: CellParam) -> Matrix3<f64> {
        let (sa, ca) = self.alpha.to_radians().sin_cos();
        let (sb, cb) = self.beta.to_radians().sin_cos();
        let (sg, cg) = self.gamma.to_radians().sin_cos();
        let vf = self.volume_factor();
        let vf3 = vf * vf * vf;
        let c = self.c;
        let per_degree_sq = (std::f64::consts::PI / 180.0).powi(2);

        // V' = s·t / V, V'' = (cos·t - s²) / V - s² t² / V³ for each angle
        match p {
            CellParam::A | CellParam::B | CellParam::C => Matrix3::zeros(),
            CellParam::Alpha => {
                let t = ca - cb * cg;
                let d2vf = (ca * t - sa * sa) / vf - sa * sa * t * t / vf3;
                Matrix3::new(
                    0.0, 0.0, 0.0,
                    0.0, 0.0, -c * ca / sg,
                    0.0, 0.0, c * d2vf / sg,
                ) * per_degree_sq
            }
            CellParam::Beta => {
                let t = cb - ca * cg;
                let d2vf = (cb * t - sb * sb) / vf - sb * sb * t * t / vf3;
                Matrix3::new(
                    0.0, 0.0, -c * cb,
                    0.0, 0.0, c * cb * cg / sg,
                    0.0, 0.0, c * d2vf / sg,
                ) * per_degree_sq
            }
            CellParam::Gamma => {
                let t = cg - ca * cb;
                let dvf = sg * t / vf;
                let d2vf = (cg * t - sg * sg) / vf - sg * sg * t * t / vf3;
                // c33 = c V / sinγ
                let num = dvf * sg - vf * cg;
                let d_num = (d2vf + vf) * sg;
                Matrix3::new(
                    0.0, -self.b * cg, 0.0,
                    0.0, -self.b * sg, c * (ca * sg * sg - 2.0 * cg * (cb - ca * cg)) / (sg * sg * sg),
                    0.0, 0.0, c * (d_num * sg - 2.0 * num * cg) / (sg * sg * sg),
                ) * per_degree_sq
            }
        }
    }
}

/// The six upper-triangular entries of a metric matrix (or its derivative)
/// in the order b11, b12, b13, b22, b23, b33.
pub fn upper_triangle(m: &Matrix3<f64>) -> [f64; 6] {
    [m[(0, 0)], m[(0, 1)], m[(0, 2)], m[(1, 1)], m[(1, 2)], m[(2, 2)]]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CrystalSystem {
    Cubic,
    Tetragonal,
    Orthorhombic,
    Hexagonal,
    Monoclinic,
    Triclinic,
}

impl Default for CrystalSystem {
    fn default() -> Self {
        CrystalSystem::Triclinic
    }
}

/// One free parameter of a crystal system and the cell parameters tied to it
#[derive(Debug, Clone, Copy)]
pub struct FreeParam {
    pub name: &'static str,
    pub tied: &'static [CellParam],
}

const A_ONLY: &[CellParam] = &[CellParam::A];
const B_ONLY: &[CellParam] = &[CellParam::B];
const C_ONLY: &[CellParam] = &[CellParam::C];
const A_EQ_B: &[CellParam] = &[CellParam::A, CellParam::B];
const A_EQ_B_EQ_C: &[CellParam] = &[CellParam::A, CellParam::B, CellParam::C];

impl CrystalSystem {
    pub fn free_params(self) -> &'static [FreeParam] {
        use CellParam::*;
        match self {
            CrystalSystem::Cubic => &[FreeParam { name: "a", tied: A_EQ_B_EQ_C }],
            CrystalSystem::Tetragonal | CrystalSystem::Hexagonal => &[
                FreeParam { name: "a", tied: A_EQ_B },
                FreeParam { name: "c", tied: C_ONLY },
            ],
            CrystalSystem::Orthorhombic => &[
                FreeParam { name: "a", tied: A_ONLY },
                FreeParam { name: "b", tied: B_ONLY },
                FreeParam { name: "c", tied: C_ONLY },
            ],
            CrystalSystem::Monoclinic => &[
                FreeParam { name: "a", tied: A_ONLY },
                FreeParam { name: "b", tied: B_ONLY },
                FreeParam { name: "c", tied: C_ONLY },
                FreeParam { name: "beta", tied: &[Beta] },
            ],
            CrystalSystem::Triclinic => &[
                FreeParam { name: "a", tied: A_ONLY },
                FreeParam { name: "b", tied: B_ONLY },
                FreeParam { name: "c", tied: C_ONLY },
                FreeParam { name: "alpha", tied: &[Alpha] },
                FreeParam { name: "beta", tied: &[Beta] },
                FreeParam { name: "gamma", tied: &[Gamma] },
            ],
        }
    }

    /// Fixed angles imposed by the system, in degrees
    fn fixed_angles(self) -> Option<(f64, f64, f64)> {
        match self {
            CrystalSystem::Cubic | CrystalSystem::Tetragonal | CrystalSystem::Orthorhombic => {
                Some((90.0, 90.0, 90.0))
            }
            CrystalSystem::Hexagonal => Some((90.0, 90.0, 120.0)),
            CrystalSystem::Monoclinic | CrystalSystem::Triclinic => None,
        }
    }

    /// Values of the free parameters for `cell`
    pub fn values(self, cell: &UnitCell) -> Vec<f64> {
        self.free_params().iter().map(|p| cell.get(p.tied[0])).collect()
    }

    /// Cell with the free parameters set to `values` and the rest
    /// constrained by the system
    pub fn apply(self, base: &UnitCell, values: &[f64]) -> Result<UnitCell> {
        let params = self.free_params();
        if values.len() != params.len() {
            return Err(SimError::InvalidConfig(format!(
                "{:?} cell has {} free parameters, got {}",
                self,
                params.len(),
                values.len()
            )));
        }

        let mut cell = *base;
        if let Some((alpha, beta, gamma)) = self.fixed_angles() {
            cell.alpha = alpha;
            cell.beta = beta;
            cell.gamma = gamma;
        }
        if self == CrystalSystem::Monoclinic {
            cell.alpha = 90.0;
            cell.gamma = 90.0;
        }
        for (p, &v) in params.iter().zip(values) {
            for &tied in p.tied {
                cell.set(tied, v);
            }
        }
        cell.validate()?;
        Ok(cell)
    }

    /// d²B with respect to each free parameter. Ties only join lengths, and
    /// B is linear in each length, so no mixed terms appear.
    pub fn second_derivative_matrices(self, cell: &UnitCell) -> Vec<Matrix3<f64>> {
        self.free_params()
            .iter()
            .map(|p| {
                p.tied
                    .iter()
                    .fold(Matrix3::zeros(), |acc, &t| acc + cell.orthogonalization_second_derivative(t))
            })
            .collect()
    }

    /// dB with respect to each free parameter
    pub fn derivative_matrices(self, cell: &UnitCell) -> Vec<Matrix3<f64>> {
        self.free_params()
            .iter()
            .map(|p| {
                p.tied
                    .iter()
                    .fold(Matrix3::zeros(), |acc, &t| acc + cell.orthogonalization_derivative(t))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn triclinic() -> UnitCell {
        UnitCell { a: 31.0, b: 37.5, c: 42.0, alpha: 81.0, beta: 97.0, gamma: 104.0 }
    }

    #[test]
    fn test_cubic_orthogonalization() {
        let cell = UnitCell { a: 5.0, b: 5.0, c: 5.0, ..Default::default() };
        assert_relative_eq!(cell.orthogonalization_matrix(), Matrix3::identity() * 5.0, epsilon = 1e-12);
        assert_relative_eq!(cell.volume(), 125.0, epsilon = 1e-9);
    }

    #[test]
    fn test_matrix_reproduces_cell() {
        let cell = triclinic();
        let m = cell.orthogonalization_matrix();
        let (a, b, c) = (m.column(0), m.column(1), m.column(2));
        assert_relative_eq!(a.norm(), cell.a, epsilon = 1e-9);
        assert_relative_eq!(b.norm(), cell.b, epsilon = 1e-9);
        assert_relative_eq!(c.norm(), cell.c, epsilon = 1e-9);
        assert_relative_eq!(b.angle(&c).to_degrees(), cell.alpha, epsilon = 1e-9);
        assert_relative_eq!(a.angle(&c).to_degrees(), cell.beta, epsilon = 1e-9);
        assert_relative_eq!(a.angle(&b).to_degrees(), cell.gamma, epsilon = 1e-9);
        assert_relative_eq!(m.determinant(), cell.volume(), max_relative = 1e-12);
    }

    #[test]
    fn test_derivatives_match_finite_difference() {
        let base = triclinic();
        let eps = 1e-6;
        for p in [CellParam::A, CellParam::B, CellParam::C, CellParam::Alpha, CellParam::Beta, CellParam::Gamma] {
            let mut plus = base;
            plus.set(p, base.get(p) + eps);
            let mut minus = base;
            minus.set(p, base.get(p) - eps);
            let numeric = (plus.orthogonalization_matrix() - minus.orthogonalization_matrix()) / (2.0 * eps);
            let analytic = base.orthogonalization_derivative(p);
            assert_relative_eq!(analytic, numeric, epsilon = 1e-7);
        }
    }

    #[test]
    fn test_second_derivatives_match_finite_difference() {
        let base = triclinic();
        let eps = 1e-4;
        for p in [CellParam::A, CellParam::B, CellParam::C, CellParam::Alpha, CellParam::Beta, CellParam::Gamma] {
            let mut plus = base;
            plus.set(p, base.get(p) + eps);
            let mut minus = base;
            minus.set(p, base.get(p) - eps);
            let numeric =
                (plus.orthogonalization_derivative(p) - minus.orthogonalization_derivative(p)) / (2.0 * eps);
            let analytic = base.orthogonalization_second_derivative(p);
            assert_relative_eq!(analytic, numeric, epsilon = 1e-9);
        }

        let cubic = UnitCell { a: 12.0, b: 12.0, c: 12.0, ..Default::default() };
        assert_eq!(CrystalSystem::Cubic.second_derivative_matrices(&cubic), vec![Matrix3::zeros()]);
    }

    #[test]
    fn test_free_parameter_counts() {
        let counts: Vec<usize> = [
            CrystalSystem::Cubic,
            CrystalSystem::Tetragonal,
            CrystalSystem::Orthorhombic,
            CrystalSystem::Hexagonal,
            CrystalSystem::Monoclinic,
            CrystalSystem::Triclinic,
        ]
        .iter()
        .map(|s| s.free_params().len())
        .collect();
        assert_eq!(counts, vec![1, 2, 3, 2, 4, 6]);
    }

    #[test]
    fn test_tied_derivative_is_sum() {
        let cell = CrystalSystem::Tetragonal.apply(&UnitCell::default(), &[50.0, 30.0]).unwrap();
        assert_eq!((cell.a, cell.b, cell.c), (50.0, 50.0, 30.0));

        let d = CrystalSystem::Tetragonal.derivative_matrices(&cell);
        let expected = [[1.0, 0.0, 0.0, 1.0, 0.0, 0.0], [0.0, 0.0, 0.0, 0.0, 0.0, 1.0]];
        for (m, want) in d.iter().zip(expected) {
            for (got, w) in upper_triangle(m).iter().zip(want) {
                assert!((got - w).abs() < 1e-12, "{:?} vs {:?}", upper_triangle(m), want);
            }
        }

        assert!(CrystalSystem::Tetragonal.apply(&cell, &[1.0]).is_err());
    }

    #[test]
    fn test_hexagonal_gamma() {
        let cell = CrystalSystem::Hexagonal.apply(&UnitCell::default(), &[10.0, 20.0]).unwrap();
        assert_eq!(cell.gamma, 120.0);
        assert_eq!(CrystalSystem::Hexagonal.values(&cell), vec![10.0, 20.0]);
    }
}
