// src/physics/structure_factors.rs
use crate::error::{Result, SimError};
use crate::model::elements::atomic_form_factor;
use crate::model::structure::Structure;
use num_complex::Complex64;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::f64::consts::PI;

/// One tabulated amplitude
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MillerAmplitude {
    pub hkl: [i32; 3],
    pub amplitude: f64,
}

/// |F| lookup by Miller index with a fallback amplitude for missing entries
#[derive(Debug, Clone, Default)]
pub struct StructureFactors {
    pub default_f: f64,
    table: HashMap<[i32; 3], f64>,
}

impl StructureFactors {
    pub fn new(default_f: f64, reflections: &[MillerAmplitude]) -> Self {
        Self {
            default_f,
            table: reflections.iter().map(|r| (r.hkl, r.amplitude)).collect(),
        }
    }

    pub fn get(&self, hkl: [i32; 3]) -> f64 {
        self.table.get(&hkl).copied().unwrap_or(self.default_f)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Computes |F(hkl)| for every reflection with d >= `dmin`
    ///
    /// # Formula
    /// ```text
    /// F(h) = Σ_j occ_j f_j(s) exp(-B_j s²) exp(2πi h·x_j),   s = 1/(2d)
    /// ```
    pub fn from_structure(structure: &Structure, dmin: f64, default_f: f64) -> Result<Self> {
        if dmin <= 0.0 {
            return Err(SimError::InvalidConfig(format!("dmin must be positive, got {}", dmin)));
        }
        structure.cell.validate()?;

        let b = structure.cell.orthogonalization_matrix();
        let b_inv = b.try_inverse().ok_or(SimError::DegenerateCell)?;

        // |h| <= a/dmin bounds every index inside the resolution sphere
        let hmax = (structure.cell.a / dmin).ceil() as i32;
        let kmax = (structure.cell.b / dmin).ceil() as i32;
        let lmax = (structure.cell.c / dmin).ceil() as i32;
        let d_star_max = 1.0 / dmin;

        let reflections: Vec<MillerAmplitude> = (-hmax..=hmax)
            .into_par_iter()
            .flat_map_iter(|h| {
                let mut local = Vec::new();
                for k in -kmax..=kmax {
                    for l in -lmax..=lmax {
                        if h == 0 && k == 0 && l == 0 {
                            continue;
                        }
                        // q = B^-T h
                        let hv = nalgebra::Vector3::new(h as f64, k as f64, l as f64);
                        let d_star = b_inv.tr_mul(&hv).norm();
                        if d_star > d_star_max {
                            continue;
                        }
                        let s = d_star / 2.0;

                        let f: Complex64 = structure
                            .atoms
                            .iter()
                            .map(|atom| {
                                let f0 = atomic_form_factor(&atom.element, s);
                                let dw = (-atom.b_factor * s * s).exp();
                                let phase = 2.0
                                    * PI
                                    * (h as f64 * atom.position[0]
                                        + k as f64 * atom.position[1]
                                        + l as f64 * atom.position[2]);
                                Complex64::from_polar(atom.occupancy * f0 * dw, phase)
                            })
                            .sum();

                        local.push(MillerAmplitude { hkl: [h, k, l], amplitude: f.norm() });
                    }
                }
                local
            })
            .collect();

        log::debug!(
            "Computed {} structure factors to {:.2} Å from {} atoms",
            reflections.len(),
            dmin,
            structure.atoms.len()
        );

        Ok(Self::new(default_f, &reflections))
    }
}
