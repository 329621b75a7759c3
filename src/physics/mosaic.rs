// src/physics/mosaic.rs
use nalgebra::{Matrix3, Rotation3, Unit, Vector3};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Discrete sampling of the mosaic orientation spread
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MosaicSpread {
    /// Full angular spread in degrees
    pub spread_deg: f64,
    pub domains: usize,
}

impl Default for MosaicSpread {
    fn default() -> Self {
        Self { spread_deg: 0.0, domains: 1 }
    }
}

impl MosaicSpread {
    /// Domain rotation matrices. Axes are spread over the unit sphere on a
    /// Fibonacci lattice and angles are evenly spaced in [-spread/2, spread/2].
    /// A single domain, or zero spread, yields identity matrices.
    pub fn domain_matrices(&self) -> Vec<Matrix3<f64>> {
        let n = self.domains.max(1);
        if n == 1 || self.spread_deg == 0.0 {
            return vec![Matrix3::identity(); n];
        }

        let golden = PI * (3.0 - 5.0_f64.sqrt());
        let half = self.spread_deg.to_radians() / 2.0;

        (0..n)
            .map(|i| {
                let z = 1.0 - 2.0 * (i as f64 + 0.5) / n as f64;
                let r = (1.0 - z * z).sqrt();
                let phi = golden * i as f64;
                let axis = Unit::new_normalize(Vector3::new(r * phi.cos(), r * phi.sin(), z));

                let angle = -half + 2.0 * half * i as f64 / (n - 1) as f64;
                *Rotation3::from_axis_angle(&axis, angle).matrix()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_domain_is_identity() {
        let mats = MosaicSpread::default().domain_matrices();
        assert_eq!(mats, vec![Matrix3::identity()]);

        let zero_spread = MosaicSpread { spread_deg: 0.0, domains: 3 }.domain_matrices();
        assert_eq!(zero_spread.len(), 3);
    }

    #[test]
    fn test_domains_are_rotations_within_spread() {
        let spread = MosaicSpread { spread_deg: 0.5, domains: 9 };
        let mats = spread.domain_matrices();
        assert_eq!(mats.len(), 9);
        for m in &mats {
            assert!((m.determinant() - 1.0).abs() < 1e-12);
            let angle = ((m.trace() - 1.0) / 2.0).clamp(-1.0, 1.0).acos();
            assert!(angle.to_degrees() <= 0.25 + 1e-9, "angle {}", angle.to_degrees());
        }
    }
}
