// src/physics/lattice.rs
use nalgebra::Vector3;

/// Width constant of the Gaussian shape transform
pub const GAUSS_WIDTH: f64 = 0.63;

/// Fractional offset of `h` from its nearest reciprocal-lattice point,
/// together with that point.
pub fn nearest_reflection(h: &Vector3<f64>) -> ([i32; 3], Vector3<f64>) {
    let h0 = h.map(f64::round);
    let hkl = [h0.x as i32, h0.y as i32, h0.z as i32];
    (hkl, h - h0)
}

/// Scales the fractional offset by the number of cells along each axis.
pub fn scaled_offset(delta_h: &Vector3<f64>, ncells: &Vector3<f64>) -> Vector3<f64> {
    delta_h.component_mul(ncells)
}

/// Gaussian lattice shape transform for squared scaled offset `hrad`,
/// peaking at `cells` = Na * Nb * Nc
pub fn gauss_shape(hrad: f64, fudge: f64, cells: f64) -> f64 {
    cells * (-hrad * fudge / GAUSS_WIDTH).exp()
}

/// d(Flatt)/dp given Flatt and d(Hrad)/dp
pub fn gauss_shape_derivative(f_latt: f64, d_hrad: f64, fudge: f64) -> f64 {
    -f_latt * fudge / GAUSS_WIDTH * d_hrad
}

/// d²(Flatt)/dp² given Flatt, d(Hrad)/dp and d²(Hrad)/dp²
pub fn gauss_shape_second_derivative(f_latt: f64, d_hrad: f64, d2_hrad: f64, fudge: f64) -> f64 {
    let k = fudge / GAUSS_WIDTH;
    f_latt * (k * k * d_hrad * d_hrad - k * d2_hrad)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nearest_reflection() {
        let (hkl, dh) = nearest_reflection(&Vector3::new(1.2, -2.6, 0.49));
        assert_eq!(hkl, [1, -3, 0]);
        assert!((dh.x - 0.2).abs() < 1e-12);
        assert!((dh.y - 0.4).abs() < 1e-12);
        assert!((dh.z - 0.49).abs() < 1e-12);
    }

    #[test]
    fn test_shape_peak_and_derivative() {
        assert_eq!(gauss_shape(0.0, 1.0, 1.0), 1.0);
        assert_eq!(gauss_shape(0.0, 1.0, 1000.0), 1000.0);

        let hrad = 0.8;
        let eps = 1e-6;
        let cells = 240.0;
        let numeric =
            (gauss_shape(hrad + eps, 1.3, cells) - gauss_shape(hrad - eps, 1.3, cells)) / (2.0 * eps);
        let analytic = gauss_shape_derivative(gauss_shape(hrad, 1.3, cells), 1.0, 1.3);
        assert!((numeric - analytic).abs() < 1e-8 * cells, "{} vs {}", numeric, analytic);
    }

    #[test]
    fn test_shape_second_derivative() {
        // Flatt(x) with Hrad(x) = x², so dHrad = 2x and d²Hrad = 2
        let shape = |x: f64| gauss_shape(x * x, 0.7, 50.0);
        let (x, eps) = (0.6, 1e-4);
        let numeric = (shape(x + eps) - 2.0 * shape(x) + shape(x - eps)) / (eps * eps);
        let analytic = gauss_shape_second_derivative(shape(x), 2.0 * x, 2.0, 0.7);
        assert!((numeric - analytic).abs() < 1e-5 * analytic.abs(), "{} vs {}", numeric, analytic);
    }

    #[test]
    fn test_shape_scales_with_crystal_size() {
        // Same fractional offset, doubled cell counts: peak grows by 8
        let offset = Vector3::new(0.01, 0.0, 0.0);
        let small = Vector3::new(10.0, 10.0, 10.0);
        let large = small * 2.0;
        let f_small = gauss_shape(scaled_offset(&offset, &small).norm_squared(), 1.0, small.product());
        let f_large = gauss_shape(scaled_offset(&Vector3::zeros(), &large).norm_squared(), 1.0, large.product());
        assert_eq!(f_large, 8000.0);
        assert!(f_small < 1000.0);
    }
}
