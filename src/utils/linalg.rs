// src/utils/linalg.rs

use nalgebra::Matrix3;

/// Build a matrix from row arrays
///
/// # Arguments
/// * `rows` - [[m11, m12, m13], [m21, m22, m23], [m31, m32, m33]]
pub fn matrix_from_rows(rows: [[f64; 3]; 3]) -> Matrix3<f64> {
  Matrix3::new(
    rows[0][0], rows[0][1], rows[0][2],
    rows[1][0], rows[1][1], rows[1][2],
    rows[2][0], rows[2][1], rows[2][2],
  )
}

/// Inverse of [`matrix_from_rows`]
pub fn matrix_to_rows(m: &Matrix3<f64>) -> [[f64; 3]; 3] {
  [
    [m.m11, m.m12, m.m13],
    [m.m21, m.m22, m.m23],
    [m.m31, m.m32, m.m33],
  ]
}

/// True when `m` is a proper rotation within `tol`
///
/// # Formula
/// ```text
/// M^T M = I,  det(M) = +1
/// ```
pub fn is_rotation(m: &Matrix3<f64>, tol: f64) -> bool {
  let gram = m.transpose() * m - Matrix3::identity();
  gram.iter().all(|v| v.abs() < tol) && (m.determinant() - 1.0).abs() < tol
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_row_roundtrip() {
    let rows = [[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 9.0]];
    let m = matrix_from_rows(rows);

    assert_eq!(m[(0, 2)], 3.0);
    assert_eq!(m[(2, 0)], 7.0);
    assert_eq!(matrix_to_rows(&m), rows);
  }

  #[test]
  fn test_rotation_check() {
    let r = nalgebra::Rotation3::from_euler_angles(0.1, -0.4, 1.2);
    assert!(is_rotation(r.matrix(), 1e-12));

    // Reflection: orthogonal but det = -1
    let mirror = matrix_from_rows([[-1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]]);
    assert!(!is_rotation(&mirror, 1e-12));

    assert!(!is_rotation(&(Matrix3::identity() * 2.0), 1e-6));
  }
}
