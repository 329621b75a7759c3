/// Returns the Atomic Number (Z) for a given element symbol
pub fn get_atomic_number(element: &str) -> i32 {
    match element {
        // --- Period 1 ---
        "H"  => 1,
        "He" => 2,
        // --- Period 2 ---
        "Li" => 3, "Be" => 4, "B" => 5, "C" => 6, "N" => 7, "O" => 8, "F" => 9, "Ne" => 10,
        // --- Period 3 ---
        "Na" => 11, "Mg" => 12, "Al" => 13, "Si" => 14, "P" => 15, "S" => 16, "Cl" => 17, "Ar" => 18,
        // --- Period 4 ---
        "K" => 19, "Ca" => 20, "Sc" => 21, "Ti" => 22, "V" => 23, "Cr" => 24, "Mn" => 25,
        "Fe" => 26, "Co" => 27, "Ni" => 28, "Cu" => 29, "Zn" => 30, "Ga" => 31, "Ge" => 32,
        "As" => 33, "Se" => 34, "Br" => 35, "Kr" => 36,
        _ => 0, // Unknown/Dummy
    }
}

/// Cromer-Mann coefficients [a1, b1, a2, b2, a3, b3, a4, b4, c]
/// (International Tables for Crystallography, Vol. C, Table 6.1.1.4)
pub fn get_cromer_mann_coeffs(element: &str) -> Option<[f64; 9]> {
    let c = match element {
        "H"  => [0.493002, 10.5109, 0.322912, 26.1257, 0.140191, 3.14236, 0.040810, 57.7997, 0.003038],
        "C"  => [2.3100, 20.8439, 1.0200, 10.2075, 1.5886, 0.5687, 0.8650, 51.6512, 0.2156],
        "N"  => [12.2126, 0.0057, 3.1322, 9.8933, 2.0125, 28.9975, 1.1663, 0.5826, -11.529],
        "O"  => [3.0485, 13.2771, 2.2868, 5.7011, 1.5463, 0.3239, 0.8670, 32.9089, 0.2508],
        "Na" => [4.7626, 3.2850, 3.1736, 8.8422, 1.2674, 0.3136, 1.1128, 129.424, 0.6760],
        "P"  => [6.4345, 1.9067, 4.1791, 27.1570, 1.7800, 0.5260, 1.4908, 68.1645, 1.1149],
        "S"  => [6.9053, 1.4679, 5.2034, 22.2151, 1.4379, 0.2536, 1.5863, 56.1720, 0.8669],
        "Cl" => [11.4604, 0.0104, 7.1962, 1.1662, 6.2556, 18.5194, 1.6455, 47.7784, -9.5574],
        "Fe" => [11.7695, 4.7611, 7.3573, 0.3072, 3.5222, 15.3535, 2.3045, 76.8805, 1.0369],
        _ => return None,
    };
    Some(c)
}

/// Atomic form factor at s = sin(θ)/λ. Elements without tabulated
/// coefficients scatter as their atomic number.
pub fn atomic_form_factor(element: &str, s: f64) -> f64 {
    match get_cromer_mann_coeffs(element) {
        Some(c) => {
            let s2 = s * s;
            c[0] * (-c[1] * s2).exp()
                + c[2] * (-c[3] * s2).exp()
                + c[4] * (-c[5] * s2).exp()
                + c[6] * (-c[7] * s2).exp()
                + c[8]
        }
        None => get_atomic_number(element).max(1) as f64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_scattering_equals_electron_count() {
        // f(0) is close to Z for the tabulated elements
        for el in ["H", "C", "N", "O", "S", "Fe"] {
            let f0 = atomic_form_factor(el, 0.0);
            let z = get_atomic_number(el) as f64;
            assert!((f0 - z).abs() < 0.05, "{}: f(0) = {}", el, f0);
        }
    }

    #[test]
    fn test_form_factor_falls_off() {
        assert!(atomic_form_factor("O", 0.5) < atomic_form_factor("O", 0.1));
        assert_eq!(atomic_form_factor("Kr", 0.3), 36.0);
    }
}
