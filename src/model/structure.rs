use super::unit_cell::UnitCell;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Atom {
    pub element: String,
    /// Fractional coordinates
    pub position: [f64; 3],
    /// Isotropic displacement parameter (Å²)
    #[serde(default)]
    pub b_factor: f64,
    #[serde(default = "full_occupancy")]
    pub occupancy: f64,
}

fn full_occupancy() -> f64 {
    1.0
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Structure {
    pub cell: UnitCell,
    pub atoms: Vec<Atom>,
}
