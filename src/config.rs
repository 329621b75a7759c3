// src/config.rs

use crate::error::{Result, SimError};
use crate::model::{CrystalSystem, Structure, UnitCell};
use crate::physics::geometry::{Beam, DetectorPanel, RegionOfInterest};
use crate::physics::mosaic::MosaicSpread;
use crate::physics::structure_factors::{MillerAmplitude, StructureFactors};
use crate::utils::linalg::{is_rotation, matrix_from_rows};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

// --- Crystal ---

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct CrystalConfig {
  pub cell: UnitCell,
  pub system: CrystalSystem,
  /// Orientation matrix U, row-major
  pub u_matrix: [[f64; 3]; 3],
  /// Number of unit cells along a, b, c in one mosaic domain
  pub ncells: [f64; 3],
  pub mosaic: MosaicSpread,

  /// Amplitude used for reflections missing from the table
  pub default_f: f64,
  pub reflections: Vec<MillerAmplitude>,

  /// When present, amplitudes are computed from the atomic model to `dmin`
  pub structure: Option<Structure>,
  pub dmin: f64,
}

impl Default for CrystalConfig {
  fn default() -> Self {
    Self {
      cell: UnitCell::default(),
      system: CrystalSystem::Triclinic,
      u_matrix: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
      ncells: [10.0, 10.0, 10.0],
      mosaic: MosaicSpread::default(),
      default_f: 1.0,
      reflections: Vec::new(),
      structure: None,
      dmin: 2.0,
    }
  }
}

impl CrystalConfig {
  pub fn structure_factors(&self) -> Result<StructureFactors> {
    match &self.structure {
      Some(structure) => {
        if !self.reflections.is_empty() {
          log::warn!("Atomic model present, ignoring {} tabulated reflections", self.reflections.len());
        }
        StructureFactors::from_structure(structure, self.dmin, self.default_f)
      }
      None => Ok(StructureFactors::new(self.default_f, &self.reflections)),
    }
  }
}

// --- Main Config Struct ---

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct SimulatorConfig {
  pub detector: DetectorPanel,
  pub beam: Beam,
  pub crystal: CrystalConfig,

  /// Defaults to the whole panel
  pub roi: Option<RegionOfInterest>,

  /// Sub-pixel samples per pixel edge
  pub oversample: usize,
  pub spot_scale: f64,
  /// Multiplier in the lattice shape-transform exponent
  pub fudge: f64,
  /// Contributions with Hrad * fudge / 0.63 above this are skipped
  pub shape_cutoff: f64,
  /// Also accumulate second-derivative images
  pub compute_curvatures: bool,
}

impl Default for SimulatorConfig {
  fn default() -> Self {
    Self {
      detector: DetectorPanel::default(),
      beam: Beam::default(),
      crystal: CrystalConfig::default(),
      roi: None,
      oversample: 1,
      spot_scale: 1.0,
      fudge: 1.0,
      shape_cutoff: 30.0,
      compute_curvatures: false,
    }
  }
}

impl SimulatorConfig {
  pub fn roi(&self) -> RegionOfInterest {
    self.roi.unwrap_or_else(|| RegionOfInterest::full(&self.detector))
  }

  pub fn validate(&self) -> Result<()> {
    self.detector.validate()?;
    self.beam.validate()?;
    self.roi().validate(&self.detector)?;
    self.crystal.cell.validate()?;

    if self.oversample == 0 {
      return Err(SimError::InvalidConfig("oversample must be at least 1".into()));
    }
    if self.crystal.ncells.iter().any(|&n| n <= 0.0) {
      return Err(SimError::InvalidConfig(format!(
        "Ncells must be positive, got {:?}",
        self.crystal.ncells
      )));
    }
    if !is_rotation(&matrix_from_rows(self.crystal.u_matrix), 1e-6) {
      return Err(SimError::InvalidConfig("u_matrix must be a proper rotation".into()));
    }
    if self.fudge <= 0.0 || self.shape_cutoff <= 0.0 {
      return Err(SimError::InvalidConfig("fudge and shape_cutoff must be positive".into()));
    }
    Ok(())
  }

  /// Reads a JSON config from an explicit path
  pub fn from_file(path: &Path) -> Result<Self> {
    let file = File::open(path)
      .map_err(|e| SimError::InvalidConfig(format!("Error opening config {:?}: {}", path, e)))?;
    let cfg: Self = serde_json::from_reader(BufReader::new(file))
      .map_err(|e| SimError::InvalidConfig(format!("Error parsing config: {}", e)))?;
    cfg.validate()?;
    Ok(cfg)
  }

  /// Loads config from standard OS location (e.g., ~/.config/diffbragg/simulator.json)
  pub fn load() -> (Self, String) {
    let path = Self::get_path();
    if path.exists() {
      match Self::from_file(&path) {
        Ok(cfg) => (cfg, format!("Config loaded from {:?}", path)),
        Err(e) => (Self::default(), format!("{}. Using defaults.", e)),
      }
    } else {
      (
        Self::default(),
        "No config found. Using defaults.".to_string(),
      )
    }
  }

  /// Saves config to standard OS location
  pub fn save(&self) -> String {
    let path = Self::get_path();
    if let Some(parent) = path.parent() {
      let _ = fs::create_dir_all(parent);
    }

    match File::create(&path) {
      Ok(file) => {
        let writer = BufWriter::new(file);
        match serde_json::to_writer_pretty(writer, self) {
          Ok(_) => format!("Config saved to {:?}", path),
          Err(e) => format!("Failed to save config: {}", e),
        }
      }
      Err(e) => format!("Could not create config file: {}", e),
    }
  }

  fn get_path() -> PathBuf {
    if let Some(proj) = ProjectDirs::from("org", "diffbragg", "diffbragg") {
      proj.config_dir().join("simulator.json")
    } else {
      PathBuf::from("simulator.json")
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_default_is_valid() {
    assert!(SimulatorConfig::default().validate().is_ok());
  }

  #[test]
  fn test_partial_json_uses_defaults() {
    let json = r#"{
      "oversample": 2,
      "crystal": { "system": "Tetragonal", "ncells": [5.0, 5.0, 8.0] },
      "roi": { "fast_start": 0, "fast_end": 4, "slow_start": 0, "slow_end": 4 }
    }"#;
    let cfg: SimulatorConfig = serde_json::from_str(json).unwrap();
    assert_eq!(cfg.oversample, 2);
    assert_eq!(cfg.crystal.system, CrystalSystem::Tetragonal);
    assert_eq!(cfg.crystal.default_f, 1.0);
    assert_eq!(cfg.roi().rows(), 4);
    assert_eq!(cfg.detector.fast_dim, 512);
    assert!(!cfg.compute_curvatures);
    assert!(cfg.validate().is_ok());
  }

  #[test]
  fn test_rejects_bad_values() {
    let mut cfg = SimulatorConfig::default();
    cfg.oversample = 0;
    assert!(cfg.validate().is_err());

    let mut cfg = SimulatorConfig::default();
    cfg.crystal.ncells = [10.0, 0.0, 10.0];
    assert!(cfg.validate().is_err());

    let mut cfg = SimulatorConfig::default();
    cfg.beam.spectrum.clear();
    assert!(cfg.validate().is_err());

    let mut cfg = SimulatorConfig::default();
    cfg.crystal.u_matrix[0][0] = -1.0;
    assert!(cfg.validate().is_err());
  }
}
