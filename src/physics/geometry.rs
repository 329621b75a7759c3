// src/physics/geometry.rs
use crate::error::{Result, SimError};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Flat detector panel normal to the beam. The fast axis runs along +x,
/// the slow axis along +y, and the panel sits at z = distance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorPanel {
    pub panel_id: usize,
    pub fast_dim: usize,
    pub slow_dim: usize,
    pub pixel_size_mm: f64,
    pub distance_mm: f64,
    /// Beam centre (fast, slow) measured from the panel corner
    pub beam_center_mm: [f64; 2],
    /// Sensor thickness, 0 means every photon is captured
    pub thickness_mm: f64,
    pub attenuation_length_mm: f64,
}

impl Default for DetectorPanel {
    fn default() -> Self {
        Self {
            panel_id: 0,
            fast_dim: 512,
            slow_dim: 512,
            pixel_size_mm: 0.1,
            distance_mm: 100.0,
            beam_center_mm: [25.6, 25.6],
            thickness_mm: 0.0,
            attenuation_length_mm: 0.25,
        }
    }
}

impl DetectorPanel {
    pub fn validate(&self) -> Result<()> {
        if self.fast_dim == 0 || self.slow_dim == 0 {
            return Err(SimError::InvalidConfig("detector has no pixels".into()));
        }
        if self.pixel_size_mm <= 0.0 {
            return Err(SimError::InvalidConfig(format!(
                "pixel size must be positive, got {}",
                self.pixel_size_mm
            )));
        }
        if self.distance_mm <= 0.0 {
            return Err(SimError::InvalidConfig(format!(
                "detector distance must be positive, got {}",
                self.distance_mm
            )));
        }
        if self.thickness_mm < 0.0 || (self.thickness_mm > 0.0 && self.attenuation_length_mm <= 0.0) {
            return Err(SimError::InvalidConfig("invalid sensor thickness/attenuation".into()));
        }
        Ok(())
    }

    /// Lab position (mm) of a point given in fractional pixel coordinates
    pub fn position(&self, fast: f64, slow: f64) -> Vector3<f64> {
        Vector3::new(
            fast * self.pixel_size_mm - self.beam_center_mm[0],
            slow * self.pixel_size_mm - self.beam_center_mm[1],
            self.distance_mm,
        )
    }

    /// Fractional pixel coordinates (fast, slow) where a diffracted ray hits the panel
    pub fn intersect(&self, direction: &Vector3<f64>) -> Option<(f64, f64)> {
        if direction.z <= 0.0 {
            return None;
        }
        let t = self.distance_mm / direction.z;
        Some((
            (direction.x * t + self.beam_center_mm[0]) / self.pixel_size_mm,
            (direction.y * t + self.beam_center_mm[1]) / self.pixel_size_mm,
        ))
    }
}

/// Pixel rectangle simulated in one pass, end bounds exclusive
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegionOfInterest {
    pub fast_start: usize,
    pub fast_end: usize,
    pub slow_start: usize,
    pub slow_end: usize,
}

impl RegionOfInterest {
    pub fn full(panel: &DetectorPanel) -> Self {
        Self { fast_start: 0, fast_end: panel.fast_dim, slow_start: 0, slow_end: panel.slow_dim }
    }

    pub fn rows(&self) -> usize {
        self.slow_end.saturating_sub(self.slow_start)
    }

    pub fn cols(&self) -> usize {
        self.fast_end.saturating_sub(self.fast_start)
    }

    /// Panel pixel (fast, slow) of a row-major ROI index
    pub fn pixel(&self, index: usize) -> (usize, usize) {
        let cols = self.cols();
        (self.fast_start + index % cols, self.slow_start + index / cols)
    }

    pub fn validate(&self, panel: &DetectorPanel) -> Result<()> {
        if self.rows() == 0 || self.cols() == 0 {
            return Err(SimError::EmptyBuffer { rows: self.rows(), cols: self.cols() });
        }
        if self.fast_end > panel.fast_dim || self.slow_end > panel.slow_dim {
            return Err(SimError::InvalidConfig(format!(
                "ROI {:?} extends beyond {}x{} panel",
                self, panel.slow_dim, panel.fast_dim
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpectrumChannel {
    /// Angstroms
    pub wavelength: f64,
    /// Relative weight, applied as source_I
    pub weight: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Beam {
    pub direction: [f64; 3],
    pub spectrum: Vec<SpectrumChannel>,
    /// Photons per square metre
    pub fluence: f64,
}

impl Default for Beam {
    fn default() -> Self {
        Self {
            direction: [0.0, 0.0, 1.0],
            spectrum: vec![SpectrumChannel { wavelength: 1.0, weight: 1.0 }],
            fluence: Beam::fluence_from_flux(1e12, 1.0),
        }
    }
}

impl Beam {
    /// Fluence (photons/m²) of a flux spread over a circular beam of `size_mm` diameter
    pub fn fluence_from_flux(total_flux: f64, size_mm: f64) -> f64 {
        let radius_m = size_mm * 1e-3 / 2.0;
        total_flux / (PI * radius_m * radius_m)
    }

    pub fn unit_direction(&self) -> Vector3<f64> {
        Vector3::from(self.direction).normalize()
    }

    pub fn validate(&self) -> Result<()> {
        if self.spectrum.is_empty() {
            return Err(SimError::InvalidConfig("beam spectrum is empty".into()));
        }
        if let Some(ch) = self.spectrum.iter().find(|c| c.wavelength <= 0.0 || c.weight < 0.0) {
            return Err(SimError::InvalidConfig(format!("invalid spectrum channel {:?}", ch)));
        }
        if Vector3::from(self.direction).norm() < 1e-12 {
            return Err(SimError::InvalidConfig("beam direction is zero".into()));
        }
        Ok(())
    }
}

/// Geometry shared by every channel and mosaic domain at one sub-pixel
#[derive(Debug, Clone, Copy)]
pub struct SubpixelGeometry {
    /// Unit vector from the sample to the sub-pixel centre
    pub diffracted: Vector3<f64>,
    pub omega_pixel: f64,
    pub capture_fraction: f64,
}

impl SubpixelGeometry {
    /// Geometry at sub-pixel (`sub_f`, `sub_s`) of an `oversample`² grid over pixel (fast, slow)
    pub fn new(
        panel: &DetectorPanel,
        fast: usize,
        slow: usize,
        sub_f: usize,
        sub_s: usize,
        oversample: usize,
    ) -> Self {
        let n = oversample as f64;
        let f = fast as f64 + (sub_f as f64 + 0.5) / n;
        let s = slow as f64 + (sub_s as f64 + 0.5) / n;
        let pos = panel.position(f, s);
        let airpath = pos.norm();

        let sub_size = panel.pixel_size_mm / n;
        let cos_parallax = panel.distance_mm / airpath;
        let omega_pixel = sub_size * sub_size / (airpath * airpath) * cos_parallax;

        let capture_fraction = if panel.thickness_mm > 0.0 {
            1.0 - (-panel.thickness_mm / (panel.attenuation_length_mm * cos_parallax)).exp()
        } else {
            1.0
        };

        Self { diffracted: pos / airpath, omega_pixel, capture_fraction }
    }

    /// Scattering vector (1/Å) for incident unit vector `incident`
    pub fn scattering_vector(&self, incident: &Vector3<f64>, wavelength: f64) -> Vector3<f64> {
        (self.diffracted - incident) / wavelength
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roi_indexing() {
        let roi = RegionOfInterest { fast_start: 10, fast_end: 14, slow_start: 20, slow_end: 23 };
        assert_eq!((roi.rows(), roi.cols()), (3, 4));
        assert_eq!(roi.pixel(0), (10, 20));
        assert_eq!(roi.pixel(5), (11, 21));

        let panel = DetectorPanel { fast_dim: 12, ..Default::default() };
        assert!(roi.validate(&panel).is_err());
        assert!(roi.validate(&DetectorPanel::default()).is_ok());
    }

    #[test]
    fn test_intersect_inverts_position() {
        let panel = DetectorPanel::default();
        let pos = panel.position(101.25, 37.5);
        let (f, s) = panel.intersect(&pos.normalize()).unwrap();
        assert!((f - 101.25).abs() < 1e-9 && (s - 37.5).abs() < 1e-9);
    }

    #[test]
    fn test_solid_angle_sums_over_subpixels() {
        // Oversampled solid angles should approximate the whole-pixel value
        let panel = DetectorPanel::default();
        let whole = SubpixelGeometry::new(&panel, 300, 100, 0, 0, 1).omega_pixel;
        let mut sum = 0.0;
        for sf in 0..4 {
            for ss in 0..4 {
                sum += SubpixelGeometry::new(&panel, 300, 100, sf, ss, 4).omega_pixel;
            }
        }
        assert!((sum - whole).abs() / whole < 1e-4, "{} vs {}", sum, whole);
    }

    #[test]
    fn test_capture_fraction() {
        let thin = DetectorPanel::default();
        assert_eq!(SubpixelGeometry::new(&thin, 0, 0, 0, 0, 1).capture_fraction, 1.0);

        let thick = DetectorPanel { thickness_mm: 0.32, ..Default::default() };
        let cf = SubpixelGeometry::new(&thick, 256, 256, 0, 0, 1).capture_fraction;
        let expected = 1.0 - (-0.32_f64 / 0.25).exp();
        assert!((cf - expected).abs() < 1e-6, "{} vs {}", cf, expected);
    }

    #[test]
    fn test_forward_scattering_is_zero() {
        let panel = DetectorPanel::default();
        // Pixel containing the beam centre
        let g = SubpixelGeometry::new(&panel, 255, 255, 0, 0, 1);
        let q = g.scattering_vector(&Vector3::z(), 1.0);
        assert!(q.norm() < 1e-3);
    }
}
