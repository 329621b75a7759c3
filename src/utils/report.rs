// src/utils/report.rs

use crate::derivatives::Image;
use crate::engine::SimulationEngine;

/// Text summary of the last completed pass: forward image statistics
/// followed by one line per active derivative image.
pub fn pass_summary(engine: &SimulationEngine) -> String {
  let mut out = String::new();

  let forward = match engine.get_forward_image() {
    Ok(img) => img,
    Err(e) => return format!("No pass available: {}\n", e),
  };

  let (rows, cols) = forward.shape();
  out.push_str(&format!("ROI: {} x {} pixels\n", rows, cols));
  out.push_str(&format!("Cell: {}\n", engine.unit_cell()));
  out.push_str("--------------------------------------------------\n");
  out.push_str(&format!(
    "{:<8} {:<10} {:<14} {:<14}\n",
    "Handle", "Param", "Sum", "Max |v|"
  ));
  out.push_str("--------------------------------------------------\n");
  out.push_str(&row("-", "I", forward));

  let mut inactive = 0;
  for (handle, name) in engine.handles() {
    if !engine.is_active(handle).unwrap_or(false) {
      inactive += 1;
      continue;
    }
    if let Ok(img) = engine.get_derivative_image(handle) {
      out.push_str(&row(&handle.to_string(), &format!("d/d{}", name), img));
    }
    if let Ok(img) = engine.get_second_derivative_image(handle) {
      out.push_str(&row(&handle.to_string(), &format!("d2/d{}2", name), img));
    }
  }

  if inactive > 0 {
    out.push_str(&format!("... and {} inactive parameters.\n", inactive));
  }
  out
}

fn row(handle: &str, name: &str, img: &Image) -> String {
  format!("{:<8} {:<10} {:<14.6e} {:<14.6e}\n", handle, name, img.sum(), img.max_abs())
}
