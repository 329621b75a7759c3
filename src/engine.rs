// src/engine.rs
use crate::config::SimulatorConfig;
use crate::derivatives::{
    intensity_curvature, intensity_derivative, ContributionTerms, Image, RotationAxis,
    RotationManager, UnitCellManager, METRIC_COEFFICIENTS,
};
use crate::error::{Result, SimError};
use crate::model::unit_cell::upper_triangle;
use crate::model::{CrystalSystem, UnitCell};
use crate::physics::geometry::{Beam, DetectorPanel, RegionOfInterest, SubpixelGeometry};
use crate::physics::lattice::{gauss_shape, nearest_reflection, scaled_offset, GAUSS_WIDTH};
use crate::physics::structure_factors::StructureFactors;
use crate::utils::linalg::{is_rotation, matrix_from_rows};
use log::{debug, info, warn};
use nalgebra::{Matrix3, Vector3};
use rayon::prelude::*;
use std::time::Instant;

/// Squared classical electron radius (m²)
pub const R_E_SQR: f64 = 7.940_792_480_189_65e-30;

/// Handles 0..3 address the rotation managers, unit-cell handles follow
pub const ROTATION_HANDLES: usize = 3;

const MAX_MANAGERS: usize = ROTATION_HANDLES + METRIC_COEFFICIENTS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Uninitialized,
    /// Managers exist, buffers not reset since the last pass
    Configured,
    /// Buffers zeroed, ready for a pass
    Ready,
    /// A pass completed since the last reset
    Simulated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handle {
    Rotation(usize),
    UnitCell(usize),
}

/// Sums for one pixel, computed by a single worker
struct PixelSample {
    forward: f64,
    derivatives: [f64; MAX_MANAGERS],
    curvatures: [f64; MAX_MANAGERS],
}

/// Per-pass cache consumed by the hot loop. The dM and d²M entries come from
/// the managers' `orientation_derivative` / `orientation_curvature`, so feeding
/// them to `intensity_derivative` / `intensity_curvature` is the managers'
/// `compute_contribution` / `compute_curvature` with the matrix product hoisted
/// out of the pixel loop.
struct PassPlan {
    /// N_m * RXYZ * U * B for each mosaic domain
    orientations: Vec<Matrix3<f64>>,
    /// Handles of the active managers
    active: Vec<usize>,
    /// dM per active manager, per mosaic domain
    derivatives: Vec<Vec<Matrix3<f64>>>,
    /// d²M per active manager, per mosaic domain; empty without curvatures
    curvatures: Vec<Vec<Matrix3<f64>>>,
    with_curvatures: bool,
}

pub struct SimulationEngine {
    detector: DetectorPanel,
    beam: Beam,
    roi: RegionOfInterest,
    incident: Vector3<f64>,
    oversample: usize,
    spot_scale: f64,
    fudge: f64,
    shape_cutoff: f64,
    ncells: Vector3<f64>,
    structure_factors: StructureFactors,
    compute_curvatures: bool,

    crystal_system: CrystalSystem,
    cell: UnitCell,
    cell_dirty: bool,
    /// B was set directly and no longer follows `cell`
    metric_overridden: bool,

    u_matrix: Matrix3<f64>,
    b_matrix: Matrix3<f64>,
    rxyz: Matrix3<f64>,
    umats: Vec<Matrix3<f64>>,
    umats_rxyz: Vec<Matrix3<f64>>,
    real_axes: [Vector3<f64>; 3],
    reciprocal_axes: [Vector3<f64>; 3],

    rot_managers: Vec<RotationManager>,
    ucell_managers: Vec<UnitCellManager>,
    forward: Image,
    state: EngineState,
    plan: Option<PassPlan>,
}

impl SimulationEngine {
    pub fn new(config: &SimulatorConfig) -> Result<Self> {
        config.validate()?;

        let crystal = &config.crystal;
        let roi = config.roi();
        let cell = crystal.system.apply(&crystal.cell, &crystal.system.values(&crystal.cell))?;
        let umats = crystal.mosaic.domain_matrices();

        let mut engine = Self {
            detector: config.detector.clone(),
            beam: config.beam.clone(),
            roi,
            incident: config.beam.unit_direction(),
            oversample: config.oversample,
            spot_scale: config.spot_scale,
            fudge: config.fudge,
            shape_cutoff: config.shape_cutoff,
            ncells: Vector3::from(crystal.ncells),
            structure_factors: crystal.structure_factors()?,
            compute_curvatures: config.compute_curvatures,
            crystal_system: crystal.system,
            cell,
            cell_dirty: false,
            metric_overridden: false,
            u_matrix: matrix_from_rows(crystal.u_matrix),
            b_matrix: cell.orthogonalization_matrix(),
            rxyz: Matrix3::identity(),
            umats_rxyz: umats.clone(),
            umats,
            real_axes: [Vector3::zeros(); 3],
            reciprocal_axes: [Vector3::zeros(); 3],
            rot_managers: Vec::new(),
            ucell_managers: Vec::new(),
            forward: Image::zeros(roi.rows(), roi.cols())?,
            state: EngineState::Uninitialized,
            plan: None,
        };
        engine.update_axes();

        info!(
            "Engine for panel {}: ROI {}x{}, {} channel(s), {} mosaic domain(s), oversample {}",
            engine.detector.panel_id,
            roi.rows(),
            roi.cols(),
            engine.beam.spectrum.len(),
            engine.umats.len(),
            engine.oversample
        );
        Ok(engine)
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Creates one rotation manager per axis and one unit-cell manager per
    /// free parameter of the crystal system, all inactive.
    pub fn initialize_managers(&mut self) -> Result<()> {
        let (rows, cols) = (self.roi.rows(), self.roi.cols());

        self.rot_managers = RotationAxis::ALL
            .iter()
            .map(|&axis| RotationManager::new(axis, rows, cols))
            .collect::<Result<_>>()?;

        let values = self.crystal_system.values(&self.cell);
        let d_matrices = self.crystal_system.derivative_matrices(&self.cell);
        let d2_matrices = self.crystal_system.second_derivative_matrices(&self.cell);
        self.ucell_managers = self
            .crystal_system
            .free_params()
            .iter()
            .zip(values.iter().zip(d_matrices.iter().zip(&d2_matrices)))
            .map(|(param, (&value, (db, d2b)))| -> Result<UnitCellManager> {
                let mut m = UnitCellManager::new(param.name, rows, cols)?;
                m.buffer.value = value;
                m.set_derivative_matrix(&upper_triangle(db))?;
                m.set_second_derivative_matrix(&upper_triangle(d2b))?;
                if self.metric_overridden {
                    m.db_current = false;
                    m.d2b_current = false;
                }
                Ok(m)
            })
            .collect::<Result<_>>()?;

        self.rxyz = Matrix3::identity();
        self.cell_dirty = false;
        self.state = EngineState::Configured;
        self.plan = None;

        info!(
            "Initialized {} rotation and {} unit-cell ({:?}) managers",
            self.rot_managers.len(),
            self.ucell_managers.len(),
            self.crystal_system
        );
        Ok(())
    }

    pub fn num_managers(&self) -> usize {
        self.rot_managers.len() + self.ucell_managers.len()
    }

    /// (handle, parameter name) for every manager
    pub fn handles(&self) -> Vec<(usize, &'static str)> {
        let rot = self.rot_managers.iter().map(|m| m.axis.name());
        let ucell = self.ucell_managers.iter().map(|m| m.name);
        rot.chain(ucell).enumerate().collect()
    }

    pub fn resolve(&self, handle: usize) -> Result<Handle> {
        if self.state == EngineState::Uninitialized {
            return Err(SimError::NotInitialized);
        }
        let n_rot = self.rot_managers.len();
        if handle < n_rot {
            Ok(Handle::Rotation(handle))
        } else if handle < self.num_managers() {
            Ok(Handle::UnitCell(handle - n_rot))
        } else {
            Err(SimError::InvalidHandle { handle, total: self.num_managers() })
        }
    }

    pub fn set_parameter(&mut self, handle: usize, value: f64) -> Result<()> {
        match self.resolve(handle)? {
            Handle::Rotation(i) => {
                let m = &mut self.rot_managers[i];
                m.buffer.value = value;
                m.set_r();
            }
            Handle::UnitCell(i) => {
                self.ucell_managers[i].buffer.value = value;
                self.cell_dirty = true;
            }
        }
        Ok(())
    }

    pub fn get_parameter(&self, handle: usize) -> Result<f64> {
        Ok(match self.resolve(handle)? {
            Handle::Rotation(i) => self.rot_managers[i].buffer.value,
            Handle::UnitCell(i) => self.ucell_managers[i].buffer.value,
        })
    }

    pub fn set_active(&mut self, handle: usize, active: bool) -> Result<()> {
        match self.resolve(handle)? {
            Handle::Rotation(i) => self.rot_managers[i].buffer.active = active,
            Handle::UnitCell(i) => self.ucell_managers[i].buffer.active = active,
        }
        Ok(())
    }

    pub fn is_active(&self, handle: usize) -> Result<bool> {
        Ok(match self.resolve(handle)? {
            Handle::Rotation(i) => self.rot_managers[i].buffer.active,
            Handle::UnitCell(i) => self.ucell_managers[i].buffer.active,
        })
    }

    /// Overrides dB of one unit-cell manager. A later `set_parameter` on a
    /// unit-cell handle rebuilds every dB from the crystal-system model.
    pub fn set_ucell_derivative_matrix(&mut self, handle: usize, coefficients: &[f64]) -> Result<()> {
        let i = self.ucell_index(handle)?;
        self.ucell_managers[i].set_derivative_matrix(coefficients)
    }

    /// Overrides d²B of one unit-cell manager, same layout and rebuild rule as dB
    pub fn set_ucell_second_derivative_matrix(&mut self, handle: usize, coefficients: &[f64]) -> Result<()> {
        let i = self.ucell_index(handle)?;
        self.ucell_managers[i].set_second_derivative_matrix(coefficients)
    }

    fn ucell_index(&self, handle: usize) -> Result<usize> {
        match self.resolve(handle)? {
            Handle::UnitCell(i) => Ok(i),
            Handle::Rotation(_) => Err(SimError::InvalidConfig(format!(
                "handle {} is a rotation, not a unit-cell parameter",
                handle
            ))),
        }
    }

    /// Enables second-derivative images from the next pass on
    pub fn set_compute_curvatures(&mut self, enabled: bool) {
        self.compute_curvatures = enabled;
    }

    pub fn compute_curvatures(&self) -> bool {
        self.compute_curvatures
    }

    /// Replaces the crystal orientation U, which must be a proper rotation
    pub fn set_orientation_matrix(&mut self, u: Matrix3<f64>) -> Result<()> {
        if !is_rotation(&u, 1e-6) {
            return Err(SimError::InvalidConfig(format!("U is not a rotation: {}", u)));
        }
        self.u_matrix = u;
        self.update_axes();
        Ok(())
    }

    /// Replaces the metric matrix B directly, bypassing the cell model.
    /// Unit-cell dB and d²B built for the previous B must be set again with
    /// `set_ucell_derivative_matrix` before those managers take part in a pass.
    pub fn set_metric_matrix(&mut self, b: Matrix3<f64>) -> Result<()> {
        if b.determinant().abs() < 1e-12 {
            return Err(SimError::DegenerateCell);
        }
        self.b_matrix = b;
        self.cell_dirty = false;
        self.metric_overridden = true;
        for m in &mut self.ucell_managers {
            m.db_current = false;
            m.d2b_current = false;
        }
        if self.ucell_managers.iter().any(|m| m.buffer.active) {
            warn!("Metric matrix replaced while unit-cell managers are active, their dB must be reset");
        }
        self.update_axes();
        Ok(())
    }

    /// Replaces the sampled mosaic-domain rotations
    pub fn set_mosaic_domains(&mut self, umats: Vec<Matrix3<f64>>) -> Result<()> {
        if umats.is_empty() {
            return Err(SimError::InvalidConfig("at least one mosaic domain is required".into()));
        }
        self.umats_rxyz = umats.iter().map(|n| n * self.rxyz).collect();
        self.umats = umats;
        Ok(())
    }

    pub fn orientation_matrix(&self) -> &Matrix3<f64> {
        &self.u_matrix
    }

    pub fn metric_matrix(&self) -> &Matrix3<f64> {
        &self.b_matrix
    }

    pub fn unit_cell(&self) -> &UnitCell {
        &self.cell
    }

    /// Lab-frame a, b, c of the unmosaic crystal
    pub fn real_axes(&self) -> &[Vector3<f64>; 3] {
        &self.real_axes
    }

    /// Lab-frame a*, b*, c* (1/Å, no 2π)
    pub fn reciprocal_axes(&self) -> &[Vector3<f64>; 3] {
        &self.reciprocal_axes
    }

    fn update_axes(&mut self) {
        let m = self.rxyz * self.u_matrix * self.b_matrix;
        self.real_axes = [m.column(0).into_owned(), m.column(1).into_owned(), m.column(2).into_owned()];
        if let Some(inv) = m.try_inverse() {
            self.reciprocal_axes = [
                inv.row(0).transpose(),
                inv.row(1).transpose(),
                inv.row(2).transpose(),
            ];
        }
    }

    /// Rebuilds B and dB when the cell changed, refreshes R/dR, RXYZ and the
    /// per-domain caches used by the hot loop.
    pub fn precompute_orientation_samples(&mut self) -> Result<()> {
        if self.state == EngineState::Uninitialized {
            return Err(SimError::NotInitialized);
        }

        if self.cell_dirty {
            let values: Vec<f64> = self.ucell_managers.iter().map(|m| m.buffer.value).collect();
            self.cell = self.crystal_system.apply(&self.cell, &values)?;
            self.b_matrix = self.cell.orthogonalization_matrix();
            let d_matrices = self.crystal_system.derivative_matrices(&self.cell);
            let d2_matrices = self.crystal_system.second_derivative_matrices(&self.cell);
            for (m, (db, d2b)) in self.ucell_managers.iter_mut().zip(d_matrices.iter().zip(&d2_matrices)) {
                m.set_derivative_matrix(&upper_triangle(db))?;
                m.set_second_derivative_matrix(&upper_triangle(d2b))?;
            }
            self.cell_dirty = false;
            self.metric_overridden = false;
            debug!("Rebuilt metric matrix for {:?}", self.cell);
        }

        let curvatures = self.compute_curvatures;
        if let Some(m) = self
            .ucell_managers
            .iter()
            .find(|m| m.buffer.active && (!m.db_current || (curvatures && !m.d2b_current)))
        {
            return Err(SimError::StaleMetricDerivative { name: m.name });
        }

        for m in &mut self.rot_managers {
            m.set_r();
        }
        let rotations = self.rotations();
        self.rxyz = rotations[0] * rotations[1] * rotations[2];
        self.umats_rxyz = self.umats.iter().map(|n| n * self.rxyz).collect();
        self.update_axes();

        let ub = self.u_matrix * self.b_matrix;
        let orientations = self.umats_rxyz.iter().map(|nr| nr * ub).collect();

        let (u, b) = (&self.u_matrix, &self.b_matrix);
        let mut active = Vec::new();
        let mut derivatives = Vec::new();
        let mut second = Vec::new();
        for m in self.rot_managers.iter().filter(|m| m.buffer.active) {
            active.push(m.axis.index());
            derivatives.push(
                self.umats.iter().map(|n| m.orientation_derivative(&rotations, n, u, b)).collect(),
            );
            if curvatures {
                second.push(
                    self.umats.iter().map(|n| m.orientation_curvature(&rotations, n, u, b)).collect(),
                );
            }
        }
        let n_rot = self.rot_managers.len();
        for (i, m) in self.ucell_managers.iter().enumerate().filter(|(_, m)| m.buffer.active) {
            active.push(n_rot + i);
            derivatives.push(self.umats_rxyz.iter().map(|nr| m.orientation_derivative(nr, u)).collect());
            if curvatures {
                second.push(self.umats_rxyz.iter().map(|nr| m.orientation_curvature(nr, u)).collect());
            }
        }

        self.plan = Some(PassPlan { orientations, active, derivatives, curvatures: second, with_curvatures: curvatures });
        Ok(())
    }

    fn rotations(&self) -> [Matrix3<f64>; 3] {
        let mut r = [Matrix3::identity(); 3];
        for m in &self.rot_managers {
            r[m.axis.index()] = m.r;
        }
        r
    }

    /// Zeroes the forward image and every manager buffer
    pub fn reset_pass_buffers(&mut self) -> Result<()> {
        if self.state == EngineState::Uninitialized {
            return Err(SimError::NotInitialized);
        }
        self.check_dimensions()?;
        self.forward.data.iter_mut().for_each(|v| *v = 0.0);
        for m in &mut self.rot_managers {
            m.buffer.zero();
        }
        for m in &mut self.ucell_managers {
            m.buffer.zero();
        }
        self.state = EngineState::Ready;
        Ok(())
    }

    fn check_dimensions(&self) -> Result<()> {
        let expected = self.forward.shape();
        let shapes = self
            .rot_managers
            .iter()
            .map(|m| m.buffer.shape())
            .chain(self.ucell_managers.iter().map(|m| m.buffer.shape()));
        for found in shapes {
            if found != expected {
                return Err(SimError::RoiMismatch { expected, found });
            }
        }
        Ok(())
    }

    /// One simulation pass over the ROI. Each pixel is summed by a single
    /// worker; results are scattered into the buffers afterwards.
    pub fn run_pass(&mut self) -> Result<()> {
        match self.state {
            EngineState::Uninitialized => return Err(SimError::NotInitialized),
            EngineState::Configured | EngineState::Simulated => return Err(SimError::NotReset),
            EngineState::Ready => {}
        }
        if let Err(e) = self.check_dimensions().and_then(|_| self.precompute_orientation_samples()) {
            self.state = EngineState::Configured;
            return Err(e);
        }

        let start = Instant::now();
        let plan = self.plan.take().ok_or(SimError::NotInitialized)?;
        if plan.active.is_empty() {
            warn!("Running pass with no active managers");
        }
        let n_pixels = self.forward.len();

        let samples: Vec<PixelSample> = (0..n_pixels)
            .into_par_iter()
            .map(|idx| self.simulate_pixel(idx, &plan))
            .collect();

        let steps = (self.umats.len() * self.oversample * self.oversample) as f64;
        let scale = self.spot_scale * self.beam.fluence * R_E_SQR / steps;

        let result = self.scatter(&samples, &plan, scale);
        self.plan = Some(plan);
        if let Err(e) = result {
            self.state = EngineState::Configured;
            return Err(e);
        }
        self.state = EngineState::Simulated;

        debug!(
            "Pass over {} pixels with {} active manager(s) took {:.2?}, forward sum {:.4e}",
            n_pixels,
            self.plan.as_ref().map_or(0, |p| p.active.len()),
            start.elapsed(),
            self.forward.sum()
        );
        Ok(())
    }

    fn scatter(&mut self, samples: &[PixelSample], plan: &PassPlan, scale: f64) -> Result<()> {
        let active = &plan.active;
        let curvatures = plan.with_curvatures;
        let n_rot = self.rot_managers.len();
        for (idx, sample) in samples.iter().enumerate() {
            self.forward.data[idx] += sample.forward * scale;
            for (k, &handle) in active.iter().enumerate() {
                let buffer = if handle < n_rot {
                    &mut self.rot_managers[handle].buffer
                } else {
                    &mut self.ucell_managers[handle - n_rot].buffer
                };
                buffer.accumulate(idx, sample.derivatives[k] * scale)?;
                if curvatures {
                    buffer.accumulate_curvature(idx, sample.curvatures[k] * scale)?;
                }
            }
        }
        Ok(())
    }

    /// Every contribution to one ROI pixel: sub-pixel × channel × mosaic
    /// domain, each against its nearest reflection.
    fn simulate_pixel(&self, idx: usize, plan: &PassPlan) -> PixelSample {
        let (fast, slow) = self.roi.pixel(idx);
        let mut out = PixelSample {
            forward: 0.0,
            derivatives: [0.0; MAX_MANAGERS],
            curvatures: [0.0; MAX_MANAGERS],
        };
        let cells = self.ncells.product();

        for sub_s in 0..self.oversample {
            for sub_f in 0..self.oversample {
                let geom = SubpixelGeometry::new(&self.detector, fast, slow, sub_f, sub_s, self.oversample);

                for channel in &self.beam.spectrum {
                    let q = geom.scattering_vector(&self.incident, channel.wavelength);

                    for (domain, orientation) in plan.orientations.iter().enumerate() {
                        let h = orientation.tr_mul(&q);
                        let (hkl, delta_h) = nearest_reflection(&h);
                        let v = scaled_offset(&delta_h, &self.ncells);
                        let hrad = v.norm_squared();
                        if hrad * self.fudge / GAUSS_WIDTH > self.shape_cutoff {
                            continue;
                        }
                        let f_cell = self.structure_factors.get(hkl);
                        if f_cell == 0.0 {
                            continue;
                        }

                        let terms = ContributionTerms {
                            q,
                            v,
                            ncells: self.ncells,
                            f_cell,
                            f_latt: gauss_shape(hrad, self.fudge, cells),
                            source_i: channel.weight,
                            capture_fraction: geom.capture_fraction,
                            omega_pixel: geom.omega_pixel,
                            fudge: self.fudge,
                        };
                        out.forward += terms.intensity();

                        for (k, d_orient) in plan.derivatives.iter().enumerate() {
                            out.derivatives[k] += intensity_derivative(&d_orient[domain], &terms);
                        }
                        for (k, d2_orient) in plan.curvatures.iter().enumerate() {
                            out.curvatures[k] +=
                                intensity_curvature(&plan.derivatives[k][domain], &d2_orient[domain], &terms);
                        }
                    }
                }
            }
        }
        out
    }

    pub fn get_forward_image(&self) -> Result<&Image> {
        if self.state != EngineState::Simulated {
            return Err(SimError::NoCompletedPass);
        }
        Ok(&self.forward)
    }

    pub fn get_derivative_image(&self, handle: usize) -> Result<&Image> {
        let h = self.resolve(handle)?;
        if self.state != EngineState::Simulated {
            return Err(SimError::NoCompletedPass);
        }
        Ok(match h {
            Handle::Rotation(i) => &self.rot_managers[i].buffer.image,
            Handle::UnitCell(i) => &self.ucell_managers[i].buffer.image,
        })
    }

    /// Second-derivative image of `handle`, available when the last pass
    /// computed curvatures
    pub fn get_second_derivative_image(&self, handle: usize) -> Result<&Image> {
        let h = self.resolve(handle)?;
        if self.state != EngineState::Simulated {
            return Err(SimError::NoCompletedPass);
        }
        if self.plan.as_ref().map_or(true, |p| !p.with_curvatures) {
            return Err(SimError::CurvaturesDisabled);
        }
        Ok(match h {
            Handle::Rotation(i) => &self.rot_managers[i].buffer.curvature,
            Handle::UnitCell(i) => &self.ucell_managers[i].buffer.curvature,
        })
    }

    pub fn rotation_manager(&self, axis: RotationAxis) -> Option<&RotationManager> {
        self.rot_managers.iter().find(|m| m.axis == axis)
    }

    pub fn ucell_manager(&self, index: usize) -> Option<&UnitCellManager> {
        self.ucell_managers.get(index)
    }
}
