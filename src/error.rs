// src/error.rs
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum SimError {
    /// A buffer was requested with a zero dimension
    EmptyBuffer { rows: usize, cols: usize },
    IndexOutOfRange { index: usize, len: usize },
    /// A manager buffer does not match the forward image
    RoiMismatch { expected: (usize, usize), found: (usize, usize) },
    InvalidHandle { handle: usize, total: usize },
    CoefficientCount { expected: usize, found: usize },
    NotInitialized,
    NotReset,
    NoCompletedPass,
    /// Second-derivative images were requested from a pass that did not compute them
    CurvaturesDisabled,
    /// A unit-cell dB or d²B no longer matches the metric matrix in use
    StaleMetricDerivative { name: &'static str },
    DegenerateCell,
    InvalidConfig(String),
}

impl fmt::Display for SimError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SimError::EmptyBuffer { rows, cols } => {
                write!(f, "Buffer dimensions must be positive, got {}x{}", rows, cols)
            }
            SimError::IndexOutOfRange { index, len } => {
                write!(f, "Pixel index {} out of range for buffer of {} pixels", index, len)
            }
            SimError::RoiMismatch { expected, found } => write!(
                f,
                "ROI mismatch: forward image is {}x{}, manager buffer is {}x{}",
                expected.0, expected.1, found.0, found.1
            ),
            SimError::InvalidHandle { handle, total } => write!(
                f,
                "Refine handle {} is invalid (valid handles are 0..{})",
                handle, total
            ),
            SimError::CoefficientCount { expected, found } => write!(
                f,
                "Expected {} metric derivative coefficients, got {}",
                expected, found
            ),
            SimError::NotInitialized => write!(f, "Derivative managers have not been initialized"),
            SimError::NotReset => write!(f, "Pass buffers must be reset before running a pass"),
            SimError::NoCompletedPass => write!(f, "No pass has completed since the last reset"),
            SimError::CurvaturesDisabled => {
                write!(f, "Curvatures were not computed in the last pass")
            }
            SimError::StaleMetricDerivative { name } => write!(
                f,
                "Derivative matrix of '{}' predates the metric matrix override, set it explicitly",
                name
            ),
            SimError::DegenerateCell => write!(f, "Unit cell is degenerate (zero volume)"),
            SimError::InvalidConfig(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for SimError {}

pub type Result<T> = std::result::Result<T, SimError>;
